/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::io;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::client::TlsStream;

/// The socket owned by a session: plaintext, TLS (implicit or upgraded),
/// or nothing while disconnected.
#[doc(hidden)]
#[derive(Default)]
pub enum Stream {
    Basic(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[default]
    None,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no connection has been established")
}

impl Stream {
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Basic(stream) => stream.read(buf).await,
            Stream::Tls(stream) => stream.read(buf).await,
            Stream::None => Err(not_connected()),
        }
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Stream::Basic(stream) => stream.write_all(bytes).await,
            Stream::Tls(stream) => stream.write_all(bytes).await,
            Stream::None => Err(not_connected()),
        }
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Basic(stream) => stream.flush().await,
            Stream::Tls(stream) => stream.flush().await,
            Stream::None => Err(not_connected()),
        }
    }

    /// Shuts down the write side, sending FIN (and close_notify over TLS).
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Stream::Basic(stream) => stream.shutdown().await,
            Stream::Tls(stream) => stream.shutdown().await,
            Stream::None => Ok(()),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Stream::None)
    }
}
