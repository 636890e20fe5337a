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

use log::{debug, warn};
use tokio::{net::TcpStream, time};

use crate::{Error, SessionState, SmtpClient};

use super::{ehlo::Capabilities, reply::Reply, stream::Stream, tls, AssertReply};

impl SmtpClient {
    /// Opens the connection and waits for the 220 greeting.
    ///
    /// A session that is not disconnected is first closed with `QUIT`. The
    /// whole phase (TCP connect, implicit TLS handshake and greeting) runs
    /// under the configured timeout.
    pub async fn connect(&mut self) -> crate::Result<Reply> {
        if self.state != SessionState::NotConnected {
            let _ = self.quit().await;
        }

        self.state = SessionState::Connecting;

        match time::timeout(self.config.timeout, self.open()).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                debug!(
                    "Connection to {}:{} failed: {}",
                    self.config.hostname,
                    self.config.effective_port(),
                    err
                );
                self.close(true).await;
                Err(err)
            }
            Err(_) => {
                warn!(
                    "Timed out while connecting to {}:{}",
                    self.config.hostname,
                    self.config.effective_port()
                );
                self.close(true).await;
                Err(Error::Timeout)
            }
        }
    }

    async fn open(&mut self) -> crate::Result<Reply> {
        let port = self.config.effective_port();
        let stream = TcpStream::connect((self.config.hostname.as_str(), port))
            .await
            .map_err(Error::CouldNotConnect)?;

        self.reader.reset();
        if self.config.implicit_tls {
            let stream = tls::handshake(
                &self.config.tls_options,
                &self.config.hostname,
                stream,
                Error::CouldNotConnect,
            )
            .await?;
            self.stream = Stream::Tls(Box::new(stream));
            self.secure = true;
        } else {
            self.stream = Stream::Basic(stream);
        }

        // Read greeting
        let reply = self
            .read()
            .await
            .map_err(|err| match err {
                Error::Io(err) => Error::CouldNotConnect(err),
                err => err,
            })?
            .assert_code("CONNECT", &[220])?;

        self.state = SessionState::Connected;
        debug!(
            "Connected to {}:{} (secure: {})",
            self.config.hostname, port, self.secure
        );

        Ok(reply)
    }

    /// Reads the next complete reply from the transport.
    pub(crate) async fn read(&mut self) -> crate::Result<Reply> {
        let mut buf = [0u8; 1024];

        loop {
            if let Some(reply) = self.reader.next_reply()? {
                if self.debug_level > 0 {
                    debug!("S: {}", reply);
                }
                return Ok(reply);
            }

            let br = self.stream.read(&mut buf).await?;
            if br == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }

            self.reader.feed(&buf[..br]);
        }
    }

    /// Writes raw bytes and waits for the reply they produce.
    ///
    /// Any transport failure, a malformed reply or an expired timer closes
    /// the session before the error is returned.
    pub async fn send(&mut self, bytes: &[u8]) -> crate::Result<Reply> {
        if self.state != SessionState::Connected || self.stream.is_none() {
            self.close(true).await;
            return Err(Error::NoConnection);
        }

        let result = time::timeout(self.config.timeout, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await;

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                debug!("Closing connection after transport error: {}", err);
                self.close(true).await;
                Err(err)
            }
            Err(_) => {
                warn!("Timed out waiting for a reply from {}", self.config.hostname);
                self.close(true).await;
                Err(Error::Timeout)
            }
        }
    }

    /// Sends a command line and checks the reply code against `codes`.
    ///
    /// A reply with an unexpected code is returned as
    /// [`Error::UnexpectedReply`] and leaves the session connected.
    pub async fn command(&mut self, cmd: &str, codes: &[u16]) -> crate::Result<Reply> {
        if self.debug_level > 0 {
            debug!("C: {}", cmd);
        }
        let verb = cmd.split(' ').next().unwrap_or_default().to_ascii_uppercase();
        self.send(format!("{}\r\n", cmd).as_bytes())
            .await?
            .assert_code(&verb, codes)
    }

    /// Sends a QUIT command and closes the connection, whatever the outcome.
    pub async fn quit(&mut self) -> crate::Result<Reply> {
        let result = self.command("QUIT", &[221, 250]).await;
        self.close(false).await;
        result
    }

    /// Closes the connection and resets the session.
    ///
    /// With `force` the socket is dropped immediately, otherwise its write
    /// side is shut down first.
    pub async fn close(&mut self, force: bool) {
        let mut stream = std::mem::take(&mut self.stream);
        if !force && !stream.is_none() {
            match time::timeout(self.config.timeout, stream.shutdown()).await {
                Ok(Ok(())) => (),
                Ok(Err(err)) => debug!("Error shutting down connection: {}", err),
                Err(_) => debug!("Timed out shutting down connection"),
            }
        }
        drop(stream);

        if self.state != SessionState::NotConnected {
            debug!("Connection to {} closed", self.config.hostname);
        }

        self.reader.reset();
        self.state = SessionState::NotConnected;
        self.secure = false;
        self.authenticated = false;
        self.capabilities = None;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Server extensions learned from the last successful EHLO.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Sets the wire trace level. Any non-zero level logs every command and
    /// reply at `debug` level.
    pub fn set_debug_level(&mut self, level: u8) {
        self.debug_level = level;
    }
}
