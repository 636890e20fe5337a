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

//! Scripted loopback SMTP server for protocol tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

use crate::SmtpClientBuilder;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum Step {
    /// Read one line and compare it, without the line ending.
    Expect(&'static str),
    /// Write bytes to the client.
    Send(&'static str),
    /// Write each fragment separately, pausing in between.
    SendChunks(&'static [&'static str]),
    /// Do nothing for a while, keeping the socket open.
    Stall(Duration),
    /// Hang up.
    Close,
    /// Run a server-side TLS handshake with a self-signed certificate for
    /// `mock.test`. Used first for implicit TLS or after `220` for STARTTLS.
    /// A failed handshake ends the connection.
    StartTls,
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

type Connection = BufReader<Box<dyn Io>>;

pub(crate) struct MockServer {
    addr: SocketAddr,
    handle: JoinHandle<Vec<String>>,
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A freshly generated self-signed certificate and its PKCS#8 key.
pub(crate) fn self_signed(hostname: &str) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
    (
        cert.der().clone(),
        PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
    )
}

fn tls_acceptor() -> TlsAcceptor {
    let (cert, key) = self_signed("mock.test");
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

impl MockServer {
    /// Serves a single connection.
    pub async fn start(script: Vec<Step>) -> MockServer {
        Self::start_many(vec![script]).await
    }

    /// Serves one connection per script, in order.
    pub async fn start_many(scripts: Vec<Vec<Step>>) -> MockServer {
        init_logger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let acceptor = tls_acceptor();
        let handle = tokio::spawn(async move {
            let mut transcript = Vec::new();

            'connections: for script in scripts {
                let (socket, _) = listener.accept().await.unwrap();
                let mut conn: Connection = BufReader::new(Box::new(socket) as Box<dyn Io>);
                let mut closed = false;

                for step in script {
                    match step {
                        Step::Expect(expected) => {
                            let mut line = String::new();
                            tokio::time::timeout(STEP_TIMEOUT, conn.read_line(&mut line))
                                .await
                                .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
                                .unwrap();
                            let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
                            assert_eq!(line, expected);
                            transcript.push(line);
                        }
                        Step::Send(bytes) => {
                            conn.write_all(bytes.as_bytes()).await.unwrap();
                            conn.flush().await.unwrap();
                        }
                        Step::SendChunks(chunks) => {
                            for chunk in chunks {
                                conn.write_all(chunk.as_bytes()).await.unwrap();
                                conn.flush().await.unwrap();
                                tokio::time::sleep(Duration::from_millis(20)).await;
                            }
                        }
                        Step::Stall(duration) => {
                            tokio::time::sleep(duration).await;
                        }
                        Step::Close => {
                            closed = true;
                            break;
                        }
                        Step::StartTls => {
                            // The client sends nothing between STARTTLS and the handshake
                            assert!(conn.buffer().is_empty());
                            match acceptor.accept(conn.into_inner()).await {
                                Ok(stream) => conn = BufReader::new(Box::new(stream) as Box<dyn Io>),
                                Err(err) => {
                                    transcript.push(format!("<handshake failed: {err}>"));
                                    continue 'connections;
                                }
                            }
                        }
                    }
                }

                // Record anything else the client sends until it hangs up
                while !closed {
                    let mut line = String::new();
                    match tokio::time::timeout(STEP_TIMEOUT, conn.read_line(&mut line)).await {
                        Ok(Ok(n)) if n > 0 => {
                            transcript.push(line.trim_end_matches(&['\r', '\n'][..]).to_string())
                        }
                        _ => closed = true,
                    }
                }
            }

            transcript
        });

        MockServer { addr, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A client configuration pointing at this server.
    pub fn client(&self) -> SmtpClientBuilder {
        SmtpClientBuilder::new("127.0.0.1")
            .port(self.port())
            .helo_host("client.test")
            .timeout(Duration::from_secs(2))
    }

    /// Waits for every scripted connection to finish and returns the lines received.
    pub async fn transcript(self) -> Vec<String> {
        self.handle.await.unwrap()
    }
}
