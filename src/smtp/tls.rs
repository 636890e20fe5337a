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

use std::{convert::TryFrom, io, sync::Arc};

use log::{debug, warn};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    ClientConfig, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName};
use tokio::{net::TcpStream, time};
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::{Error, SmtpClient};

use super::{reply::Reply, stream::Stream};

/// Trust settings for implicit TLS and STARTTLS.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    root_certificates: Vec<CertificateDer<'static>>,
    allow_invalid_certs: bool,
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trusts this certificate. Once any root is added, the bundled
    /// web PKI roots are no longer used.
    pub fn root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.root_certificates.push(certificate);
        self
    }

    /// Disables checking for certificate validity (dangerous and should not be used).
    pub fn allow_invalid_certs(mut self, allow_invalid_certs: bool) -> Self {
        self.allow_invalid_certs = allow_invalid_certs;
        self
    }

    pub fn has_root_certificates(&self) -> bool {
        !self.root_certificates.is_empty()
    }
}

impl SmtpClient {
    /// Upgrades the plaintext connection to TLS.
    ///
    /// Sends STARTTLS, expects 220 and performs the handshake over the same
    /// socket under its own timer. On success the plaintext transport is
    /// replaced by the TLS one and the reply framer starts afresh. A failed
    /// or timed out handshake leaves the connection unusable, so it is closed.
    pub async fn starttls(&mut self) -> crate::Result<Reply> {
        if self.secure {
            return Err(Error::AlreadySecure);
        }

        let reply = self.command("STARTTLS", &[220]).await?;

        let stream = match std::mem::take(&mut self.stream) {
            Stream::Basic(stream) => stream,
            _ => {
                self.close(true).await;
                return Err(Error::NoConnection);
            }
        };

        let result = time::timeout(
            self.config.timeout,
            handshake(
                &self.config.tls_options,
                &self.config.hostname,
                stream,
                Error::Io,
            ),
        )
        .await;

        match result {
            Ok(Ok(stream)) => {
                self.stream = Stream::Tls(Box::new(stream));
                self.reader.reset();
                self.secure = true;
                self.capabilities = None;
                debug!("Connection to {} secured with STARTTLS", self.config.hostname);
                Ok(reply)
            }
            Ok(Err(err)) => {
                debug!("STARTTLS handshake failed: {}", err);
                self.close(true).await;
                Err(err)
            }
            Err(_) => {
                warn!("Timed out during STARTTLS handshake");
                self.close(true).await;
                Err(Error::Timeout)
            }
        }
    }
}

/// Performs a client handshake over `stream`. Certificate verification
/// failures become [`Error::ConnectionAuth`], any other I/O failure is
/// passed to `on_io_error`.
pub(crate) async fn handshake(
    options: &TlsOptions,
    hostname: &str,
    stream: TcpStream,
    on_io_error: fn(io::Error) -> Error,
) -> crate::Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(hostname)
        .map_err(|_| Error::InvalidTlsName)?
        .to_owned();

    build_tls_connector(options)
        .connect(server_name, stream)
        .await
        .map_err(|err| map_handshake_error(err, on_io_error))
}

pub(crate) fn map_handshake_error(err: io::Error, on_io_error: fn(io::Error) -> Error) -> Error {
    if let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        if matches!(
            tls_err,
            rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
        ) {
            return Error::ConnectionAuth(tls_err.clone());
        }
    }

    on_io_error(err)
}

pub fn build_tls_connector(options: &TlsOptions) -> TlsConnector {
    let config = if !options.allow_invalid_certs {
        let mut root_cert_store = RootCertStore::empty();

        if options.root_certificates.is_empty() {
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            let (_, ignored) =
                root_cert_store.add_parsable_certificates(options.root_certificates.iter().cloned());
            if ignored > 0 {
                warn!("Ignored {} unparseable root certificates", ignored);
            }
        }

        ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DummyVerifier {}))
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

#[doc(hidden)]
#[derive(Debug)]
struct DummyVerifier;

impl ServerCertVerifier for DummyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

#[cfg(test)]
mod test {
    use std::{io, time::Duration};

    use rustls::CertificateError;

    use crate::{
        smtp::mock::{self_signed, MockServer, Step},
        Error, SessionState,
    };

    use super::{build_tls_connector, map_handshake_error, TlsOptions};

    #[test]
    fn handshake_error_mapping() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
        );
        assert!(matches!(
            map_handshake_error(err, Error::Io),
            Error::ConnectionAuth(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer
            ))
        ));

        let err = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::DecryptError);
        assert!(matches!(
            map_handshake_error(err, Error::CouldNotConnect),
            Error::CouldNotConnect(_)
        ));

        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(map_handshake_error(err, Error::Io), Error::Io(_)));
    }

    #[test]
    fn connector_variants() {
        let options = TlsOptions::new();
        assert!(!options.has_root_certificates());
        build_tls_connector(&options);
        build_tls_connector(&options.clone().allow_invalid_certs(true));

        let options = options.root_certificate(vec![0u8; 8].into());
        assert!(options.has_root_certificates());
        build_tls_connector(&options);
    }

    #[tokio::test]
    async fn starttls_refused() {
        let server = MockServer::start(vec![
            Step::Send("220 mock.test\r\n"),
            Step::Expect("STARTTLS"),
            Step::Send("454 TLS not available\r\n"),
            Step::Expect("QUIT"),
            Step::Send("221 Bye\r\n"),
        ])
        .await;
        let mut client = server.client().build();
        client.connect().await.unwrap();

        match client.starttls().await {
            Err(Error::UnexpectedReply { command, reply }) => {
                assert_eq!(command, "STARTTLS");
                assert_eq!(reply.code(), 454);
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.code())),
        }
        assert_eq!(client.state(), SessionState::Connected);
        assert!(!client.is_secure());

        client.quit().await.unwrap();
        server.transcript().await;
    }

    #[tokio::test]
    async fn starttls_handshake_timeout() {
        let server = MockServer::start(vec![
            Step::Send("220 mock.test\r\n"),
            Step::Expect("STARTTLS"),
            Step::Send("220 Go ahead\r\n"),
            Step::Stall(Duration::from_secs(10)),
        ])
        .await;
        let mut client = server.client().timeout(Duration::from_millis(300)).build();
        client.connect().await.unwrap();

        assert!(matches!(client.starttls().await, Err(Error::Timeout)));
        assert_eq!(client.state(), SessionState::NotConnected);
        assert!(!client.is_secure());
    }

    #[tokio::test]
    async fn starttls_only_once() {
        let server = MockServer::start(vec![Step::Send("220 mock.test\r\n")]).await;
        let mut client = server.client().build();
        client.connect().await.unwrap();

        client.secure = true;
        assert!(matches!(client.starttls().await, Err(Error::AlreadySecure)));
        assert_eq!(client.state(), SessionState::Connected);
        client.close(true).await;
    }

    #[tokio::test]
    async fn starttls_refreshes_capabilities() {
        let server = MockServer::start(vec![
            Step::Send("220 mock.test\r\n"),
            Step::Expect("EHLO client.test"),
            Step::Send("250-mock.test\r\n250 STARTTLS\r\n"),
            Step::Expect("STARTTLS"),
            Step::Send("220 Ready to start TLS\r\n"),
            Step::StartTls,
            Step::Expect("EHLO client.test"),
            Step::Send("250-mock.test\r\n250-AUTH PLAIN\r\n250 SIZE 1000\r\n"),
            Step::Expect("AUTH PLAIN AHRpbQB0YW5zdGFhZnRhbnN0YWFm"),
            Step::Send("235 OK\r\n"),
            Step::Expect("QUIT"),
            Step::Send("221 Bye\r\n"),
        ])
        .await;
        let mut client = server
            .client()
            .require_starttls(true)
            .tls_options(TlsOptions::new().allow_invalid_certs(true))
            .credentials("tim", "tanstaaftanstaaf")
            .build();
        client.connect().await.unwrap();
        assert!(!client.stream.is_tls());

        let reply = client.ehlo(None).await.unwrap();
        assert_eq!(reply.line_count(), 3);
        assert!(client.is_secure());
        assert!(client.stream.is_tls());
        assert!(client.has_extension("auth"));
        assert!(!client.has_extension("starttls"));
        assert_eq!(client.capabilities().unwrap().size(), Some(1000));

        // Already greeted over TLS, so AUTH follows directly
        client.login().await.unwrap();
        assert!(client.is_authenticated());

        client.quit().await.unwrap();
        assert!(!client.is_secure());
        assert_eq!(
            server.transcript().await,
            vec![
                "EHLO client.test",
                "STARTTLS",
                "EHLO client.test",
                "AUTH PLAIN AHRpbQB0YW5zdGFhZnRhbnN0YWFm",
                "QUIT"
            ]
        );
    }

    #[tokio::test]
    async fn starttls_discards_plaintext_after_ready() {
        let server = MockServer::start(vec![
            Step::Send("220 mock.test\r\n"),
            Step::Expect("STARTTLS"),
            Step::Send("220 Go\r\n250 injected\r\n"),
            Step::StartTls,
            Step::Expect("NOOP"),
            Step::Send("250 OK\r\n"),
            Step::Expect("QUIT"),
            Step::Send("221 Bye\r\n"),
        ])
        .await;
        let mut client = server
            .client()
            .tls_options(TlsOptions::new().allow_invalid_certs(true))
            .build();
        client.connect().await.unwrap();

        assert_eq!(client.starttls().await.unwrap().text(), "Go");
        assert!(client.is_secure());
        assert!(!client.reader.has_pending());

        assert_eq!(client.noop().await.unwrap().text(), "OK");
        client.quit().await.unwrap();
        assert_eq!(server.transcript().await, vec!["STARTTLS", "NOOP", "QUIT"]);
    }

    #[tokio::test]
    async fn implicit_tls_session() {
        let server = MockServer::start(vec![
            Step::StartTls,
            Step::Send("220 mock.test ESMTP\r\n"),
            Step::Expect("NOOP"),
            Step::Send("250 OK\r\n"),
            Step::Expect("QUIT"),
            Step::Send("221 Bye\r\n"),
        ])
        .await;
        let mut client = server
            .client()
            .implicit_tls(true)
            .tls_options(TlsOptions::new().allow_invalid_certs(true))
            .build();

        assert_eq!(client.connect().await.unwrap().text(), "mock.test ESMTP");
        assert!(client.is_secure());
        assert!(client.stream.is_tls());
        assert!(matches!(client.starttls().await, Err(Error::AlreadySecure)));

        client.noop().await.unwrap();
        client.quit().await.unwrap();
        assert_eq!(server.transcript().await, vec!["NOOP", "QUIT"]);
    }

    #[tokio::test]
    async fn implicit_tls_untrusted_certificate() {
        let server = MockServer::start(vec![
            Step::StartTls,
            Step::Send("220 mock.test\r\n"),
        ])
        .await;
        let (unrelated, _) = self_signed("other.test");
        let mut client = server
            .client()
            .implicit_tls(true)
            .tls_options(TlsOptions::new().root_certificate(unrelated))
            .build();

        match client.connect().await {
            Err(err @ Error::ConnectionAuth(_)) => assert!(err.is_transport_error()),
            other => panic!("unexpected result {:?}", other.map(|r| r.code())),
        }
        assert_eq!(client.state(), SessionState::NotConnected);
        assert!(!client.is_secure());

        let transcript = server.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].starts_with("<handshake failed"));
    }
}
