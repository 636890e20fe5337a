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

//! # mail-submit
//!
//! _mail-submit_ is an asynchronous SMTP submission client. It drives a single
//! connection to a mail relay through the command/reply sequence needed to
//! hand over a message envelope:
//!
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) envelope commands
//!   (`MAIL`, `RCPT`, `DATA`, `VRFY`, `EXPN`, `NOOP`, `RSET`, `HELP`, `QUIT`).
//! - EHLO capability discovery with HELO fallback for legacy servers.
//! - Implicit TLS (port 465) and in-band **STARTTLS** upgrade (_RFC 3207_).
//! - SMTP Service Extension for Authentication (_RFC 4954_) with automatic
//!   mechanism negotiation (from most secure to least secure):
//!   - CRAM-MD5 (_RFC 2195_)
//!   - LOGIN
//!   - PLAIN
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! ```rust
//!     let mut client = SmtpClientBuilder::new("smtp.example.com")
//!         .require_starttls(true)
//!         .credentials("john", "p4ssw0rd")
//!         .build();
//!
//!     client.connect().await?;
//!     client.login().await?;
//!     client.mail("<john@example.com>").await?;
//!     client.rcpt("<jane@example.com>").await?;
//!     client.data().await?;
//!     client.write_message(b"Subject: Hi!\r\n\r\nHello world!").await?;
//!     client.data_end().await?;
//!     client.quit().await?;
//! ```
//!
//! The message body handed to [`SmtpClient::write_message`] is sent verbatim:
//! line endings must already be CRLF and leading dots already doubled.
//!
//! ## Implicit TLS versus STARTTLS
//!
//! Implicit TLS encrypts the session from the first byte and should be
//! preferred whenever the relay offers it. STARTTLS wraps the already open
//! plaintext socket in a TLS session (no renegotiation), after which the old
//! transport is discarded and every capability learned before the upgrade is
//! refreshed with a second EHLO.

pub mod smtp;

use std::{fmt::Display, time::Duration};

use smtp::{
    auth::{Credentials, Mechanism},
    ehlo::Capabilities,
    reply::{Reply, ReplyReader},
    stream::Stream,
    tls::TlsOptions,
};

#[derive(Debug)]
pub enum Error {
    /// I/O error on an established connection.
    Io(std::io::Error),

    /// The TCP connection (or the implicit TLS handshake) could not be established.
    CouldNotConnect(std::io::Error),

    /// The server certificate could not be verified.
    ConnectionAuth(rustls::Error),

    /// Connection or TLS handshake timeout.
    Timeout,

    /// Command issued while not connected.
    NoConnection,

    /// Base64 decode error
    Base64(base64::DecodeError),

    /// SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply(smtp::reply::Error),

    /// The server replied with a code outside the expected set.
    UnexpectedReply { command: String, reply: Reply },

    /// SMTP authentication failure.
    AuthenticationFailed(Reply),

    /// The authentication exchange was cut short by the wrapped error.
    AuthenticationAborted(Box<Error>),

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Missing authentication credentials.
    MissingCredentials,

    /// Invalid TLS name provided.
    InvalidTlsName,

    /// The connection is already encrypted.
    AlreadySecure,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Connecting,
    Connected,
}

/// SMTP client configuration.
#[derive(Debug, Clone)]
pub struct SmtpClientBuilder {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) local_host: String,
    pub(crate) timeout: Duration,
    pub(crate) implicit_tls: bool,
    pub(crate) require_starttls: bool,
    pub(crate) tls_options: TlsOptions,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) auth_method: Option<Mechanism>,
}

/// SMTP session over a single connection.
pub struct SmtpClient {
    pub(crate) config: SmtpClientBuilder,
    pub(crate) stream: Stream,
    pub(crate) reader: ReplyReader,
    pub(crate) state: SessionState,
    pub(crate) secure: bool,
    pub(crate) authenticated: bool,
    pub(crate) capabilities: Option<Capabilities>,
    pub(crate) debug_level: u8,
}

impl Error {
    /// Returns `true` if the error was caused by the transport rather than
    /// by the content of a reply. Such errors always close the session.
    pub fn is_transport_error(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::CouldNotConnect(_)
            | Error::ConnectionAuth(_)
            | Error::Timeout
            | Error::NoConnection => true,
            Error::AuthenticationAborted(cause) => cause.is_transport_error(),
            _ => false,
        }
    }

    /// Returns `true` if a login attempt failed, whether the server rejected
    /// the credentials or the exchange could not be completed.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed(_) | Error::AuthenticationAborted(_)
        )
    }

    /// Returns the server reply carried by this error, if any.
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Error::UnexpectedReply { reply, .. } | Error::AuthenticationFailed(reply) => {
                Some(reply)
            }
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::CouldNotConnect(e) => write!(f, "Could not connect to SMTP server: {}", e),
            Error::ConnectionAuth(e) => {
                write!(f, "Could not establish an authenticated TLS connection: {}", e)
            }
            Error::Timeout => write!(f, "Connection timeout"),
            Error::NoConnection => write!(f, "No connection has been established"),
            Error::Base64(e) => write!(f, "Base64 decode error: {}", e),
            Error::Auth(e) => write!(f, "SMTP authentication error: {}", e),
            Error::UnparseableReply(e) => write!(f, "Unparseable SMTP reply: {}", e),
            Error::UnexpectedReply { command, reply } => {
                write!(f, "Bad response on command '{}': {}", command, reply)
            }
            Error::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            Error::AuthenticationAborted(e) => write!(f, "Authentication failed: {}", e),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::MissingCredentials => write!(f, "Missing authentication credentials"),
            Error::InvalidTlsName => write!(f, "Invalid TLS name provided"),
            Error::AlreadySecure => write!(f, "Connection is already secure"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::CouldNotConnect(e) => Some(e),
            Error::ConnectionAuth(e) => Some(e),
            Error::Base64(e) => Some(e),
            Error::AuthenticationAborted(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}

impl From<smtp::reply::Error> for Error {
    fn from(err: smtp::reply::Error) -> Self {
        Error::UnparseableReply(err)
    }
}
