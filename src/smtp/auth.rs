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

use std::{convert::TryFrom, fmt::Display};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;

use crate::SmtpClient;

use super::{reply::Reply, AssertReply};

/// Username and secret used by [`SmtpClient::login`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl<'x> From<(&'x str, &'x str)> for Credentials {
    fn from(credentials: (&'x str, &'x str)) -> Self {
        Credentials::new(credentials.0, credentials.1)
    }
}

impl From<(String, String)> for Credentials {
    fn from(credentials: (String, String)) -> Self {
        Credentials::new(credentials.0, credentials.1)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid authentication challenge"),
        }
    }
}

/// Authentication mechanism, ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// Challenge-Response Authentication Mechanism (CRAM)
    #[cfg(feature = "cram-md5")]
    CramMD5 = 1,

    /// Login
    Login = 2,

    /// Plain
    Plain = 3,
}

impl TryFrom<&str> for Mechanism {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_uppercase().as_str() {
            #[cfg(feature = "cram-md5")]
            "CRAM-MD5" => Ok(Mechanism::CramMD5),
            "LOGIN" => Ok(Mechanism::Login),
            "PLAIN" => Ok(Mechanism::Plain),
            _ => Err(()),
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => write!(f, "CRAM-MD5"),
            Mechanism::Login => write!(f, "LOGIN"),
            Mechanism::Plain => write!(f, "PLAIN"),
        }
    }
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base64 response to `challenge` for `mechanism`. An empty challenge
    /// produces the initial response.
    pub(crate) fn encode(&self, mechanism: Mechanism, challenge: &str) -> crate::Result<String> {
        Ok(STANDARD.encode(match mechanism {
            Mechanism::Plain => format!("\u{0}{}\u{0}{}", self.username, self.secret),

            // The username goes in the initial response, every challenge
            // after it is answered with the password
            Mechanism::Login => {
                if challenge.is_empty() {
                    self.username.clone()
                } else {
                    self.secret.clone()
                }
            }

            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => {
                let challenge = STANDARD.decode(challenge)?;
                if challenge.is_empty() {
                    return Err(Error::InvalidChallenge.into());
                }
                format!(
                    "{} {:x}",
                    self.username,
                    hmac_md5(self.secret.as_bytes(), &challenge)
                )
            }
        }))
    }
}

#[cfg(feature = "cram-md5")]
fn hmac_md5(key: &[u8], message: &[u8]) -> md5::Digest {
    let mut secret_ipad = [0x36u8; 64];
    let mut secret_opad = [0x5cu8; 64];

    let hashed_key;
    let key = if key.len() > 64 {
        hashed_key = md5::compute(key);
        &hashed_key.0[..]
    } else {
        key
    };
    for (pos, byte) in key.iter().enumerate() {
        secret_ipad[pos] ^= byte;
        secret_opad[pos] ^= byte;
    }

    let mut inner = md5::Context::new();
    inner.consume(secret_ipad);
    inner.consume(message);
    let inner = inner.compute();

    let mut outer = md5::Context::new();
    outer.consume(secret_opad);
    outer.consume(inner.0);
    outer.compute()
}

impl SmtpClient {
    /// Authenticates with the credentials and mechanism set on the builder.
    pub async fn login(&mut self) -> crate::Result<Reply> {
        let credentials = self
            .config
            .credentials
            .clone()
            .ok_or(crate::Error::MissingCredentials)?;
        let method = self.config.auth_method;
        self.authenticate(&credentials, method).await
    }

    /// Authenticates the session.
    ///
    /// Greets the server first if needed, then picks the most preferred
    /// advertised mechanism unless `method` forces one. A rejection is
    /// reported as [`crate::Error::AuthenticationFailed`] and leaves the
    /// session connected and unauthenticated. Any other failure during the
    /// exchange is wrapped in [`crate::Error::AuthenticationAborted`]; if it
    /// was a transport failure the session is already closed.
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        method: Option<Mechanism>,
    ) -> crate::Result<Reply> {
        self.ehlo_or_helo_if_needed(None).await?;

        let mechanism = match method {
            Some(mechanism) => mechanism,
            None => self
                .capabilities
                .as_ref()
                .and_then(|capabilities| capabilities.auth_mechanisms().first().copied())
                .ok_or(crate::Error::UnsupportedAuthMechanism)?,
        };
        debug!(
            "Authenticating as {} using {}",
            credentials.username(),
            mechanism
        );

        self.authenticated = false;
        match self.auth_exchange(credentials, mechanism).await {
            Ok(reply) if reply.code() == 235 => {
                self.authenticated = true;
                Ok(reply)
            }
            Ok(reply) => Err(crate::Error::AuthenticationFailed(reply)),
            Err(crate::Error::UnexpectedReply { reply, .. }) => {
                if reply.code() == 334 {
                    self.cancel_auth().await;
                }
                Err(crate::Error::AuthenticationFailed(reply))
            }
            Err(err) => {
                debug!("Authentication using {} aborted: {}", mechanism, err);
                Err(crate::Error::AuthenticationAborted(Box::new(err)))
            }
        }
    }

    async fn auth_exchange(
        &mut self,
        credentials: &Credentials,
        mechanism: Mechanism,
    ) -> crate::Result<Reply> {
        match mechanism {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => {
                let challenge = self
                    .auth_command("AUTH CRAM-MD5", "AUTH CRAM-MD5", &[334])
                    .await?;
                let response = match credentials.encode(mechanism, challenge.text().trim()) {
                    Ok(response) => response,
                    Err(err) => {
                        self.cancel_auth().await;
                        return Err(err);
                    }
                };
                self.auth_command(&response, "<redacted>", &[235, 503])
                    .await
            }
            Mechanism::Login => {
                let challenge = self
                    .auth_command(
                        &format!("AUTH LOGIN {}", credentials.encode(mechanism, "")?),
                        "AUTH LOGIN <redacted>",
                        &[334],
                    )
                    .await?;
                let response = credentials.encode(mechanism, challenge.text().trim())?;
                self.auth_command(&response, "<redacted>", &[235, 503])
                    .await
            }
            Mechanism::Plain => {
                self.auth_command(
                    &format!("AUTH PLAIN {}", credentials.encode(mechanism, "")?),
                    "AUTH PLAIN <redacted>",
                    &[235, 503],
                )
                .await
            }
        }
    }

    async fn auth_command(
        &mut self,
        line: &str,
        redacted: &str,
        codes: &[u16],
    ) -> crate::Result<Reply> {
        if self.debug_level > 0 {
            debug!("C: {}", redacted);
        }
        self.send(format!("{}\r\n", line).as_bytes())
            .await?
            .assert_code("AUTH", codes)
    }

    /// Aborts an exchange the server is still waiting on.
    async fn cancel_auth(&mut self) {
        if self.debug_level > 0 {
            debug!("C: *");
        }
        if let Ok(reply) = self.send(b"*\r\n").await {
            debug!("Authentication exchange cancelled: {}", reply);
        }
    }
}
