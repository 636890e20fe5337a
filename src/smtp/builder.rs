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

use std::time::Duration;

use crate::{SessionState, SmtpClient, SmtpClientBuilder};

use super::{
    auth::{Credentials, Mechanism},
    reply::ReplyReader,
    stream::Stream,
    tls::TlsOptions,
};

pub const SMTP_PORT: u16 = 25;
pub const SMTP_SSL_PORT: u16 = 465;
pub const SMTP_TLS_PORT: u16 = 587;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

impl SmtpClientBuilder {
    pub fn new(hostname: impl Into<String>) -> Self {
        SmtpClientBuilder {
            hostname: hostname.into(),
            port: 0,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
            timeout: DEFAULT_TIMEOUT,
            implicit_tls: false,
            require_starttls: false,
            tls_options: TlsOptions::default(),
            credentials: None,
            auth_method: None,
        }
    }

    /// Sets the SMTP port. When unset, the port is chosen by connection mode.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the EHLO/HELO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the timeout shared by the connect, handshake and reply timers.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start the connection in TLS
    pub fn implicit_tls(mut self, implicit_tls: bool) -> Self {
        self.implicit_tls = implicit_tls;
        self
    }

    /// Upgrade the connection with STARTTLS after the first EHLO
    pub fn require_starttls(mut self, require_starttls: bool) -> Self {
        self.require_starttls = require_starttls;
        self
    }

    /// Trust settings used by both implicit TLS and STARTTLS.
    pub fn tls_options(mut self, tls_options: TlsOptions) -> Self {
        self.tls_options = tls_options;
        self
    }

    /// Authentication credentials.
    pub fn credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, secret));
        self
    }

    /// Forces an authentication mechanism instead of negotiating one.
    pub fn auth_method(mut self, mechanism: Mechanism) -> Self {
        self.auth_method = Some(mechanism);
        self
    }

    /// Returns the configured port, or the default for the connection mode.
    pub fn effective_port(&self) -> u16 {
        if self.port > 0 {
            self.port
        } else if self.implicit_tls {
            SMTP_SSL_PORT
        } else if self.require_starttls {
            SMTP_TLS_PORT
        } else {
            SMTP_PORT
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn helo_hostname(&self) -> &str {
        &self.local_host
    }

    /// Creates a disconnected session with this configuration.
    pub fn build(self) -> SmtpClient {
        SmtpClient {
            config: self,
            stream: Stream::None,
            reader: ReplyReader::new(),
            state: SessionState::NotConnected,
            secure: false,
            authenticated: false,
            capabilities: None,
            debug_level: 0,
        }
    }
}
