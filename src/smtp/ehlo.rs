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

use std::{collections::HashMap, convert::TryFrom};

use log::debug;

use crate::{Error, SmtpClient};

use super::{auth::Mechanism, reply::Reply};

/// Extensions advertised in an EHLO reply, keyed by lower-cased keyword.
/// Each keyword maps to its parameter string, if it has one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    extensions: HashMap<String, Option<String>>,
}

impl Capabilities {
    pub fn parse(reply: &Reply) -> Self {
        let mut capabilities = Capabilities::default();
        for line in reply.message() {
            capabilities.add_line(line);
        }
        capabilities
    }

    fn add_line(&mut self, line: &str) {
        let line = line.trim();
        let (keyword, params) = match line.split_once(char::is_whitespace) {
            Some((keyword, params)) => (keyword, params.trim()),
            None => (line, ""),
        };
        if keyword.is_empty() {
            return;
        }

        // Old-style "AUTH=LOGIN PLAIN" advertisement
        if let Some(first) = keyword
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("auth="))
            .and_then(|_| keyword.get(5..))
            .filter(|first| !first.is_empty())
        {
            let mut mechanisms = self
                .get("auth")
                .map(|params| params.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(Vec::new);
            for mechanism in std::iter::once(first).chain(params.split_whitespace()) {
                if !mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mechanism)) {
                    mechanisms.push(mechanism.to_string());
                }
            }
            self.extensions
                .insert("auth".to_string(), Some(mechanisms.join(" ")));
            return;
        }

        self.extensions.insert(
            keyword.to_ascii_lowercase(),
            if !params.is_empty() {
                Some(params.to_string())
            } else {
                None
            },
        );
    }

    /// Returns `true` if the server advertised `keyword`.
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.extensions.contains_key(&keyword.to_ascii_lowercase())
    }

    /// Returns the parameters advertised with `keyword`, if any.
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.extensions
            .get(&keyword.to_ascii_lowercase())
            .and_then(|params| params.as_deref())
    }

    /// Supported authentication mechanisms, most preferred first.
    pub fn auth_mechanisms(&self) -> Vec<Mechanism> {
        let mut mechanisms = self
            .get("auth")
            .map(|params| {
                params
                    .split_whitespace()
                    .filter_map(|mechanism| Mechanism::try_from(mechanism).ok())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        mechanisms.sort_unstable();
        mechanisms.dedup();
        mechanisms
    }

    /// Maximum message size from the SIZE extension.
    pub fn size(&self) -> Option<usize> {
        self.get("size").and_then(|size| size.parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.extensions
            .iter()
            .map(|(keyword, params)| (keyword.as_str(), params.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl SmtpClient {
    /// Sends a HELO command to the server.
    pub async fn helo(&mut self, domain: Option<&str>) -> crate::Result<Reply> {
        let domain = domain.unwrap_or(&self.config.local_host).to_string();
        self.command(&format!("HELO {}", domain), &[250]).await
    }

    /// Sends an EHLO command and records the advertised extensions.
    ///
    /// When STARTTLS is required and the session is not yet secure, the
    /// connection is upgraded and EHLO is repeated over TLS; the returned
    /// reply and the recorded extensions are then the post-upgrade ones.
    pub async fn ehlo(&mut self, domain: Option<&str>) -> crate::Result<Reply> {
        let domain = domain.unwrap_or(&self.config.local_host).to_string();
        let mut reply = self.command(&format!("EHLO {}", domain), &[250]).await?;
        self.capabilities = Some(Capabilities::parse(&reply));

        if self.config.require_starttls && !self.secure {
            // Plaintext extensions must not be used once TLS is required
            if let Err(err) = self.starttls().await {
                self.capabilities = None;
                return Err(err);
            }
            reply = self.command(&format!("EHLO {}", domain), &[250]).await?;
            self.capabilities = Some(Capabilities::parse(&reply));
        }

        Ok(reply)
    }

    /// Greets the server unless that already happened on this connection.
    ///
    /// EHLO is tried first; if the server rejects it, HELO is sent instead
    /// and the session continues with no extensions.
    pub async fn ehlo_or_helo_if_needed(&mut self, domain: Option<&str>) -> crate::Result<()> {
        if self.capabilities.is_some() {
            return Ok(());
        }

        match self.ehlo(domain).await {
            Ok(_) => Ok(()),
            Err(Error::UnexpectedReply { command, reply }) if command == "EHLO" => {
                debug!("EHLO rejected ({}), falling back to HELO", reply);
                self.helo(domain).await?;
                self.capabilities = Some(Capabilities::default());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns `true` if the last EHLO advertised `keyword`.
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.capabilities
            .as_ref()
            .map_or(false, |capabilities| capabilities.has_extension(keyword))
    }
}
