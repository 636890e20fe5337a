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

use log::{debug, warn};
use tokio::time;

use crate::{Error, SessionState, SmtpClient};

use super::{reply::Reply, AssertReply};

impl SmtpClient {
    /// Sends a MAIL FROM command to the server. `from` is sent as is,
    /// including the angle brackets.
    pub async fn mail(&mut self, from: &str) -> crate::Result<Reply> {
        self.command(&format!("MAIL FROM:{}", from), &[250]).await
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt(&mut self, to: &str) -> crate::Result<Reply> {
        self.command(&format!("RCPT TO:{}", to), &[250, 251]).await
    }

    /// Sends a DATA command to the server.
    pub async fn data(&mut self) -> crate::Result<Reply> {
        self.command("DATA", &[354]).await
    }

    /// Writes message bytes after [`SmtpClient::data`]. No reply is read.
    ///
    /// The bytes are written verbatim, so the body must already use CRLF
    /// line endings and have its leading dots doubled.
    pub async fn write_message(&mut self, message: &[u8]) -> crate::Result<()> {
        if self.state != SessionState::Connected || self.stream.is_none() {
            self.close(true).await;
            return Err(Error::NoConnection);
        }
        if self.debug_level > 0 {
            debug!("C: <{} bytes of message data>", message.len());
        }

        let result = time::timeout(self.config.timeout, async {
            self.stream.write_all(message).await?;
            self.stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                debug!("Closing connection after write error: {}", err);
                self.close(true).await;
                Err(Error::Io(err))
            }
            Err(_) => {
                warn!("Timed out writing message to {}", self.config.hostname);
                self.close(true).await;
                Err(Error::Timeout)
            }
        }
    }

    /// Terminates the message data and waits for the server to accept it.
    pub async fn data_end(&mut self) -> crate::Result<Reply> {
        if self.debug_level > 0 {
            debug!("C: .");
        }
        self.send(b"\r\n.\r\n").await?.assert_code("DATA", &[250])
    }

    /// Sends a VRFY command to the server.
    pub async fn verify(&mut self, address: &str) -> crate::Result<Reply> {
        self.command(&format!("VRFY {}", address), &[250, 251, 252])
            .await
    }

    /// Sends an EXPN command to the server.
    pub async fn expn(&mut self, address: &str) -> crate::Result<Reply> {
        self.command(&format!("EXPN {}", address), &[250]).await
    }

    /// Sends a NOOP command to the server.
    pub async fn noop(&mut self) -> crate::Result<Reply> {
        self.command("NOOP", &[250]).await
    }

    /// Sends a RSET command to the server.
    pub async fn rset(&mut self) -> crate::Result<Reply> {
        self.command("RSET", &[250]).await
    }

    /// Sends a HELP command, optionally about `topic`.
    pub async fn help(&mut self, topic: Option<&str>) -> crate::Result<Reply> {
        match topic {
            Some(topic) => self.command(&format!("HELP {}", topic), &[211, 214]).await,
            None => self.command("HELP", &[211, 214]).await,
        }
    }
}
