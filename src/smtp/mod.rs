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

use self::reply::Reply;

pub mod auth;
pub mod builder;
pub mod client;
pub mod ehlo;
pub mod envelope;
pub mod reply;
pub mod stream;
pub mod tls;

#[cfg(test)]
pub(crate) mod mock;

pub trait AssertReply: Sized {
    fn assert_code(self, command: &str, codes: &[u16]) -> crate::Result<Self>;
}

impl AssertReply for Reply {
    /// Returns the reply if its code is one of `codes`, otherwise an
    /// `UnexpectedReply` error naming the command that produced it.
    fn assert_code(self, command: &str, codes: &[u16]) -> crate::Result<Self> {
        if codes.contains(&self.code()) {
            Ok(self)
        } else {
            Err(crate::Error::UnexpectedReply {
                command: command.to_string(),
                reply: self,
            })
        }
    }
}
