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

use std::fmt::Display;

/// Maximum length of a single reply line, excluding the code and CRLF.
pub const MAX_LINE_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    PositiveCompletion = 2,
    PositiveIntermediate = 3,
    TransientNegativeCompletion = 4,
    PermanentNegativeCompletion = 5,
    Invalid = 0,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Syntax = 0,
    Information = 1,
    Connections = 2,
    Unspecified3 = 3,
    Unspecified4 = 4,
    MailSystem = 5,
    Invalid = 6,
}

/// A complete SMTP reply: one status code and the text of every line
/// that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    message: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, message: Vec<String>) -> Self {
        Reply { code, message }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Text of each line, without the code and separator.
    pub fn message(&self) -> &[String] {
        &self.message
    }

    /// Text of all lines joined with line breaks.
    pub fn text(&self) -> String {
        self.message.join("\n")
    }

    /// Number of raw lines the reply was assembled from.
    pub fn line_count(&self) -> usize {
        self.message.len()
    }

    pub fn severity(&self) -> Severity {
        match self.code / 100 {
            2 => Severity::PositiveCompletion,
            3 => Severity::PositiveIntermediate,
            4 => Severity::TransientNegativeCompletion,
            5 => Severity::PermanentNegativeCompletion,
            _ => Severity::Invalid,
        }
    }

    pub fn category(&self) -> Category {
        match self.code / 10 % 10 {
            0 => Category::Syntax,
            1 => Category::Information,
            2 => Category::Connections,
            3 => Category::Unspecified3,
            4 => Category::Unspecified4,
            5 => Category::MailSystem,
            _ => Category::Invalid,
        }
    }

    pub fn details(&self) -> u16 {
        self.code % 10
    }

    pub fn is_positive_completion(&self) -> bool {
        self.severity() == Severity::PositiveCompletion
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        for line in &self.message {
            write!(f, " {}", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidReplyCode,
    InvalidSeparator,
    CodeMismatch,
    LineTooLong,
    NeedsMoreData,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidReplyCode => write!(f, "Invalid reply code"),
            Error::InvalidSeparator => write!(f, "Invalid separator after reply code"),
            Error::CodeMismatch => write!(f, "Reply code changed within a multi-line reply"),
            Error::LineTooLong => write!(f, "Reply line too long"),
            Error::NeedsMoreData => write!(f, "Incomplete reply"),
        }
    }
}

enum ReplyParserState {
    FirstDigit,
    SecondDigit,
    ThirdDigit,
    Separator,
    Description,
}

/// Byte-at-a-time reply parser. State survives between calls, so a reply
/// may be delivered in any number of fragments.
pub struct ReplyParser {
    code: u16,
    current_code: u16,
    state: ReplyParserState,
    is_last: bool,
    buf: Vec<u8>,
    message: Vec<String>,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self {
            code: u16::MAX,
            current_code: 0,
            state: ReplyParserState::FirstDigit,
            buf: Vec::with_capacity(128),
            is_last: false,
            message: Vec::with_capacity(4),
        }
    }
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.state = ReplyParserState::FirstDigit;
        self.code = u16::MAX;
        self.current_code = 0;
        self.is_last = false;
        self.buf.clear();
        self.message.clear();
    }

    /// Returns `true` while part of a reply has been consumed but not yet emitted.
    pub fn is_partial(&self) -> bool {
        !matches!(self.state, ReplyParserState::FirstDigit) || !self.message.is_empty()
    }

    /// Consumes bytes until a complete reply is assembled. Bytes following
    /// the terminating line are left in the iterator.
    pub fn parse(&mut self, bytes: &mut std::slice::Iter<'_, u8>) -> Result<Reply, Error> {
        for byte in bytes {
            match self.state {
                ReplyParserState::FirstDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code = ((byte - b'0') as u16) * 100;
                        self.state = ReplyParserState::SecondDigit;
                    } else {
                        self.reset();
                        return Err(Error::InvalidReplyCode);
                    }
                }
                ReplyParserState::SecondDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code += ((byte - b'0') as u16) * 10;
                        self.state = ReplyParserState::ThirdDigit;
                    } else {
                        self.reset();
                        return Err(Error::InvalidReplyCode);
                    }
                }
                ReplyParserState::ThirdDigit => {
                    if byte.is_ascii_digit() {
                        self.current_code += (byte - b'0') as u16;
                        self.state = ReplyParserState::Separator;
                    } else {
                        self.reset();
                        return Err(Error::InvalidReplyCode);
                    }
                }
                ReplyParserState::Separator => {
                    match byte {
                        b' ' | b'\r' | b'\n' => {
                            self.is_last = true;
                        }
                        b'-' => (),
                        _ => {
                            self.reset();
                            return Err(Error::InvalidSeparator);
                        }
                    }

                    if self.code == u16::MAX {
                        self.code = self.current_code;
                    } else if self.code != self.current_code {
                        self.reset();
                        return Err(Error::CodeMismatch);
                    }
                    self.current_code = 0;
                    self.state = ReplyParserState::Description;

                    // Bare "NNN\n" line
                    if *byte == b'\n' {
                        if let Some(reply) = self.end_line() {
                            return Ok(reply);
                        }
                    }
                }
                ReplyParserState::Description => match byte {
                    b'\n' => {
                        if let Some(reply) = self.end_line() {
                            return Ok(reply);
                        }
                    }
                    b'\r' => (),
                    _ => {
                        if self.buf.len() < MAX_LINE_LENGTH {
                            self.buf.push(*byte);
                        } else {
                            self.reset();
                            return Err(Error::LineTooLong);
                        }
                    }
                },
            }
        }

        Err(Error::NeedsMoreData)
    }

    fn end_line(&mut self) -> Option<Reply> {
        self.message
            .push(String::from_utf8_lossy(&self.buf).into_owned());
        self.buf.clear();
        self.state = ReplyParserState::FirstDigit;

        if self.is_last {
            let code = self.code;
            self.code = u16::MAX;
            self.is_last = false;

            Some(Reply {
                code,
                message: std::mem::take(&mut self.message),
            })
        } else {
            None
        }
    }
}

/// Reply framer attached to one transport. Bytes read from the socket are
/// fed in delivery order and complete replies are taken out one at a time;
/// whatever follows a reply stays buffered for the next call.
#[derive(Default)]
pub struct ReplyReader {
    parser: ReplyParser,
    pending: Vec<u8>,
}

impl ReplyReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Returns the next complete reply, or `None` if more bytes are needed.
    pub fn next_reply(&mut self) -> Result<Option<Reply>, Error> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut iter = self.pending.iter();
        let result = self.parser.parse(&mut iter);
        let consumed = self.pending.len() - iter.len();

        match result {
            Ok(reply) => {
                self.pending.drain(..consumed);
                Ok(Some(reply))
            }
            Err(Error::NeedsMoreData) => {
                self.pending.clear();
                Ok(None)
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    /// Returns `true` if bytes of an unfinished reply are held.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.parser.is_partial()
    }

    /// Discards all buffered state, used when the transport is replaced.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.pending.clear();
    }
}
