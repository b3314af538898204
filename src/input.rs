//! Whitespace-delimited record streams.
//!
//! Streams are scanned buffer by buffer, so memory use does not depend on line length.

use std::error::Error;
use std::fmt;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::str;

use crate::record::{ParseRecordError, Record};

/// Longest token kept in memory. Every integer record fits in it, longer tokens are reported as malformed.
pub const MAX_TOKEN_LEN: usize = 64;

/// Record stream reading error.
#[derive(Debug)]
pub enum ReadError {
    /// Underlying stream error.
    IO(io::Error),
    /// Malformed record.
    Parse(ParseRecordError),
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            ReadError::IO(err) => err,
            ReadError::Parse(err) => err,
        })
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ReadError::IO(err) => write!(f, "stream read failed: {}", err),
            ReadError::Parse(err) => write!(f, "record parsing failed: {}", err),
        }
    }
}

/// Splits a stream into whitespace-delimited tokens holding at most one token in memory.
struct Tokens<R> {
    reader: R,
    token: Vec<u8>,
    /// Set when the current token is longer than [`MAX_TOKEN_LEN`].
    truncated: bool,
    line_number: u64,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Self {
        Tokens {
            reader,
            token: Vec::with_capacity(MAX_TOKEN_LEN),
            truncated: false,
            line_number: 1,
        }
    }

    /// Advances to the next token. Returns the line it starts on, or `None` at the end of the stream.
    fn advance(&mut self) -> io::Result<Option<u64>> {
        self.token.clear();
        self.truncated = false;
        let mut token_line = self.line_number;
        let mut in_token = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(in_token.then(|| token_line));
            }

            let mut consumed = 0;
            let mut complete = false;
            for &byte in available {
                if byte.is_ascii_whitespace() {
                    if in_token {
                        complete = true;
                        break;
                    }
                    if byte == b'\n' {
                        self.line_number += 1;
                    }
                } else {
                    if !in_token {
                        in_token = true;
                        token_line = self.line_number;
                    }
                    if self.token.len() < MAX_TOKEN_LEN {
                        self.token.push(byte);
                    } else {
                        self.truncated = true;
                    }
                }
                consumed += 1;
            }

            self.reader.consume(consumed);
            if complete {
                return Ok(Some(token_line));
            }
        }
    }

    /// Parses the current token.
    fn parse<T: Record>(&self, line: u64) -> Result<T, ParseRecordError> {
        let malformed = |source: Box<dyn Error + Send + Sync>| ParseRecordError {
            line,
            token: String::from_utf8_lossy(&self.token).into_owned(),
            source,
        };

        if self.truncated {
            return Err(malformed(format!("token exceeds {} bytes", MAX_TOKEN_LEN).into()));
        }
        let token = str::from_utf8(&self.token).map_err(|err| malformed(Box::new(err)))?;

        return T::from_token(token).map_err(malformed);
    }
}

/// Counts whitespace-delimited tokens in a stream without parsing them.
pub fn count_records(reader: impl BufRead) -> io::Result<u64> {
    let mut tokens = Tokens::new(reader);
    let mut count = 0;
    while tokens.advance()?.is_some() {
        count += 1;
    }

    return Ok(count);
}

/// Forward-only reader of whitespace-delimited records.
/// Any amount of whitespace, including newlines, separates two records.
pub struct RecordReader<R, T> {
    tokens: Tokens<R>,

    item_type: PhantomData<T>,
}

impl<R: BufRead, T: Record> RecordReader<R, T> {
    pub fn new(reader: R) -> Self {
        RecordReader {
            tokens: Tokens::new(reader),
            item_type: PhantomData,
        }
    }
}

impl<R: BufRead, T: Record> Iterator for RecordReader<R, T> {
    type Item = Result<T, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.tokens.advance() {
            Ok(Some(line)) => Some(self.tokens.parse(line).map_err(ReadError::Parse)),
            Ok(None) => None,
            Err(err) => Some(Err(ReadError::IO(err))),
        }
    }
}
