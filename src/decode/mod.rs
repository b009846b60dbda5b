//! Wire decoders turning a request body into `(stack, count)` samples.
//!
//! Every decoder is a lazy iterator over `Result<Sample, DecodeError>`. It
//! yields samples in the order it finds them and stops after the first error,
//! so a consumer sees the valid prefix of a stream followed by exactly one
//! error when the input is malformed.

mod groups;
mod lines;
mod trie;

pub use groups::GroupsDecoder;
pub use lines::LinesDecoder;
pub use trie::{TrieDecoder, write_trie};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;
use std::io::{self, BufRead};

use crate::StackKey;

/// Media type announcing a pre-aggregated transport trie body.
pub const TRIE_CONTENT_TYPE: &str = "binary/octet-stream+trie";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// One stack per line, each occurrence counts once.
    Lines,
    /// `stack count` per line.
    Groups,
    /// Binary transport trie.
    Trie,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Lines, Self::Groups, Self::Trie]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Lines => clap::builder::PossibleValue::new("lines"),
            Self::Groups => clap::builder::PossibleValue::new("groups"),
            Self::Trie => clap::builder::PossibleValue::new("trie"),
        })
    }
}

impl Format {
    /// Picks the body format. The trie content type wins over `grouped`.
    pub fn select(content_type: Option<&str>, grouped: bool) -> Self {
        if content_type.is_some_and(is_trie_content_type) {
            Self::Trie
        } else if grouped {
            Self::Groups
        } else {
            Self::Lines
        }
    }

    pub fn decoder<R: BufRead>(self, reader: R) -> Decoder<R> {
        match self {
            Self::Lines => Decoder::Lines(LinesDecoder::new(reader)),
            Self::Groups => Decoder::Groups(GroupsDecoder::new(reader)),
            Self::Trie => Decoder::Trie(TrieDecoder::new(reader)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lines => "lines",
            Self::Groups => "groups",
            Self::Trie => "trie",
        }
    }
}

fn is_trie_content_type(value: &str) -> bool {
    let media_type = value.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case(TRIE_CONTENT_TYPE)
}

/// One decoded pair, count not yet scaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub key: StackKey,
    pub count: u64,
}

/// Where in the input a decode error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Offset(u64),
    Node(u64),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset(offset) => write!(f, "byte offset {offset}"),
            Self::Node(index) => write!(f, "trie node {index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("empty stack key")]
    EmptyKey,
    #[error("empty frame in stack key")]
    EmptyFrame,
    #[error("missing sample count")]
    MissingCount,
    #[error("invalid sample count {0:?}")]
    InvalidCount(String),
    #[error("truncated input")]
    Truncated,
    #[error("varint overflows 64 bits")]
    VarintOverflow,
    #[error("frame name of {0} bytes exceeds the limit")]
    NameTooLong(u64),
    #[error("unexpected data after the trie root")]
    TrailingData,
    #[error("read failed: {0}")]
    Io(String),
}

impl From<io::Error> for DecodeErrorKind {
    fn from(value: io::Error) -> Self {
        if value.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(value.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {position}")]
pub struct DecodeError {
    pub position: Position,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn at_offset(offset: u64, kind: DecodeErrorKind) -> Self {
        Self {
            position: Position::Offset(offset),
            kind,
        }
    }

    pub fn at_node(index: u64, kind: DecodeErrorKind) -> Self {
        Self {
            position: Position::Node(index),
            kind,
        }
    }
}

/// The decoder chosen for one request.
#[derive(Debug)]
pub enum Decoder<R> {
    Lines(LinesDecoder<R>),
    Groups(GroupsDecoder<R>),
    Trie(TrieDecoder<R>),
}

impl<R: BufRead> Iterator for Decoder<R> {
    type Item = Result<Sample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Lines(d) => d.next(),
            Self::Groups(d) => d.next(),
            Self::Trie(d) => d.next(),
        }
    }
}

/// Newline-delimited records with their starting byte offsets. Blank lines
/// are skipped and a trailing `\r` is dropped.
#[derive(Debug)]
struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    offset: u64,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            offset: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<(u64, &[u8])>, DecodeError> {
        loop {
            self.buf.clear();
            let start = self.offset;
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| DecodeError::at_offset(start, e.into()))?;
            if read == 0 {
                return Ok(None);
            }
            self.offset = self.offset.saturating_add(read as u64);
            let len = trimmed_len(&self.buf);
            if len == 0 {
                continue;
            }
            return Ok(Some((start, &self.buf[..len])));
        }
    }
}

fn trimmed_len(line: &[u8]) -> usize {
    let mut len = line.len();
    if len > 0 && line[len - 1] == b'\n' {
        len -= 1;
    }
    if len > 0 && line[len - 1] == b'\r' {
        len -= 1;
    }
    len
}
