//! Transport trie: a pre-aggregated, prefix-compressed set of stacks.
//!
//! Nodes are written depth first, parent before children:
//!
//! ```text
//! uvarint(name_len) name uvarint(value) uvarint(child_count)
//! ```
//!
//! A node's stack is the concatenation of the names on its path from the
//! root, so names are arbitrary byte fragments and need not align with
//! frame boundaries. Each node with a non-zero value is one sample.

use std::io::{self, BufRead, Write};

use super::{DecodeError, DecodeErrorKind, Sample};
use crate::{FRAME_SEPARATOR, StackKey, Tree};

/// Longest node name accepted from the wire.
pub const MAX_NAME_LEN: u64 = 64 * 1024;

const MAX_VARINT_LEN: usize = 10;

#[derive(Debug)]
struct Pending {
    prefix_len: usize,
    children_left: u64,
}

#[derive(Debug)]
pub struct TrieDecoder<R> {
    reader: R,
    prefix: Vec<u8>,
    stack: Vec<Pending>,
    nodes_read: u64,
    done: bool,
}

impl<R: BufRead> TrieDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            prefix: Vec::with_capacity(256),
            stack: Vec::new(),
            nodes_read: 0,
            done: false,
        }
    }

    /// Reads the next node. `Ok(None)` once the root subtree is complete.
    fn read_node(&mut self) -> Result<Option<Option<Sample>>, DecodeErrorKind> {
        while self.stack.last().is_some_and(|p| p.children_left == 0) {
            self.stack.pop();
        }
        let parent_len = match self.stack.last_mut() {
            Some(parent) => {
                parent.children_left -= 1;
                parent.prefix_len
            }
            None if self.nodes_read > 0 => {
                return match read_byte(&mut self.reader)? {
                    Some(_) => Err(DecodeErrorKind::TrailingData),
                    None => Ok(None),
                };
            }
            None => 0,
        };
        self.prefix.truncate(parent_len);

        let Some(name_len) = read_uvarint(&mut self.reader)? else {
            // Clean end of input is only valid before the root.
            return if self.nodes_read == 0 {
                Ok(None)
            } else {
                Err(DecodeErrorKind::Truncated)
            };
        };
        if name_len > MAX_NAME_LEN {
            return Err(DecodeErrorKind::NameTooLong(name_len));
        }
        let start = self.prefix.len();
        self.prefix.resize(start + name_len as usize, 0);
        self.reader.read_exact(&mut self.prefix[start..])?;

        let value = read_uvarint(&mut self.reader)?.ok_or(DecodeErrorKind::Truncated)?;
        let children = read_uvarint(&mut self.reader)?.ok_or(DecodeErrorKind::Truncated)?;
        self.stack.push(Pending {
            prefix_len: self.prefix.len(),
            children_left: children,
        });
        self.nodes_read += 1;

        if value == 0 {
            return Ok(Some(None));
        }
        let key = StackKey::parse(&self.prefix)?;
        Ok(Some(Some(Sample { key, count: value })))
    }
}

impl<R: BufRead> Iterator for TrieDecoder<R> {
    type Item = Result<Sample, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.read_node() {
                Ok(Some(Some(sample))) => return Some(Ok(sample)),
                Ok(Some(None)) => continue,
                Ok(None) => self.done = true,
                Err(kind) => {
                    self.done = true;
                    return Some(Err(DecodeError::at_node(self.nodes_read, kind)));
                }
            }
        }
        None
    }
}

fn read_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        reader.consume(1);
        return Ok(Some(byte));
    }
}

/// Unsigned LEB128. `Ok(None)` on end of input before the first byte.
fn read_uvarint<R: BufRead>(reader: &mut R) -> Result<Option<u64>, DecodeErrorKind> {
    let mut value = 0u64;
    for idx in 0..MAX_VARINT_LEN {
        let Some(byte) = read_byte(reader)? else {
            return if idx == 0 {
                Ok(None)
            } else {
                Err(DecodeErrorKind::Truncated)
            };
        };
        if idx == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(DecodeErrorKind::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * idx);
        if byte < 0x80 {
            return Ok(Some(value));
        }
    }
    Err(DecodeErrorKind::VarintOverflow)
}

fn write_uvarint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = if value < 0x80 {
            value as u8
        } else {
            ((value & 0x7f) | 0x80) as u8
        };
        writer.write_all(&[byte])?;
        if value < 0x80 {
            return Ok(());
        }
        value >>= 7;
    }
}

/// Serializes a tree in transport trie form. Frames below the first level
/// carry their leading `;` in the node name.
pub fn write_trie<W: Write>(tree: &Tree, writer: &mut W) -> io::Result<()> {
    for (node, depth) in tree.root().preorder() {
        let sep: &[u8] = if depth > 1 { &[FRAME_SEPARATOR] } else { &[] };
        write_uvarint(writer, (sep.len() + node.name().len()) as u64)?;
        writer.write_all(sep)?;
        writer.write_all(node.name())?;
        write_uvarint(writer, node.self_count())?;
        write_uvarint(writer, node.children().len() as u64)?;
    }
    Ok(())
}
