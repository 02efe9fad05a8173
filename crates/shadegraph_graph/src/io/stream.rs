// SPDX-License-Identifier: MIT OR Apache-2.0
//! Block-framed binary streams.
//!
//! A block on the wire is a little-endian `i32` size (counting itself and
//! everything after it up to the block end), the NUL-terminated tag
//! `BLOCK:<name>`, then the payload. Blocks nest. Integers are 4-byte
//! little-endian, booleans one byte, doubles 8-byte IEEE-754 and strings
//! UTF-8 followed by a NUL.

use super::{IoError, LoadWarning};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{self, Read};

/// Prefix of every block tag
pub const BLOCK_PREFIX: &str = "BLOCK:";

/// Size of the length prefix
const LENGTH_SIZE: u32 = 4;

/// Buffered block writer.
///
/// Every open block is buffered until [`end_block`](Self::end_block) so its
/// size can be prefixed before it is appended to the enclosing block.
#[derive(Debug, Default)]
pub struct OutStream {
    out: Vec<u8>,
    blocks: Vec<(String, Vec<u8>)>,
}

impl OutStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&mut self) -> &mut Vec<u8> {
        match self.blocks.last_mut() {
            Some((_, buffer)) => buffer,
            None => &mut self.out,
        }
    }

    /// Open a block
    pub fn begin_block(&mut self, name: &str) -> Result<(), IoError> {
        self.blocks.push((name.to_string(), Vec::new()));
        self.write_str(&format!("{BLOCK_PREFIX}{name}"))
    }

    /// Close the innermost block, which must be `name`, and return its size
    pub fn end_block(&mut self, name: &str) -> Result<u32, IoError> {
        let offset = self.out.len() as u64;
        // Leave the stack untouched on a mismatch
        if let Some((open, _)) = self.blocks.last().filter(|(open, _)| open != name) {
            return Err(IoError::BlockMismatch {
                expected: open.clone(),
                found: name.to_string(),
                offset,
            });
        }
        let (open, payload) = self.blocks.pop().ok_or_else(|| IoError::BlockMismatch {
            expected: name.to_string(),
            found: String::new(),
            offset,
        })?;

        let size = i32::try_from(payload.len() + LENGTH_SIZE as usize).map_err(|_| {
            IoError::CorruptLength {
                block: open.clone(),
                size: payload.len() as i64,
                offset,
            }
        })?;

        let buffer = self.buffer();
        buffer.write_i32::<LE>(size)?;
        buffer.extend_from_slice(&payload);
        Ok(size as u32)
    }

    /// Number of blocks still open
    pub fn open_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Write a 4-byte integer
    pub fn write_i32(&mut self, value: i32) -> Result<(), IoError> {
        self.buffer().write_i32::<LE>(value)?;
        Ok(())
    }

    /// Write a count as a 4-byte integer
    pub fn write_count(&mut self, count: usize) -> Result<(), IoError> {
        let value = i32::try_from(count).map_err(|_| IoError::InvalidCount {
            count: count as i64,
            offset: self.out.len() as u64,
        })?;
        self.write_i32(value)
    }

    /// Write a one-byte boolean
    pub fn write_bool(&mut self, value: bool) -> Result<(), IoError> {
        self.buffer().write_u8(u8::from(value))?;
        Ok(())
    }

    /// Write an 8-byte double
    pub fn write_f64(&mut self, value: f64) -> Result<(), IoError> {
        self.buffer().write_f64::<LE>(value)?;
        Ok(())
    }

    /// Write vector components in order
    pub fn write_components(&mut self, components: &[f64]) -> Result<(), IoError> {
        for component in components {
            self.write_f64(*component)?;
        }
        Ok(())
    }

    /// Write a NUL-terminated string
    pub fn write_str(&mut self, value: &str) -> Result<(), IoError> {
        if value.contains('\0') {
            return Err(IoError::InvalidString(value.to_string()));
        }
        let buffer = self.buffer();
        buffer.extend_from_slice(value.as_bytes());
        buffer.push(0);
        Ok(())
    }

    /// Finish the stream, returning the encoded bytes
    pub fn into_bytes(self) -> Result<Vec<u8>, IoError> {
        match self.blocks.last() {
            Some((name, _)) => Err(IoError::UnclosedBlock(name.clone())),
            None => Ok(self.out),
        }
    }
}

/// Size and tag of a block that was entered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Name in the tag, without the prefix
    pub name: String,
    /// Declared size, length prefix included
    pub size: u32,
    /// Stream offset of the length prefix
    pub offset: u64,
}

#[derive(Debug)]
struct OpenBlock {
    name: String,
    size: u32,
    consumed: u32,
    start: u64,
}

impl OpenBlock {
    fn remaining(&self) -> u32 {
        self.size - self.consumed
    }
}

/// Block reader over any byte source.
///
/// Reads never cross the end of the innermost open block; leftover bytes
/// are skipped when the block is closed and reported as warnings.
pub struct InStream<'a> {
    reader: Box<dyn Read + 'a>,
    blocks: Vec<OpenBlock>,
    offset: u64,
    warnings: Vec<LoadWarning>,
}

impl<'a> InStream<'a> {
    /// Wrap a byte source
    pub fn new(reader: impl Read + 'a) -> Self {
        Self {
            reader: Box::new(reader),
            blocks: Vec::new(),
            offset: 0,
            warnings: Vec::new(),
        }
    }

    /// Bytes read so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of open blocks
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes left in the innermost open block
    pub fn remaining_in_block(&self) -> Option<u32> {
        self.blocks.last().map(OpenBlock::remaining)
    }

    /// Record a load warning
    pub fn warn(&mut self, warning: LoadWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// Take the recorded warnings
    pub fn take_warnings(&mut self) -> Vec<LoadWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Check that `count` more bytes fit in the innermost block and account
    /// for them
    fn consume(&mut self, count: u32) -> Result<(), IoError> {
        if let Some(block) = self.blocks.last_mut() {
            if count > block.remaining() {
                return Err(IoError::BlockOverrun {
                    block: block.name.clone(),
                    offset: self.offset,
                });
            }
            block.consumed += count;
        }
        self.offset += u64::from(count);
        Ok(())
    }

    /// Enter a block, checking its length and tag.
    ///
    /// On [`IoError::BlockMismatch`] the block stays entered so the caller
    /// may skip it with [`abandon_block`](Self::abandon_block); any other
    /// error leaves the stream unusable.
    pub fn begin_block(&mut self, name: &str) -> Result<BlockHeader, IoError> {
        let start = self.offset;
        if let Some(parent) = self.blocks.last() {
            if parent.remaining() < LENGTH_SIZE {
                return Err(IoError::BlockOverrun {
                    block: parent.name.clone(),
                    offset: start,
                });
            }
        }

        // The length prefix belongs to the child; the parent is charged the
        // full child size when the child ends.
        let size = self.reader.read_i32::<LE>()?;
        self.offset += u64::from(LENGTH_SIZE);

        let parent_remaining = self
            .blocks
            .last()
            .map_or(u32::MAX, OpenBlock::remaining);
        let size = match u32::try_from(size) {
            Ok(size) if size >= LENGTH_SIZE && size <= parent_remaining => size,
            _ => {
                return Err(IoError::CorruptLength {
                    block: name.to_string(),
                    size: i64::from(size),
                    offset: start,
                })
            }
        };

        self.blocks.push(OpenBlock {
            name: name.to_string(),
            size,
            consumed: LENGTH_SIZE,
            start,
        });

        let tag = self.read_string()?;
        let found = tag.strip_prefix(BLOCK_PREFIX).unwrap_or(&tag).to_string();
        if found != name || !tag.starts_with(BLOCK_PREFIX) {
            return Err(IoError::BlockMismatch {
                expected: name.to_string(),
                found,
                offset: start,
            });
        }

        Ok(BlockHeader {
            name: found,
            size,
            offset: start,
        })
    }

    /// Leave the innermost block, which must be `name`. Unread bytes are
    /// skipped with a warning.
    pub fn end_block(&mut self, name: &str) -> Result<(), IoError> {
        match self.blocks.last() {
            Some(block) if block.name == name => {}
            Some(block) => {
                return Err(IoError::BlockMismatch {
                    expected: block.name.clone(),
                    found: name.to_string(),
                    offset: self.offset,
                })
            }
            None => {
                return Err(IoError::BlockMismatch {
                    expected: String::new(),
                    found: name.to_string(),
                    offset: self.offset,
                })
            }
        }

        let (skipped, block) = self.close_block()?;
        if skipped > 0 {
            self.warn(LoadWarning::SkippedBytes {
                block: block.name,
                count: skipped,
                offset: block.start,
            });
        }
        Ok(())
    }

    /// Leave the innermost block without reading the rest of it
    pub fn abandon_block(&mut self) -> Result<BlockHeader, IoError> {
        let (_, block) = self.close_block()?;
        Ok(BlockHeader {
            name: block.name,
            size: block.size,
            offset: block.start,
        })
    }

    fn close_block(&mut self) -> Result<(u32, OpenBlock), IoError> {
        let Some(block) = self.blocks.pop() else {
            return Err(IoError::BlockOverrun {
                block: String::new(),
                offset: self.offset,
            });
        };

        let remaining = block.remaining();
        if remaining > 0 {
            let skipped = io::copy(
                &mut (&mut self.reader).take(u64::from(remaining)),
                &mut io::sink(),
            )?;
            if skipped < u64::from(remaining) {
                return Err(IoError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            self.offset += skipped;
        }

        if let Some(parent) = self.blocks.last_mut() {
            parent.consumed += block.size;
        }
        Ok((remaining, block))
    }

    /// Read a 4-byte integer
    pub fn read_i32(&mut self) -> Result<i32, IoError> {
        self.consume(4)?;
        Ok(self.reader.read_i32::<LE>()?)
    }

    /// Read a count written by [`OutStream::write_count`]
    pub fn read_count(&mut self) -> Result<usize, IoError> {
        let offset = self.offset;
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| IoError::InvalidCount {
            count: i64::from(count),
            offset,
        })
    }

    /// Read a one-byte boolean
    pub fn read_bool(&mut self) -> Result<bool, IoError> {
        self.consume(1)?;
        Ok(self.reader.read_u8()? != 0)
    }

    /// Read an 8-byte double
    pub fn read_f64(&mut self) -> Result<f64, IoError> {
        self.consume(8)?;
        Ok(self.reader.read_f64::<LE>()?)
    }

    /// Read `N` vector components
    pub fn read_components<const N: usize>(&mut self) -> Result<[f64; N], IoError> {
        let mut components = [0.0; N];
        for component in &mut components {
            *component = self.read_f64()?;
        }
        Ok(components)
    }

    /// Read a NUL-terminated string
    pub fn read_string(&mut self) -> Result<String, IoError> {
        let start = self.offset;
        let mut bytes = Vec::new();
        loop {
            if self.consume(1).is_err() {
                return Err(IoError::UnterminatedString { offset: start });
            }
            match self.reader.read_u8()? {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        String::from_utf8(bytes).map_err(|_| IoError::InvalidUtf8 { offset: start })
    }
}

impl std::fmt::Debug for InStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InStream")
            .field("offset", &self.offset)
            .field("blocks", &self.blocks)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}
