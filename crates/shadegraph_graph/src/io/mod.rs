// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary graph files.
//!
//! A file is one `Space` block holding the root space. Node types may
//! append extension data to their node blocks through a [`NodeStreamer`]
//! registered for their tag; containers use this to nest their space.

mod codec;
mod stream;

pub use codec::{
    read_property, write_property, write_space, SpaceReader, IN_SOCKET_BLOCK, NODE_BLOCK,
    OUT_SOCKET_BLOCK, PROPERTY_BLOCK, SPACE_BLOCK,
};
pub use stream::{BlockHeader, InStream, OutStream, BLOCK_PREFIX};

use crate::node::{Node, CONTAINER_TAG};
use crate::session::Session;
use crate::socket::SocketId;
use crate::space::{GraphError, Space};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Error reading or writing a graph file
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A block tag differs from the one expected
    #[error("Expected block {expected:?}, found {found:?} at offset {offset}")]
    BlockMismatch {
        /// Expected block name
        expected: String,
        /// Name found in the stream
        found: String,
        /// Offset of the block start
        offset: u64,
    },

    /// A declared block size cannot be right
    #[error("Corrupt length {size} for block {block:?} at offset {offset}")]
    CorruptLength {
        /// Block being entered
        block: String,
        /// Declared size
        size: i64,
        /// Offset of the length prefix
        offset: u64,
    },

    /// A read would cross the end of the enclosing block
    #[error("Read past the end of block {block:?} at offset {offset}")]
    BlockOverrun {
        /// Enclosing block
        block: String,
        /// Offset of the read
        offset: u64,
    },

    /// A connected socket id has no socket in the file
    #[error("Dangling reference to socket id {0}")]
    DanglingReference(u32),

    /// A stored socket id is out of range
    #[error("Invalid socket id {id} at offset {offset}")]
    InvalidId {
        /// Stored value
        id: i64,
        /// Offset of the id
        offset: u64,
    },

    /// Two sockets in the file share an id
    #[error("Duplicate socket id {0}")]
    DuplicateReference(u32),

    /// A string runs past the end of its block
    #[error("Unterminated string at offset {offset}")]
    UnterminatedString {
        /// Offset of the string start
        offset: u64,
    },

    /// A string is not UTF-8
    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string start
        offset: u64,
    },

    /// A count is negative or too large
    #[error("Invalid count {count} at offset {offset}")]
    InvalidCount {
        /// Count value
        count: i64,
        /// Offset of the count
        offset: u64,
    },

    /// A string to be written contains NUL
    #[error("String contains NUL: {0:?}")]
    InvalidString(String),

    /// A property value has no encoding for its type
    #[error("Value of type {0} cannot be stored")]
    UnsupportedValue(String),

    /// Blocks were left open when finishing a stream
    #[error("Block {0:?} was never closed")]
    UnclosedBlock(String),

    /// A container block lacks its boundary nodes
    #[error("Container {0:?} has no boundary nodes")]
    InvalidContainer(String),

    /// Rebuilding the graph failed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Recoverable oddity found while loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// Bytes at the end of a block were not understood
    SkippedBytes {
        /// Block name
        block: String,
        /// Bytes skipped
        count: u32,
        /// Offset of the block start
        offset: u64,
    },
    /// A whole node block with an unexpected tag was skipped
    SkippedBlock {
        /// Expected block name
        expected: String,
        /// Name found
        found: String,
        /// Offset of the block start
        offset: u64,
    },
    /// A stored link could not be restored
    DroppedLink {
        /// Consuming input (new id)
        input: SocketId,
        /// Output id as stored in the file
        output: u32,
        /// Why the link was rejected
        reason: String,
    },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkippedBytes { block, count, offset } => {
                write!(f, "Skipped {count} unread bytes of block {block:?} at offset {offset}")
            }
            Self::SkippedBlock { expected, found, offset } => {
                write!(f, "Skipped block {found:?} where {expected:?} was expected at offset {offset}")
            }
            Self::DroppedLink { input, output, reason } => {
                write!(f, "Dropped link from stored socket {output} to {input}: {reason}")
            }
        }
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Warnings in stream order
    pub warnings: Vec<LoadWarning>,
}

impl LoadReport {
    /// Whether the file loaded without warnings
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Per-type extension of node blocks
pub trait NodeStreamer: Send + Sync {
    /// Append extension data after the node's sockets
    fn write(&self, out: &mut OutStream, node: &Node, streamers: &StreamerRegistry) -> Result<(), IoError>;

    /// Read the extension data written by [`write`](Self::write)
    fn read(
        &self,
        input: &mut InStream<'_>,
        node: &mut Node,
        reader: &mut SpaceReader<'_>,
    ) -> Result<(), IoError>;
}

/// Streamers by node type tag
#[derive(Clone)]
pub struct StreamerRegistry {
    streamers: HashMap<String, Arc<dyn NodeStreamer>>,
}

impl StreamerRegistry {
    /// Create a registry without any streamer
    pub fn empty() -> Self {
        Self {
            streamers: HashMap::new(),
        }
    }

    /// Bind a streamer to a node type tag
    pub fn register(&mut self, tag: impl Into<String>, streamer: impl NodeStreamer + 'static) {
        self.streamers.insert(tag.into(), Arc::new(streamer));
    }

    /// Remove the streamer of a tag
    pub fn unregister(&mut self, tag: &str) -> bool {
        self.streamers.remove(tag).is_some()
    }

    /// Streamer for a tag
    pub fn get(&self, tag: &str) -> Option<Arc<dyn NodeStreamer>> {
        self.streamers.get(tag).cloned()
    }

    /// Whether a tag has a streamer
    pub fn contains(&self, tag: &str) -> bool {
        self.streamers.contains_key(tag)
    }
}

impl Default for StreamerRegistry {
    /// Registry with the container streamer
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CONTAINER_TAG, codec::ContainerStreamer);
        registry
    }
}

impl fmt::Debug for StreamerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.streamers.keys().collect();
        tags.sort();
        f.debug_struct("StreamerRegistry").field("tags", &tags).finish()
    }
}

/// Encode a space into bytes
pub fn encode_space(space: &Space, streamers: &StreamerRegistry) -> Result<Vec<u8>, IoError> {
    let mut out = OutStream::new();
    write_space(&mut out, space, streamers)?;
    out.into_bytes()
}

/// Write a space to any byte sink
pub fn write_space_to(
    writer: impl Write,
    space: &Space,
    streamers: &StreamerRegistry,
) -> Result<(), IoError> {
    let bytes = encode_space(space, streamers)?;
    let mut writer = writer;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a space from any byte source
pub fn read_space_from(reader: impl Read, session: &Session) -> Result<(Space, LoadReport), IoError> {
    let mut input = InStream::new(reader);
    let mut space_reader = SpaceReader::new(session.context(), session.streamers());
    let space = space_reader.read_space(&mut input)?;
    Ok((
        space,
        LoadReport {
            warnings: input.take_warnings(),
        },
    ))
}

/// Save a space to a file
pub fn save_to_file(
    path: impl AsRef<Path>,
    space: &Space,
    streamers: &StreamerRegistry,
) -> Result<(), IoError> {
    let path = path.as_ref();
    write_space_to(BufWriter::new(File::create(path)?), space, streamers)?;
    tracing::info!("Saved space {} to {:?}", space.name(), path);
    Ok(())
}

/// Load a space from a file
pub fn load_from_file(path: impl AsRef<Path>, session: &Session) -> Result<(Space, LoadReport), IoError> {
    let path = path.as_ref();
    let (space, report) = read_space_from(BufReader::new(File::open(path)?), session)?;
    tracing::info!(
        "Loaded space {} from {:?} ({} warnings)",
        space.name(),
        path,
        report.warnings.len()
    );
    Ok((space, report))
}
