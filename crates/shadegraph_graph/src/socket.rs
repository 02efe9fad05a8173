// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket definitions for node inputs/outputs.
//!
//! Sockets never own each other. An input stores the id of the output it
//! pulls from, an output stores the ids of the inputs it feeds; the owning
//! [`Space`](crate::space::Space) keeps both sides consistent.

use crate::property::Property;
use crate::types::DataType;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-unique socket identity. Zero is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SocketId(pub u32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic socket id source shared by every space of a session
#[derive(Debug)]
pub struct SocketIdAllocator {
    next: AtomicU32,
}

impl SocketIdAllocator {
    /// Create an allocator starting at 1
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Hand out the next id
    pub fn allocate(&self) -> SocketId {
        SocketId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Id the next call to [`allocate`](Self::allocate) will return
    pub fn peek(&self) -> SocketId {
        SocketId(self.next.load(Ordering::Relaxed))
    }
}

impl Default for SocketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Socket direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketDirection {
    /// Pulls from at most one output
    Input,
    /// Feeds any number of inputs
    Output,
}

/// Declaration of a socket on a node type, before ids are assigned
#[derive(Debug, Clone)]
pub struct SocketSpec {
    /// Socket name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Literal default (inputs only)
    pub default: Option<Property>,
}

impl SocketSpec {
    /// Declare a socket
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Property>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// An input socket
#[derive(Debug, Clone)]
pub struct InputSocket {
    pub(crate) id: SocketId,
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) default: Option<Property>,
    pub(crate) connected: Option<SocketId>,
}

impl InputSocket {
    pub(crate) fn new(id: SocketId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            default: None,
            connected: None,
        }
    }

    pub(crate) fn from_spec(id: SocketId, spec: &SocketSpec) -> Self {
        let mut socket = Self::new(id, spec.name.clone(), spec.data_type.clone());
        socket.default = spec.default.clone();
        socket
    }

    /// Socket id
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Socket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Literal default used while unconnected
    pub fn default(&self) -> Option<&Property> {
        self.default.as_ref()
    }

    /// The output this input pulls from
    pub fn connected(&self) -> Option<SocketId> {
        self.connected
    }

    /// Whether a link feeds this input
    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Copy with a fresh id and no link
    pub(crate) fn detached_copy(&self, id: SocketId) -> Self {
        Self {
            id,
            connected: None,
            ..self.clone()
        }
    }
}

/// An output socket
#[derive(Debug, Clone)]
pub struct OutputSocket {
    pub(crate) id: SocketId,
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) consumers: IndexSet<SocketId>,
}

impl OutputSocket {
    pub(crate) fn new(id: SocketId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            consumers: IndexSet::new(),
        }
    }

    pub(crate) fn from_spec(id: SocketId, spec: &SocketSpec) -> Self {
        Self::new(id, spec.name.clone(), spec.data_type.clone())
    }

    /// Socket id
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Socket name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Inputs fed by this output, in link order
    pub fn consumers(&self) -> &IndexSet<SocketId> {
        &self.consumers
    }

    /// Whether any input pulls from this output
    pub fn is_connected(&self) -> bool {
        !self.consumers.is_empty()
    }

    /// Copy with a fresh id and no links
    pub(crate) fn detached_copy(&self, id: SocketId) -> Self {
        Self::new(id, self.name.clone(), self.data_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_monotonic() {
        let ids = SocketIdAllocator::new();
        let first = ids.allocate();
        let second = ids.allocate();
        assert_eq!(first, SocketId(1));
        assert!(second > first);
        assert_eq!(ids.peek(), SocketId(3));
    }

    #[test]
    fn test_spec_defaults_reach_inputs() {
        let spec = SocketSpec::new("Value", DataType::FLOAT).with_default(2.5);
        let input = InputSocket::from_spec(SocketId(7), &spec);
        assert_eq!(input.default(), Some(&Property::from(2.5)));
        assert!(!input.is_connected());
    }

    #[test]
    fn test_detached_copy_drops_links() {
        let mut input = InputSocket::new(SocketId(1), "In", DataType::FLOAT);
        input.connected = Some(SocketId(2));
        let copy = input.detached_copy(SocketId(10));
        assert_eq!(copy.id(), SocketId(10));
        assert_eq!(copy.connected(), None);
        assert_eq!(copy.name(), "In");

        let mut output = OutputSocket::new(SocketId(2), "Out", DataType::FLOAT);
        output.consumers.insert(SocketId(1));
        let copy = output.detached_copy(SocketId(11));
        assert!(!copy.is_connected());
    }
}
