// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) between an output and an input socket.
//!
//! Links are not stored on their own: a link exists exactly when the input
//! points at the output and the output lists the input among its consumers.

use crate::socket::SocketId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The relation {output -> input}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Producing socket
    pub output: SocketId,
    /// Consuming socket
    pub input: SocketId,
}

impl Link {
    /// Create a link value
    pub fn new(output: SocketId, input: SocketId) -> Self {
        Self { output, input }
    }

    /// Check if this link involves a specific socket
    pub fn involves(&self, socket: SocketId) -> bool {
        self.output == socket || self.input == socket
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.output, self.input)
    }
}
