// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow graph framework for Shadegraph.
//!
//! This crate provides the graph model behind the shader tool:
//! - Typed input/output sockets with directional compatibility rules
//! - Spaces of nodes, with containers nesting whole spaces
//! - A memoizing evaluator that invalidates downstream on change
//! - A block-framed binary file format
//!
//! ## Architecture
//!
//! A [`Session`] owns the long-lived state (socket ids, change clock, type
//! rules, node library, processors and streamers). Spaces created through
//! it record every change in a journal that evaluators replay before
//! answering a query.

pub mod config;
pub mod evaluation;
pub mod io;
pub mod library;
pub mod link;
pub mod node;
pub mod processor;
pub mod property;
pub mod session;
pub mod socket;
pub mod space;
pub mod types;

pub use config::SessionConfig;
pub use evaluation::{EvaluationError, Evaluator};
pub use io::{IoError, LoadReport, LoadWarning};
pub use link::Link;
pub use node::{Node, NodeId, NodeKind, NodeLibrary, NodeType};
pub use processor::{ProcessError, Processor, ProcessorRegistry};
pub use property::{Property, Value};
pub use session::{GraphContext, Session};
pub use socket::{SocketDirection, SocketId};
pub use space::{Change, GraphError, Space, SpaceId};
pub use types::{DataType, TypeRegistry};
