// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-type node computations.
//!
//! The evaluator looks a processor up by the node's type tag on every
//! computation and never keeps the handle, so bindings may be swapped at
//! any time (see [`reload`]). Cached results remember the generation of
//! the binding that produced them and are recomputed after a swap.

pub mod reload;

use crate::node::Node;
use crate::property::Property;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Computes a node's outputs from its resolved inputs
pub trait Processor: Send + Sync {
    /// Produce one property per output socket of `node`
    fn process(&self, inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError>;
}

impl<F> Processor for F
where
    F: Fn(&[Property], &Node) -> Result<Vec<Property>, ProcessError> + Send + Sync,
{
    fn process(&self, inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
        self(inputs, node)
    }
}

/// Failure reported by a processor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// A required input resolved to an empty value
    #[error("Missing input {index} ({name})")]
    MissingInput {
        /// Input index
        index: usize,
        /// Input name
        name: String,
    },

    /// An input value could not be used
    #[error("Invalid input {index}: {reason}")]
    InvalidInput {
        /// Input index
        index: usize,
        /// What was wrong
        reason: String,
    },

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl ProcessError {
    /// Error for an empty input of `node`
    pub fn missing(node: &Node, index: usize) -> Self {
        Self::MissingInput {
            index,
            name: node
                .input(index)
                .map(|input| input.name().to_string())
                .unwrap_or_default(),
        }
    }
}

struct Binding {
    processor: Arc<dyn Processor>,
    generation: u64,
}

#[derive(Default)]
struct Bindings {
    by_tag: HashMap<String, Binding>,
    /// Bumped by every register and unregister
    generation: u64,
}

/// Shared, swappable map from node type tag to processor.
///
/// Every change bumps a registry-wide generation, and each binding keeps
/// the generation it was made at so results computed with a replaced
/// processor can be told apart.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<RwLock<Bindings>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a processor to a tag, returning the one it replaces
    pub fn register(
        &self,
        tag: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Option<Arc<dyn Processor>> {
        self.register_arc(tag, Arc::new(processor))
    }

    /// Bind an already shared processor to a tag
    pub fn register_arc(
        &self,
        tag: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> Option<Arc<dyn Processor>> {
        let tag = tag.into();
        let mut bindings = self.inner.write();
        bindings.generation += 1;
        let generation = bindings.generation;
        tracing::debug!("Registered processor for {} (generation {})", tag, generation);
        bindings
            .by_tag
            .insert(tag, Binding { processor, generation })
            .map(|previous| previous.processor)
    }

    /// Remove the binding of a tag
    pub fn unregister(&self, tag: &str) -> Option<Arc<dyn Processor>> {
        let mut bindings = self.inner.write();
        let previous = bindings.by_tag.remove(tag)?;
        bindings.generation += 1;
        Some(previous.processor)
    }

    /// Current processor for a tag
    pub fn get(&self, tag: &str) -> Option<Arc<dyn Processor>> {
        self.inner.read().by_tag.get(tag).map(|binding| Arc::clone(&binding.processor))
    }

    /// Current processor for a tag with the generation it was bound at
    pub fn binding(&self, tag: &str) -> Option<(Arc<dyn Processor>, u64)> {
        self.inner
            .read()
            .by_tag
            .get(tag)
            .map(|binding| (Arc::clone(&binding.processor), binding.generation))
    }

    /// Generation the tag's current processor was bound at
    pub fn tag_generation(&self, tag: &str) -> Option<u64> {
        self.inner.read().by_tag.get(tag).map(|binding| binding.generation)
    }

    /// Registry-wide generation, changing whenever any binding does
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Whether a tag is bound
    pub fn contains(&self, tag: &str) -> bool {
        self.inner.read().by_tag.contains_key(tag)
    }

    /// Bound tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.inner.read().by_tag.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of bound tags
    pub fn len(&self) -> usize {
        self.inner.read().by_tag.len()
    }

    /// Whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_tag.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
