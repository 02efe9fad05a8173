// SPDX-License-Identifier: MIT OR Apache-2.0
//! Long-lived runtime state shared by every graph of a session.
//!
//! Socket ids, the change clock and the registries live here instead of in
//! process-wide statics. A session is created once by the owner (editor or
//! batch driver) and torn down with it.

use crate::config::SessionConfig;
use crate::evaluation::Evaluator;
use crate::io::{self, IoError, LoadReport, StreamerRegistry};
use crate::library;
use crate::node::{Node, NodeId, NodeLibrary, CONTAINER_TAG};
use crate::processor::reload::{ModuleLoader, ProcessorReloader};
use crate::processor::ProcessorRegistry;
use crate::socket::SocketIdAllocator;
use crate::space::{GraphError, Space};
use crate::types::TypeRegistry;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// State every space of a session holds a handle to
#[derive(Debug)]
pub struct GraphContext {
    ids: SocketIdAllocator,
    clock: AtomicU64,
    types: RwLock<TypeRegistry>,
    journal_capacity: usize,
}

impl GraphContext {
    /// Create a context with the given type rules
    pub fn new(types: TypeRegistry, journal_capacity: usize) -> Self {
        Self {
            ids: SocketIdAllocator::new(),
            clock: AtomicU64::new(0),
            types: RwLock::new(types),
            journal_capacity: journal_capacity.max(1),
        }
    }

    /// Socket id source
    pub fn ids(&self) -> &SocketIdAllocator {
        &self.ids
    }

    /// Read access to the type rules
    pub fn types(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.types.read()
    }

    /// Write access to the type rules
    pub fn types_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.types.write()
    }

    /// Latest epoch handed out by [`tick`](Self::tick)
    pub fn epoch(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Advance the change clock, returning the new epoch
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Change records kept per space
    pub fn journal_capacity(&self) -> usize {
        self.journal_capacity
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new(TypeRegistry::with_defaults(), SessionConfig::default().journal_capacity)
    }
}

/// Owner of ids, type rules, node types, processors and streamers
pub struct Session {
    context: Arc<GraphContext>,
    processors: ProcessorRegistry,
    library: NodeLibrary,
    streamers: StreamerRegistry,
    config: SessionConfig,
}

impl Session {
    /// Create a session with the built-in types, node library and processors
    pub fn new(config: SessionConfig) -> Self {
        let mut session = Self::empty(config);
        *session.context.types_mut() = TypeRegistry::with_defaults();
        library::register_builtins(&mut session.library, &session.processors);
        session
    }

    /// Create a session with no conversions, node types or processors
    pub fn empty(config: SessionConfig) -> Self {
        Self {
            context: Arc::new(GraphContext::new(TypeRegistry::new(), config.journal_capacity)),
            processors: ProcessorRegistry::new(),
            library: NodeLibrary::new(),
            streamers: StreamerRegistry::default(),
            config,
        }
    }

    /// Shared graph context
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    /// Settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Processor registry handle
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Node type library
    pub fn library(&self) -> &NodeLibrary {
        &self.library
    }

    /// Mutable node type library
    pub fn library_mut(&mut self) -> &mut NodeLibrary {
        &mut self.library
    }

    /// Per-type serialization extensions
    pub fn streamers(&self) -> &StreamerRegistry {
        &self.streamers
    }

    /// Mutable serialization extensions
    pub fn streamers_mut(&mut self) -> &mut StreamerRegistry {
        &mut self.streamers
    }

    /// Read access to the type rules
    pub fn types(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.context.types()
    }

    /// Write access to the type rules
    pub fn types_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.context.types_mut()
    }

    /// Create an empty space bound to this session
    pub fn create_space(&self, name: impl Into<String>) -> Space {
        Space::new(name, Arc::clone(&self.context))
    }

    /// Instantiate a node of a registered type. `CONTAINER` yields an empty
    /// container.
    pub fn create_node(&self, type_id: &str) -> Result<Node, GraphError> {
        if type_id == CONTAINER_TAG {
            let name = self
                .library
                .get(CONTAINER_TAG)
                .map_or("Container", |node_type| node_type.short_name());
            return Ok(Space::container_node(name, &self.context));
        }
        self.library
            .create_node(type_id, self.context.ids())
            .ok_or_else(|| GraphError::UnknownNodeType(type_id.to_string()))
    }

    /// Instantiate a node of a registered type and add it to `space`
    pub fn add_node(&self, space: &mut Space, type_id: &str) -> Result<NodeId, GraphError> {
        let node = self.create_node(type_id)?;
        space.add_node(node)
    }

    /// Create an evaluator consulting this session's processors
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.processors.clone())
            .with_statistics(self.config.track_cache_statistics)
    }

    /// Create a reloader for the configured processor directory
    pub fn reloader(&self, loader: impl ModuleLoader) -> Option<ProcessorReloader> {
        let dir = self.config.processor_dir.as_ref()?;
        Some(ProcessorReloader::new(
            dir,
            loader,
            self.processors.clone(),
            self.config.poll_interval(),
        ))
    }

    /// Write `space` to a file
    pub fn save(&self, space: &Space, path: impl AsRef<Path>) -> Result<(), IoError> {
        io::save_to_file(path, space, &self.streamers)
    }

    /// Read a space from a file
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(Space, LoadReport), IoError> {
        io::load_from_file(path, self)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::reload::{ModuleBindings, ReloadError};
    use crate::types::DataType;

    #[test]
    fn test_clock_ticks_forward() {
        let context = GraphContext::default();
        assert_eq!(context.epoch(), 0);
        assert_eq!(context.tick(), 1);
        assert_eq!(context.tick(), 2);
        assert_eq!(context.epoch(), 2);
    }

    #[test]
    fn test_builtin_session() {
        let session = Session::default();
        assert!(session.library().get("FLOATVALUE").is_some());
        assert!(session.processors().contains("CREATELIST"));
        assert!(session.types().is_compatible(&DataType::INTEGER, &DataType::FLOAT));

        let mut space = session.create_space("root");
        let id = session.add_node(&mut space, "FLOATVALUE").unwrap();
        assert_eq!(space.node(id).unwrap().name(), "Float Value");
        assert!(matches!(
            session.create_node("NOPE"),
            Err(GraphError::UnknownNodeType(_))
        ));
    }

    #[test]
    fn test_create_container_node() {
        let session = Session::default();
        let mut space = session.create_space("root");
        let id = session.add_node(&mut space, CONTAINER_TAG).unwrap();
        let node = space.node(id).unwrap();
        assert_eq!(node.name(), "Container");
        let container = node.container().unwrap();
        assert_eq!(container.space().node_count(), 2);
        assert!(container.space().node(container.inputs_node()).unwrap().is_boundary());
    }

    #[test]
    fn test_empty_session_has_no_rules() {
        let session = Session::empty(SessionConfig::default());
        assert!(session.library().types().next().is_none());
        assert!(!session.types().is_compatible(&DataType::INTEGER, &DataType::FLOAT));
        let loader = |_: &Path| -> Result<ModuleBindings, ReloadError> { Ok(Vec::new()) };
        assert!(session.reloader(loader).is_none());
    }
}
