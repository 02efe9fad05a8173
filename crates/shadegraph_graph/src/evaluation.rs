// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation and caching.
//!
//! Values are pulled: asking for an output resolves the inputs of its node
//! (recursively, through links and container boundaries), runs the node's
//! processor and memoizes every output the processor produced. Cached
//! entries are dropped by replaying the change journals of the evaluated
//! space hierarchy before each request. Each space is replayed from the
//! epoch it was last synced at, so one evaluator may serve several roots.
//! Entries computed by a processor that has since been rebound are treated
//! as stale together with everything downstream of them.

use crate::node::{NodeId, NodeKind};
use crate::processor::{ProcessError, ProcessorRegistry};
use crate::property::Property;
use crate::socket::{SocketDirection, SocketId};
use crate::space::{Change, Space, SpaceId};
use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};

/// Memoized value of one output socket
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Property,
    /// Clock epoch the value was computed at
    computed_at: u64,
    /// Type tag of the producing node
    node_type: String,
    /// Generation of the processor binding that produced the value
    generation: u64,
}

/// How far the cache has caught up with one space
#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    epoch: u64,
    generation: u64,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Requests answered from the cache
    pub hits: u64,
    /// Requests that needed a computation
    pub misses: u64,
    /// Processor invocations
    pub computations: u64,
    /// Entries dropped by invalidation
    pub invalidations: u64,
    /// Whole-cache flushes after journal truncation
    pub flushes: u64,
}

impl CacheStatistics {
    /// Fraction of cached lookups that hit
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Pull-based evaluator with a per-output cache.
///
/// Any number of root spaces of one session may be evaluated through the
/// same evaluator.
pub struct Evaluator {
    processors: ProcessorRegistry,
    entries: HashMap<SocketId, CacheEntry>,
    /// Journal replay position of every space seen so far
    synced: HashMap<SpaceId, SyncPoint>,
    /// Outputs being resolved, for cycle detection
    stack: IndexSet<SocketId>,
    track_statistics: bool,
    statistics: CacheStatistics,
}

impl Evaluator {
    /// Create an evaluator consulting `processors` by node type tag
    pub fn new(processors: ProcessorRegistry) -> Self {
        Self {
            processors,
            entries: HashMap::new(),
            synced: HashMap::new(),
            stack: IndexSet::new(),
            track_statistics: true,
            statistics: CacheStatistics::default(),
        }
    }

    /// Enable or disable statistics tracking
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.track_statistics = enabled;
        self
    }

    /// Evaluate an output socket of `root` or of any space nested in it
    pub fn get_value(&mut self, root: &Space, output: SocketId) -> Result<Property, EvaluationError> {
        self.sync(root);

        let location = root.locate(output).ok_or(EvaluationError::SocketNotFound(output))?;
        if location.direction != SocketDirection::Output {
            return Err(EvaluationError::NotAnOutput(output));
        }

        self.stack.clear();
        self.resolve_output(root, &location.path, output)
    }

    /// Drop the entry of `socket` (input or output) and everything
    /// downstream of it
    pub fn invalidate(&mut self, root: &Space, socket: SocketId) {
        self.invalidate_downstream(root, vec![socket]);
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.synced.clear();
    }

    /// Cached value of an output, if valid
    pub fn cached(&self, output: SocketId) -> Option<&Property> {
        self.entries.get(&output).map(|entry| &entry.value)
    }

    /// Epoch at which a cached value was computed
    pub fn computed_at(&self, output: SocketId) -> Option<u64> {
        self.entries.get(&output).map(|entry| entry.computed_at)
    }

    /// Number of cached outputs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get statistics
    pub fn statistics(&self) -> CacheStatistics {
        self.statistics
    }

    /// Reset statistics
    pub fn reset_statistics(&mut self) {
        self.statistics = CacheStatistics::default();
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// Replay the journal of every space under `root` from where it was
    /// last synced, and drop results of rebound processors.
    ///
    /// A space seen for the first time is not replayed: nothing cached can
    /// have been computed from it yet.
    fn sync(&mut self, root: &Space) {
        let now = SyncPoint {
            epoch: root.context().epoch(),
            generation: self.processors.generation(),
        };

        let mut changed = Vec::new();
        let mut truncated = false;
        let mut rebound = false;
        let synced = &mut self.synced;
        root.visit_spaces(&mut |_, space| {
            if let Some(point) = synced.insert(space.id(), now) {
                if point.epoch != now.epoch {
                    match space.changes_since(point.epoch) {
                        Some(changes) => changed.extend(changes),
                        None => truncated = true,
                    }
                }
                rebound |= point.generation != now.generation;
            }
        });

        if truncated {
            tracing::debug!("Change journal truncated, flushing cache");
            self.entries.clear();
            if self.track_statistics {
                self.statistics.flushes += 1;
            }
            return;
        }

        let mut start: Vec<SocketId> = changed
            .into_iter()
            .map(|change| match change {
                Change::Input(id) | Change::Output(id) | Change::Removed(id) => id,
            })
            .collect();

        if rebound {
            // Entries of other roots are left for their own sync
            let stale = self
                .entries
                .iter()
                .filter(|(_, entry)| !self.is_current(entry))
                .map(|(id, _)| *id)
                .filter(|id| root.locate(*id).is_some());
            start.extend(stale);
        }

        if !start.is_empty() {
            self.invalidate_downstream(root, start);
        }
    }

    /// Whether an entry was produced by the processor bound now
    fn is_current(&self, entry: &CacheEntry) -> bool {
        self.processors.tag_generation(&entry.node_type) == Some(entry.generation)
    }

    /// Walk downstream from the given sockets, dropping every entry reached.
    ///
    /// A container input leads to the matching interior boundary output and
    /// an interior boundary input leads to the matching container output.
    fn invalidate_downstream(&mut self, root: &Space, mut pending: Vec<SocketId>) {
        let mut visited = HashSet::new();

        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }

            let Some(location) = root.locate(id) else {
                // Removed socket
                self.drop_entry(id);
                continue;
            };
            let Some(space) = root.space_at(&location.path) else {
                continue;
            };

            match location.direction {
                SocketDirection::Output => {
                    self.drop_entry(id);
                    if let Some(output) = space.output(id) {
                        pending.extend(output.consumers().iter().copied());
                    }
                }
                SocketDirection::Input => {
                    let Some(node) = space.node(location.node) else {
                        continue;
                    };
                    match node.kind() {
                        NodeKind::Function => {
                            pending.extend(node.outputs().iter().map(|output| output.id()));
                        }
                        NodeKind::Container(container) => {
                            let mirror = container
                                .space()
                                .node(container.inputs_node())
                                .and_then(|inner| inner.output(location.index));
                            pending.extend(mirror.map(|output| output.id()));
                        }
                        NodeKind::Boundary(SocketDirection::Output) => {
                            let Some((container_id, parent_path)) = location.path.split_last() else {
                                continue;
                            };
                            let mirror = root
                                .space_at(parent_path)
                                .and_then(|parent| parent.node(*container_id))
                                .and_then(|container| container.output(location.index));
                            pending.extend(mirror.map(|output| output.id()));
                        }
                        NodeKind::Boundary(SocketDirection::Input) => {}
                    }
                }
            }
        }
    }

    fn drop_entry(&mut self, id: SocketId) {
        if self.entries.remove(&id).is_some() {
            tracing::debug!("Invalidated cached value of {}", id);
            if self.track_statistics {
                self.statistics.invalidations += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    fn resolve_output(
        &mut self,
        root: &Space,
        path: &[NodeId],
        output: SocketId,
    ) -> Result<Property, EvaluationError> {
        let space = root.space_at(path).ok_or(EvaluationError::SocketNotFound(output))?;
        let node_id = space.socket_node(output).ok_or(EvaluationError::SocketNotFound(output))?;
        let node = space.node(node_id).ok_or(EvaluationError::SocketNotFound(output))?;
        let index = node
            .outputs()
            .iter()
            .position(|socket| socket.id() == output)
            .ok_or(EvaluationError::NotAnOutput(output))?;

        match node.kind() {
            NodeKind::Container(container) => {
                let inner = container
                    .space()
                    .node(container.outputs_node())
                    .and_then(|boundary| boundary.input(index))
                    .map(|input| input.id())
                    .ok_or(EvaluationError::SocketNotFound(output))?;

                if !self.stack.insert(output) {
                    return Err(EvaluationError::CyclicDependency(output));
                }
                let depth = self.stack.len() - 1;
                let mut inner_path = path.to_vec();
                inner_path.push(node_id);
                let result = self.resolve_input(root, &inner_path, inner);
                self.stack.truncate(depth);
                result
            }
            NodeKind::Boundary(SocketDirection::Input) => {
                let Some((container_id, parent_path)) = path.split_last() else {
                    return Ok(Property::empty(node.outputs()[index].data_type().clone()));
                };
                let outer = root
                    .space_at(parent_path)
                    .and_then(|parent| parent.node(*container_id))
                    .and_then(|container| container.input(index))
                    .map(|input| input.id())
                    .ok_or(EvaluationError::SocketNotFound(output))?;
                self.resolve_input(root, parent_path, outer)
            }
            NodeKind::Boundary(SocketDirection::Output) => Err(EvaluationError::NotAnOutput(output)),
            NodeKind::Function => {
                if let Some(entry) = self.entries.get(&output).filter(|entry| self.is_current(entry)) {
                    if self.track_statistics {
                        self.statistics.hits += 1;
                    }
                    tracing::debug!("Cache hit for {}", output);
                    return Ok(entry.value.clone());
                }

                if self.stack.contains(&output) {
                    return Err(EvaluationError::CyclicDependency(output));
                }
                if self.track_statistics {
                    self.statistics.misses += 1;
                }
                tracing::debug!("Cache miss for {} on {}", output, node.name());

                let depth = self.stack.len();
                self.stack.extend(node.outputs().iter().map(|socket| socket.id()));
                let result = self.compute(root, path, node_id);
                self.stack.truncate(depth);

                let (values, generation) = result?;
                let epoch = root.context().epoch();
                let mut requested = None;
                for (socket, value) in node.outputs().iter().zip(values) {
                    if socket.id() == output {
                        requested = Some(value.clone());
                    }
                    let entry = CacheEntry {
                        value,
                        computed_at: epoch,
                        node_type: node.node_type().to_string(),
                        generation,
                    };
                    self.entries.insert(socket.id(), entry);
                }
                requested.ok_or(EvaluationError::NotAnOutput(output))
            }
        }
    }

    /// Resolve every input of a node and run its processor, returning the
    /// outputs and the generation of the processor binding used
    fn compute(
        &mut self,
        root: &Space,
        path: &[NodeId],
        node_id: NodeId,
    ) -> Result<(Vec<Property>, u64), EvaluationError> {
        let space = root.space_at(path).ok_or(EvaluationError::NodeNotFound(node_id))?;
        let node = space.node(node_id).ok_or(EvaluationError::NodeNotFound(node_id))?;

        let mut inputs = Vec::with_capacity(node.inputs().len());
        for input in node.inputs() {
            inputs.push(self.resolve_input(root, path, input.id())?);
        }

        // Looked up per computation; bindings may change between calls
        let (processor, generation) = self
            .processors
            .binding(node.node_type())
            .ok_or_else(|| EvaluationError::NoProcessor(node.node_type().to_string()))?;

        let outputs = processor
            .process(&inputs, node)
            .map_err(|source| EvaluationError::Processor {
                node_type: node.node_type().to_string(),
                source,
            })?;
        if self.track_statistics {
            self.statistics.computations += 1;
        }

        if outputs.len() != node.outputs().len() {
            return Err(EvaluationError::OutputCountMismatch {
                node_type: node.node_type().to_string(),
                expected: node.outputs().len(),
                found: outputs.len(),
            });
        }
        Ok((outputs, generation))
    }

    /// Value flowing into an input: its link, else its default, else an
    /// empty property of its type
    fn resolve_input(
        &mut self,
        root: &Space,
        path: &[NodeId],
        input_id: SocketId,
    ) -> Result<Property, EvaluationError> {
        let space = root.space_at(path).ok_or(EvaluationError::SocketNotFound(input_id))?;
        let input = space.input(input_id).ok_or(EvaluationError::SocketNotFound(input_id))?;

        let Some(output) = input.connected() else {
            return Ok(input
                .default()
                .cloned()
                .unwrap_or_else(|| Property::empty(input.data_type().clone())));
        };

        let value = self.resolve_output(root, path, output)?;
        if input.data_type().is_variable() || value.data_type() == input.data_type() {
            return Ok(value);
        }
        match value.retype(input.data_type()) {
            Some(converted) => Ok(converted),
            None => {
                tracing::debug!(
                    "No value conversion from {} to {} for {}",
                    value.data_type(),
                    input.data_type(),
                    input_id
                );
                Ok(value)
            }
        }
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("entries", &self.entries.len())
            .field("synced_spaces", &self.synced.len())
            .field("statistics", &self.statistics)
            .finish()
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// The output depends on itself
    #[error("Cyclic dependency through {0}")]
    CyclicDependency(SocketId),

    /// Socket not found in the evaluated hierarchy
    #[error("Socket not found: {0}")]
    SocketNotFound(SocketId),

    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Values can only be requested for outputs
    #[error("Socket {0} is not an output")]
    NotAnOutput(SocketId),

    /// No processor bound to the node's type tag
    #[error("No processor registered for {0}")]
    NoProcessor(String),

    /// The processor returned the wrong number of values
    #[error("{node_type} produced {found} outputs, expected {expected}")]
    OutputCountMismatch {
        /// Node type tag
        node_type: String,
        /// Output sockets on the node
        expected: usize,
        /// Values returned
        found: usize,
    },

    /// The processor failed
    #[error("{node_type} failed: {source}")]
    Processor {
        /// Node type tag
        node_type: String,
        /// Processor error
        #[source]
        source: ProcessError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::node::Node;
    use crate::session::Session;
    use crate::types::DataType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Outputs = Result<Vec<Property>, ProcessError>;

    struct Fixture {
        session: Session,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(SessionConfig::default())
        }

        fn with_config(config: SessionConfig) -> Self {
            let session = Session::empty(config);
            let calls = Arc::new(AtomicUsize::new(0));

            // SOURCE: passes its input through
            let counter = Arc::clone(&calls);
            session.processors().register("SOURCE", move |inputs: &[Property], _: &Node| -> Outputs {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![inputs[0].clone()])
            });
            // DOUBLE: twice its input
            session.processors().register("DOUBLE", |inputs: &[Property], _: &Node| -> Outputs {
                Ok(vec![Property::from(inputs[0].as_float().unwrap_or(0.0) * 2.0)])
            });
            Self { session, calls }
        }

        fn node(&self, space: &mut Space, tag: &str, inputs: usize, outputs: usize) -> NodeId {
            let id = space.add_node(Node::new(tag, tag)).unwrap();
            for _ in 0..inputs {
                space.add_input(id, "in", DataType::FLOAT).unwrap();
            }
            for _ in 0..outputs {
                space.add_output(id, "out", DataType::FLOAT).unwrap();
            }
            id
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn input(space: &Space, node: NodeId, index: usize) -> SocketId {
        space.node(node).unwrap().inputs()[index].id()
    }

    fn output(space: &Space, node: NodeId, index: usize) -> SocketId {
        space.node(node).unwrap().outputs()[index].id()
    }

    #[test]
    fn test_memoization_calls_processor_once() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        space.set_default(input(&space, source, 0), Some(Property::from(1.5))).unwrap();

        let mut evaluator = fixture.session.evaluator();
        let out = output(&space, source, 0);
        let first = evaluator.get_value(&space, out).unwrap();
        let second = evaluator.get_value(&space, out).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Property::from(1.5));
        assert_eq!(fixture.calls(), 1);
        assert_eq!(evaluator.statistics().hits, 1);
        assert_eq!(evaluator.statistics().misses, 1);
    }

    #[test]
    fn test_fan_out_evaluates_source_once() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        space.set_default(input(&space, source, 0), Some(Property::from(2.0))).unwrap();

        let sinks: Vec<NodeId> = (0..4)
            .map(|_| {
                let sink = fixture.node(&mut space, "DOUBLE", 1, 1);
                space.create_link(output(&space, source, 0), input(&space, sink, 0)).unwrap();
                sink
            })
            .collect();

        let mut evaluator = fixture.session.evaluator();
        for sink in &sinks {
            let value = evaluator.get_value(&space, output(&space, *sink, 0)).unwrap();
            assert_eq!(value.as_float(), Some(4.0));
        }
        assert_eq!(fixture.calls(), 1);
    }

    #[test]
    fn test_default_change_invalidates_downstream() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        let sink = fixture.node(&mut space, "DOUBLE", 1, 1);
        space.create_link(output(&space, source, 0), input(&space, sink, 0)).unwrap();
        space.set_default(input(&space, source, 0), Some(Property::from(1.0))).unwrap();

        let mut evaluator = fixture.session.evaluator();
        let out = output(&space, sink, 0);
        assert_eq!(evaluator.get_value(&space, out).unwrap().as_float(), Some(2.0));

        space.set_default(input(&space, source, 0), Some(Property::from(3.0))).unwrap();
        assert!(evaluator.cached(out).is_some());
        assert_eq!(evaluator.get_value(&space, out).unwrap().as_float(), Some(6.0));
        assert_eq!(fixture.calls(), 2);
        assert!(evaluator.statistics().invalidations >= 2);
    }

    #[test]
    fn test_unrelated_change_keeps_cache() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        let other = fixture.node(&mut space, "SOURCE", 1, 1);

        let mut evaluator = fixture.session.evaluator();
        evaluator.get_value(&space, output(&space, source, 0)).unwrap();
        space.set_default(input(&space, other, 0), Some(Property::from(9.0))).unwrap();
        evaluator.get_value(&space, output(&space, source, 0)).unwrap();
        assert_eq!(fixture.calls(), 1);
    }

    #[test]
    fn test_unconnected_input_without_default_is_empty() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);

        let mut evaluator = fixture.session.evaluator();
        let value = evaluator.get_value(&space, output(&space, source, 0)).unwrap();
        assert!(value.is_empty());
        assert_eq!(value.data_type(), &DataType::FLOAT);
    }

    #[test]
    fn test_cycle_is_reported() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let a = fixture.node(&mut space, "DOUBLE", 1, 1);
        let b = fixture.node(&mut space, "DOUBLE", 1, 1);
        space.create_link(output(&space, a, 0), input(&space, b, 0)).unwrap();
        space.create_link(output(&space, b, 0), input(&space, a, 0)).unwrap();

        let mut evaluator = fixture.session.evaluator();
        let out = output(&space, a, 0);
        assert_eq!(evaluator.get_value(&space, out), Err(EvaluationError::CyclicDependency(out)));
        assert!(evaluator.is_empty());

        // Breaking the cycle makes the graph evaluable again
        space.disconnect(input(&space, a, 0));
        assert_eq!(evaluator.get_value(&space, out).unwrap().as_float(), Some(0.0));
    }

    #[test]
    fn test_missing_processor_and_bad_output_count() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let unknown = fixture.node(&mut space, "UNKNOWN", 0, 1);
        let short = fixture.node(&mut space, "SOURCE", 1, 2);

        let mut evaluator = fixture.session.evaluator();
        assert_eq!(
            evaluator.get_value(&space, output(&space, unknown, 0)),
            Err(EvaluationError::NoProcessor("UNKNOWN".to_string()))
        );
        assert!(matches!(
            evaluator.get_value(&space, output(&space, short, 1)),
            Err(EvaluationError::OutputCountMismatch { expected: 2, found: 1, .. })
        ));
        assert_eq!(
            evaluator.get_value(&space, input(&space, short, 0)),
            Err(EvaluationError::NotAnOutput(input(&space, short, 0)))
        );
    }

    #[test]
    fn test_processor_swap_recomputes_without_invalidation() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        let node = fixture.node(&mut space, "DOUBLE", 1, 1);
        let sink = fixture.node(&mut space, "SOURCE", 1, 1);
        space.create_link(output(&space, source, 0), input(&space, node, 0)).unwrap();
        space.create_link(output(&space, node, 0), input(&space, sink, 0)).unwrap();
        space.set_default(input(&space, source, 0), Some(Property::from(1.0))).unwrap();

        let mut evaluator = fixture.session.evaluator();
        let out = output(&space, node, 0);
        let downstream = output(&space, sink, 0);
        assert_eq!(evaluator.get_value(&space, downstream).unwrap().as_float(), Some(2.0));

        fixture.session.processors().register("DOUBLE", |inputs: &[Property], _: &Node| -> Outputs {
            Ok(vec![Property::from(inputs[0].as_float().unwrap_or(0.0) * 3.0)])
        });
        assert_eq!(evaluator.get_value(&space, out).unwrap().as_float(), Some(3.0));
        // Values computed from the replaced processor's result are stale too
        assert_eq!(evaluator.get_value(&space, downstream).unwrap().as_float(), Some(3.0));
        // The unchanged upstream source is still served from the cache
        assert_eq!(fixture.calls(), 3);

        fixture.session.processors().unregister("DOUBLE");
        assert_eq!(
            evaluator.get_value(&space, downstream),
            Err(EvaluationError::NoProcessor("DOUBLE".to_string()))
        );
    }

    #[test]
    fn test_processor_swap_reaches_every_root() {
        let fixture = Fixture::new();
        let mut a = fixture.session.create_space("a");
        let mut b = fixture.session.create_space("b");
        let in_a = fixture.node(&mut a, "DOUBLE", 1, 1);
        let in_b = fixture.node(&mut b, "DOUBLE", 1, 1);
        let sink_b = fixture.node(&mut b, "SOURCE", 1, 1);
        b.create_link(output(&b, in_b, 0), input(&b, sink_b, 0)).unwrap();
        a.set_default(input(&a, in_a, 0), Some(Property::from(1.0))).unwrap();
        b.set_default(input(&b, in_b, 0), Some(Property::from(2.0))).unwrap();

        let mut evaluator = fixture.session.evaluator();
        assert_eq!(evaluator.get_value(&b, output(&b, sink_b, 0)).unwrap().as_float(), Some(4.0));
        assert_eq!(evaluator.get_value(&a, output(&a, in_a, 0)).unwrap().as_float(), Some(2.0));

        fixture.session.processors().register("DOUBLE", |inputs: &[Property], _: &Node| -> Outputs {
            Ok(vec![Property::from(inputs[0].as_float().unwrap_or(0.0) * 10.0)])
        });
        assert_eq!(evaluator.get_value(&a, output(&a, in_a, 0)).unwrap().as_float(), Some(10.0));
        assert_eq!(evaluator.get_value(&b, output(&b, sink_b, 0)).unwrap().as_float(), Some(20.0));
    }

    #[test]
    fn test_changes_in_one_root_survive_evaluating_another() {
        let fixture = Fixture::new();
        let mut a = fixture.session.create_space("a");
        let mut b = fixture.session.create_space("b");
        let source_a = fixture.node(&mut a, "SOURCE", 1, 1);
        let source_b = fixture.node(&mut b, "SOURCE", 1, 1);
        a.set_default(input(&a, source_a, 0), Some(Property::from(1.0))).unwrap();
        b.set_default(input(&b, source_b, 0), Some(Property::from(2.0))).unwrap();

        let mut evaluator = fixture.session.evaluator();
        assert_eq!(evaluator.get_value(&b, output(&b, source_b, 0)).unwrap().as_float(), Some(2.0));
        assert_eq!(evaluator.get_value(&a, output(&a, source_a, 0)).unwrap().as_float(), Some(1.0));

        b.set_default(input(&b, source_b, 0), Some(Property::from(9.0))).unwrap();
        assert_eq!(evaluator.get_value(&a, output(&a, source_a, 0)).unwrap().as_float(), Some(1.0));
        assert_eq!(evaluator.get_value(&b, output(&b, source_b, 0)).unwrap().as_float(), Some(9.0));
        assert_eq!(fixture.calls(), 3);
    }

    #[test]
    fn test_container_passes_values_through() {
        let fixture = Fixture::new();
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        space.set_default(input(&space, source, 0), Some(Property::from(5.0))).unwrap();

        let group = space.add_container("Group");
        let group_in = space.add_input(group, "x", DataType::FLOAT).unwrap();
        let group_out = space.add_output(group, "y", DataType::FLOAT).unwrap();
        space.create_link(output(&space, source, 0), group_in).unwrap();

        let container = space.node(group).unwrap().container().unwrap();
        let (inputs_node, outputs_node) = (container.inputs_node(), container.outputs_node());
        let inner = space.container_space_mut(group).unwrap();
        let double = inner.add_node(Node::new("DOUBLE", "Double")).unwrap();
        let double_in = inner.add_input(double, "in", DataType::FLOAT).unwrap();
        let double_out = inner.add_output(double, "out", DataType::FLOAT).unwrap();
        let inner_src = inner.node(inputs_node).unwrap().outputs()[0].id();
        let inner_dst = inner.node(outputs_node).unwrap().inputs()[0].id();
        inner.create_link(inner_src, double_in).unwrap();
        inner.create_link(double_out, inner_dst).unwrap();

        let mut evaluator = fixture.session.evaluator();
        assert_eq!(evaluator.get_value(&space, group_out).unwrap().as_float(), Some(10.0));
        assert_eq!(evaluator.get_value(&space, double_out).unwrap().as_float(), Some(10.0));

        // An edit outside the container reaches cached values inside it
        space.set_default(input(&space, source, 0), Some(Property::from(1.0))).unwrap();
        assert!(evaluator.get_value(&space, group_out).is_ok());
        assert!(evaluator.cached(double_out).is_some());
        assert_eq!(evaluator.get_value(&space, double_out).unwrap().as_float(), Some(2.0));
    }

    #[test]
    fn test_truncated_journal_flushes_cache() {
        let fixture = Fixture::with_config(SessionConfig {
            journal_capacity: 1,
            ..SessionConfig::default()
        });
        let mut space = fixture.session.create_space("root");
        let source = fixture.node(&mut space, "SOURCE", 1, 1);
        let other = fixture.node(&mut space, "SOURCE", 1, 1);

        let mut evaluator = fixture.session.evaluator();
        evaluator.get_value(&space, output(&space, source, 0)).unwrap();
        evaluator.reset_statistics();

        space.set_default(input(&space, other, 0), Some(Property::from(1.0))).unwrap();
        space.set_default(input(&space, other, 0), Some(Property::from(2.0))).unwrap();
        evaluator.get_value(&space, output(&space, source, 0)).unwrap();

        assert_eq!(fixture.calls(), 2);
        assert_eq!(evaluator.statistics().flushes, 1);
    }
}
