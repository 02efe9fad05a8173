// SPDX-License-Identifier: MIT OR Apache-2.0
//! Space: the graph container owning nodes, sockets and link topology.
//!
//! A space owns its nodes through an insertion-ordered table and indexes
//! every socket of those nodes by id. Links are kept on both sides (input
//! -> output reference, output -> consumer set) and only this module mutates
//! them, so the two sides always agree.

use crate::link::Link;
use crate::node::{Container, Node, NodeId, NodeKind, CONTAINER_TAG, INSOCKETS_TAG, OUTSOCKETS_TAG};
use crate::property::Property;
use crate::session::GraphContext;
use crate::socket::{InputSocket, OutputSocket, SocketDirection, SocketId};
use crate::types::DataType;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a space, distinct for every space created in a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub Uuid);

impl SpaceId {
    /// Create a new random space ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SpaceId {
    fn default() -> Self {
        Self::new()
    }
}

/// A recorded graph mutation relevant to cached values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// An input's link or default changed
    Input(SocketId),
    /// An output's value may differ from what was computed before
    Output(SocketId),
    /// An output socket no longer exists
    Removed(SocketId),
}

/// Bounded log of changes stamped with session epochs
#[derive(Debug)]
struct ChangeJournal {
    entries: VecDeque<(u64, Change)>,
    capacity: usize,
    /// Epoch of the newest entry dropped for capacity
    truncated_at: u64,
}

impl ChangeJournal {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            truncated_at: 0,
        }
    }

    fn record(&mut self, epoch: u64, change: Change) {
        if self.entries.len() >= self.capacity {
            if let Some((dropped, _)) = self.entries.pop_front() {
                self.truncated_at = dropped;
            }
        }
        self.entries.push_back((epoch, change));
    }

    /// Changes newer than `epoch`, or `None` when some were already dropped
    fn since(&self, epoch: u64) -> Option<Vec<Change>> {
        if self.truncated_at > epoch {
            return None;
        }
        Some(
            self.entries
                .iter()
                .filter(|(stamp, _)| *stamp > epoch)
                .map(|(_, change)| *change)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct SocketSlot {
    node: NodeId,
    direction: SocketDirection,
    index: usize,
}

/// Where a socket lives inside a space hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketLocation {
    /// Container nodes from the root down to the owning space
    pub path: Vec<NodeId>,
    /// Owning node
    pub node: NodeId,
    /// Socket direction
    pub direction: SocketDirection,
    /// Index among the node's sockets of that direction
    pub index: usize,
}

/// A node graph
#[derive(Debug)]
pub struct Space {
    id: SpaceId,
    /// Space name
    name: String,
    /// Nodes in insertion order
    nodes: IndexMap<NodeId, Node>,
    /// Every socket of `nodes`, by id
    sockets: HashMap<SocketId, SocketSlot>,
    journal: ChangeJournal,
    context: Arc<GraphContext>,
}

impl Space {
    /// Create an empty space bound to a graph context
    pub fn new(name: impl Into<String>, context: Arc<GraphContext>) -> Self {
        Self {
            id: SpaceId::new(),
            name: name.into(),
            nodes: IndexMap::new(),
            sockets: HashMap::new(),
            journal: ChangeJournal::new(context.journal_capacity()),
            context,
        }
    }

    /// Identity of this space
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Space name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the space
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Graph context shared with the session
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Add a node to the space
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        if let Some(id) = node.socket_ids().find(|id| self.sockets.contains_key(id)) {
            return Err(GraphError::DuplicateSocket(id));
        }
        Ok(self.insert_node(node))
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        for (index, input) in node.inputs.iter().enumerate() {
            self.sockets.insert(
                input.id,
                SocketSlot { node: id, direction: SocketDirection::Input, index },
            );
        }
        for (index, output) in node.outputs.iter().enumerate() {
            self.sockets.insert(
                output.id,
                SocketSlot { node: id, direction: SocketDirection::Output, index },
            );
        }
        tracing::debug!("Added node {} ({}) to space {}", node.name, node.node_type, self.name);
        self.nodes.insert(id, node);
        id
    }

    /// Add an empty container node owning a nested space
    pub fn add_container(&mut self, name: impl Into<String>) -> NodeId {
        let node = Self::container_node(name, &self.context);
        self.insert_node(node)
    }

    /// Build a detached container node with an empty nested space
    pub(crate) fn container_node(name: impl Into<String>, context: &Arc<GraphContext>) -> Node {
        let name = name.into();
        let mut inner = Space::new(name.clone(), Arc::clone(context));
        let inputs_node = inner.insert_node(Node::new(INSOCKETS_TAG, "Inputs"));
        let outputs_node = inner.insert_node(Node::new(OUTSOCKETS_TAG, "Outputs"));

        let mut node = Node::new(CONTAINER_TAG, name);
        node.kind = NodeKind::Container(Box::new(Container {
            space: inner,
            inputs_node,
            outputs_node,
        }));
        node
    }

    /// Remove a node after tearing down all of its links
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node, GraphError> {
        let node = self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        if node.is_boundary() {
            return Err(GraphError::BoundaryNode(node_id));
        }

        let mut links = Vec::new();
        for input in &node.inputs {
            if let Some(output) = input.connected {
                links.push(Link::new(output, input.id));
            }
        }
        for output in &node.outputs {
            links.extend(output.consumers.iter().map(|&input| Link::new(output.id, input)));
        }
        for link in links {
            self.remove_link(link.input, link.output);
        }

        let node = self
            .nodes
            .shift_remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        for id in node.socket_ids() {
            self.sockets.remove(&id);
        }

        let mut removed = Vec::new();
        collect_output_ids(&node, &mut removed);
        for id in removed {
            self.record(Change::Removed(id));
        }

        tracing::debug!("Removed node {} from space {}", node.name, self.name);
        Ok(node)
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID (rename, move)
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get a node by insertion index
    pub fn node_at(&self, index: usize) -> Option<&Node> {
        self.nodes.get_index(index).map(|(_, node)| node)
    }

    /// Insertion index of a node
    pub fn node_index(&self, node_id: NodeId) -> Option<usize> {
        self.nodes.get_index_of(&node_id)
    }

    /// Get all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nested space of a container node
    pub fn container_space(&self, node_id: NodeId) -> Option<&Space> {
        self.nodes.get(&node_id)?.container().map(Container::space)
    }

    /// Mutable nested space of a container node
    pub fn container_space_mut(&mut self, node_id: NodeId) -> Option<&mut Space> {
        self.nodes
            .get_mut(&node_id)?
            .container_mut()
            .map(|container| &mut container.space)
    }

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    /// Whether a socket belongs to a node of this space
    pub fn contains_socket(&self, id: SocketId) -> bool {
        self.sockets.contains_key(&id)
    }

    /// Node owning a socket
    pub fn socket_node(&self, id: SocketId) -> Option<NodeId> {
        self.sockets.get(&id).map(|slot| slot.node)
    }

    /// Direction of a socket
    pub fn socket_direction(&self, id: SocketId) -> Option<SocketDirection> {
        self.sockets.get(&id).map(|slot| slot.direction)
    }

    /// Type of a socket
    pub fn socket_type(&self, id: SocketId) -> Option<&DataType> {
        let slot = self.sockets.get(&id)?;
        let node = self.nodes.get(&slot.node)?;
        match slot.direction {
            SocketDirection::Input => node.inputs.get(slot.index).map(InputSocket::data_type),
            SocketDirection::Output => node.outputs.get(slot.index).map(OutputSocket::data_type),
        }
    }

    /// Get an input socket by id
    pub fn input(&self, id: SocketId) -> Option<&InputSocket> {
        let slot = self.sockets.get(&id)?;
        if slot.direction != SocketDirection::Input {
            return None;
        }
        self.nodes.get(&slot.node)?.inputs.get(slot.index)
    }

    /// Get an output socket by id
    pub fn output(&self, id: SocketId) -> Option<&OutputSocket> {
        let slot = self.sockets.get(&id)?;
        if slot.direction != SocketDirection::Output {
            return None;
        }
        self.nodes.get(&slot.node)?.outputs.get(slot.index)
    }

    fn input_mut(&mut self, id: SocketId) -> Option<&mut InputSocket> {
        let slot = *self.sockets.get(&id)?;
        if slot.direction != SocketDirection::Input {
            return None;
        }
        self.nodes.get_mut(&slot.node)?.inputs.get_mut(slot.index)
    }

    fn output_mut(&mut self, id: SocketId) -> Option<&mut OutputSocket> {
        let slot = *self.sockets.get(&id)?;
        if slot.direction != SocketDirection::Output {
            return None;
        }
        self.nodes.get_mut(&slot.node)?.outputs.get_mut(slot.index)
    }

    /// Add an input socket to a node. On a container the matching output
    /// appears on its interior inputs node.
    pub fn add_input(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<SocketId, GraphError> {
        self.add_socket(node_id, SocketDirection::Input, name.into(), data_type)
    }

    /// Add an output socket to a node. On a container the matching input
    /// appears on its interior outputs node.
    pub fn add_output(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<SocketId, GraphError> {
        self.add_socket(node_id, SocketDirection::Output, name.into(), data_type)
    }

    fn add_socket(
        &mut self,
        node_id: NodeId,
        direction: SocketDirection,
        name: String,
        data_type: DataType,
    ) -> Result<SocketId, GraphError> {
        let ids = Arc::clone(&self.context);
        let node = self.nodes.get_mut(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
        if node.is_boundary() {
            return Err(GraphError::BoundaryNode(node_id));
        }

        let id = ids.ids().allocate();
        let index = match direction {
            SocketDirection::Input => {
                node.inputs.push(InputSocket::new(id, name.clone(), data_type.clone()));
                node.inputs.len() - 1
            }
            SocketDirection::Output => {
                node.outputs.push(OutputSocket::new(id, name.clone(), data_type.clone()));
                node.outputs.len() - 1
            }
        };

        if let Some(container) = node.container_mut() {
            let (boundary, mirror) = match direction {
                SocketDirection::Input => (container.inputs_node, SocketDirection::Output),
                SocketDirection::Output => (container.outputs_node, SocketDirection::Input),
            };
            container.space.add_boundary_socket(boundary, mirror, name, data_type);
        }

        self.sockets.insert(id, SocketSlot { node: node_id, direction, index });
        if direction == SocketDirection::Input {
            self.record(Change::Input(id));
        }
        Ok(id)
    }

    fn add_boundary_socket(
        &mut self,
        node_id: NodeId,
        direction: SocketDirection,
        name: String,
        data_type: DataType,
    ) {
        let id = self.context.ids().allocate();
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let index = match direction {
            SocketDirection::Input => {
                node.inputs.push(InputSocket::new(id, name, data_type));
                node.inputs.len() - 1
            }
            SocketDirection::Output => {
                node.outputs.push(OutputSocket::new(id, name, data_type));
                node.outputs.len() - 1
            }
        };
        self.sockets.insert(id, SocketSlot { node: node_id, direction, index });
    }

    /// Remove a socket after tearing down its links. Removing a container
    /// socket also removes its interior mirror.
    pub fn remove_socket(&mut self, id: SocketId) -> Result<(), GraphError> {
        let slot = *self.sockets.get(&id).ok_or(GraphError::SocketNotFound(id))?;
        if self.nodes.get(&slot.node).is_some_and(Node::is_boundary) {
            return Err(GraphError::BoundaryNode(slot.node));
        }

        self.unlink_socket(id);
        self.remove_socket_at(slot);

        let Some(node) = self.nodes.get_mut(&slot.node) else {
            return Ok(());
        };
        let outputs: Vec<SocketId> = node.outputs.iter().map(OutputSocket::id).collect();

        if let Some(container) = node.container_mut() {
            let (boundary, mirror_direction) = match slot.direction {
                SocketDirection::Input => (container.inputs_node, SocketDirection::Output),
                SocketDirection::Output => (container.outputs_node, SocketDirection::Input),
            };
            let mirror = container.space.node(boundary).and_then(|node| match mirror_direction {
                SocketDirection::Input => node.inputs.get(slot.index).map(InputSocket::id),
                SocketDirection::Output => node.outputs.get(slot.index).map(OutputSocket::id),
            });
            if let Some(mirror) = mirror {
                let inner = &mut container.space;
                inner.unlink_socket(mirror);
                if let Some(mirror_slot) = inner.sockets.get(&mirror).copied() {
                    inner.remove_socket_at(mirror_slot);
                }
                if mirror_direction == SocketDirection::Output {
                    inner.record(Change::Removed(mirror));
                }
            }
        }

        match slot.direction {
            SocketDirection::Input => {
                for output in outputs {
                    self.record(Change::Output(output));
                }
            }
            SocketDirection::Output => self.record(Change::Removed(id)),
        }
        Ok(())
    }

    fn unlink_socket(&mut self, id: SocketId) {
        if let Some(input) = self.input(id) {
            if let Some(output) = input.connected {
                self.remove_link(id, output);
            }
        } else if let Some(output) = self.output(id) {
            let consumers: Vec<SocketId> = output.consumers.iter().copied().collect();
            for input in consumers {
                self.remove_link(input, id);
            }
        }
    }

    /// Drop the socket at `slot` and reindex the sockets after it
    fn remove_socket_at(&mut self, slot: SocketSlot) {
        let Some(node) = self.nodes.get_mut(&slot.node) else {
            return;
        };
        let shifted: Vec<SocketId> = match slot.direction {
            SocketDirection::Input => {
                let removed = node.inputs.remove(slot.index);
                self.sockets.remove(&removed.id);
                node.inputs[slot.index..].iter().map(InputSocket::id).collect()
            }
            SocketDirection::Output => {
                let removed = node.outputs.remove(slot.index);
                self.sockets.remove(&removed.id);
                node.outputs[slot.index..].iter().map(OutputSocket::id).collect()
            }
        };
        for (offset, id) in shifted.into_iter().enumerate() {
            if let Some(entry) = self.sockets.get_mut(&id) {
                entry.index = slot.index + offset;
            }
        }
    }

    /// Rename a socket
    pub fn rename_socket(&mut self, id: SocketId, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        if let Some(input) = self.input_mut(id) {
            input.name = name;
        } else if let Some(output) = self.output_mut(id) {
            output.name = name;
        } else {
            return Err(GraphError::SocketNotFound(id));
        }
        Ok(())
    }

    /// Set or clear the literal default of an input.
    ///
    /// A value of another type is retyped to the input's type when the type
    /// rules allow it.
    pub fn set_default(&mut self, id: SocketId, value: Option<Property>) -> Result<(), GraphError> {
        let input = match self.input(id) {
            Some(input) => input,
            None if self.contains_socket(id) => return Err(GraphError::NotAnInput(id)),
            None => return Err(GraphError::SocketNotFound(id)),
        };

        let value = match value {
            Some(value) => Some(self.coerce_default(&input.data_type, value)?),
            None => None,
        };

        if let Some(input) = self.input_mut(id) {
            input.default = value;
        }
        self.record(Change::Input(id));
        Ok(())
    }

    fn coerce_default(&self, target: &DataType, value: Property) -> Result<Property, GraphError> {
        if target.is_variable() || value.data_type() == target {
            return Ok(value);
        }
        let mismatch = || GraphError::TypeMismatch {
            output: value.data_type().clone(),
            input: target.clone(),
        };
        if !self.context.types().is_compatible(value.data_type(), target) {
            return Err(mismatch());
        }
        value.retype(target).ok_or_else(mismatch)
    }

    /// Change a socket's type. The default of an input is retyped (or
    /// dropped when impossible) and links that no longer type-check are
    /// removed and returned.
    pub fn retype_socket(&mut self, id: SocketId, data_type: DataType) -> Result<Vec<Link>, GraphError> {
        let direction = self.socket_direction(id).ok_or(GraphError::SocketNotFound(id))?;

        let links: Vec<Link> = match direction {
            SocketDirection::Input => {
                let input = self.input_mut(id).ok_or(GraphError::SocketNotFound(id))?;
                input.default = input.default.as_ref().and_then(|value| value.retype(&data_type));
                input.data_type = data_type;
                input.connected.map(|output| Link::new(output, id)).into_iter().collect()
            }
            SocketDirection::Output => {
                let output = self.output_mut(id).ok_or(GraphError::SocketNotFound(id))?;
                output.data_type = data_type;
                output.consumers.iter().map(|&input| Link::new(id, input)).collect()
            }
        };

        let mut dropped = Vec::new();
        for link in links {
            let compatible = match (self.socket_type(link.output), self.socket_type(link.input)) {
                (Some(from), Some(to)) => self.context.types().is_compatible(from, to),
                _ => false,
            };
            if !compatible {
                self.remove_link(link.input, link.output);
                dropped.push(link);
            }
        }

        match direction {
            SocketDirection::Input => self.record(Change::Input(id)),
            SocketDirection::Output => self.record(Change::Output(id)),
        }
        Ok(dropped)
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Check whether two sockets may be linked, in either argument order.
    ///
    /// Fails for unknown sockets, equal directions, sockets on the same
    /// node and incompatible types. Returns the link in output -> input form.
    pub fn validate_link(&self, a: SocketId, b: SocketId) -> Result<Link, GraphError> {
        let slot_a = self.sockets.get(&a).ok_or(GraphError::SocketNotFound(a))?;
        let slot_b = self.sockets.get(&b).ok_or(GraphError::SocketNotFound(b))?;

        if slot_a.direction == slot_b.direction {
            return Err(GraphError::SameDirection);
        }
        if slot_a.node == slot_b.node {
            return Err(GraphError::SelfLoop(slot_a.node));
        }

        let link = match slot_a.direction {
            SocketDirection::Output => Link::new(a, b),
            SocketDirection::Input => Link::new(b, a),
        };

        let output_type = self.socket_type(link.output).ok_or(GraphError::SocketNotFound(link.output))?;
        let input_type = self.socket_type(link.input).ok_or(GraphError::SocketNotFound(link.input))?;
        if !self.context.types().is_compatible(output_type, input_type) {
            return Err(GraphError::TypeMismatch {
                output: output_type.clone(),
                input: input_type.clone(),
            });
        }

        Ok(link)
    }

    /// Whether two sockets may be linked
    pub fn can_link(&self, a: SocketId, b: SocketId) -> bool {
        self.validate_link(a, b).is_ok()
    }

    /// Link two sockets given in either order.
    ///
    /// All checks run before any mutation. An input that is already
    /// connected is detached from its previous output first.
    pub fn create_link(&mut self, a: SocketId, b: SocketId) -> Result<Link, GraphError> {
        let link = self.validate_link(a, b)?;
        self.attach(link);
        Ok(link)
    }

    /// Apply a validated link
    pub(crate) fn attach(&mut self, link: Link) {
        let previous = match self.input(link.input) {
            Some(input) if input.connected == Some(link.output) => return,
            Some(input) => input.connected,
            None => return,
        };
        if !self.contains_socket(link.output) {
            return;
        }

        if let Some(previous) = previous {
            if let Some(output) = self.output_mut(previous) {
                output.consumers.shift_remove(&link.input);
            }
        }
        if let Some(input) = self.input_mut(link.input) {
            input.connected = Some(link.output);
        }
        if let Some(output) = self.output_mut(link.output) {
            output.consumers.insert(link.input);
        }

        self.record(Change::Input(link.input));
        tracing::debug!("Linked {} in space {}", link, self.name);
    }

    /// Remove the link between `input` and `output`.
    ///
    /// Returns whether a link was removed; calling it for sockets that are
    /// not linked is a no-op.
    pub fn remove_link(&mut self, input: SocketId, output: SocketId) -> bool {
        let linked = self
            .input(input)
            .is_some_and(|socket| socket.connected == Some(output));
        if !linked {
            return false;
        }

        if let Some(socket) = self.input_mut(input) {
            socket.connected = None;
        }
        if let Some(socket) = self.output_mut(output) {
            socket.consumers.shift_remove(&input);
        }

        self.record(Change::Input(input));
        tracing::debug!("Unlinked {} in space {}", Link::new(output, input), self.name);
        true
    }

    /// Detach an input from whatever feeds it
    pub fn disconnect(&mut self, input: SocketId) -> Option<Link> {
        let output = self.input(input)?.connected?;
        self.remove_link(input, output);
        Some(Link::new(output, input))
    }

    /// All links, ordered by consuming node then input index
    pub fn links(&self) -> Vec<Link> {
        self.nodes
            .values()
            .flat_map(|node| node.inputs.iter())
            .filter_map(|input| input.connected.map(|output| Link::new(output, input.id)))
            .collect()
    }

    /// Number of links
    pub fn link_count(&self) -> usize {
        self.nodes
            .values()
            .flat_map(|node| node.inputs.iter())
            .filter(|input| input.connected.is_some())
            .count()
    }

    // ------------------------------------------------------------------
    // Copy
    // ------------------------------------------------------------------

    /// Copy a set of nodes within this space.
    ///
    /// Nodes are cloned first with fresh ids and no links; a second pass
    /// rebuilds the links whose both ends were copied. Links reaching nodes
    /// outside the set are dropped. Returns the new node ids in input order,
    /// one per distinct node.
    pub fn duplicate_nodes(&mut self, node_ids: &[NodeId]) -> Result<Vec<NodeId>, GraphError> {
        // A node listed twice is copied once
        let node_ids: IndexSet<NodeId> = node_ids.iter().copied().collect();
        for &node_id in &node_ids {
            let node = self.nodes.get(&node_id).ok_or(GraphError::NodeNotFound(node_id))?;
            if node.is_boundary() {
                return Err(GraphError::BoundaryNode(node_id));
            }
        }

        let mut sockets = HashMap::new();
        let mut copies = Vec::with_capacity(node_ids.len());
        for node_id in &node_ids {
            if let Some(node) = self.nodes.get(node_id) {
                copies.push(node.detached_copy(self.context.ids(), &mut sockets));
            }
        }

        let links = self.remap_links(node_ids.iter().filter_map(|id| self.nodes.get(id)), &sockets);

        let new_ids: Vec<NodeId> = copies.into_iter().map(|copy| self.insert_node(copy)).collect();
        for link in links {
            self.attach(link);
        }
        Ok(new_ids)
    }

    fn remap_links<'a>(
        &self,
        originals: impl Iterator<Item = &'a Node>,
        sockets: &HashMap<SocketId, SocketId>,
    ) -> Vec<Link> {
        let mut links = Vec::new();
        for node in originals {
            for input in &node.inputs {
                let Some(output) = input.connected else {
                    continue;
                };
                if let (Some(&new_output), Some(&new_input)) = (sockets.get(&output), sockets.get(&input.id)) {
                    links.push(Link::new(new_output, new_input));
                }
            }
        }
        links
    }

    /// Deep copy of the whole space with fresh ids and its internal links
    pub(crate) fn detached_copy(
        &self,
        sockets: &mut HashMap<SocketId, SocketId>,
        nodes: &mut HashMap<NodeId, NodeId>,
    ) -> Space {
        let mut copy = Space::new(self.name.clone(), Arc::clone(&self.context));
        for node in self.nodes.values() {
            let node_copy = node.detached_copy(self.context.ids(), sockets);
            nodes.insert(node.id, node_copy.id);
            copy.insert_node(node_copy);
        }
        for link in self.remap_links(self.nodes.values(), sockets) {
            copy.attach(link);
        }
        copy
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Find a socket in this space or any nested container
    pub fn locate(&self, id: SocketId) -> Option<SocketLocation> {
        if let Some(slot) = self.sockets.get(&id) {
            return Some(SocketLocation {
                path: Vec::new(),
                node: slot.node,
                direction: slot.direction,
                index: slot.index,
            });
        }
        self.nodes.values().find_map(|node| {
            let container = node.container()?;
            let mut location = container.space.locate(id)?;
            location.path.insert(0, node.id);
            Some(location)
        })
    }

    /// Nested space reached by following container nodes
    pub fn space_at(&self, path: &[NodeId]) -> Option<&Space> {
        path.iter()
            .try_fold(self, |space, node_id| space.container_space(*node_id))
    }

    /// Mutable nested space reached by following container nodes
    pub fn space_at_mut(&mut self, path: &[NodeId]) -> Option<&mut Space> {
        let mut space = self;
        for node_id in path {
            space = space.container_space_mut(*node_id)?;
        }
        Some(space)
    }

    /// Call `visit` for this space and every nested space, depth first
    pub fn visit_spaces(&self, visit: &mut dyn FnMut(&[NodeId], &Space)) {
        let mut path = Vec::new();
        self.visit_spaces_at(&mut path, visit);
    }

    fn visit_spaces_at(&self, path: &mut Vec<NodeId>, visit: &mut dyn FnMut(&[NodeId], &Space)) {
        visit(path.as_slice(), self);
        for node in self.nodes.values() {
            if let Some(container) = node.container() {
                path.push(node.id);
                container.space.visit_spaces_at(path, visit);
                path.pop();
            }
        }
    }

    // ------------------------------------------------------------------
    // Change journal
    // ------------------------------------------------------------------

    fn record(&mut self, change: Change) {
        let epoch = self.context.tick();
        self.journal.record(epoch, change);
    }

    /// Changes recorded after `epoch`, or `None` if the journal no longer
    /// reaches back that far
    pub fn changes_since(&self, epoch: u64) -> Option<Vec<Change>> {
        self.journal.since(epoch)
    }
}

fn collect_output_ids(node: &Node, out: &mut Vec<SocketId>) {
    out.extend(node.outputs.iter().map(OutputSocket::id));
    if let Some(container) = node.container() {
        for inner in container.space.nodes() {
            collect_output_ids(inner, out);
        }
    }
}

/// Error from a space mutation. The space is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Socket not found in this space
    #[error("Socket not found: {0}")]
    SocketNotFound(SocketId),

    /// No node type registered under the tag
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Incompatible socket types
    #[error("Type mismatch: {output} output cannot feed {input} input")]
    TypeMismatch {
        /// Producing type
        output: DataType,
        /// Consuming type
        input: DataType,
    },

    /// Both sockets are inputs or both are outputs
    #[error("Cannot link two sockets of the same direction")]
    SameDirection,

    /// Self-loop not allowed
    #[error("Self-loop not allowed on node {0:?}")]
    SelfLoop(NodeId),

    /// The socket is an output
    #[error("Socket {0} is not an input")]
    NotAnInput(SocketId),

    /// Boundary nodes follow their container and cannot be edited directly
    #[error("Boundary node {0:?} is managed by its container")]
    BoundaryNode(NodeId),

    /// Node id already present
    #[error("Duplicate node: {0:?}")]
    DuplicateNode(NodeId),

    /// Socket id already present
    #[error("Duplicate socket: {0}")]
    DuplicateSocket(SocketId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    fn space() -> Space {
        Space::new("root", Arc::new(GraphContext::default()))
    }

    fn add(space: &mut Space, inputs: &[DataType], outputs: &[DataType]) -> NodeId {
        let id = space.add_node(Node::new("TEST", "Test")).unwrap();
        for data_type in inputs {
            space.add_input(id, "in", data_type.clone()).unwrap();
        }
        for data_type in outputs {
            space.add_output(id, "out", data_type.clone()).unwrap();
        }
        id
    }

    fn input(space: &Space, node: NodeId, index: usize) -> SocketId {
        space.node(node).unwrap().inputs()[index].id()
    }

    fn output(space: &Space, node: NodeId, index: usize) -> SocketId {
        space.node(node).unwrap().outputs()[index].id()
    }

    fn assert_consistent(space: &Space) {
        for node in space.nodes() {
            for input in node.inputs() {
                if let Some(out) = input.connected() {
                    assert!(space.output(out).unwrap().consumers().contains(&input.id()));
                }
            }
            for output in node.outputs() {
                for consumer in output.consumers() {
                    assert_eq!(space.input(*consumer).unwrap().connected(), Some(output.id()));
                }
            }
        }
    }

    #[test]
    fn test_create_link_either_order() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[]);
        let (out, inp) = (output(&space, a, 0), input(&space, b, 0));

        let link = space.create_link(inp, out).unwrap();
        assert_eq!(link, Link::new(out, inp));
        assert_eq!(space.input(inp).unwrap().connected(), Some(out));
        assert!(space.output(out).unwrap().consumers().contains(&inp));
        assert_eq!(space.links(), vec![link]);
        assert_consistent(&space);
    }

    #[test]
    fn test_incompatible_link_leaves_space_unchanged() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::INTEGER, DataType::FLOAT], &[]);
        let c = add(&mut space, &[], &[DataType::FLOAT]);
        space.create_link(output(&space, c, 0), input(&space, b, 0)).unwrap_err();
        space.create_link(output(&space, c, 0), input(&space, b, 1)).unwrap();

        let before = space.links();
        let epoch = space.context().epoch();
        let err = space.create_link(output(&space, a, 0), input(&space, b, 0)).unwrap_err();
        assert_eq!(
            err,
            GraphError::TypeMismatch { output: DataType::FLOAT, input: DataType::INTEGER }
        );
        assert_eq!(space.links(), before);
        assert_eq!(space.context().epoch(), epoch);
        assert!(!space.output(output(&space, a, 0)).unwrap().is_connected());
    }

    #[test]
    fn test_direction_and_self_loop_rejected() {
        let mut space = space();
        let a = add(&mut space, &[DataType::FLOAT], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[DataType::FLOAT]);

        assert_eq!(
            space.create_link(input(&space, a, 0), input(&space, b, 0)),
            Err(GraphError::SameDirection)
        );
        assert_eq!(
            space.create_link(output(&space, a, 0), input(&space, a, 0)),
            Err(GraphError::SelfLoop(a))
        );
        assert!(!space.can_link(output(&space, a, 0), output(&space, b, 0)));
        assert!(space.can_link(output(&space, a, 0), input(&space, b, 0)));
        assert_eq!(space.link_count(), 0);
    }

    #[test]
    fn test_replace_on_connect() {
        let mut space = space();
        let old = add(&mut space, &[], &[DataType::FLOAT]);
        let new = add(&mut space, &[], &[DataType::FLOAT]);
        let sink = add(&mut space, &[DataType::FLOAT], &[]);
        let inp = input(&space, sink, 0);

        space.create_link(output(&space, old, 0), inp).unwrap();
        space.create_link(output(&space, new, 0), inp).unwrap();

        assert!(!space.output(output(&space, old, 0)).unwrap().consumers().contains(&inp));
        assert!(space.output(output(&space, new, 0)).unwrap().consumers().contains(&inp));
        assert_eq!(space.input(inp).unwrap().connected(), Some(output(&space, new, 0)));
        assert_eq!(space.link_count(), 1);
        assert_consistent(&space);
    }

    #[test]
    fn test_remove_link_is_idempotent() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[]);
        let (out, inp) = (output(&space, a, 0), input(&space, b, 0));
        space.create_link(out, inp).unwrap();

        assert!(space.remove_link(inp, out));
        assert!(!space.remove_link(inp, out));
        assert_eq!(space.link_count(), 0);
        assert!(!space.output(out).unwrap().is_connected());
        assert_consistent(&space);
    }

    #[test]
    fn test_fan_out() {
        let mut space = space();
        let source = add(&mut space, &[], &[DataType::FLOAT]);
        let out = output(&space, source, 0);
        for _ in 0..3 {
            let sink = add(&mut space, &[DataType::FLOAT], &[]);
            space.create_link(out, input(&space, sink, 0)).unwrap();
        }
        assert_eq!(space.output(out).unwrap().consumers().len(), 3);
        assert_consistent(&space);
    }

    #[test]
    fn test_remove_node_clears_links() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[DataType::FLOAT]);
        let c = add(&mut space, &[DataType::FLOAT], &[]);
        space.create_link(output(&space, a, 0), input(&space, b, 0)).unwrap();
        space.create_link(output(&space, b, 0), input(&space, c, 0)).unwrap();
        let b_out = output(&space, b, 0);

        space.remove_node(b).unwrap();
        assert_eq!(space.node_count(), 2);
        assert_eq!(space.link_count(), 0);
        assert!(!space.output(output(&space, a, 0)).unwrap().is_connected());
        assert!(!space.contains_socket(b_out));
        assert_eq!(space.node_ids().collect::<Vec<_>>(), vec![a, c]);
        assert!(space.remove_node(b).is_err());
    }

    #[test]
    fn test_set_default_retypes_compatible_values() {
        let mut space = space();
        let node = add(&mut space, &[DataType::FLOAT, DataType::INTEGER], &[DataType::FLOAT]);
        let float_in = input(&space, node, 0);
        let int_in = input(&space, node, 1);

        space.set_default(float_in, Some(Property::from(3))).unwrap();
        assert_eq!(space.input(float_in).unwrap().default(), Some(&Property::from(3.0)));

        assert!(matches!(
            space.set_default(int_in, Some(Property::from(2.5))),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert_eq!(
            space.set_default(output(&space, node, 0), None),
            Err(GraphError::NotAnInput(output(&space, node, 0)))
        );
    }

    #[test]
    fn test_retype_drops_incompatible_links() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[]);
        let (out, inp) = (output(&space, a, 0), input(&space, b, 0));
        space.create_link(out, inp).unwrap();
        space.set_default(inp, Some(Property::from(1.5))).unwrap();

        let dropped = space.retype_socket(inp, DataType::INTEGER).unwrap();
        assert_eq!(dropped, vec![Link::new(out, inp)]);
        assert_eq!(space.input(inp).unwrap().default(), Some(&Property::from(1)));
        assert_consistent(&space);
    }

    #[test]
    fn test_remove_socket_reindexes() {
        let mut space = space();
        let node = add(&mut space, &[DataType::FLOAT, DataType::FLOAT, DataType::FLOAT], &[]);
        let first = input(&space, node, 0);
        let last = input(&space, node, 2);
        space.rename_socket(last, "last").unwrap();

        space.remove_socket(first).unwrap();
        assert_eq!(space.node(node).unwrap().inputs().len(), 2);
        assert_eq!(space.input(last).unwrap().name(), "last");
        assert_eq!(space.locate(last).unwrap().index, 1);
    }

    #[test]
    fn test_duplicate_keeps_internal_links_only() {
        let mut space = space();
        let outside = add(&mut space, &[], &[DataType::FLOAT]);
        let a = add(&mut space, &[DataType::FLOAT], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[]);
        space.create_link(output(&space, outside, 0), input(&space, a, 0)).unwrap();
        space.create_link(output(&space, a, 0), input(&space, b, 0)).unwrap();

        let copies = space.duplicate_nodes(&[a, b]).unwrap();
        assert_eq!(space.node_count(), 5);
        let (a2, b2) = (copies[0], copies[1]);

        assert_eq!(space.input(input(&space, a2, 0)).unwrap().connected(), None);
        assert_eq!(
            space.input(input(&space, b2, 0)).unwrap().connected(),
            Some(output(&space, a2, 0))
        );
        // Originals untouched
        assert_eq!(
            space.input(input(&space, a, 0)).unwrap().connected(),
            Some(output(&space, outside, 0))
        );
        assert_eq!(space.link_count(), 3);
        assert_consistent(&space);
    }

    #[test]
    fn test_duplicate_copies_repeated_ids_once() {
        let mut space = space();
        let a = add(&mut space, &[], &[DataType::FLOAT]);
        let b = add(&mut space, &[DataType::FLOAT], &[]);
        space.create_link(output(&space, a, 0), input(&space, b, 0)).unwrap();

        let copies = space.duplicate_nodes(&[a, b, a]).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(space.node_count(), 4);

        // The one copy of `a` feeds the copy of `b`
        let (a2, b2) = (copies[0], copies[1]);
        assert_eq!(
            space.input(input(&space, b2, 0)).unwrap().connected(),
            Some(output(&space, a2, 0))
        );
        assert_eq!(space.output(output(&space, a2, 0)).unwrap().consumers().len(), 1);
        assert_eq!(space.link_count(), 2);
        assert_consistent(&space);
    }

    #[test]
    fn test_container_mirrors_sockets() {
        let mut space = space();
        let container = space.add_container("Group");
        let outer_in = space.add_input(container, "x", DataType::FLOAT).unwrap();
        let outer_out = space.add_output(container, "y", DataType::FLOAT).unwrap();

        let node = space.node(container).unwrap();
        let NodeKind::Container(data) = node.kind() else {
            panic!("expected container");
        };
        let inner = data.space();
        assert_eq!(inner.node(data.inputs_node()).unwrap().outputs().len(), 1);
        assert_eq!(inner.node(data.outputs_node()).unwrap().inputs().len(), 1);

        let mirror = inner.node(data.inputs_node()).unwrap().outputs()[0].id();
        let location = space.locate(mirror).unwrap();
        assert_eq!(location.path, vec![container]);
        assert_eq!(location.direction, SocketDirection::Output);
        assert!(space.space_at(&location.path).is_some());

        let boundary = data.inputs_node();
        let inner = space.container_space_mut(container).unwrap();
        assert_eq!(inner.remove_node(boundary).unwrap_err(), GraphError::BoundaryNode(boundary));

        space.remove_socket(outer_in).unwrap();
        space.remove_socket(outer_out).unwrap();
        let data = space.node(container).unwrap().container().unwrap();
        assert!(data.space().node(data.inputs_node()).unwrap().outputs().is_empty());
        assert!(data.space().node(data.outputs_node()).unwrap().inputs().is_empty());
    }

    #[test]
    fn test_journal_truncation() {
        let mut journal = ChangeJournal::new(2);
        journal.record(1, Change::Input(SocketId(1)));
        journal.record(2, Change::Input(SocketId(2)));
        assert_eq!(journal.since(0).unwrap().len(), 2);
        journal.record(3, Change::Input(SocketId(3)));
        assert!(journal.since(0).is_none());
        assert_eq!(journal.since(1).unwrap(), vec![Change::Input(SocketId(2)), Change::Input(SocketId(3))]);
    }
}
