// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::socket::{InputSocket, OutputSocket, SocketDirection, SocketId, SocketIdAllocator, SocketSpec};
use crate::space::Space;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Type tag of container nodes
pub const CONTAINER_TAG: &str = "CONTAINER";
/// Type tag of the interior node mirroring a container's inputs
pub const INSOCKETS_TAG: &str = "INSOCKETS";
/// Type tag of the interior node mirroring a container's outputs
pub const OUTSOCKETS_TAG: &str = "OUTSOCKETS";

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A container's nested graph and its two boundary nodes
#[derive(Debug)]
pub struct Container {
    pub(crate) space: Space,
    pub(crate) inputs_node: NodeId,
    pub(crate) outputs_node: NodeId,
}

impl Container {
    /// The nested space
    pub fn space(&self) -> &Space {
        &self.space
    }

    /// Interior node whose outputs mirror the container's inputs
    pub fn inputs_node(&self) -> NodeId {
        self.inputs_node
    }

    /// Interior node whose inputs mirror the container's outputs
    pub fn outputs_node(&self) -> NodeId {
        self.outputs_node
    }
}

/// How a node produces its outputs
#[derive(Debug, Default)]
pub enum NodeKind {
    /// Computed by the processor registered for the node's type tag
    #[default]
    Function,
    /// Owns a nested space; outputs come from its interior
    Container(Box<Container>),
    /// Interior proxy of a container boundary. `Input` mirrors the
    /// container's inputs (as outputs), `Output` mirrors its outputs.
    Boundary(SocketDirection),
}

/// A node instance in a space
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) node_type: String,
    pub(crate) name: String,
    pub(crate) position: [i32; 2],
    pub(crate) inputs: Vec<InputSocket>,
    pub(crate) outputs: Vec<OutputSocket>,
    pub(crate) kind: NodeKind,
}

impl Node {
    /// Create a node without sockets
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        let node_type = node_type.into();
        let kind = match node_type.as_str() {
            INSOCKETS_TAG => NodeKind::Boundary(SocketDirection::Input),
            OUTSOCKETS_TAG => NodeKind::Boundary(SocketDirection::Output),
            _ => NodeKind::Function,
        };
        Self {
            id: NodeId::new(),
            node_type,
            name: name.into(),
            position: [0, 0],
            inputs: Vec::new(),
            outputs: Vec::new(),
            kind,
        }
    }

    /// Create a node from a type definition, allocating fresh socket ids
    pub fn from_type(node_type: &NodeType, ids: &SocketIdAllocator) -> Self {
        let mut node = Self::new(node_type.id.clone(), node_type.short_name());
        node.inputs = node_type
            .inputs
            .iter()
            .map(|spec| InputSocket::from_spec(ids.allocate(), spec))
            .collect();
        node.outputs = node_type
            .outputs
            .iter()
            .map(|spec| OutputSocket::from_spec(ids.allocate(), spec))
            .collect();
        node
    }

    /// Set the position
    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = [x, y];
        self
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Type tag used to look up processors and streamers
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the node
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Editor layout position
    pub fn position(&self) -> [i32; 2] {
        self.position
    }

    /// Move the node
    pub fn set_position(&mut self, position: [i32; 2]) {
        self.position = position;
    }

    /// Input sockets in order
    pub fn inputs(&self) -> &[InputSocket] {
        &self.inputs
    }

    /// Output sockets in order
    pub fn outputs(&self) -> &[OutputSocket] {
        &self.outputs
    }

    /// Get an input socket by index
    pub fn input(&self, index: usize) -> Option<&InputSocket> {
        self.inputs.get(index)
    }

    /// Get an output socket by index
    pub fn output(&self, index: usize) -> Option<&OutputSocket> {
        self.outputs.get(index)
    }

    /// Node kind
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Container data when this is a container node
    pub fn container(&self) -> Option<&Container> {
        match &self.kind {
            NodeKind::Container(container) => Some(container),
            _ => None,
        }
    }

    pub(crate) fn container_mut(&mut self) -> Option<&mut Container> {
        match &mut self.kind {
            NodeKind::Container(container) => Some(container),
            _ => None,
        }
    }

    /// Whether this node is an interior boundary proxy
    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, NodeKind::Boundary(_))
    }

    /// All socket ids, inputs first
    pub fn socket_ids(&self) -> impl Iterator<Item = SocketId> + '_ {
        self.inputs
            .iter()
            .map(InputSocket::id)
            .chain(self.outputs.iter().map(OutputSocket::id))
    }

    /// Deep copy with a new node id and fresh socket ids, links dropped.
    ///
    /// Every old->new socket id pair (nested ones included) is recorded in
    /// `sockets` so a later pass can rebuild links among copied nodes.
    pub(crate) fn detached_copy(
        &self,
        ids: &SocketIdAllocator,
        sockets: &mut HashMap<SocketId, SocketId>,
    ) -> Node {
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                let copy = input.detached_copy(ids.allocate());
                sockets.insert(input.id, copy.id);
                copy
            })
            .collect();
        let outputs = self
            .outputs
            .iter()
            .map(|output| {
                let copy = output.detached_copy(ids.allocate());
                sockets.insert(output.id, copy.id);
                copy
            })
            .collect();

        let kind = match &self.kind {
            NodeKind::Function => NodeKind::Function,
            NodeKind::Boundary(direction) => NodeKind::Boundary(*direction),
            NodeKind::Container(container) => {
                let mut nodes = HashMap::new();
                let space = container.space.detached_copy(sockets, &mut nodes);
                NodeKind::Container(Box::new(Container {
                    space,
                    inputs_node: nodes.get(&container.inputs_node).copied().unwrap_or(container.inputs_node),
                    outputs_node: nodes.get(&container.outputs_node).copied().unwrap_or(container.outputs_node),
                }))
            }
        };

        Node {
            id: NodeId::new(),
            node_type: self.node_type.clone(),
            name: self.name.clone(),
            position: self.position,
            inputs,
            outputs,
            kind,
        }
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Constant value nodes
    Values,
    /// List and general purpose nodes
    General,
    /// Math operations
    Math,
    /// Color operations
    Color,
    /// Containers and boundary nodes
    Structure,
    /// Custom/user-defined
    Custom,
}

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeType {
    /// Unique type tag
    pub id: String,
    /// Menu label, `Category.Name`
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Default input sockets
    pub inputs: Vec<SocketSpec>,
    /// Default output sockets
    pub outputs: Vec<SocketSpec>,
}

impl NodeType {
    /// Label without its category prefix
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Registry of available node types
#[derive(Debug, Clone, Default)]
pub struct NodeLibrary {
    /// Registered node types by tag
    types: IndexMap<String, NodeType>,
}

impl NodeLibrary {
    /// Create a new empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type, replacing any previous one with the same tag
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.id.clone(), node_type);
    }

    /// Get a node type by tag
    pub fn get(&self, id: &str) -> Option<&NodeType> {
        self.types.get(id)
    }

    /// Find a node type by its `Category.Name` label
    pub fn find_by_label(&self, label: &str) -> Option<&NodeType> {
        self.types.values().find(|t| t.name == label)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Create a node from a type tag
    pub fn create_node(&self, type_id: &str, ids: &SocketIdAllocator) -> Option<Node> {
        self.get(type_id).map(|node_type| Node::from_type(node_type, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn float_value_type() -> NodeType {
        NodeType {
            id: "FLOATVALUE".to_string(),
            name: "Values.Float Value".to_string(),
            category: NodeCategory::Values,
            description: "Constant float".to_string(),
            inputs: vec![SocketSpec::new("Value", DataType::FLOAT).with_default(0.0)],
            outputs: vec![SocketSpec::new("Value", DataType::FLOAT)],
        }
    }

    #[test]
    fn test_create_node_from_library() {
        let mut library = NodeLibrary::new();
        library.register(float_value_type());
        let ids = SocketIdAllocator::new();

        let node = library.create_node("FLOATVALUE", &ids).unwrap();
        assert_eq!(node.node_type(), "FLOATVALUE");
        assert_eq!(node.name(), "Float Value");
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);
        assert_ne!(node.inputs()[0].id(), node.outputs()[0].id());
        assert!(library.create_node("MISSING", &ids).is_none());
        assert!(library.find_by_label("Values.Float Value").is_some());
        assert_eq!(library.types_in_category(NodeCategory::Values).count(), 1);
    }

    #[test]
    fn test_boundary_tags_set_kind() {
        assert!(Node::new(INSOCKETS_TAG, "Inputs").is_boundary());
        assert!(Node::new(OUTSOCKETS_TAG, "Outputs").is_boundary());
        assert!(!Node::new("ADD", "Add").is_boundary());
    }

    #[test]
    fn test_detached_copy_maps_every_socket() {
        let ids = SocketIdAllocator::new();
        let node = Node::from_type(&float_value_type(), &ids).with_position(3, 4);
        let mut map = HashMap::new();
        let copy = node.detached_copy(&ids, &mut map);

        assert_ne!(copy.id(), node.id());
        assert_eq!(copy.position(), [3, 4]);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&node.inputs()[0].id()], copy.inputs()[0].id());
        assert_eq!(copy.inputs()[0].default(), node.inputs()[0].default());
    }
}
