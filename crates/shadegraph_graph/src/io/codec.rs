// SPDX-License-Identifier: MIT OR Apache-2.0
//! Encoding of spaces, nodes, sockets and properties into blocks.
//!
//! Loading is two-phase. Every socket read gets a fresh session id recorded
//! against its stored id; links are only restored once all nodes of a
//! space (nested spaces included) exist, by mapping each stored connected
//! id through that table.

use super::{InStream, IoError, LoadWarning, NodeStreamer, OutStream, StreamerRegistry};
use crate::node::{Container, Node, NodeKind, INSOCKETS_TAG, OUTSOCKETS_TAG};
use crate::property::{Property, Value};
use crate::session::GraphContext;
use crate::socket::{InputSocket, OutputSocket, SocketId};
use crate::space::Space;
use crate::types::DataType;
use std::collections::HashMap;
use std::sync::Arc;

/// Block holding a space
pub const SPACE_BLOCK: &str = "Space";
/// Block holding a node
pub const NODE_BLOCK: &str = "Node";
/// Block holding an input socket
pub const IN_SOCKET_BLOCK: &str = "InSocket";
/// Block holding an output socket
pub const OUT_SOCKET_BLOCK: &str = "OutSocket";
/// Block holding a property
pub const PROPERTY_BLOCK: &str = "Property";

// ----------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------

/// Write a `Space` block: name, node count, then one block per node
pub fn write_space(out: &mut OutStream, space: &Space, streamers: &StreamerRegistry) -> Result<(), IoError> {
    out.begin_block(SPACE_BLOCK)?;
    out.write_str(space.name())?;
    out.write_count(space.node_count())?;
    for node in space.nodes() {
        write_node(out, node, streamers)?;
    }
    out.end_block(SPACE_BLOCK)?;
    Ok(())
}

fn write_node(out: &mut OutStream, node: &Node, streamers: &StreamerRegistry) -> Result<(), IoError> {
    out.begin_block(NODE_BLOCK)?;
    out.write_str(node.node_type())?;
    out.write_str(node.name())?;
    let [x, y] = node.position();
    out.write_i32(x)?;
    out.write_i32(y)?;

    out.write_count(node.inputs().len())?;
    for input in node.inputs() {
        write_input(out, input)?;
    }
    out.write_count(node.outputs().len())?;
    for output in node.outputs() {
        write_output(out, output)?;
    }

    if let Some(streamer) = streamers.get(node.node_type()) {
        streamer.write(out, node, streamers)?;
    }
    out.end_block(NODE_BLOCK)?;
    Ok(())
}

fn stored_id(id: SocketId) -> Result<i32, IoError> {
    i32::try_from(id.0).map_err(|_| IoError::InvalidId {
        id: i64::from(id.0),
        offset: 0,
    })
}

fn write_input(out: &mut OutStream, input: &InputSocket) -> Result<(), IoError> {
    out.begin_block(IN_SOCKET_BLOCK)?;
    out.write_i32(stored_id(input.id())?)?;
    out.write_str(input.name())?;
    out.write_str(input.data_type().name())?;
    let connected = match input.connected() {
        Some(output) => stored_id(output)?,
        None => 0,
    };
    out.write_i32(connected)?;

    let default = input.default().filter(|value| {
        let encodable = is_encodable(value.data_type(), value.value());
        if !encodable {
            tracing::warn!(
                "Default of input {} ({}) has no stored form, writing it as unset",
                input.name(),
                input.id()
            );
        }
        encodable
    });
    out.write_bool(default.is_some())?;
    if let Some(value) = default {
        write_property(out, value)?;
    }
    out.end_block(IN_SOCKET_BLOCK)?;
    Ok(())
}

fn write_output(out: &mut OutStream, output: &OutputSocket) -> Result<(), IoError> {
    out.begin_block(OUT_SOCKET_BLOCK)?;
    out.write_i32(stored_id(output.id())?)?;
    out.write_str(output.name())?;
    out.write_str(output.data_type().name())?;
    out.end_block(OUT_SOCKET_BLOCK)?;
    Ok(())
}

/// Whether `value` has a stored form under `data_type`
fn is_encodable(data_type: &DataType, value: &Value) -> bool {
    match (data_type.name(), value) {
        ("FLOAT", Value::Float(_))
        | ("INTEGER", Value::Int(_))
        | ("BOOLEAN", Value::Bool(_))
        | ("STRING", Value::String(_))
        | ("VECTOR2D", Value::Vec2(_))
        | ("VECTOR3D", Value::Vec3(_))
        | ("VECTOR4D" | "COLOR", Value::Vec4(_)) => true,
        // Items of payload-free element types could not be counted back
        (_, Value::List(items)) => data_type.element_type().is_some_and(|element| {
            items.is_empty()
                || (min_encoded_size(&element) > 0 && items.iter().all(|item| is_encodable(&element, item)))
        }),
        // Open and custom types carry no payload
        (_, Value::None) => data_type.is_variable() || (!data_type.is_list() && !data_type.is_builtin()),
        _ => false,
    }
}

/// Smallest payload a value of `data_type` occupies, 0 when it has none
fn min_encoded_size(data_type: &DataType) -> u32 {
    match data_type.name() {
        "FLOAT" => 8,
        "INTEGER" => 4,
        "BOOLEAN" | "STRING" => 1,
        "VECTOR2D" => 16,
        "VECTOR3D" => 24,
        "VECTOR4D" | "COLOR" => 32,
        _ if data_type.is_list() => 4,
        _ => 0,
    }
}

/// Write a `Property` block: type name then payload
pub fn write_property(out: &mut OutStream, property: &Property) -> Result<(), IoError> {
    if !is_encodable(property.data_type(), property.value()) {
        return Err(IoError::UnsupportedValue(property.data_type().to_string()));
    }
    out.begin_block(PROPERTY_BLOCK)?;
    out.write_str(property.data_type().name())?;
    write_value(out, property.value())?;
    out.end_block(PROPERTY_BLOCK)?;
    Ok(())
}

fn write_value(out: &mut OutStream, value: &Value) -> Result<(), IoError> {
    match value {
        Value::Float(v) => out.write_f64(*v),
        Value::Int(v) => out.write_i32(*v),
        Value::Bool(v) => out.write_bool(*v),
        Value::String(v) => out.write_str(v),
        Value::Vec2(v) => out.write_components(v),
        Value::Vec3([x, y, z]) => out.write_components(&[*x, *y, *z]),
        Value::Vec4(v) => out.write_components(v),
        Value::List(items) => {
            out.write_count(items.len())?;
            for item in items {
                write_value(out, item)?;
            }
            Ok(())
        }
        Value::None | Value::Object(_) => Ok(()),
    }
}

// ----------------------------------------------------------------------
// Reading
// ----------------------------------------------------------------------

/// Read a `Property` block
pub fn read_property(input: &mut InStream<'_>) -> Result<Property, IoError> {
    input.begin_block(PROPERTY_BLOCK)?;
    let data_type = DataType::new(input.read_string()?);
    let value = read_value(input, &data_type)?;
    input.end_block(PROPERTY_BLOCK)?;
    Ok(Property::new(data_type, value))
}

fn read_value(input: &mut InStream<'_>, data_type: &DataType) -> Result<Value, IoError> {
    let value = match data_type.name() {
        "FLOAT" => Value::Float(input.read_f64()?),
        "INTEGER" => Value::Int(input.read_i32()?),
        "BOOLEAN" => Value::Bool(input.read_bool()?),
        "STRING" => Value::String(input.read_string()?),
        "VECTOR2D" => Value::Vec2(input.read_components::<2>()?),
        "VECTOR3D" => {
            let [x, y, z] = input.read_components::<3>()?;
            Value::Vec3([x, y, z])
        }
        "VECTOR4D" | "COLOR" => Value::Vec4(input.read_components::<4>()?),
        _ => match data_type.element_type() {
            Some(element) => {
                let offset = input.offset();
                let count = input.read_count()?;
                let min_size = min_encoded_size(&element);
                let fits = match (min_size, input.remaining_in_block()) {
                    (0, _) => count == 0,
                    (size, Some(remaining)) => count <= (remaining / size) as usize,
                    (_, None) => true,
                };
                if !fits {
                    return Err(IoError::InvalidCount {
                        count: count as i64,
                        offset,
                    });
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(read_value(input, &element)?);
                }
                Value::List(items)
            }
            None => Value::None,
        },
    };
    Ok(value)
}

/// Rebuilds spaces from a stream, assigning fresh socket ids
pub struct SpaceReader<'a> {
    context: Arc<GraphContext>,
    streamers: &'a StreamerRegistry,
    /// Stored id -> session id
    ids: HashMap<u32, SocketId>,
}

/// Input waiting for its link: (session input id, stored output id)
type PendingLink = (SocketId, u32);

impl<'a> SpaceReader<'a> {
    /// Create a reader allocating ids from `context`
    pub fn new(context: &Arc<GraphContext>, streamers: &'a StreamerRegistry) -> Self {
        Self {
            context: Arc::clone(context),
            streamers,
            ids: HashMap::new(),
        }
    }

    /// Session id given to a stored socket id
    pub fn mapped_id(&self, stored: u32) -> Option<SocketId> {
        self.ids.get(&stored).copied()
    }

    /// Read a `Space` block and restore its links
    pub fn read_space(&mut self, input: &mut InStream<'_>) -> Result<Space, IoError> {
        input.begin_block(SPACE_BLOCK)?;
        let name = input.read_string()?;
        let count = input.read_count()?;

        let mut space = Space::new(name, Arc::clone(&self.context));
        let mut pending = Vec::new();

        for _ in 0..count {
            match input.begin_block(NODE_BLOCK) {
                Ok(_) => {}
                Err(IoError::BlockMismatch { expected, found, offset }) => {
                    input.abandon_block()?;
                    input.warn(LoadWarning::SkippedBlock { expected, found, offset });
                    continue;
                }
                Err(err) => return Err(err),
            }
            let node = self.read_node(input, &mut pending)?;
            input.end_block(NODE_BLOCK)?;
            space.add_node(node)?;
        }
        input.end_block(SPACE_BLOCK)?;

        self.restore_links(input, &mut space, pending)?;
        Ok(space)
    }

    fn read_node(&mut self, input: &mut InStream<'_>, pending: &mut Vec<PendingLink>) -> Result<Node, IoError> {
        let tag = input.read_string()?;
        let name = input.read_string()?;
        let x = input.read_i32()?;
        let y = input.read_i32()?;
        let mut node = Node::new(tag, name).with_position(x, y);

        let inputs = input.read_count()?;
        for _ in 0..inputs {
            let (socket, connected) = self.read_input(input)?;
            if let Some(output) = connected {
                pending.push((socket.id, output));
            }
            node.inputs.push(socket);
        }

        let outputs = input.read_count()?;
        for _ in 0..outputs {
            node.outputs.push(self.read_output(input)?);
        }

        if let Some(streamer) = self.streamers.get(node.node_type()) {
            streamer.read(input, &mut node, self)?;
        }
        Ok(node)
    }

    fn read_stored_id(input: &mut InStream<'_>) -> Result<u32, IoError> {
        let offset = input.offset();
        let raw = input.read_i32()?;
        u32::try_from(raw).map_err(|_| IoError::InvalidId {
            id: i64::from(raw),
            offset,
        })
    }

    fn assign_id(&mut self, stored: u32) -> Result<SocketId, IoError> {
        if self.ids.contains_key(&stored) {
            return Err(IoError::DuplicateReference(stored));
        }
        let id = self.context.ids().allocate();
        self.ids.insert(stored, id);
        Ok(id)
    }

    fn read_input(&mut self, input: &mut InStream<'_>) -> Result<(InputSocket, Option<u32>), IoError> {
        input.begin_block(IN_SOCKET_BLOCK)?;
        let stored = Self::read_stored_id(input)?;
        let name = input.read_string()?;
        let data_type = DataType::new(input.read_string()?);
        let connected = Self::read_stored_id(input)?;
        let default = if input.read_bool()? {
            Some(read_property(input)?)
        } else {
            None
        };
        input.end_block(IN_SOCKET_BLOCK)?;

        let mut socket = InputSocket::new(self.assign_id(stored)?, name, data_type);
        socket.default = default;
        Ok((socket, (connected != 0).then_some(connected)))
    }

    fn read_output(&mut self, input: &mut InStream<'_>) -> Result<OutputSocket, IoError> {
        input.begin_block(OUT_SOCKET_BLOCK)?;
        let stored = Self::read_stored_id(input)?;
        let name = input.read_string()?;
        let data_type = DataType::new(input.read_string()?);
        input.end_block(OUT_SOCKET_BLOCK)?;
        Ok(OutputSocket::new(self.assign_id(stored)?, name, data_type))
    }

    /// Second pass: turn stored connected ids into links
    fn restore_links(
        &mut self,
        input: &mut InStream<'_>,
        space: &mut Space,
        pending: Vec<PendingLink>,
    ) -> Result<(), IoError> {
        for (socket, stored_output) in pending {
            let output = self
                .mapped_id(stored_output)
                .ok_or(IoError::DanglingReference(stored_output))?;
            if let Err(err) = space.create_link(output, socket) {
                input.warn(LoadWarning::DroppedLink {
                    input: socket,
                    output: stored_output,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SpaceReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceReader")
            .field("ids", &self.ids.len())
            .finish()
    }
}

/// Writes and reads the nested space of container nodes
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ContainerStreamer;

impl NodeStreamer for ContainerStreamer {
    fn write(&self, out: &mut OutStream, node: &Node, streamers: &StreamerRegistry) -> Result<(), IoError> {
        match node.container() {
            Some(container) => write_space(out, container.space(), streamers),
            None => Ok(()),
        }
    }

    fn read(
        &self,
        input: &mut InStream<'_>,
        node: &mut Node,
        reader: &mut SpaceReader<'_>,
    ) -> Result<(), IoError> {
        let space = reader.read_space(input)?;
        let find = |tag: &str| space.nodes().find(|inner| inner.node_type() == tag).map(Node::id);
        let (Some(inputs_node), Some(outputs_node)) = (find(INSOCKETS_TAG), find(OUTSOCKETS_TAG)) else {
            return Err(IoError::InvalidContainer(node.name().to_string()));
        };
        node.kind = NodeKind::Container(Box::new(Container {
            space,
            inputs_node,
            outputs_node,
        }));
        Ok(())
    }
}
