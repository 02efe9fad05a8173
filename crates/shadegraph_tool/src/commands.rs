// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use shadegraph_graph::evaluation::CacheStatistics;
use shadegraph_graph::{
    DataType, LoadReport, NodeId, NodeKind, Property, Session, SocketId, Space, Value,
};
use std::io::Write;
use std::path::Path;

/// Build the sample graph and write it to `path`.
///
/// A Float Value feeds a Create List of four items and a container that
/// multiplies its input by three.
pub fn demo(session: &Session, path: &Path) -> Result<()> {
    let mut space = session.create_space("demo");

    let value = session.add_node(&mut space, "FLOATVALUE")?;
    let list = session.add_node(&mut space, "CREATELIST")?;
    let (value_in, value_out) = first_sockets(&space, value)?;
    let (list_value, list_out) = first_sockets(&space, list)?;
    let list_count = input_at(&space, list, 1)?;
    space.set_default(value_in, Some(Property::from(2.5)))?;
    space.set_default(list_count, Some(Property::from(4)))?;
    space.create_link(value_out, list_value)?;
    space.node_mut(list).context("Create List vanished")?.set_position([220, 0]);

    let length = session.add_node(&mut space, "LISTLENGTH")?;
    let (length_in, _) = first_sockets(&space, length)?;
    space.create_link(list_out, length_in)?;
    space.node_mut(length).context("List Length vanished")?.set_position([440, 0]);

    let group = space.add_container("Scale");
    let group_in = space.add_input(group, "Value", DataType::FLOAT)?;
    space.add_output(group, "Scaled", DataType::FLOAT)?;
    space.create_link(value_out, group_in)?;
    space.node_mut(group).context("container vanished")?.set_position([220, 160]);

    let (inputs_node, outputs_node) = match space.node(group).map(|node| node.kind()) {
        Some(NodeKind::Container(container)) => (container.inputs_node(), container.outputs_node()),
        _ => bail!("Scale is not a container"),
    };
    let inner = space.container_space_mut(group).context("container has no space")?;
    let multiply = session.add_node(inner, "MULTIPLY")?;
    let (multiply_a, multiply_out) = first_sockets(inner, multiply)?;
    let multiply_b = input_at(inner, multiply, 1)?;
    let mirrored_in = output_at(inner, inputs_node, 0)?;
    let mirrored_out = input_at(inner, outputs_node, 0)?;
    inner.create_link(mirrored_in, multiply_a)?;
    inner.set_default(multiply_b, Some(Property::from(3.0)))?;
    inner.create_link(multiply_out, mirrored_out)?;

    session
        .save(&space, path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Print the structure of the graph in `path`
pub fn inspect(session: &Session, path: &Path, out: &mut dyn Write) -> Result<()> {
    let (space, report) = load(session, path)?;
    for warning in &report.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    print_space(&space, 0, out)?;
    Ok(())
}

fn print_space(space: &Space, depth: usize, out: &mut dyn Write) -> Result<()> {
    let indent = "  ".repeat(depth);
    writeln!(out, "{indent}space \"{}\" ({} nodes, {} links)", space.name(), space.node_count(), space.link_count())?;

    for (index, node) in space.nodes().enumerate() {
        let [x, y] = node.position();
        writeln!(out, "{indent}  [{index}] {} \"{}\" at ({x}, {y})", node.node_type(), node.name())?;
        for input in node.inputs() {
            write!(out, "{indent}      in  {} {}: {}", input.id(), input.name(), input.data_type())?;
            if let Some(default) = input.default() {
                write!(out, " = {}", format_property(default))?;
            }
            if let Some(source) = input.connected() {
                write!(out, " <- {source}")?;
            }
            writeln!(out)?;
        }
        for output in node.outputs() {
            writeln!(
                out,
                "{indent}      out {} {}: {} ({} consumers)",
                output.id(),
                output.name(),
                output.data_type(),
                output.consumers().len()
            )?;
        }
        if let Some(container) = node.container() {
            print_space(container.space(), depth + 2, out)?;
        }
    }
    Ok(())
}

/// Evaluate output `output` of root node `node`
pub fn eval(
    session: &Session,
    path: &Path,
    node: usize,
    output: usize,
) -> Result<(Property, CacheStatistics)> {
    let (space, _) = load(session, path)?;
    let Some(target) = space.node_at(node) else {
        bail!("No node {} (the root space has {})", node, space.node_count());
    };
    let Some(socket) = target.output(output) else {
        bail!("{} has no output {}", target.name(), output);
    };

    let mut evaluator = session.evaluator();
    let value = evaluator
        .get_value(&space, socket.id())
        .with_context(|| format!("Failed to evaluate {}.{}", target.name(), socket.name()))?;
    Ok((value, evaluator.statistics()))
}

/// Load `input` and write it to `output`
pub fn resave(session: &Session, input: &Path, output: &Path) -> Result<LoadReport> {
    let (space, report) = load(session, input)?;
    session
        .save(&space, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(report)
}

/// Human readable property value
pub fn format_property(property: &Property) -> String {
    format!("{} {}", property.data_type(), format_value(property.value()))
}

fn format_value(value: &Value) -> String {
    match value {
        Value::None => "(none)".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Vec2(v) => format_components(v),
        Value::Vec3(v) => format_components(v),
        Value::Vec4(v) => format_components(v),
        Value::String(v) => format!("{v:?}"),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(_) => "(object)".to_string(),
    }
}

fn format_components(components: &[f64]) -> String {
    let parts: Vec<String> = components.iter().map(f64::to_string).collect();
    format!("({})", parts.join(", "))
}

fn load(session: &Session, path: &Path) -> Result<(Space, LoadReport)> {
    session
        .load(path)
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn first_sockets(space: &Space, node: NodeId) -> Result<(SocketId, SocketId)> {
    Ok((input_at(space, node, 0)?, output_at(space, node, 0)?))
}

fn input_at(space: &Space, node: NodeId, index: usize) -> Result<SocketId> {
    space
        .node(node)
        .and_then(|node| node.input(index))
        .map(|input| input.id())
        .with_context(|| format!("Node has no input {index}"))
}

fn output_at(space: &Space, node: NodeId, index: usize) -> Result<SocketId> {
    space
        .node(node)
        .and_then(|node| node.output(index))
        .map(|output| output.id())
        .with_context(|| format!("Node has no output {index}"))
}
