// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic and color nodes.

use crate::node::{Node, NodeCategory, NodeLibrary, NodeType};
use crate::processor::{ProcessError, ProcessorRegistry};
use crate::property::Property;
use crate::socket::SocketSpec;
use crate::types::DataType;

/// Register the math nodes
pub fn register(library: &mut NodeLibrary, processors: &ProcessorRegistry) {
    library.register(NodeType {
        id: "ADD".to_string(),
        name: "Math.Add".to_string(),
        category: NodeCategory::Math,
        description: "A + B".to_string(),
        inputs: vec![
            SocketSpec::new("A", DataType::FLOAT).with_default(0.0),
            SocketSpec::new("B", DataType::FLOAT).with_default(0.0),
        ],
        outputs: vec![SocketSpec::new("Sum", DataType::FLOAT)],
    });
    processors.register("ADD", add);

    library.register(NodeType {
        id: "MULTIPLY".to_string(),
        name: "Math.Multiply".to_string(),
        category: NodeCategory::Math,
        description: "A * B".to_string(),
        inputs: vec![
            SocketSpec::new("A", DataType::FLOAT).with_default(1.0),
            SocketSpec::new("B", DataType::FLOAT).with_default(1.0),
        ],
        outputs: vec![SocketSpec::new("Product", DataType::FLOAT)],
    });
    processors.register("MULTIPLY", multiply);

    library.register(NodeType {
        id: "MIX".to_string(),
        name: "Color.Mix".to_string(),
        category: NodeCategory::Color,
        description: "Linear blend of two colors".to_string(),
        inputs: vec![
            SocketSpec::new("A", DataType::COLOR).with_default(Property::color([0.0, 0.0, 0.0, 1.0])),
            SocketSpec::new("B", DataType::COLOR).with_default(Property::color([1.0, 1.0, 1.0, 1.0])),
            SocketSpec::new("Factor", DataType::FLOAT).with_default(0.5),
        ],
        outputs: vec![SocketSpec::new("Color", DataType::COLOR)],
    });
    processors.register("MIX", mix);
}

fn scalar(inputs: &[Property], node: &Node, index: usize) -> Result<f64, ProcessError> {
    inputs
        .get(index)
        .and_then(Property::as_float)
        .ok_or_else(|| ProcessError::missing(node, index))
}

fn vector(inputs: &[Property], node: &Node, index: usize) -> Result<[f64; 4], ProcessError> {
    inputs
        .get(index)
        .and_then(Property::as_vec4)
        .ok_or_else(|| ProcessError::missing(node, index))
}

fn add(inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
    Ok(vec![Property::from(scalar(inputs, node, 0)? + scalar(inputs, node, 1)?)])
}

fn multiply(inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
    Ok(vec![Property::from(scalar(inputs, node, 0)? * scalar(inputs, node, 1)?)])
}

/// `A + (B - A) * Factor` per component
fn mix(inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
    let a = vector(inputs, node, 0)?;
    let b = vector(inputs, node, 1)?;
    let factor = scalar(inputs, node, 2)?;

    let mut color = [0.0; 4];
    for (out, (a, b)) in color.iter_mut().zip(a.iter().zip(b.iter())) {
        *out = a + (b - a) * factor;
    }
    Ok(vec![Property::color(color)])
}
