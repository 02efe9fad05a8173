// SPDX-License-Identifier: MIT OR Apache-2.0
//! Constant value nodes.
//!
//! Each value node has one input holding the constant and one output of the
//! same type; the input can also be linked, which makes the node a cast.

use crate::node::{Node, NodeCategory, NodeLibrary, NodeType};
use crate::processor::{ProcessError, ProcessorRegistry};
use crate::property::Property;
use crate::socket::SocketSpec;
use crate::types::DataType;

/// Register the value nodes
pub fn register(library: &mut NodeLibrary, processors: &ProcessorRegistry) {
    let values: [(&str, &str, DataType, Property); 6] = [
        ("FLOATVALUE", "Float Value", DataType::FLOAT, Property::from(0.0)),
        ("INTVALUE", "Int Value", DataType::INTEGER, Property::from(0)),
        ("BOOLVALUE", "Bool Value", DataType::BOOLEAN, Property::from(false)),
        ("STRINGVALUE", "String Value", DataType::STRING, Property::from("")),
        ("VECTOR3DVALUE", "Vector3D Value", DataType::VECTOR3D, Property::from([0.0, 0.0, 0.0])),
        ("COLORVALUE", "Color Value", DataType::COLOR, Property::color([0.0, 0.0, 0.0, 1.0])),
    ];

    for (tag, label, data_type, default) in values {
        library.register(NodeType {
            id: tag.to_string(),
            name: format!("Values.{label}"),
            category: NodeCategory::Values,
            description: format!("Constant {}", data_type.name().to_lowercase()),
            inputs: vec![SocketSpec::new("Value", data_type.clone()).with_default(default)],
            outputs: vec![SocketSpec::new("Value", data_type)],
        });
        processors.register(tag, constant);
    }
}

/// Output the value input unchanged
fn constant(inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
    let value = inputs.first().ok_or_else(|| ProcessError::missing(node, 0))?;
    Ok(vec![value.clone()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn test_value_nodes_output_their_default() {
        let session = Session::default();
        let mut space = session.create_space("root");
        let node = session.add_node(&mut space, "COLORVALUE").unwrap();
        let input = space.node(node).unwrap().inputs()[0].id();
        let output = space.node(node).unwrap().outputs()[0].id();
        space.set_default(input, Some(Property::color([1.0, 0.5, 0.25, 1.0]))).unwrap();

        let mut evaluator = session.evaluator();
        let value = evaluator.get_value(&space, output).unwrap();
        assert_eq!(value.data_type(), &DataType::COLOR);
        assert_eq!(value.as_vec4(), Some([1.0, 0.5, 0.25, 1.0]));
    }

    #[test]
    fn test_linked_value_node_casts() {
        let session = Session::default();
        let mut space = session.create_space("root");
        let int = session.add_node(&mut space, "INTVALUE").unwrap();
        let float = session.add_node(&mut space, "FLOATVALUE").unwrap();
        let int_in = space.node(int).unwrap().inputs()[0].id();
        let int_out = space.node(int).unwrap().outputs()[0].id();
        let float_in = space.node(float).unwrap().inputs()[0].id();
        let float_out = space.node(float).unwrap().outputs()[0].id();
        space.set_default(int_in, Some(Property::from(4))).unwrap();
        space.create_link(int_out, float_in).unwrap();

        let mut evaluator = session.evaluator();
        assert_eq!(evaluator.get_value(&space, float_out).unwrap(), Property::from(4.0));
    }
}
