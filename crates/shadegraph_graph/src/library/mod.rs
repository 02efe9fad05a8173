// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node types and their processors.

pub mod general;
pub mod math;
pub mod values;

use crate::node::{NodeCategory, NodeLibrary, NodeType, CONTAINER_TAG};
use crate::processor::ProcessorRegistry;

/// Register every built-in node type and processor
pub fn register_builtins(library: &mut NodeLibrary, processors: &ProcessorRegistry) {
    values::register(library, processors);
    general::register(library, processors);
    math::register(library, processors);

    // Containers take their outputs from their nested space
    library.register(NodeType {
        id: CONTAINER_TAG.to_string(),
        name: "Structure.Container".to_string(),
        category: NodeCategory::Structure,
        description: "Groups nodes in a nested space".to_string(),
        inputs: vec![],
        outputs: vec![],
    });
}
