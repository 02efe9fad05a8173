// SPDX-License-Identifier: MIT OR Apache-2.0
//! List nodes.

use crate::node::{Node, NodeCategory, NodeLibrary, NodeType};
use crate::processor::{ProcessError, ProcessorRegistry};
use crate::property::Property;
use crate::socket::SocketSpec;
use crate::types::DataType;

/// Register the general purpose nodes
pub fn register(library: &mut NodeLibrary, processors: &ProcessorRegistry) {
    let any_list = DataType::list_of(&DataType::VARIABLE);

    library.register(NodeType {
        id: "CREATELIST".to_string(),
        name: "General.Create List".to_string(),
        category: NodeCategory::General,
        description: "Repeat a value into a list".to_string(),
        inputs: vec![
            SocketSpec::new("Value", DataType::VARIABLE),
            SocketSpec::new("Count", DataType::INTEGER).with_default(1),
        ],
        outputs: vec![SocketSpec::new("List", any_list.clone())],
    });
    processors.register("CREATELIST", create_list);

    library.register(NodeType {
        id: "LISTLENGTH".to_string(),
        name: "General.List Length".to_string(),
        category: NodeCategory::General,
        description: "Number of items in a list".to_string(),
        inputs: vec![SocketSpec::new("List", any_list)],
        outputs: vec![SocketSpec::new("Length", DataType::INTEGER)],
    });
    processors.register("LISTLENGTH", list_length);
}

/// Largest list Create List builds
pub const MAX_LIST_ITEMS: usize = 1 << 24;

/// `Count` copies of `Value`, typed as a list of the value's type
fn create_list(inputs: &[Property], node: &Node) -> Result<Vec<Property>, ProcessError> {
    let value = inputs
        .first()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProcessError::missing(node, 0))?;
    let count = inputs
        .get(1)
        .and_then(Property::as_int)
        .ok_or_else(|| ProcessError::missing(node, 1))?;
    let count = usize::try_from(count).map_err(|_| ProcessError::InvalidInput {
        index: 1,
        reason: format!("negative count {count}"),
    })?;

    if count > MAX_LIST_ITEMS {
        return Err(ProcessError::InvalidInput {
            index: 1,
            reason: format!("count {count} exceeds the limit of {MAX_LIST_ITEMS} items"),
        });
    }

    let mut items = Vec::new();
    items.try_reserve_exact(count).map_err(|err| ProcessError::InvalidInput {
        index: 1,
        reason: format!("cannot allocate {count} items: {err}"),
    })?;
    items.resize(count, value.value().clone());
    Ok(vec![Property::list(value.data_type(), items)])
}

fn list_length(inputs: &[Property], _node: &Node) -> Result<Vec<Property>, ProcessError> {
    let length = inputs
        .first()
        .and_then(Property::as_list)
        .map_or(0, <[_]>::len);
    let length = i32::try_from(length).map_err(|_| ProcessError::InvalidInput {
        index: 0,
        reason: format!("list of {length} items is too long"),
    })?;
    Ok(vec![Property::from(length)])
}
