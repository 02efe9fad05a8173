// SPDX-License-Identifier: MIT OR Apache-2.0
//! Data types carried by sockets and properties, and the rules deciding
//! which types may be linked.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;

const LIST_PREFIX: &str = "LIST:";

/// A named type tag such as `FLOAT`, `COLOR` or `LIST:FLOAT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType(Cow<'static, str>);

impl DataType {
    /// The open type, compatible with everything
    pub const VARIABLE: DataType = DataType::from_static("VARIABLE");
    /// Double precision scalar
    pub const FLOAT: DataType = DataType::from_static("FLOAT");
    /// 32-bit signed integer
    pub const INTEGER: DataType = DataType::from_static("INTEGER");
    /// Boolean flag
    pub const BOOLEAN: DataType = DataType::from_static("BOOLEAN");
    /// UTF-8 string
    pub const STRING: DataType = DataType::from_static("STRING");
    /// 2D vector
    pub const VECTOR2D: DataType = DataType::from_static("VECTOR2D");
    /// 3D vector
    pub const VECTOR3D: DataType = DataType::from_static("VECTOR3D");
    /// 4D vector
    pub const VECTOR4D: DataType = DataType::from_static("VECTOR4D");
    /// RGBA color
    pub const COLOR: DataType = DataType::from_static("COLOR");

    const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a type from its name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The list type whose elements are `element`
    pub fn list_of(element: &DataType) -> Self {
        Self::new(format!("{LIST_PREFIX}{}", element.name()))
    }

    /// Type name as written to files
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is the open type. An empty name counts as open.
    pub fn is_variable(&self) -> bool {
        self.0.is_empty() || *self == Self::VARIABLE
    }

    /// Whether this is a `LIST:` type
    pub fn is_list(&self) -> bool {
        self.0.starts_with(LIST_PREFIX)
    }

    /// Element type of a list type
    pub fn element_type(&self) -> Option<DataType> {
        self.0
            .strip_prefix(LIST_PREFIX)
            .map(|element| DataType::new(element))
    }

    /// Whether the type is one of the built-in names (lists of built-ins included)
    pub fn is_builtin(&self) -> bool {
        if let Some(element) = self.element_type() {
            return element.is_builtin();
        }
        matches!(
            self.name(),
            "VARIABLE" | "" | "FLOAT" | "INTEGER" | "BOOLEAN" | "STRING"
                | "VECTOR2D" | "VECTOR3D" | "VECTOR4D" | "COLOR"
        )
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::VARIABLE
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for DataType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Directed table of implicit conversions between types.
///
/// `is_compatible(from, to)` answers whether an output of type `from` may
/// feed an input of type `to`. Identity, the open type and list
/// element-wise rules are built in; everything else must be registered.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    conversions: HashMap<DataType, HashSet<DataType>>,
}

impl TypeRegistry {
    /// Create a registry with no registered conversions
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the standard conversion table
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        // Numeric widening
        registry.add_conversion(DataType::INTEGER, DataType::FLOAT);
        registry.add_conversion(DataType::BOOLEAN, DataType::INTEGER);

        // Scalar splat
        for target in [
            DataType::VECTOR2D,
            DataType::VECTOR3D,
            DataType::VECTOR4D,
            DataType::COLOR,
        ] {
            registry.add_conversion(DataType::FLOAT, target);
        }

        // Vector widening
        registry.add_conversion(DataType::VECTOR2D, DataType::VECTOR3D);
        registry.add_conversion(DataType::VECTOR2D, DataType::VECTOR4D);
        registry.add_conversion(DataType::VECTOR3D, DataType::VECTOR4D);

        registry.add_compatibility(DataType::COLOR, DataType::VECTOR4D);

        registry
    }

    /// Allow outputs of type `from` to feed inputs of type `to`
    pub fn add_conversion(&mut self, from: DataType, to: DataType) {
        self.conversions.entry(from).or_default().insert(to);
    }

    /// Allow linking `a` and `b` in both directions
    pub fn add_compatibility(&mut self, a: DataType, b: DataType) {
        self.add_conversion(a.clone(), b.clone());
        self.add_conversion(b, a);
    }

    /// Drop a registered conversion. Returns whether it existed.
    pub fn remove_conversion(&mut self, from: &DataType, to: &DataType) -> bool {
        self.conversions
            .get_mut(from)
            .is_some_and(|targets| targets.remove(to))
    }

    /// Check whether an output of type `from` may feed an input of type `to`
    pub fn is_compatible(&self, from: &DataType, to: &DataType) -> bool {
        if from == to || from.is_variable() || to.is_variable() {
            return true;
        }

        if self
            .conversions
            .get(from)
            .is_some_and(|targets| targets.contains(to))
        {
            return true;
        }

        match (from.element_type(), to.element_type()) {
            (Some(from_element), Some(to_element)) => {
                self.is_compatible(&from_element, &to_element)
            }
            // Scalar into a list
            (None, Some(to_element)) => self.is_compatible(from, &to_element),
            _ => false,
        }
    }

    /// All registered (from, to) pairs
    pub fn conversions(&self) -> impl Iterator<Item = (&DataType, &DataType)> {
        self.conversions
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (from, to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(element: &DataType) -> DataType {
        DataType::list_of(element)
    }

    #[test]
    fn test_list_types() {
        let floats = list(&DataType::FLOAT);
        assert_eq!(floats.name(), "LIST:FLOAT");
        assert!(floats.is_list());
        assert_eq!(floats.element_type(), Some(DataType::FLOAT));
        assert_eq!(DataType::FLOAT.element_type(), None);
        assert!(floats.is_builtin());
        assert!(!DataType::new("GEOMETRY").is_builtin());
    }

    #[test]
    fn test_variable_is_open() {
        let registry = TypeRegistry::new();
        let custom = DataType::new("GEOMETRY");
        assert!(registry.is_compatible(&DataType::VARIABLE, &custom));
        assert!(registry.is_compatible(&custom, &DataType::VARIABLE));
        assert!(registry.is_compatible(&DataType::new(""), &DataType::STRING));
    }

    #[test]
    fn test_conversion_table_both_directions() {
        let registry = TypeRegistry::with_defaults();

        // (from, to, expected)
        let table = [
            (DataType::INTEGER, DataType::FLOAT, true),
            (DataType::FLOAT, DataType::INTEGER, false),
            (DataType::BOOLEAN, DataType::INTEGER, true),
            (DataType::INTEGER, DataType::BOOLEAN, false),
            (DataType::FLOAT, DataType::VECTOR3D, true),
            (DataType::VECTOR3D, DataType::FLOAT, false),
            (DataType::VECTOR2D, DataType::VECTOR3D, true),
            (DataType::VECTOR3D, DataType::VECTOR2D, false),
            (DataType::VECTOR3D, DataType::VECTOR4D, true),
            (DataType::VECTOR4D, DataType::VECTOR3D, false),
            (DataType::COLOR, DataType::VECTOR4D, true),
            (DataType::VECTOR4D, DataType::COLOR, true),
            (DataType::STRING, DataType::FLOAT, false),
            (DataType::FLOAT, DataType::STRING, false),
            (DataType::FLOAT, list(&DataType::FLOAT), true),
            (list(&DataType::FLOAT), DataType::FLOAT, false),
            (DataType::INTEGER, list(&DataType::FLOAT), true),
            (list(&DataType::INTEGER), list(&DataType::FLOAT), true),
            (list(&DataType::FLOAT), list(&DataType::INTEGER), false),
            (list(&DataType::VARIABLE), list(&DataType::COLOR), true),
        ];

        for (from, to, expected) in table {
            assert_eq!(
                registry.is_compatible(&from, &to),
                expected,
                "{from} -> {to}"
            );
        }
    }

    #[test]
    fn test_add_and_remove_conversion() {
        let mut registry = TypeRegistry::new();
        let geometry = DataType::new("GEOMETRY");
        let mesh = DataType::new("MESH");

        assert!(!registry.is_compatible(&mesh, &geometry));
        registry.add_conversion(mesh.clone(), geometry.clone());
        assert!(registry.is_compatible(&mesh, &geometry));
        assert!(!registry.is_compatible(&geometry, &mesh));

        assert!(registry.remove_conversion(&mesh, &geometry));
        assert!(!registry.remove_conversion(&mesh, &geometry));
        assert!(!registry.is_compatible(&mesh, &geometry));

        registry.add_compatibility(mesh.clone(), geometry.clone());
        assert!(registry.is_compatible(&geometry, &mesh));
        assert_eq!(registry.conversions().count(), 2);
    }
}
