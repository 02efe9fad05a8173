// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed values flowing through sockets.

use crate::types::DataType;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque shared reference to an object owned outside the graph
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    /// Wrap a shared object
    pub fn new(object: Arc<dyn Any + Send + Sync>) -> Self {
        Self(object)
    }

    /// Try to view the object as a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", Arc::as_ptr(&self.0))
    }
}

/// Raw payload of a [`Property`]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No data
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f64),
    /// 2D vector
    Vec2([f64; 2]),
    /// 3D vector
    Vec3([f64; 3]),
    /// 4D vector or color
    Vec4([f64; 4]),
    /// String
    String(String),
    /// List of values sharing the list's element type
    List(Vec<Value>),
    /// Reference to an external object
    Object(ObjectRef),
}

impl Value {
    /// Convert this payload into the shape expected by `target`.
    fn convert(&self, target: &DataType) -> Option<Value> {
        if let Some(element) = target.element_type() {
            return match self {
                Value::List(items) => items
                    .iter()
                    .map(|item| item.convert(&element))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::List),
                Value::None | Value::Object(_) => None,
                scalar => scalar.convert(&element).map(|item| Value::List(vec![item])),
            };
        }

        if target.is_variable() {
            return Some(self.clone());
        }

        let converted = match (self, target.name()) {
            (Value::Float(_), "FLOAT")
            | (Value::Int(_), "INTEGER")
            | (Value::Bool(_), "BOOLEAN")
            | (Value::String(_), "STRING")
            | (Value::Vec2(_), "VECTOR2D")
            | (Value::Vec3(_), "VECTOR3D")
            | (Value::Vec4(_), "VECTOR4D" | "COLOR") => self.clone(),

            (Value::Int(v), "FLOAT") => Value::Float(f64::from(*v)),
            (Value::Bool(v), "FLOAT") => Value::Float(if *v { 1.0 } else { 0.0 }),
            (Value::Float(v), "INTEGER") => Value::Int(v.trunc() as i32),
            (Value::Bool(v), "INTEGER") => Value::Int(i32::from(*v)),
            (Value::Int(v), "BOOLEAN") => Value::Bool(*v != 0),

            (Value::Float(v), "VECTOR2D") => Value::Vec2([*v; 2]),
            (Value::Float(v), "VECTOR3D") => Value::Vec3([*v; 3]),
            (Value::Float(v), "VECTOR4D" | "COLOR") => Value::Vec4([*v; 4]),
            (Value::Int(v), "VECTOR2D" | "VECTOR3D" | "VECTOR4D" | "COLOR") => {
                return Value::Float(f64::from(*v)).convert(target)
            }

            (Value::Vec2([x, y]), "VECTOR3D") => Value::Vec3([*x, *y, 0.0]),
            (Value::Vec2([x, y]), "VECTOR4D" | "COLOR") => Value::Vec4([*x, *y, 0.0, 1.0]),
            (Value::Vec3([x, y, _]), "VECTOR2D") => Value::Vec2([*x, *y]),
            (Value::Vec3([x, y, z]), "VECTOR4D" | "COLOR") => Value::Vec4([*x, *y, *z, 1.0]),
            (Value::Vec4([x, y, _, _]), "VECTOR2D") => Value::Vec2([*x, *y]),
            (Value::Vec4([x, y, z, _]), "VECTOR3D") => Value::Vec3([*x, *y, *z]),

            _ => return None,
        };
        Some(converted)
    }
}

/// A value tagged with its data type.
///
/// The type is fixed at construction; [`Property::retype`] produces a new
/// property of another type, truncating or promoting the data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Property {
    data_type: DataType,
    value: Value,
}

impl Property {
    /// Create a property from an explicit type and payload
    pub fn new(data_type: DataType, value: Value) -> Self {
        Self { data_type, value }
    }

    /// A property of the given type without data
    pub fn empty(data_type: DataType) -> Self {
        Self::new(data_type, Value::None)
    }

    /// RGBA color
    pub fn color(rgba: [f64; 4]) -> Self {
        Self::new(DataType::COLOR, Value::Vec4(rgba))
    }

    /// List of `element` typed items
    pub fn list(element: &DataType, items: Vec<Value>) -> Self {
        Self::new(DataType::list_of(element), Value::List(items))
    }

    /// Reference to an external object, typed by `type_name`
    pub fn object(type_name: impl Into<String>, object: Arc<dyn Any + Send + Sync>) -> Self {
        Self::new(DataType::new(type_name), Value::Object(ObjectRef::new(object)))
    }

    /// Data type
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Payload
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume into the payload
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Whether the property carries no data
    pub fn is_empty(&self) -> bool {
        matches!(self.value, Value::None)
    }

    /// Produce a copy converted to `target`, or `None` when no conversion exists.
    ///
    /// Retyping to the open type keeps the property unchanged.
    pub fn retype(&self, target: &DataType) -> Option<Property> {
        if *target == self.data_type || target.is_variable() {
            return Some(self.clone());
        }
        self.value
            .convert(target)
            .map(|value| Property::new(target.clone(), value))
    }

    /// Scalar as float (integers and booleans promote)
    pub fn as_float(&self) -> Option<f64> {
        match self.value {
            Value::Float(v) => Some(v),
            Value::Int(v) => Some(f64::from(v)),
            Value::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Scalar as integer (floats truncate)
    pub fn as_int(&self) -> Option<i32> {
        match self.value {
            Value::Int(v) => Some(v),
            Value::Float(v) => Some(v.trunc() as i32),
            Value::Bool(v) => Some(i32::from(v)),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Bool(v) => Some(v),
            Value::Int(v) => Some(v != 0),
            _ => None,
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Vector or color as four components (missing ones filled like a retype)
    pub fn as_vec4(&self) -> Option<[f64; 4]> {
        match self.value.convert(&DataType::VECTOR4D)? {
            Value::Vec4(v) => Some(v),
            _ => None,
        }
    }

    /// Vector as three components
    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self.value.convert(&DataType::VECTOR3D)? {
            Value::Vec3(v) => Some(v),
            _ => None,
        }
    }

    /// List items
    pub fn as_list(&self) -> Option<&[Value]> {
        match &self.value {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Shared object, downcast to `T`
    pub fn as_object<T: Any>(&self) -> Option<&T> {
        match &self.value {
            Value::Object(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<f64> for Property {
    fn from(value: f64) -> Self {
        Self::new(DataType::FLOAT, Value::Float(value))
    }
}

impl From<i32> for Property {
    fn from(value: i32) -> Self {
        Self::new(DataType::INTEGER, Value::Int(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::new(DataType::BOOLEAN, Value::Bool(value))
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::new(DataType::STRING, Value::String(value.to_string()))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::new(DataType::STRING, Value::String(value))
    }
}

impl From<[f64; 2]> for Property {
    fn from(value: [f64; 2]) -> Self {
        Self::new(DataType::VECTOR2D, Value::Vec2(value))
    }
}

impl From<[f64; 3]> for Property {
    fn from(value: [f64; 3]) -> Self {
        Self::new(DataType::VECTOR3D, Value::Vec3(value))
    }
}

impl From<[f64; 4]> for Property {
    fn from(value: [f64; 4]) -> Self {
        Self::new(DataType::VECTOR4D, Value::Vec4(value))
    }
}
