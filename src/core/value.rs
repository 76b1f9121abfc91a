//! Value kinds and the dynamically typed [`Value`] carried across converters

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an arbitrary annotation object
pub type ObjectRef = Arc<dyn Any + Send + Sync>;

/// Logical kind of a packed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    String,
    Object,
}

impl ValueKind {
    /// Primitive kinds map directly to a built-in converter
    pub fn is_primitive(self) -> bool {
        !matches!(self, ValueKind::String | ValueKind::Object)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A single packed value
///
/// Strings travel as `Object` values holding a `String`.
#[derive(Clone)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(Option<ObjectRef>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Object(Some(Arc::new(s.into())))
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Some(Arc::new(value)))
    }

    pub fn null() -> Self {
        Value::Object(None)
    }

    /// Kind of the carried value (strings report `Object`)
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Long(_) => ValueKind::Long,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(v) => v.as_ref(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_object()
            .and_then(|obj| obj.downcast_ref::<String>())
            .map(String::as_str)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "Boolean({v})"),
            Value::Integer(v) => write!(f, "Integer({v})"),
            Value::Long(v) => write!(f, "Long({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::Object(None) => f.write_str("Object(null)"),
            Value::Object(Some(obj)) => match obj.downcast_ref::<String>() {
                Some(s) => write!(f, "Object({s:?})"),
                None => f.write_str("Object(..)"),
            },
        }
    }
}
