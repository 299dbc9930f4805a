//! Values held by cells and passed to bound callables.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::binding::ComputeError;

// =============================================================================
// Value: the dynamic primitive for all cell contents
// =============================================================================

/// A dynamically typed cell value.
///
/// `Opaque` carries an arbitrary Rust object (for example a struct built by a
/// constructor-style callable). Two opaque values compare equal only when they
/// are the same allocation.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Wrap an arbitrary object as an opaque value.
    pub fn opaque<T: Any>(object: T) -> Self {
        Value::Opaque(Rc::new(object))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Integer view. Numbers with no fractional part are accepted.
    pub fn as_int(&self) -> Result<i64, ComputeError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
            other => Err(ComputeError::type_mismatch("int", other)),
        }
    }

    /// Floating point view. Integers widen.
    pub fn as_number(&self) -> Result<f64, ComputeError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(ComputeError::type_mismatch("number", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ComputeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(n) => Ok(*n != 0),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Empty => Ok(false),
            other => Err(ComputeError::type_mismatch("bool", other)),
        }
    }

    pub fn as_text(&self) -> Result<&str, ComputeError> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(ComputeError::type_mismatch("text", other)),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], ComputeError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(ComputeError::type_mismatch("list", other)),
        }
    }

    /// Borrow the object inside an opaque value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Result<&T, ComputeError> {
        match self {
            Value::Opaque(object) => object.downcast_ref::<T>().ok_or_else(|| {
                ComputeError::new(format!(
                    "opaque value is not a {}",
                    std::any::type_name::<T>()
                ))
            }),
            other => Err(ComputeError::type_mismatch("opaque", other)),
        }
    }

    /// Integer-preserving arithmetic helper: both ints stay int, otherwise float.
    pub fn numeric_op(
        &self,
        other: &Value,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ComputeError> {
        if let (Value::Int(a), Value::Int(b)) = (self, other) {
            return int_op(*a, *b)
                .map(Value::Int)
                .ok_or_else(|| ComputeError::new("integer overflow"));
        }
        Ok(Value::Number(float_op(self.as_number()?, other.as_number()?)))
    }

    /// JSON rendering used by the CLI. Opaque objects have no structure to show.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Empty => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Opaque(_) => Json::String("<opaque>".to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Text(s) => write!(f, "Text({:?})", s),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
