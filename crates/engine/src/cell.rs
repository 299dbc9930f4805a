use std::rc::Rc;

use crate::binding::Binding;
use crate::value::Value;

/// A named slot in the environment.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Constant value, replaced only by an explicit `set`.
    Static { value: Value },
    /// Value computed from `binding`.
    ///
    /// `valid == true` means `cached` (when caching is on) matches the binding
    /// evaluated against the current dependency values.
    Derived {
        binding: Rc<Binding>,
        cached: Option<Value>,
        valid: bool,
    },
}

impl Cell {
    pub fn derived(binding: Binding) -> Self {
        Cell::Derived {
            binding: Rc::new(binding),
            cached: None,
            valid: false,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Cell::Derived { .. })
    }

    /// Fresh value that can be read without running anything.
    pub fn fresh_value(&self) -> Option<&Value> {
        match self {
            Cell::Static { value } => Some(value),
            Cell::Derived {
                cached: Some(value),
                valid: true,
                ..
            } => Some(value),
            Cell::Derived { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Cell::Static { .. } => true,
            Cell::Derived { valid, .. } => *valid,
        }
    }

    /// Mark stale and drop the cache. Returns true if the cell was derived.
    pub fn invalidate(&mut self) -> bool {
        match self {
            Cell::Static { .. } => false,
            Cell::Derived { cached, valid, .. } => {
                *cached = None;
                *valid = false;
                true
            }
        }
    }

    /// Dependencies declared by this cell's binding (none for static cells).
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Cell::Static { .. } => Vec::new(),
            Cell::Derived { binding, .. } => binding.dependencies(),
        }
    }
}

/// What `Reactive::set` accepts: a constant or a binding.
#[derive(Debug, Clone)]
pub enum CellInput {
    Value(Value),
    Binding(Binding),
}

impl CellInput {
    pub(crate) fn into_cell(self) -> Cell {
        match self {
            CellInput::Value(value) => Cell::Static { value },
            CellInput::Binding(binding) => Cell::derived(binding),
        }
    }
}

impl From<Value> for CellInput {
    fn from(value: Value) -> Self {
        CellInput::Value(value)
    }
}

impl From<Binding> for CellInput {
    fn from(binding: Binding) -> Self {
        CellInput::Binding(binding)
    }
}

impl From<i64> for CellInput {
    fn from(n: i64) -> Self {
        CellInput::Value(Value::Int(n))
    }
}

impl From<i32> for CellInput {
    fn from(n: i32) -> Self {
        CellInput::Value(Value::from(n))
    }
}

impl From<f64> for CellInput {
    fn from(n: f64) -> Self {
        CellInput::Value(Value::Number(n))
    }
}

impl From<bool> for CellInput {
    fn from(b: bool) -> Self {
        CellInput::Value(Value::Bool(b))
    }
}

impl From<&str> for CellInput {
    fn from(s: &str) -> Self {
        CellInput::Value(Value::from(s))
    }
}

impl From<String> for CellInput {
    fn from(s: String) -> Self {
        CellInput::Value(Value::Text(s))
    }
}
