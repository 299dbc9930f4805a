//! External value sources.
//!
//! A source is a value owned by something outside the environment (a UI
//! control, a watched file). It is installed as a derived cell with no
//! dependencies via [`Binding::from_source`](crate::binding::Binding::from_source);
//! whoever owns the source calls [`Reactive::invalidate`](crate::reactive::Reactive::invalidate)
//! after the value changes so dependents recompute.

use std::cell::RefCell;
use std::rc::Rc;

use crate::binding::ComputeError;
use crate::value::Value;

pub trait ValueSource {
    /// Current value of the source.
    fn read(&self) -> Result<Value, ComputeError>;
}

/// A value slot shared between the environment and an outside writer.
#[derive(Debug, Clone, Default)]
pub struct SharedValue {
    inner: Rc<RefCell<Value>>,
}

impl SharedValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value.into())),
        }
    }

    /// Replace the held value. The environment is not told; call
    /// `Reactive::invalidate` for the cell bound to this source afterwards.
    pub fn replace(&self, value: impl Into<Value>) -> Value {
        self.inner.replace(value.into())
    }

    pub fn get(&self) -> Value {
        self.inner.borrow().clone()
    }
}

impl ValueSource for SharedValue {
    fn read(&self) -> Result<Value, ComputeError> {
        Ok(self.get())
    }
}
