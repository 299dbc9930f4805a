//! Bindings: a callable plus the source of each of its arguments.
//!
//! A binding is built once, when a cell is declared derived. Each declared
//! parameter of the callable resolves to exactly one [`ArgSpec`]:
//!
//! 1. a positional argument at the parameter's index, else
//! 2. a keyword argument named after the parameter, else
//! 3. an implicit reference to the cell named after the parameter.
//!
//! Supplied `Value::Text` arguments are always cell references. There is no
//! way to pass a literal string constant; put the text in a static cell and
//! reference it instead.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::source::ValueSource;
use crate::value::Value;

// =============================================================================
// Errors
// =============================================================================

/// Error raised by a callable while computing a cell.
///
/// Returned verbatim to the caller of `get` (wrapped with the cell name).
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeError {
    message: String,
}

impl ComputeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: &str, got: &Value) -> Self {
        Self::new(format!("expected {}, got {}", expected, got.type_name()))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ComputeError {}

impl From<String> for ComputeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ComputeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Argument/parameter mismatch detected while building a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// More positional arguments than the callable declares parameters.
    TooManyPositional { given: usize, params: usize },
    /// Keyword argument that names no parameter.
    UnknownKeyword(String),
    /// A parameter was supplied twice (positionally and by keyword, or by two keywords).
    DuplicateArgument(String),
    /// The callable declares the same parameter name twice.
    DuplicateParameter(String),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::TooManyPositional { given, params } => write!(
                f,
                "{} positional arguments given but the callable takes {}",
                given, params
            ),
            BindError::UnknownKeyword(name) => write!(f, "no parameter named '{}'", name),
            BindError::DuplicateArgument(name) => {
                write!(f, "parameter '{}' was given more than once", name)
            }
            BindError::DuplicateParameter(name) => {
                write!(f, "callable declares parameter '{}' twice", name)
            }
        }
    }
}

impl std::error::Error for BindError {}

// =============================================================================
// Callable
// =============================================================================

/// Anything that can be invoked with an argument list and exposes the names
/// of its formal parameters.
///
/// Arguments arrive positionally, in declaration order, already resolved to
/// values.
pub trait Callable {
    /// Declared parameter names, in order.
    fn params(&self) -> &[String];

    fn call(&self, args: &[Value]) -> Result<Value, ComputeError>;
}

type FuncBody = dyn Fn(&[Value]) -> Result<Value, ComputeError>;

/// A closure with an explicit parameter-name list.
///
/// ```
/// use cellwork_engine::binding::Func;
/// use cellwork_engine::value::Value;
///
/// let mul = Func::new(["a", "b"], |args| {
///     Ok(Value::Int(args[0].as_int()? * args[1].as_int()?))
/// });
/// ```
pub struct Func {
    params: Vec<String>,
    body: Box<FuncBody>,
}

impl Func {
    pub fn new<I, S, F>(params: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[Value]) -> Result<Value, ComputeError> + 'static,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        }
    }
}

impl Callable for Func {
    fn params(&self) -> &[String] {
        &self.params
    }

    fn call(&self, args: &[Value]) -> Result<Value, ComputeError> {
        (self.body)(args)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("params", &self.params).finish()
    }
}

/// Adapts a [`ValueSource`] into a zero-parameter callable.
struct SourceCallable {
    source: Rc<dyn ValueSource>,
}

impl Callable for SourceCallable {
    fn params(&self) -> &[String] {
        &[]
    }

    fn call(&self, _args: &[Value]) -> Result<Value, ComputeError> {
        self.source.read()
    }
}

// =============================================================================
// Binding
// =============================================================================

/// Where a parameter's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSpec {
    /// Literal value, not a dependency.
    Constant(Value),
    /// Explicit dependency on a named cell.
    Reference(String),
    /// No argument given: depends on the cell named after the parameter.
    Implicit(String),
}

impl ArgSpec {
    /// Supplied argument: text is a cell reference, anything else a constant.
    fn from_supplied(value: Value) -> Self {
        match value {
            Value::Text(name) => ArgSpec::Reference(name),
            other => ArgSpec::Constant(other),
        }
    }

    /// The cell this argument reads, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            ArgSpec::Constant(_) => None,
            ArgSpec::Reference(name) | ArgSpec::Implicit(name) => Some(name),
        }
    }
}

/// Immutable description of how to compute a derived cell.
#[derive(Clone)]
pub struct Binding {
    callable: Rc<dyn Callable>,
    args: Vec<ArgSpec>,
}

impl Binding {
    /// Start building a binding for `callable`.
    pub fn builder(callable: impl Callable + 'static) -> BindingBuilder {
        BindingBuilder::new(Rc::new(callable))
    }

    /// Bind with every parameter implicit.
    pub fn implicit(callable: impl Callable + 'static) -> Result<Binding, BindError> {
        Self::builder(callable).build()
    }

    /// Bind an external value source as a dependency-free derived cell.
    pub fn from_source(source: Rc<dyn ValueSource>) -> Binding {
        Binding {
            callable: Rc::new(SourceCallable { source }),
            args: Vec::new(),
        }
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn params(&self) -> &[String] {
        self.callable.params()
    }

    /// Referenced cell names, deduplicated, in declaration order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut seen = FxHashSet::default();
        self.args
            .iter()
            .filter_map(ArgSpec::dependency)
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn invoke(&self, args: &[Value]) -> Result<Value, ComputeError> {
        self.callable.call(args)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("params", &self.callable.params())
            .field("args", &self.args)
            .finish()
    }
}

/// Collects positional and keyword arguments, then resolves them against the
/// callable's signature in [`BindingBuilder::build`].
pub struct BindingBuilder {
    callable: Rc<dyn Callable>,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl BindingBuilder {
    pub fn new(callable: Rc<dyn Callable>) -> Self {
        Self {
            callable,
            positional: Vec::new(),
            keyword: Vec::new(),
        }
    }

    /// Next positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Keyword argument for the parameter called `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<Binding, BindError> {
        let params = self.callable.params();

        let mut declared = FxHashSet::default();
        for param in params {
            if !declared.insert(param.as_str()) {
                return Err(BindError::DuplicateParameter(param.clone()));
            }
        }

        if self.positional.len() > params.len() {
            return Err(BindError::TooManyPositional {
                given: self.positional.len(),
                params: params.len(),
            });
        }

        let mut slots: Vec<Option<ArgSpec>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(self.positional) {
            *slot = Some(ArgSpec::from_supplied(value));
        }

        for (name, value) in self.keyword {
            let index = params
                .iter()
                .position(|p| *p == name)
                .ok_or_else(|| BindError::UnknownKeyword(name.clone()))?;
            if slots[index].is_some() {
                return Err(BindError::DuplicateArgument(name));
            }
            slots[index] = Some(ArgSpec::from_supplied(value));
        }

        let args = slots
            .into_iter()
            .zip(params)
            .map(|(slot, param)| slot.unwrap_or_else(|| ArgSpec::Implicit(param.clone())))
            .collect();

        Ok(Binding {
            callable: self.callable,
            args,
        })
    }
}

/// Build a binding from positional and keyword argument lists.
pub fn make_binding(
    callable: impl Callable + 'static,
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
) -> Result<Binding, BindError> {
    let mut builder = Binding::builder(callable);
    builder.positional = positional;
    builder.keyword = keyword;
    builder.build()
}
