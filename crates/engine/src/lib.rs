pub mod binding;
pub mod cell;
pub mod dep_graph;
pub mod error;
mod evaluator;
pub mod reactive;
pub mod recalc;
pub mod source;
pub mod value;

pub use binding::{make_binding, ArgSpec, BindError, Binding, Callable, ComputeError, Func};
pub use cell::CellInput;
pub use error::EngineError;
pub use reactive::{Reactive, ReactiveOptions};
pub use recalc::{EvalStats, RecalcReport};
pub use source::{SharedValue, ValueSource};
pub use value::Value;
