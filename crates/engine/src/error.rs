use std::fmt;

use crate::binding::{BindError, ComputeError};
use crate::recalc::CycleReport;

/// Everything `Reactive` operations can fail with.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Read (or delete) of a name that was never assigned.
    UnknownCell(String),
    /// A proposed binding would close a cycle. Nothing was changed.
    CyclicDependency(CycleReport),
    /// Arguments did not match the callable's parameters.
    ArgumentBinding(BindError),
    /// The callable for `cell` failed. The cell stays stale.
    Computation { cell: String, error: ComputeError },
}

impl EngineError {
    /// Short machine-readable code (used by the CLI's JSON output).
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownCell(_) => "unknown_cell",
            EngineError::CyclicDependency(_) => "cyclic_dependency",
            EngineError::ArgumentBinding(_) => "argument_binding",
            EngineError::Computation { .. } => "computation",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownCell(name) => write!(f, "unknown cell '{}'", name),
            EngineError::CyclicDependency(report) => write!(f, "{}", report),
            EngineError::ArgumentBinding(err) => write!(f, "invalid binding: {}", err),
            EngineError::Computation { cell, error } => {
                write!(f, "computing '{}' failed: {}", cell, error)
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::UnknownCell(_) => None,
            EngineError::CyclicDependency(report) => Some(report),
            EngineError::ArgumentBinding(err) => Some(err),
            EngineError::Computation { error, .. } => Some(error),
        }
    }
}

impl From<BindError> for EngineError {
    fn from(err: BindError) -> Self {
        EngineError::ArgumentBinding(err)
    }
}

impl From<CycleReport> for EngineError {
    fn from(report: CycleReport) -> Self {
        EngineError::CyclicDependency(report)
    }
}
