//! Recalculation types and reporting.
//!
//! This module defines the report produced by each write (invalidation plus
//! any eager recompute) and the cycle report used to reject bindings.

use std::time::Duration;

/// Report from a single `set`/`remove`/`invalidate` on the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalcReport {
    /// Number of derived cells marked stale by the write.
    pub invalidated: usize,

    /// Number of callables run during the write (eager mode only).
    pub cells_recomputed: usize,

    /// Cells recomputed during the write, in evaluation order.
    pub eval_order: Vec<String>,

    /// Wall time spent in the write.
    pub duration: Duration,

    /// True if the write ran an eager recompute pass.
    pub eager: bool,
}

impl RecalcReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as a concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} invalidated, {} recomputed in {}us",
            self.invalidated,
            self.cells_recomputed,
            self.duration.as_micros()
        )
    }

    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc/lazy]    12us  invalidated=3  recomputed=0`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc/{}] {:>6}us  invalidated={}  recomputed={}",
            if self.eager { "eager" } else { "lazy" },
            self.duration.as_micros(),
            self.invalidated,
            self.cells_recomputed
        )
    }
}

/// Counters for cache effectiveness over the environment's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Reads of a derived cell answered from its cache.
    pub cache_hits: u64,
    /// Callable invocations (successful or not).
    pub recomputes: u64,
    /// Callable invocations that returned an error.
    pub failures: u64,
}

/// Report when cycle detection finds a circular reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cells participating in the cycle, in depends-on order.
    /// May be a subset for large cycles.
    pub cells: Vec<String>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    /// Create a new cycle report.
    pub fn new(cells: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            cells,
            message: message.into(),
        }
    }

    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: &str) -> Self {
        Self {
            cells: vec![cell.to_string()],
            message: format!("Cell '{}' references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<String>) -> Self {
        let message = match cells.as_slice() {
            [first, .., last] if cells.len() > 5 => format!(
                "Circular reference involving {} cells: {} → ... → {}",
                cells.len(),
                first,
                last
            ),
            _ => format!("Circular reference: {}", cells.join(" → ")),
        };
        Self { cells, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}
