//! The reactive environment: named cells plus the graph that links them.
//!
//! Writes invalidate every transitive dependent of the written cell. In lazy
//! mode the next read recomputes what it needs; in eager mode the write
//! itself recomputes every stale derived cell, dependencies first.
//!
//! The environment is single-threaded. It holds `Rc`s, so it is neither
//! `Send` nor `Sync`, and every operation takes `&mut self`: a callable only
//! ever sees argument values, never the environment, so it cannot re-enter
//! `set` or `get` while a read is in progress.

use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellInput};
use crate::dep_graph::DepGraph;
use crate::error::EngineError;
use crate::evaluator::Pass;
use crate::recalc::{CycleReport, EvalStats, RecalcReport};
use crate::value::Value;

/// Environment-wide evaluation mode, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReactiveOptions {
    /// Defer recomputation until a cell is read.
    pub lazy_eval: bool,
    /// Keep computed values between reads.
    pub use_cache: bool,
}

impl Default for ReactiveOptions {
    fn default() -> Self {
        Self {
            lazy_eval: true,
            use_cache: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Reactive {
    cells: FxHashMap<String, Cell>,
    graph: DepGraph,
    options: ReactiveOptions,
    stats: EvalStats,
}

impl Reactive {
    /// Lazy, caching environment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ReactiveOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> ReactiveOptions {
        self.options
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }

    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value of `name`.
    ///
    /// Derived cells are recomputed if stale (or always, with caching off).
    /// A failing callable is reported as `Computation` and nothing is cached.
    pub fn get(&mut self, name: &str) -> Result<Value, EngineError> {
        log::trace!("get: {}", name);
        Pass::new(&mut self.cells, &mut self.stats, self.options.use_cache).evaluate(name)
    }

    /// Like `get`, but an unknown cell yields `default`.
    pub fn get_or(&mut self, name: &str, default: impl Into<Value>) -> Result<Value, EngineError> {
        match self.get(name) {
            Err(EngineError::UnknownCell(missing)) if missing == name => Ok(default.into()),
            other => other,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    /// All cell names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cells.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Every cell with its current value, sorted by name.
    pub fn items(&mut self) -> Result<Vec<(String, Value)>, EngineError> {
        self.names()
            .into_iter()
            .map(|name| {
                let value = self.get(&name)?;
                Ok((name, value))
            })
            .collect()
    }

    /// All cell names, dependencies before the cells that read them.
    pub fn names_in_order(&self) -> Vec<String> {
        let all: FxHashSet<String> = self.cells.keys().cloned().collect();
        // The graph is acyclic, so this only falls back if that invariant broke.
        self.graph.topo_order(&all).unwrap_or_else(|_| self.names())
    }

    /// `Some(true)` if the cell is derived, `None` if it does not exist.
    pub fn is_derived(&self, name: &str) -> Option<bool> {
        self.cells.get(name).map(Cell::is_derived)
    }

    /// Whether the cell can be read without recomputation bookkeeping.
    pub fn is_valid(&self, name: &str) -> Option<bool> {
        self.cells.get(name).map(Cell::is_valid)
    }

    /// Cells `name` reads, sorted.
    pub fn precedents(&self, name: &str) -> Vec<String> {
        let mut cells: Vec<String> = self.graph.precedents(name).map(str::to_string).collect();
        cells.sort();
        cells
    }

    /// Cells that read `name` directly, sorted.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let mut cells: Vec<String> = self.graph.dependents(name).map(str::to_string).collect();
        cells.sort();
        cells
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Assign a constant or a binding to `name`.
    ///
    /// A binding that would close a cycle is rejected with `CyclicDependency`
    /// before anything changes. In eager mode a failing callable is returned
    /// as `Computation` after the assignment itself has been committed.
    pub fn set(
        &mut self,
        name: &str,
        input: impl Into<CellInput>,
    ) -> Result<RecalcReport, EngineError> {
        let start = Instant::now();
        let cell = input.into().into_cell();

        if let Some(cycle) = self.graph.would_create_cycle(name, &cell.dependencies()) {
            log::debug!("rejected binding for '{}': {}", name, cycle);
            return Err(cycle.into());
        }

        log::debug!(
            "set {} ({})",
            name,
            if cell.is_derived() { "derived" } else { "static" }
        );
        self.install(name, cell);

        let mut stale = self.graph.transitive_dependents(name);
        let mut report = RecalcReport::new();
        report.invalidated = self.mark_stale(&stale);

        if !self.options.lazy_eval {
            stale.insert(name.to_string());
            self.recompute_into(&stale, &mut report)?;
        }

        report.duration = start.elapsed();
        log::debug!("{}", report.log_line());
        Ok(report)
    }

    /// `set` each pair in turn, stopping at the first error.
    pub fn update<I, N, V>(&mut self, assignments: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<CellInput>,
    {
        for (name, input) in assignments {
            self.set(name.as_ref(), input)?;
        }
        Ok(())
    }

    /// Delete a cell. Its dependents go stale and will report `UnknownCell`
    /// until the name is assigned again.
    pub fn remove(&mut self, name: &str) -> Result<RecalcReport, EngineError> {
        let start = Instant::now();
        if self.cells.remove(name).is_none() {
            return Err(EngineError::UnknownCell(name.to_string()));
        }
        log::debug!("remove {}", name);
        self.graph.clear_cell(name);

        let stale = self.graph.transitive_dependents(name);
        let report = RecalcReport {
            invalidated: self.mark_stale(&stale),
            duration: start.elapsed(),
            ..RecalcReport::new()
        };
        log::debug!("{}", report.log_line());
        Ok(report)
    }

    /// Recompute-on-write hook for values that change outside the
    /// environment (see [`crate::source`]).
    ///
    /// Marks `name` (if derived) and everything depending on it stale, then
    /// behaves like `set` with respect to eager recomputation.
    pub fn invalidate(&mut self, name: &str) -> Result<RecalcReport, EngineError> {
        let start = Instant::now();
        if !self.cells.contains_key(name) {
            return Err(EngineError::UnknownCell(name.to_string()));
        }
        log::debug!("invalidate {}", name);

        let mut stale = self.graph.transitive_dependents(name);
        stale.insert(name.to_string());
        let mut report = RecalcReport::new();
        report.invalidated = self.mark_stale(&stale);

        if !self.options.lazy_eval {
            self.recompute_into(&stale, &mut report)?;
        }

        report.duration = start.elapsed();
        log::debug!("{}", report.log_line());
        Ok(report)
    }

    /// Drop every cell.
    pub fn clear(&mut self) {
        log::debug!("clear ({} cells)", self.cells.len());
        self.cells.clear();
        self.graph.clear();
    }

    /// Mark every derived cell stale. Returns how many were marked.
    ///
    /// Nothing is recomputed here, even in eager mode.
    pub fn clear_cache(&mut self) -> usize {
        let count = self
            .cells
            .values_mut()
            .map(Cell::invalidate)
            .filter(|was_derived| *was_derived)
            .count();
        log::debug!("clear_cache ({} derived cells)", count);
        count
    }

    /// Apply `overrides`, run `f`, then put every overridden cell back the way
    /// it was (names that did not exist are removed again).
    ///
    /// If an override is rejected, the ones already applied are rolled back
    /// and the error is returned without running `f`.
    ///
    /// `f` may rebind cells outside `overrides`. If that makes a saved binding
    /// unrestorable without a cycle, the cell keeps its value from inside the
    /// scope (or is removed if that value closes a cycle too) and `scoped`
    /// returns `CyclicDependency`. The graph stays acyclic either way.
    pub fn scoped<R>(
        &mut self,
        overrides: Vec<(String, CellInput)>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, EngineError> {
        let saved: Vec<(String, Option<Cell>)> = overrides
            .iter()
            .map(|(name, _)| (name.clone(), self.cells.get(name).cloned()))
            .collect();

        for (name, input) in overrides {
            if let Err(err) = self.set(&name, input) {
                if let Err(restore_err) = self.restore(saved) {
                    log::warn!("rollback of scoped override incomplete: {}", restore_err);
                }
                return Err(err);
            }
        }

        let result = f(self);
        self.restore(saved)?;
        Ok(result)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn install(&mut self, name: &str, cell: Cell) {
        let preds: FxHashSet<String> = cell.dependencies().into_iter().collect();
        self.graph.replace_edges(name, preds);
        self.cells.insert(name.to_string(), cell);
    }

    fn mark_stale(&mut self, names: &FxHashSet<String>) -> usize {
        let mut count = 0;
        for name in names {
            if let Some(cell) = self.cells.get_mut(name) {
                if cell.invalidate() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Eager pass over the derived cells in `names`, in topological order.
    fn recompute_into(
        &mut self,
        names: &FxHashSet<String>,
        report: &mut RecalcReport,
    ) -> Result<(), EngineError> {
        report.eager = true;
        let targets: FxHashSet<String> = names
            .iter()
            .filter(|name| self.cells.get(name.as_str()).is_some_and(Cell::is_derived))
            .cloned()
            .collect();
        let order = self.graph.topo_order(&targets)?;

        let mut pass = Pass::new(&mut self.cells, &mut self.stats, self.options.use_cache);
        let mut result = Ok(());
        for name in &order {
            if let Err(err) = pass.evaluate(name) {
                result = Err(err);
                break;
            }
        }
        report.eval_order = pass.finish();
        report.cells_recomputed = report.eval_order.len();
        result
    }

    /// Reinstall saved cell states after a scoped override.
    ///
    /// Every reinstall is checked against the graph as it stands, so cells
    /// rebound inside the scope can never be closed into a loop.
    fn restore(&mut self, saved: Vec<(String, Option<Cell>)>) -> Result<(), EngineError> {
        // Detach first: with every overridden cell edge-free, reinstalling the
        // saved bindings only rebuilds part of the original acyclic graph
        // unless the scope rebound something else.
        for (name, _) in &saved {
            self.graph.clear_cell(name);
        }

        let mut conflict: Option<CycleReport> = None;
        let mut stale: FxHashSet<String> = FxHashSet::default();
        for (name, cell) in saved {
            let scoped_cell = self.cells.remove(&name);
            if let Some(cell) = cell {
                match self.graph.would_create_cycle(&name, &cell.dependencies()) {
                    None => self.install(&name, cell),
                    Some(cycle) => {
                        log::warn!("cannot restore '{}' after scope: {}", name, cycle);
                        let keep = scoped_cell.filter(|scoped| {
                            self.graph
                                .would_create_cycle(&name, &scoped.dependencies())
                                .is_none()
                        });
                        if let Some(scoped) = keep {
                            self.install(&name, scoped);
                        }
                        conflict.get_or_insert(cycle);
                    }
                }
            }
            stale.extend(self.graph.transitive_dependents(&name));
            stale.insert(name);
        }
        self.mark_stale(&stale);

        if !self.options.lazy_eval {
            let mut report = RecalcReport::new();
            if let Err(err) = self.recompute_into(&stale, &mut report) {
                log::warn!("recompute after scoped override failed: {}", err);
            }
        }

        match conflict {
            Some(cycle) => Err(cycle.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Binding, ComputeError, Func};
    use crate::source::SharedValue;
    use std::cell::Cell as Counter;
    use std::rc::Rc;

    fn int_fn<const N: usize>(
        params: [&str; N],
        f: impl Fn(&[i64]) -> i64 + 'static,
    ) -> Func {
        Func::new(params, move |args| {
            let ints = args
                .iter()
                .map(Value::as_int)
                .collect::<Result<Vec<_>, ComputeError>>()?;
            Ok(Value::Int(f(&ints)))
        })
    }

    /// Callable that counts its invocations and returns the count.
    fn counting(param: &str, calls: &Rc<Counter<i64>>) -> Func {
        let calls = Rc::clone(calls);
        Func::new([param], move |_| {
            calls.set(calls.get() + 1);
            Ok(Value::Int(calls.get()))
        })
    }

    fn eager() -> Reactive {
        Reactive::with_options(ReactiveOptions {
            lazy_eval: false,
            use_cache: true,
        })
    }

    fn uncached() -> Reactive {
        Reactive::with_options(ReactiveOptions {
            lazy_eval: true,
            use_cache: false,
        })
    }

    // =========================================================================
    // Basic reads and writes
    // =========================================================================

    #[test]
    fn test_basic() {
        let mut r = Reactive::new();
        r.set("a", 3).unwrap();
        r.set("b", 5).unwrap();
        r.set("c", Binding::implicit(int_fn(["a", "b"], |v| v[0] * v[1])).unwrap())
            .unwrap();

        assert_eq!(r.get("c").unwrap(), Value::Int(15));

        r.set("a", 7).unwrap();
        assert_eq!(r.get("a").unwrap(), Value::Int(7));
        assert_eq!(r.get("b").unwrap(), Value::Int(5));
        assert_eq!(r.get("c").unwrap(), Value::Int(35));
    }

    #[test]
    fn test_no_args() {
        let mut r = Reactive::new();
        r.set("a", Binding::implicit(int_fn([], |_| 5)).unwrap()).unwrap();
        assert_eq!(r.get("a").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_positional_reference_and_constant() {
        let mut r = Reactive::new();
        r.set("a", 3).unwrap();
        r.set("b", 5).unwrap();
        let add = int_fn(["x", "y"], |v| v[0] + v[1]);
        r.set("d", Binding::builder(add).arg("a").arg(10).build().unwrap())
            .unwrap();

        assert_eq!(r.get("d").unwrap(), Value::Int(13));
    }

    #[test]
    fn test_positional_references() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", 3).unwrap();
        let sub = int_fn(["x", "y"], |v| v[0] - v[1]);
        r.set("c", Binding::builder(sub).arg("b").arg("a").build().unwrap())
            .unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(1));

        r.set("b", 5).unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_keyword_references() {
        let mut r = Reactive::new();
        r.set("a", 3).unwrap();
        r.set("b", 5).unwrap();
        let sub = int_fn(["x", "y"], |v| v[0] - v[1]);
        r.set(
            "e",
            Binding::builder(sub).kwarg("y", "b").kwarg("x", "a").build().unwrap(),
        )
        .unwrap();

        assert_eq!(r.get("e").unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_mixed_args() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", 3).unwrap();
        let f = int_fn(["a", "x", "y"], |v| v[0] + v[1] * v[2]);
        r.set("c", Binding::builder(f).kwarg("x", "b").kwarg("y", 5).build().unwrap())
            .unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(17));

        r.set("b", 0).unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(2));
    }

    #[test]
    fn test_rebinding_changes_dependencies() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", 3).unwrap();
        let f = || int_fn(["a", "b"], |v| v[1] - v[0]);

        r.set("c", Binding::implicit(f()).unwrap()).unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(1));

        r.set("d", Binding::builder(f()).kwarg("a", "b").kwarg("b", "a").build().unwrap())
            .unwrap();
        assert_eq!(r.get("d").unwrap(), Value::Int(-1));

        r.set("a", 6).unwrap();
        assert_eq!(r.get("d").unwrap(), Value::Int(3));

        // d now reads a and c
        r.set("d", Binding::builder(f()).arg("a").arg("c").build().unwrap())
            .unwrap();
        assert_eq!(r.get("d").unwrap(), Value::Int(-9));
        assert_eq!(r.precedents("d"), vec!["a", "c"]);
        assert!(!r.dependents("b").contains(&"d".to_string()));
    }

    #[test]
    fn test_constructor_style_callable() {
        struct Span {
            width: i64,
        }
        let make_span = Func::new(["x", "y"], |args| {
            Ok(Value::opaque(Span {
                width: args[1].as_int()? - args[0].as_int()?,
            }))
        });
        let widen = Func::new(["s"], |args| {
            let span = args[0].downcast_ref::<Span>()?;
            Ok(Value::opaque(Span { width: span.width * 10 }))
        });

        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", 3).unwrap();
        r.set("c", Binding::builder(make_span).arg("a").arg("b").build().unwrap())
            .unwrap();
        r.set("d", Binding::builder(widen).arg("c").build().unwrap())
            .unwrap();

        let c = r.get("c").unwrap();
        assert_eq!(c.downcast_ref::<Span>().unwrap().width, 1);
        let d = r.get("d").unwrap();
        assert_eq!(d.downcast_ref::<Span>().unwrap().width, 10);
    }

    #[test]
    fn test_static_overwrites_binding() {
        let mut r = Reactive::new();
        r.set("a", 1).unwrap();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0] + 1)).unwrap())
            .unwrap();
        assert_eq!(r.precedents("b"), vec!["a"]);

        r.set("b", 10).unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(10));
        assert_eq!(r.is_derived("b"), Some(false));
        assert!(r.precedents("b").is_empty());
        assert!(r.dependents("a").is_empty());
    }

    #[test]
    fn test_text_static_cell() {
        let mut r = Reactive::new();
        r.set("greeting", "hello").unwrap();
        let shout = Func::new(["greeting"], |args| {
            Ok(Value::Text(args[0].as_text()?.to_uppercase()))
        });
        r.set("loud", Binding::implicit(shout).unwrap()).unwrap();
        assert_eq!(r.get("loud").unwrap(), Value::from("HELLO"));
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_missing() {
        let mut r = Reactive::new();
        r.set("b", 5).unwrap();
        assert_eq!(
            r.get("a").unwrap_err(),
            EngineError::UnknownCell("a".to_string())
        );
        assert_eq!(r.get_or("a", 0).unwrap(), Value::Int(0));
        assert_eq!(r.get_or("b", 0).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_get_or_propagates_missing_dependency() {
        let mut r = Reactive::new();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0])).unwrap())
            .unwrap();
        // b exists; its dependency does not
        assert_eq!(
            r.get_or("b", 0).unwrap_err(),
            EngineError::UnknownCell("a".to_string())
        );
    }

    #[test]
    fn test_self_cycle_rejected() {
        let mut r = Reactive::new();
        r.set("a", 5).unwrap();
        let err = r
            .set("b", Binding::implicit(int_fn(["a", "b"], |v| v[0] + v[1])).unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(_)));
        assert!(!r.contains("b"));
        r.graph.assert_consistent();
    }

    #[test]
    fn test_cycle_rejected_atomically() {
        let mut r = Reactive::new();
        let inc = |param: &str| {
            Binding::builder(int_fn(["x"], |v| v[0] + 1))
                .arg(param)
                .build()
                .unwrap()
        };
        r.set("a", inc("d")).unwrap();
        r.set("b", inc("a")).unwrap();
        r.set("c", inc("b")).unwrap();
        r.set("d", 0).unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(3));

        // d := c + 1 would close d -> c -> b -> a -> d
        let err = r.set("d", inc("c")).unwrap_err();
        let EngineError::CyclicDependency(report) = err else {
            panic!("expected cycle, got {:?}", err);
        };
        assert_eq!(report.cells, vec!["d", "c", "b", "a", "d"]);

        // Prior state of d and the graph are untouched
        assert_eq!(r.is_derived("d"), Some(false));
        assert_eq!(r.get("d").unwrap(), Value::Int(0));
        assert_eq!(r.get("c").unwrap(), Value::Int(3));
        assert!(r.is_valid("c").unwrap());
        r.graph.assert_consistent();

        // Breaking the chain makes the binding legal
        r.set("b", 5).unwrap();
        r.set("d", inc("c")).unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(5));
        assert_eq!(r.get("c").unwrap(), Value::Int(6));
        assert_eq!(r.get("d").unwrap(), Value::Int(7));
        assert_eq!(r.get("a").unwrap(), Value::Int(8));
    }

    #[test]
    fn test_binding_error_converts() {
        let err: EngineError = Binding::builder(int_fn(["x"], |v| v[0]))
            .kwarg("nope", 1)
            .build()
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "argument_binding");
    }

    #[test]
    fn test_failures_are_not_cached() {
        let mut r = Reactive::new();
        r.set("a", 0).unwrap();
        let div = Func::new(["a"], |args| {
            let a = args[0].as_int()?;
            if a == 0 {
                return Err(ComputeError::new("division by zero"));
            }
            Ok(Value::Int(100 / a))
        });
        r.set("q", Binding::implicit(div).unwrap()).unwrap();

        let err = r.get("q").unwrap_err();
        assert_eq!(
            err,
            EngineError::Computation {
                cell: "q".to_string(),
                error: ComputeError::new("division by zero"),
            }
        );
        assert_eq!(r.is_valid("q"), Some(false));

        // Retries run the callable again rather than replaying the error
        assert!(r.get("q").is_err());
        assert_eq!(r.stats().failures, 2);

        r.set("a", 4).unwrap();
        assert_eq!(r.get("q").unwrap(), Value::Int(25));
    }

    #[test]
    fn test_error_in_dependency_propagates() {
        let mut r = Reactive::new();
        let boom = Func::new(Vec::<String>::new(), |_| Err("boom".into()));
        r.set("bad", Binding::implicit(boom).unwrap()).unwrap();
        r.set("top", Binding::implicit(int_fn(["bad"], |v| v[0])).unwrap())
            .unwrap();

        let err = r.get("top").unwrap_err();
        assert!(matches!(err, EngineError::Computation { ref cell, .. } if cell == "bad"));
        assert_eq!(r.is_valid("top"), Some(false));
    }

    // =========================================================================
    // Memoization and caching modes
    // =========================================================================

    #[test]
    fn test_cache() {
        let calls = Rc::new(Counter::new(0));
        let mut r = Reactive::new();
        r.set("a", 0).unwrap();
        r.set("b", Binding::builder(counting("x", &calls)).kwarg("x", "a").build().unwrap())
            .unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(1));

        r.set("c", Binding::implicit(int_fn(["b"], |v| v[0])).unwrap())
            .unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(1));
        assert_eq!(r.get("b").unwrap(), Value::Int(1));
        assert_eq!(calls.get(), 1);

        r.set("a", 1).unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(2));
        assert!(r.stats().cache_hits >= 2);
    }

    #[test]
    fn test_unrelated_write_keeps_cache() {
        let calls = Rc::new(Counter::new(0));
        let mut r = Reactive::new();
        r.set("a", 0).unwrap();
        r.set("z", 0).unwrap();
        r.set("b", Binding::builder(counting("x", &calls)).arg("a").build().unwrap())
            .unwrap();

        r.get("b").unwrap();
        let report = r.set("z", 1).unwrap();
        assert_eq!(report.invalidated, 0);
        r.get("b").unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_no_cache() {
        let calls = Rc::new(Counter::new(0));
        let mut r = uncached();
        r.set("a", 0).unwrap();
        r.set("b", Binding::builder(counting("x", &calls)).kwarg("x", "a").build().unwrap())
            .unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(1));

        r.set("c", Binding::implicit(int_fn(["b"], |v| v[0])).unwrap())
            .unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(2));
        assert_eq!(r.get("b").unwrap(), Value::Int(3));
        assert_eq!(r.get("b").unwrap(), Value::Int(4));
        assert_eq!(r.stats().cache_hits, 0);
    }

    #[test]
    fn test_clear_cache_forces_recompute() {
        let calls = Rc::new(Counter::new(0));
        let mut r = Reactive::new();
        r.set("a", 0).unwrap();
        r.set("b", Binding::builder(counting("x", &calls)).arg("a").build().unwrap())
            .unwrap();
        r.get("b").unwrap();

        assert_eq!(r.clear_cache(), 1);
        assert_eq!(r.get("b").unwrap(), Value::Int(2));
    }

    // =========================================================================
    // Eager mode
    // =========================================================================

    #[test]
    fn test_eager_recomputes_inside_set() {
        let calls = Rc::new(Counter::new(0));
        let mut r = eager();
        r.set("a", 1).unwrap();
        let report = r
            .set("b", Binding::builder(counting("x", &calls)).arg("a").build().unwrap())
            .unwrap();
        assert!(report.eager);
        assert_eq!(report.eval_order, vec!["b"]);
        assert_eq!(calls.get(), 1);

        r.set("c", Binding::implicit(int_fn(["b"], |v| v[0] * 10)).unwrap())
            .unwrap();

        let report = r.set("a", 2).unwrap();
        assert_eq!(report.invalidated, 2);
        assert_eq!(report.eval_order, vec!["b", "c"]);
        assert_eq!(calls.get(), 2);
        assert!(r.is_valid("b").unwrap());
        assert!(r.is_valid("c").unwrap());

        // Reads are pure cache hits now
        assert_eq!(r.get("c").unwrap(), Value::Int(20));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_eager_surfaces_errors_on_write() {
        let mut r = eager();
        let err = r
            .set("a", Binding::implicit(Func::new(Vec::<String>::new(), |_| {
                Err("division by zero".into())
            }))
            .unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::Computation { .. }));
        // The assignment itself was committed
        assert_eq!(r.is_derived("a"), Some(true));
        assert_eq!(r.is_valid("a"), Some(false));
    }

    #[test]
    fn test_lazy_defers_errors_to_read() {
        let mut r = Reactive::new();
        r.set("a", Binding::implicit(Func::new(Vec::<String>::new(), |_| {
            Err("division by zero".into())
        }))
        .unwrap())
        .unwrap();
        assert!(r.get("a").is_err());
    }

    #[test]
    fn test_eager_without_cache_still_runs() {
        let calls = Rc::new(Counter::new(0));
        let mut r = Reactive::with_options(ReactiveOptions {
            lazy_eval: false,
            use_cache: false,
        });
        r.set("a", 1).unwrap();
        r.set("b", Binding::builder(counting("x", &calls)).arg("a").build().unwrap())
            .unwrap();
        assert_eq!(calls.get(), 1);
        r.set("a", 2).unwrap();
        assert_eq!(calls.get(), 2);
        // Nothing stored, so reads recompute
        assert_eq!(r.get("b").unwrap(), Value::Int(3));
    }

    // =========================================================================
    // Supplementary operations
    // =========================================================================

    #[test]
    fn test_remove_invalidates_dependents() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0] + 2)).unwrap())
            .unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(4));

        let report = r.remove("a").unwrap();
        assert_eq!(report.invalidated, 1);
        assert!(!r.contains("a"));
        assert_eq!(r.get("a").unwrap_err(), EngineError::UnknownCell("a".to_string()));
        assert_eq!(r.get("b").unwrap_err(), EngineError::UnknownCell("a".to_string()));

        r.set("a", 10).unwrap();
        assert_eq!(r.get("b").unwrap(), Value::Int(12));

        assert_eq!(
            r.remove("missing").unwrap_err(),
            EngineError::UnknownCell("missing".to_string())
        );
    }

    #[test]
    fn test_remove_derived_clears_edges() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0])).unwrap())
            .unwrap();
        r.remove("b").unwrap();
        assert!(r.dependents("a").is_empty());
        r.graph.assert_consistent();
    }

    #[test]
    fn test_names_contains_items() {
        let mut r = Reactive::new();
        assert!(r.is_empty());
        r.update([("b", CellInput::from(3)), ("a", CellInput::from(2))])
            .unwrap();
        r.set("c", Binding::implicit(int_fn(["a", "b"], |v| v[0] + v[1])).unwrap())
            .unwrap();

        assert_eq!(r.names(), vec!["a", "b", "c"]);
        assert_eq!(r.len(), 3);
        assert!(r.contains("a"));
        assert!(!r.contains("d"));
        assert_eq!(
            r.items().unwrap(),
            vec![
                ("a".to_string(), Value::Int(2)),
                ("b".to_string(), Value::Int(3)),
                ("c".to_string(), Value::Int(5)),
            ]
        );

        r.clear();
        assert!(r.is_empty());
        assert!(r.graph().topo_order_all().unwrap().is_empty());
    }

    #[test]
    fn test_scoped_overrides_restore_state() {
        let mut r = Reactive::new();
        r.set("a", 2).unwrap();
        r.set("b", 3).unwrap();
        r.set("c", Binding::implicit(int_fn(["a", "b"], |v| v[0] * v[1])).unwrap())
            .unwrap();
        assert_eq!(r.get("c").unwrap(), Value::Int(6));

        let inside = r
            .scoped(
                vec![
                    ("a".to_string(), CellInput::from(10)),
                    ("extra".to_string(), CellInput::from(1)),
                ],
                |r| r.get("c"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(inside, Value::Int(30));

        assert_eq!(r.get("a").unwrap(), Value::Int(2));
        assert_eq!(r.get("c").unwrap(), Value::Int(6));
        assert!(!r.contains("extra"));
    }

    #[test]
    fn test_scoped_restores_bindings_without_false_cycles() {
        // b = a + 1, c = b + 1; override b to a constant and a to read c.
        let mut r = Reactive::new();
        let inc = |param: &str| {
            Binding::builder(int_fn(["x"], |v| v[0] + 1))
                .arg(param)
                .build()
                .unwrap()
        };
        r.set("a", 0).unwrap();
        r.set("b", inc("a")).unwrap();
        r.set("c", inc("b")).unwrap();

        let inside = r
            .scoped(
                vec![
                    ("b".to_string(), CellInput::from(5)),
                    ("a".to_string(), CellInput::from(inc("c"))),
                ],
                |r| r.get("a"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(inside, Value::Int(7));

        assert_eq!(r.is_derived("a"), Some(false));
        assert_eq!(r.get("c").unwrap(), Value::Int(2));
        r.graph.assert_consistent();
    }

    #[test]
    fn test_scoped_rejected_override_rolls_back() {
        let mut r = Reactive::new();
        r.set("a", 1).unwrap();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0])).unwrap())
            .unwrap();

        let self_read = Binding::implicit(int_fn(["a"], |v| v[0])).unwrap();
        let err = r
            .scoped(
                vec![
                    ("b".to_string(), CellInput::from(9)),
                    ("a".to_string(), CellInput::from(self_read)),
                ],
                |_| (),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(_)));
        assert_eq!(r.get("b").unwrap(), Value::Int(1));
        assert_eq!(r.is_derived("b"), Some(true));
    }

    #[test]
    fn test_scoped_restore_never_closes_a_cycle() {
        // y is rebound inside the scope to read x; putting x back on y would loop.
        let ident = |param: &str| {
            Binding::builder(int_fn(["v"], |v| v[0]))
                .arg(param)
                .build()
                .unwrap()
        };
        for mut r in [Reactive::new(), eager()] {
            r.set("y", 1).unwrap();
            r.set("x", ident("y")).unwrap();

            let err = r
                .scoped(vec![("x".to_string(), CellInput::from(5))], |r| {
                    r.set("y", ident("x")).map(|_| ())
                })
                .unwrap_err();
            assert!(matches!(err, EngineError::CyclicDependency(_)));

            assert!(r.graph().topo_order_all().is_ok());
            r.graph.assert_consistent();
            assert_eq!(r.is_derived("x"), Some(false));
            assert_eq!(r.get("x").unwrap(), Value::Int(5));
            assert_eq!(r.get("y").unwrap(), Value::Int(5));
        }
    }

    #[test]
    fn test_scoped_restore_keeps_unrelated_rebinds() {
        let mut r = Reactive::new();
        r.set("a", 1).unwrap();
        r.set("b", Binding::implicit(int_fn(["a"], |v| v[0] * 2)).unwrap())
            .unwrap();

        r.scoped(vec![("a".to_string(), CellInput::from(4))], |r| {
            r.set("z", Binding::implicit(int_fn(["b"], |v| v[0] + 1)).unwrap())
        })
        .unwrap()
        .unwrap();

        assert!(r.graph().topo_order_all().is_ok());
        assert_eq!(r.get("z").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_source_invalidation_hook() {
        let slider = SharedValue::new(1);
        let mut r = Reactive::new();
        r.set("slider", Binding::from_source(Rc::new(slider.clone())))
            .unwrap();
        r.set("double", Binding::implicit(int_fn(["slider"], |v| v[0] * 2)).unwrap())
            .unwrap();
        assert_eq!(r.get("double").unwrap(), Value::Int(2));

        // Without the hook the cached value is kept
        slider.replace(5);
        assert_eq!(r.get("double").unwrap(), Value::Int(2));

        let report = r.invalidate("slider").unwrap();
        assert_eq!(report.invalidated, 2);
        assert_eq!(r.get("double").unwrap(), Value::Int(10));

        assert!(r.invalidate("nope").is_err());
    }

    #[test]
    fn test_source_hook_eager() {
        let slider = SharedValue::new(1);
        let mut r = eager();
        r.set("slider", Binding::from_source(Rc::new(slider.clone())))
            .unwrap();
        r.set("double", Binding::implicit(int_fn(["slider"], |v| v[0] * 2)).unwrap())
            .unwrap();

        slider.replace(4);
        let report = r.invalidate("slider").unwrap();
        assert_eq!(report.eval_order, vec!["slider", "double"]);
        assert!(r.is_valid("double").unwrap());
        assert_eq!(r.get("double").unwrap(), Value::Int(8));
    }
}
