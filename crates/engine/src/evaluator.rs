//! Recomputation of stale derived cells.
//!
//! An evaluation [`Pass`] owns a scratch map of the values it has computed.
//! Asking for a cell first collects, in post-order, every derived ancestor
//! that cannot be read as-is (stale, or caching disabled), then runs each of
//! those callables exactly once, dependencies first. Collection is iterative
//! so long chains do not grow the call stack.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::binding::{ArgSpec, Binding};
use crate::cell::Cell;
use crate::error::EngineError;
use crate::recalc::EvalStats;
use crate::value::Value;

pub(crate) struct Pass<'a> {
    cells: &'a mut FxHashMap<String, Cell>,
    stats: &'a mut EvalStats,
    use_cache: bool,
    computed: FxHashMap<String, Value>,
    order: Vec<String>,
}

impl<'a> Pass<'a> {
    pub(crate) fn new(
        cells: &'a mut FxHashMap<String, Cell>,
        stats: &'a mut EvalStats,
        use_cache: bool,
    ) -> Self {
        Self {
            cells,
            stats,
            use_cache,
            computed: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    /// Current value of `name`, recomputing whatever is needed.
    pub(crate) fn evaluate(&mut self, name: &str) -> Result<Value, EngineError> {
        if self.is_ready(name) {
            return self.read_ready(name);
        }

        for cell in self.plan(name) {
            self.compute(&cell)?;
        }

        self.read_ready(name)
    }

    /// Cells computed by this pass, in evaluation order.
    pub(crate) fn finish(self) -> Vec<String> {
        self.order
    }

    /// True if `name` can be read without running its callable.
    ///
    /// Missing cells count as ready: reading them reports `UnknownCell`.
    fn is_ready(&self, name: &str) -> bool {
        if self.computed.contains_key(name) {
            return true;
        }
        match self.cells.get(name) {
            None | Some(Cell::Static { .. }) => true,
            Some(cell) => self.use_cache && cell.fresh_value().is_some(),
        }
    }

    fn read_ready(&mut self, name: &str) -> Result<Value, EngineError> {
        if let Some(value) = self.computed.get(name) {
            return Ok(value.clone());
        }
        let fresh = match self.cells.get(name) {
            None => return Err(EngineError::UnknownCell(name.to_string())),
            Some(Cell::Static { value }) => return Ok(value.clone()),
            Some(cell) if self.use_cache => cell.fresh_value().cloned(),
            Some(_) => None,
        };

        match fresh {
            Some(value) => {
                self.stats.cache_hits += 1;
                log::trace!("cache hit: {}", name);
                Ok(value)
            }
            // Reached only if a stale cell escaped planning.
            None => self.evaluate(name),
        }
    }

    /// Post-order list of derived cells that must run before `root` can be read.
    fn plan(&self, root: &str) -> Vec<String> {
        let mut plan = Vec::new();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut stack: Vec<(String, bool)> = vec![(root.to_string(), false)];

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                plan.push(current);
                continue;
            }
            if !visited.insert(current.clone()) || self.is_ready(&current) {
                continue;
            }

            let deps = self
                .cells
                .get(&current)
                .map(Cell::dependencies)
                .unwrap_or_default();
            stack.push((current, true));
            // Reversed so the first declared dependency is computed first.
            for dep in deps.into_iter().rev() {
                if !visited.contains(&dep) {
                    stack.push((dep, false));
                }
            }
        }

        plan
    }

    fn compute(&mut self, name: &str) -> Result<(), EngineError> {
        if self.computed.contains_key(name) {
            return Ok(());
        }
        let binding: Rc<Binding> = match self.cells.get(name) {
            Some(Cell::Derived { binding, .. }) => Rc::clone(binding),
            _ => return Ok(()),
        };

        let mut args = Vec::with_capacity(binding.args().len());
        for spec in binding.args() {
            let value = match spec {
                ArgSpec::Constant(value) => value.clone(),
                ArgSpec::Reference(dep) | ArgSpec::Implicit(dep) => self.read_ready(dep)?,
            };
            args.push(value);
        }

        self.stats.recomputes += 1;
        log::trace!("recompute: {}", name);

        let value = match binding.invoke(&args) {
            Ok(value) => value,
            Err(error) => {
                self.stats.failures += 1;
                log::debug!("recompute of '{}' failed: {}", name, error);
                if let Some(cell) = self.cells.get_mut(name) {
                    cell.invalidate();
                }
                return Err(EngineError::Computation {
                    cell: name.to_string(),
                    error,
                });
            }
        };

        if let Some(Cell::Derived { cached, valid, .. }) = self.cells.get_mut(name) {
            if self.use_cache {
                *cached = Some(value.clone());
            }
            *valid = true;
        }
        self.computed.insert(name.to_string(), value);
        self.order.push(name.to_string());
        Ok(())
    }
}
