//! Dependency graph for derived cells.
//!
//! Tracks precedents (cells a derived cell reads) and dependents (cells that
//! read a given cell) so invalidation and ordering queries are cheap.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! This makes "what goes stale if I change X?" trivial: follow outgoing edges.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::recalc::CycleReport;

/// Persistent dependency graph keyed by cell name.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = cells that B depends on (precedents)
/// - `succs[A]` = cells that depend on A (dependents)
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
/// 4. **Acyclic:** callers check `would_create_cycle` before `replace_edges`.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Precedents: for each derived cell B, the cells A it reads.
    preds: FxHashMap<String, FxHashSet<String>>,

    /// Dependents: for each referenced cell A, the derived cells B reading it.
    succs: FxHashMap<String, FxHashSet<String>>,
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cells this cell depends on (precedents).
    pub fn precedents<'a>(&'a self, cell: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.preds
            .get(cell)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Returns the cells that depend on this cell (dependents).
    pub fn dependents<'a>(&'a self, cell: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.succs
            .get(cell)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Replace all precedents of `cell` atomically.
    ///
    /// 1. Removes the cell from all its old precedents' successor sets
    /// 2. Clears the cell's precedent set
    /// 3. Adds the cell to all new precedents' successor sets
    /// 4. Sets the cell's new precedent set
    ///
    /// Pass an empty set to clear all edges for this cell.
    pub fn replace_edges(&mut self, cell: &str, new_preds: FxHashSet<String>) {
        if let Some(old_preds) = self.preds.remove(cell) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(cell);
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        if new_preds.is_empty() {
            return;
        }

        for pred in &new_preds {
            self.succs
                .entry(pred.clone())
                .or_default()
                .insert(cell.to_string());
        }

        self.preds.insert(cell.to_string(), new_preds);
    }

    /// Clear all outgoing edges for a cell (made static or removed).
    ///
    /// Edges *into* the cell stay: its dependents still name it.
    pub fn clear_cell(&mut self, cell: &str) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Drop every edge.
    pub fn clear(&mut self) {
        self.preds.clear();
        self.succs.clear();
    }

    /// All cells that transitively depend on `cell`, excluding `cell` itself.
    ///
    /// Breadth-first; the order of the result is unspecified.
    pub fn transitive_dependents(&self, cell: &str) -> FxHashSet<String> {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue: VecDeque<&str> = self.dependents(cell).collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            queue.extend(self.dependents(current));
        }

        visited
    }

    /// Length of the longest precedent chain below `cell`.
    ///
    /// A cell with no precedents has depth 0.
    pub fn depth(&self, cell: &str) -> usize {
        let mut memo: FxHashMap<&str, usize> = FxHashMap::default();
        // Iterative post-order to keep deep chains off the call stack.
        let mut stack: Vec<(&str, bool)> = vec![(cell, false)];

        while let Some((current, expanded)) = stack.pop() {
            if memo.contains_key(current) {
                continue;
            }
            if expanded {
                let depth = self
                    .precedents(current)
                    .map(|p| memo.get(p).copied().unwrap_or(0) + 1)
                    .max()
                    .unwrap_or(0);
                memo.insert(current, depth);
            } else {
                stack.push((current, true));
                for pred in self.precedents(current) {
                    if !memo.contains_key(pred) {
                        stack.push((pred, false));
                    }
                }
            }
        }

        memo.get(cell).copied().unwrap_or(0)
    }

    // =========================================================================
    // Topological Ordering + Cycle Detection
    // =========================================================================

    /// Topological order of `cells`, dependencies first.
    ///
    /// Only edges between members of `cells` are considered. Uses Kahn's
    /// algorithm; ties are broken by name so the order is deterministic.
    ///
    /// # Returns
    ///
    /// - `Ok(order)` - Valid topological order
    /// - `Err(CycleReport)` - The subset contains a cycle
    pub fn topo_order(&self, cells: &FxHashSet<String>) -> Result<Vec<String>, CycleReport> {
        if cells.is_empty() {
            return Ok(Vec::new());
        }

        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        for cell in cells {
            let count = self.precedents(cell).filter(|p| cells.contains(*p)).count();
            in_degree.insert(cell.as_str(), count);
        }

        // Sorted descending so the smallest name is popped first
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| cell)
            .collect();
        queue.sort_by(|a, b| b.cmp(a));

        let mut result = Vec::with_capacity(cells.len());

        while let Some(cell) = queue.pop() {
            result.push(cell.to_string());

            let mut new_zero_degree = Vec::new();
            for dep in self.dependents(cell) {
                if let Some(deg) = in_degree.get_mut(dep) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        new_zero_degree.push(dep);
                    }
                }
            }

            new_zero_degree.sort();
            for cell in new_zero_degree.into_iter().rev() {
                queue.push(cell);
            }
        }

        if result.len() < cells.len() {
            let mut cycle_cells: Vec<String> = cells
                .iter()
                .filter(|c| !result.contains(c))
                .cloned()
                .collect();
            cycle_cells.sort();
            return Err(CycleReport::cycle(cycle_cells));
        }

        Ok(result)
    }

    /// Topological order of every cell that has precedents.
    pub fn topo_order_all(&self) -> Result<Vec<String>, CycleReport> {
        let cells: FxHashSet<String> = self.preds.keys().cloned().collect();
        self.topo_order(&cells)
    }

    /// Check if making `cell` depend on `new_preds` would create a cycle.
    ///
    /// Does not modify the graph. Returns `Some(CycleReport)` if a cycle would
    /// be introduced, `None` otherwise.
    ///
    /// # Algorithm
    ///
    /// A cycle is created if any of `new_preds` already (transitively) depends
    /// on `cell`. DFS from `cell` along dependent edges, remembering how each
    /// cell was reached so the offending loop can be reported.
    pub fn would_create_cycle(&self, cell: &str, new_preds: &[String]) -> Option<CycleReport> {
        if new_preds.iter().any(|p| p == cell) {
            return Some(CycleReport::self_reference(cell));
        }

        let new_preds_set: FxHashSet<&str> = new_preds.iter().map(String::as_str).collect();
        let mut reached_from: FxHashMap<&str, &str> = FxHashMap::default();
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut stack = vec![cell];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }

            for dep in self.dependents(current) {
                reached_from.entry(dep).or_insert(current);
                if new_preds_set.contains(dep) {
                    // dep -> ... -> cell along dependents, and cell would read dep.
                    let mut loop_cells = vec![cell.to_string(), dep.to_string()];
                    let mut at = current;
                    while at != cell {
                        loop_cells.push(at.to_string());
                        at = reached_from[at];
                    }
                    loop_cells.push(cell.to_string());
                    return Some(CycleReport::cycle(loop_cells));
                }
                stack.push(dep);
            }
        }

        None
    }

    /// Check all invariants. Panics if any are violated.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (cell, preds) in &self.preds {
            for pred in preds {
                assert!(
                    self.succs.get(pred).map_or(false, |s| s.contains(cell)),
                    "Missing succ edge: {:?} should have {:?} in dependents",
                    pred,
                    cell
                );
            }
        }

        for (cell, dependents) in &self.succs {
            for dep in dependents {
                assert!(
                    self.preds.get(dep).map_or(false, |s| s.contains(cell)),
                    "Missing pred edge: {:?} should have {:?} in precedents",
                    dep,
                    cell
                );
            }
        }

        for (cell, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {:?}", cell);
        }
        for (cell, succs) in &self.succs {
            assert!(!succs.is_empty(), "Empty succs set stored for {:?}", cell);
        }

        assert!(self.topo_order_all().is_ok(), "Graph contains a cycle");
    }
}
