//! The dependency graph: check-then-mutate cell registration, cycle prediction,
//! and topological execution ordering.
//!
//! See the *Rationale for check-then-mutate* design note this module follows:
//! validators (`would_create_cycle`) are pure and never touch `self`; the only
//! mutator (`update_cell`) runs the identical edge-rewrite logic against a
//! scratch copy first and only commits it to `self` once the copy comes back
//! acyclic. There is no rollback path to get wrong.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::CellId;
use crate::error::{Error, Result};

/// Internal mutable state, cloned wholesale by `would_create_cycle` before any
/// speculative edit and discarded if the edit turns out to be cyclic.
#[derive(Clone, Default)]
struct GraphState {
    graph: DiGraph<CellId, ()>,
    node_indices: FxHashMap<CellId, NodeIndex>,
    reads: FxHashMap<CellId, FxHashSet<String>>,
    writes: FxHashMap<CellId, FxHashSet<String>>,
    var_writers: FxHashMap<String, CellId>,
}

impl GraphState {
    fn ensure_node(&mut self, cell: &CellId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(cell) {
            return idx;
        }
        let idx = self.graph.add_node(cell.clone());
        self.node_indices.insert(cell.clone(), idx);
        idx
    }

    /// Rewrites `cell`'s edges and bookkeeping maps in place. Used identically
    /// by the pure check (on a scratch clone) and the real mutation (on `self`).
    fn apply_update(&mut self, cell: &CellId, reads: FxHashSet<String>, writes: FxHashSet<String>) {
        let idx = self.ensure_node(cell);

        // Drop this cell's previous edges; they are about to be recomputed
        // from scratch against the new reads/writes.
        let stale: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .chain(self.graph.edges_directed(idx, Direction::Outgoing).map(|e| e.id()))
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }

        self.reads.insert(cell.clone(), reads.clone());
        self.writes.insert(cell.clone(), writes.clone());

        for v in &writes {
            self.var_writers.insert(v.clone(), cell.clone());
        }

        // Incoming: one edge from each identifier's writer to this cell.
        for v in &reads {
            if let Some(writer) = self.var_writers.get(v) {
                if writer != cell {
                    let writer_idx = self.ensure_node(writer);
                    self.graph.update_edge(writer_idx, idx, ());
                }
            }
        }

        // Outgoing: this cell writes identifiers other cells already read.
        let dependents: Vec<CellId> = self
            .reads
            .iter()
            .filter(|(other, other_reads)| {
                *other != cell && writes.iter().any(|v| other_reads.contains(v))
            })
            .map(|(other, _)| other.clone())
            .collect();
        for dependent in dependents {
            let dep_idx = self.ensure_node(&dependent);
            self.graph.update_edge(idx, dep_idx, ());
        }
    }

    fn is_acyclic(&self) -> bool {
        petgraph::algo::toposort(&self.graph, None).is_ok()
    }
}

use petgraph::visit::EdgeRef;

/// The dependency graph described in the data model: nodes are cell ids, edges
/// encode "writer must run before reader", with `reads`/`writes`/`var_writers`
/// maintained alongside it.
#[derive(Default)]
pub struct DependencyGraph {
    state: GraphState,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure simulation: would registering `cell` with these reads/writes make
    /// the graph cyclic? Never mutates `self`.
    pub fn would_create_cycle(
        &self,
        cell: &CellId,
        reads: &FxHashSet<String>,
        writes: &FxHashSet<String>,
    ) -> bool {
        let mut scratch = self.state.clone();
        scratch.apply_update(cell, reads.clone(), writes.clone());
        !scratch.is_acyclic()
    }

    /// Registers or re-registers a cell's reads/writes. Internally re-derives
    /// the check-then-mutate result rather than trusting a caller's earlier
    /// `would_create_cycle` call, so this method alone is safe to call.
    pub fn update_cell(
        &mut self,
        cell: &CellId,
        reads: FxHashSet<String>,
        writes: FxHashSet<String>,
    ) -> Result<()> {
        let mut scratch = self.state.clone();
        scratch.apply_update(cell, reads, writes);
        if !scratch.is_acyclic() {
            return Err(Error::CyclicDependency(format!(
                "registering cell {cell} would create a cycle"
            )));
        }
        self.state = scratch;
        Ok(())
    }

    /// Removes a cell and all trace of it: node, edges, reads/writes entries,
    /// and any `var_writers` entry that still pointed at it.
    pub fn remove_cell(&mut self, cell: &CellId) {
        if let Some(idx) = self.state.node_indices.remove(cell) {
            self.state.graph.remove_node(idx);
            // `remove_node` swap-removes the underlying storage, which can
            // change the `NodeIndex` of whichever node previously held the
            // last slot. Rebuilding the index map is O(n) but keeps this
            // correct without reasoning about petgraph's swap semantics.
            self.state.node_indices = self
                .state
                .graph
                .node_indices()
                .map(|i| (self.state.graph[i].clone(), i))
                .collect();
        }
        self.state.reads.remove(cell);
        self.state.writes.remove(cell);
        self.state.var_writers.retain(|_, writer| writer != cell);
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.state.node_indices.contains_key(cell)
    }

    pub fn reads_of(&self, cell: &CellId) -> FxHashSet<String> {
        self.state.reads.get(cell).cloned().unwrap_or_default()
    }

    pub fn writes_of(&self, cell: &CellId) -> FxHashSet<String> {
        self.state.writes.get(cell).cloned().unwrap_or_default()
    }

    /// All cells from which `cell` is reachable (i.e. cells `cell` transitively
    /// depends on).
    pub fn ancestors(&self, cell: &CellId) -> FxHashSet<CellId> {
        self.reachable(cell, Direction::Incoming)
    }

    /// All cells reachable from `cell` (i.e. cells that transitively depend on it).
    pub fn descendants(&self, cell: &CellId) -> FxHashSet<CellId> {
        self.reachable(cell, Direction::Outgoing)
    }

    fn reachable(&self, cell: &CellId, direction: Direction) -> FxHashSet<CellId> {
        let Some(&start) = self.state.node_indices.get(cell) else {
            return FxHashSet::default();
        };
        let mut seen = FxHashSet::default();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for neighbor in self.state.graph.neighbors_directed(idx, direction) {
                let weight = self.state.graph[neighbor].clone();
                if seen.insert(weight) {
                    stack.push(neighbor);
                }
            }
        }
        seen
    }

    /// `{cell} ∪ descendants(cell) ∪ {ancestor : stale_predicate(ancestor)}`,
    /// sorted topologically over the whole graph and filtered down to that set
    /// (a subsequence of a topological order is itself a valid topological order).
    pub fn execution_order(
        &self,
        cell: &CellId,
        stale_predicate: impl Fn(&CellId) -> bool,
    ) -> Result<Vec<CellId>> {
        if !self.contains(cell) {
            return Err(Error::CellNotFound(cell.to_string()));
        }

        let mut wanted: FxHashSet<CellId> = FxHashSet::default();
        wanted.insert(cell.clone());
        wanted.extend(self.descendants(cell));
        wanted.extend(self.ancestors(cell).into_iter().filter(&stale_predicate));

        let order = petgraph::algo::toposort(&self.state.graph, None).map_err(|cyc| {
            Error::CyclicDependency(format!(
                "graph invariant violated: cycle at node {:?}",
                cyc.node_id()
            ))
        })?;

        Ok(order
            .into_iter()
            .map(|idx| self.state.graph[idx].clone())
            .filter(|c| wanted.contains(c))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> FxHashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn linear_chain_orders_writer_before_reader() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        let c2 = CellId::new("c2");
        g.update_cell(&c1, set(&[]), set(&["x"])).unwrap();
        g.update_cell(&c2, set(&["x"]), set(&["y"])).unwrap();

        let order = g.execution_order(&c1, |_| false).unwrap();
        assert_eq!(order, vec![c1.clone(), c2.clone()]);
    }

    #[test]
    fn cycle_is_rejected_and_state_is_untouched() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        let c2 = CellId::new("c2");
        g.update_cell(&c1, set(&["x"]), set(&["y"])).unwrap();

        assert!(g.would_create_cycle(&c2, &set(&["y"]), &set(&["x"])));
        let err = g.update_cell(&c2, set(&["y"]), set(&["x"]));
        assert!(err.is_err());
        assert!(!g.contains(&c2));
        // c1's own bookkeeping is untouched.
        assert_eq!(g.reads_of(&c1), set(&["x"]));
        assert_eq!(g.writes_of(&c1), set(&["y"]));
    }

    #[test]
    fn self_referential_write_and_read_is_not_a_cycle() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        assert!(!g.would_create_cycle(&c1, &set(&["x"]), &set(&["x"])));
        g.update_cell(&c1, set(&["x"]), set(&["x"])).unwrap();
        let order = g.execution_order(&c1, |_| false).unwrap();
        assert_eq!(order, vec![c1]);
    }

    #[test]
    fn stale_ancestor_is_included_only_when_predicate_says_so() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        let c2 = CellId::new("c2");
        g.update_cell(&c1, set(&[]), set(&["x"])).unwrap();
        g.update_cell(&c2, set(&["x"]), set(&["y"])).unwrap();

        // c1 has already run: executing c2 alone should not re-run it.
        let order = g.execution_order(&c2, |_| false).unwrap();
        assert_eq!(order, vec![c2.clone()]);

        // c1 is stale: executing c2 must bring it along, in order.
        let order = g.execution_order(&c2, |c| *c == c1).unwrap();
        assert_eq!(order, vec![c1, c2]);
    }

    #[test]
    fn rewriting_a_write_reassigns_var_writer() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        let c2 = CellId::new("c2");
        let c3 = CellId::new("c3");
        g.update_cell(&c1, set(&[]), set(&["x"])).unwrap();
        g.update_cell(&c3, set(&["x"]), set(&[])).unwrap();
        // c2 now also writes x; it becomes the writer c3 depends on.
        g.update_cell(&c2, set(&[]), set(&["x"])).unwrap();

        assert!(g.descendants(&c2).contains(&c3));
    }

    #[test]
    fn remove_cell_clears_all_bookkeeping() {
        let mut g = DependencyGraph::new();
        let c1 = CellId::new("c1");
        let c2 = CellId::new("c2");
        g.update_cell(&c1, set(&[]), set(&["x"])).unwrap();
        g.update_cell(&c2, set(&["x"]), set(&[])).unwrap();

        g.remove_cell(&c1);
        assert!(!g.contains(&c1));
        assert!(g.descendants(&c2).is_empty());
        assert!(g.ancestors(&c2).is_empty());
    }
}
