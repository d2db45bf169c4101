//! Snapshot access handed to `on_fetch` handlers

use super::{Tracer, TracerCore};
use crate::trace::Trace;

/// Read-only view of a tracer's tree during fetch delivery
///
/// Only exists inside an `on_fetch` handler, on the producer thread, while
/// the tree is quiescent between two iterations.
pub struct FetchProxy<'a> {
    tracer: &'a Tracer,
    core: &'a TracerCore,
}

impl<'a> FetchProxy<'a> {
    pub(crate) fn new(tracer: &'a Tracer, core: &'a TracerCore) -> Self {
        FetchProxy { tracer, core }
    }

    pub fn tracer(&self) -> &'a Tracer {
        self.tracer
    }

    /// Fence of the iteration being delivered
    pub fn fence(&self) -> u64 {
        self.tracer.fence()
    }

    /// Total entity count, folded subtrees included
    pub fn num_all_nodes(&self) -> usize {
        self.core.table.len()
    }

    /// Replace `out` with every entity not hidden under a folded ancestor.
    ///
    /// Elements come in arena order, not tree order; see
    /// [`crate::sort_messages_by_rule`].
    pub fn fetch_tree(&self, out: &mut Vec<Trace>) {
        out.clear();

        // parents always precede children in the arena
        let mut hidden = vec![false; self.core.table.len()];
        for entity in self.core.table.iter() {
            let idx = entity.unique_order();
            let is_hidden = entity
                .parent()
                .is_some_and(|p| hidden[p] || self.is_folded(p));
            hidden[idx] = is_hidden;

            if !is_hidden {
                out.push(Trace::from_entity(entity));
            }
        }
    }

    /// Replace `out` with entities visited in iteration `since` or later.
    ///
    /// Fold state is ignored: the consumer decides what to show.
    pub fn fetch_diff(&self, out: &mut Vec<Trace>, since: u64) {
        out.clear();
        out.extend(
            self.core
                .table
                .iter()
                .filter(|entity| entity.fence() >= since)
                .map(Trace::from_entity),
        );
    }

    fn is_folded(&self, idx: usize) -> bool {
        self.core
            .table
            .get(idx)
            .is_some_and(|entity| entity.flags().is_folded())
    }
}
