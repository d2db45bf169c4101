//! Consumer-side mirror of a tracer's tree
//!
//! Diff batches only carry entities visited since the consumer's last
//! fence. `TraceMirror` folds them into a cache indexed by `unique_order`
//! and reports what changed, so a front end can publish node descriptors
//! once and value updates afterwards.

use crate::trace::{sort_messages_by_rule, Trace, TraceBatch};

/// Outcome of [`TraceMirror::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorUpdate {
    /// Indices seen for the first time (every cached index after a reset)
    pub new_nodes: Vec<usize>,
    /// Indices whose value/flags/fence changed in this batch
    pub updated: Vec<usize>,
    /// True when this apply republished the whole cache
    pub republished: bool,
}

#[derive(Debug, Default)]
pub struct TraceMirror {
    traces: Vec<Option<Trace>>,
    fence: u64,
    up_to_date: bool,
}

impl TraceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch delivered at `fence`.
    pub fn apply(&mut self, batch: TraceBatch, fence: u64) -> MirrorUpdate {
        let republish = !self.up_to_date;
        let mut update = MirrorUpdate {
            republished: republish,
            ..MirrorUpdate::default()
        };

        for trace in batch {
            let idx = trace.unique_order;
            if idx >= self.traces.len() {
                self.traces.resize_with(idx + 1, || None);
            }

            let slot = &mut self.traces[idx];
            if slot.is_none() && !republish {
                update.new_nodes.push(idx);
            }
            if !republish {
                update.updated.push(idx);
            }
            *slot = Some(trace);
        }

        if republish {
            let present = self
                .traces
                .iter()
                .enumerate()
                .filter_map(|(idx, slot)| slot.as_ref().map(|_| idx));
            update.new_nodes.extend(present);
            update.updated = update.new_nodes.clone();
            self.up_to_date = true;
        }

        self.fence = self.fence.max(fence);
        update
    }

    /// Fence of the newest batch applied
    pub fn fence(&self) -> u64 {
        self.fence
    }

    /// Republish everything on the next apply.
    pub fn reset(&mut self) {
        self.up_to_date = false;
    }

    pub fn get(&self, index: usize) -> Option<&Trace> {
        self.traces.get(index).and_then(Option::as_ref)
    }

    /// Toggle subscribe/fold on a cached entity; reaches the live tracer.
    ///
    /// Returns `false` for an unknown index.
    pub fn control(&self, index: usize, subscribe: Option<bool>, fold: Option<bool>) -> bool {
        let Some(trace) = self.get(index) else {
            return false;
        };
        if let Some(enabled) = subscribe {
            trace.subscribe(enabled);
        }
        if let Some(folded) = fold {
            trace.fold(folded);
        }
        true
    }

    /// Number of cached entities
    pub fn len(&self) -> usize {
        self.traces.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter().flatten()
    }

    /// Cached entities in tree order
    pub fn sorted(&self) -> Vec<Trace> {
        let mut out: Vec<Trace> = self.iter().cloned().collect();
        sort_messages_by_rule(&mut out);
        out
    }
}
