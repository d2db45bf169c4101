//! Snapshot traces and the sort-merge ordering rule
//!
//! A [`Trace`] is an owned copy of one entity taken on the producer thread
//! during a fetch. It borrows nothing from the live table: names and
//! ancestry are shared `Arc` slices built once at entity creation, and the
//! ancestor chain is carried as a list of `unique_order` indices instead of
//! pointers, so a batch stays valid however the tracer changes afterwards.
//!
//! [`sort_messages_by_rule`] rebuilds tree order from an unordered batch:
//! ancestors first, siblings by first-ever appearance.

use crate::entity::{Entity, TraceFlags};
use crate::value::TraceValue;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Batch of snapshot elements handed to consumers
pub type TraceBatch = Vec<Trace>;

/// Immutable copy of an entity's visible state at fetch time
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub key: Arc<str>,
    pub hash: u64,
    pub fence: u64,
    pub unique_order: usize,
    pub active_order: usize,
    pub hierarchy: Arc<[Arc<str>]>,
    /// `unique_order` of each ancestor, root first, ending with this node
    #[serde(skip)]
    pub lineage: Arc<[usize]>,
    /// `unique_order` of the parent; `None` for the root
    pub owner: Option<usize>,
    pub value: TraceValue,
    #[serde(serialize_with = "serialize_flags")]
    flags: Arc<TraceFlags>,
}

fn serialize_flags<S: Serializer>(flags: &Arc<TraceFlags>, s: S) -> Result<S::Ok, S::Error> {
    let mut st = s.serialize_struct("TraceFlags", 2)?;
    st.serialize_field("subscribed", &flags.is_subscribed())?;
    st.serialize_field("folded", &flags.is_folded())?;
    st.end()
}

impl Trace {
    pub(crate) fn from_entity(entity: &Entity) -> Self {
        Trace {
            key: entity.key.clone(),
            hash: entity.hash,
            fence: entity.fence,
            unique_order: entity.unique_order,
            active_order: entity.active_order,
            hierarchy: entity.hierarchy.clone(),
            lineage: entity.lineage.clone(),
            owner: entity.parent,
            value: entity.value.clone(),
            flags: entity.flags.clone(),
        }
    }

    /// Ask for this entity's updates to be delivered/highlighted. Any thread.
    pub fn subscribe(&self, enabled: bool) {
        self.flags.subscribe(enabled);
    }

    /// Suppress this entity's descendants from tree fetches. Any thread.
    pub fn fold(&self, folded: bool) {
        self.flags.fold(folded);
    }

    pub fn is_subscribed(&self) -> bool {
        self.flags.is_subscribed()
    }

    pub fn is_folded(&self) -> bool {
        self.flags.is_folded()
    }

    /// Control flags shared with the live entity
    pub fn flags(&self) -> &Arc<TraceFlags> {
        &self.flags
    }

    pub fn as_timer(&self) -> Option<Duration> {
        self.value.as_duration()
    }

    pub fn depth(&self) -> usize {
        self.hierarchy.len()
    }

    /// Hierarchy names joined by `sep`, e.g. `root.A.B`
    pub fn full_key(&self, sep: &str) -> String {
        let mut out = String::new();
        for (i, name) in self.hierarchy.iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            out.push_str(name);
        }
        out
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Trace) -> bool {
        self.lineage.len() < other.lineage.len()
            && other.lineage[..self.lineage.len()] == self.lineage[..]
    }

    /// Whether both snapshots were taken from the same live entity
    pub fn same_entity(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.flags, &other.flags)
    }
}

/// Ancestor-aware comparison of two snapshot elements.
///
/// The deeper node is raised to the shallower one's depth; if they meet, the
/// shallower one is the ancestor and comes first. Otherwise both climb until
/// their owners coincide and the two children of that common ancestor are
/// ordered by `unique_order`.
pub fn compare_by_rule(a: &Trace, b: &Trace) -> Ordering {
    let (la, lb) = (&a.lineage[..], &b.lineage[..]);
    let a_is_higher = la.len() <= lb.len();
    let (higher, lower) = if a_is_higher { (la, lb) } else { (lb, la) };

    let raised = &lower[..higher.len()];
    if raised == higher {
        return la.len().cmp(&lb.len());
    }

    // first depth where paths diverge: the children of the nearest common ancestor
    match higher.iter().zip(raised).position(|(h, l)| h != l) {
        Some(split) => la[split].cmp(&lb[split]),
        None => Ordering::Equal,
    }
}

/// Reorder a fetched batch so ancestors precede descendants and siblings
/// follow first-occurrence order. Deterministic for a given batch.
pub fn sort_messages_by_rule(traces: &mut [Trace]) {
    traces.sort_by(compare_by_rule);
}
