//! Persistent entity table
//!
//! Entities live in an arena owned by the table and are addressed two ways:
//! by structural hash (lookup on every branch) and by arena index, which is
//! also the entity's `unique_order`. Entities are never removed, so both
//! addresses stay valid for the tracer's whole lifetime and the hot loop
//! settles into zero allocations once the tree shape is stable.

use crate::hash::structural_hash;
use crate::value::TraceValue;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consumer-controlled flags of one entity
///
/// Shared between the live entity and every snapshot taken from it, so a
/// consumer holding a `Trace` can toggle them from any thread. Relaxed
/// ordering: the producer sees changes no earlier than its next fork.
#[derive(Debug, Default)]
pub struct TraceFlags {
    subscribed: AtomicBool,
    folded: AtomicBool,
}

impl TraceFlags {
    pub fn new(subscribed: bool) -> Self {
        TraceFlags {
            subscribed: AtomicBool::new(subscribed),
            folded: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, enabled: bool) {
        self.subscribed.store(enabled, Ordering::Relaxed);
    }

    pub fn fold(&self, folded: bool) {
        self.folded.store(folded, Ordering::Relaxed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    pub fn is_folded(&self) -> bool {
        self.folded.load(Ordering::Relaxed)
    }
}

/// One named position in the hierarchy, surviving across iterations
#[derive(Debug)]
pub struct Entity {
    pub(crate) hash: u64,
    pub(crate) key: Arc<str>,
    /// Ancestor names plus own key, root first
    pub(crate) hierarchy: Arc<[Arc<str>]>,
    /// Ancestor `unique_order`s plus own, root first
    pub(crate) lineage: Arc<[usize]>,
    pub(crate) parent: Option<usize>,
    pub(crate) unique_order: usize,
    pub(crate) fence: u64,
    pub(crate) active_order: usize,
    pub(crate) value: TraceValue,
    pub(crate) flags: Arc<TraceFlags>,
}

impl Entity {
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hierarchy(&self) -> &[Arc<str>] {
        &self.hierarchy
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn unique_order(&self) -> usize {
        self.unique_order
    }

    pub fn fence(&self) -> u64 {
        self.fence
    }

    pub fn active_order(&self) -> usize {
        self.active_order
    }

    pub fn value(&self) -> &TraceValue {
        &self.value
    }

    pub fn flags(&self) -> &Arc<TraceFlags> {
        &self.flags
    }
}

/// Hash-addressed arena of entities
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: Vec<Entity>,
    index: FnvHashMap<u64, usize>,
}

impl EntityTable {
    pub fn with_capacity(capacity: usize) -> Self {
        EntityTable {
            entities: Vec::with_capacity(capacity),
            index: FnvHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Look up the entity named `name` under `parent`, creating it on first sight.
    ///
    /// On creation the hierarchy and lineage are the parent's plus this node,
    /// copied once; `unique_order` is the table size before insertion.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not an index previously returned by this table.
    pub fn find_or_create(
        &mut self,
        parent: Option<usize>,
        name: &str,
        initial_subscribe_state: bool,
    ) -> usize {
        let parent_hash = parent.map(|p| self.entities[p].hash);
        let hash = structural_hash(parent_hash, name);

        if let Some(&idx) = self.index.get(&hash) {
            let existing = &self.entities[idx];
            // every root shares one address; only non-root mismatches are aliases
            if parent.is_some() && (existing.parent != parent || &*existing.key != name) {
                tracing::warn!(
                    hash,
                    existing = %existing.key,
                    requested = name,
                    "structural hash alias: reusing existing entity"
                );
            }
            return idx;
        }

        let unique_order = self.entities.len();
        let key: Arc<str> = Arc::from(name);

        let (hierarchy, lineage) = match parent {
            Some(p) => {
                let owner = &self.entities[p];
                let mut hierarchy = Vec::with_capacity(owner.hierarchy.len() + 1);
                hierarchy.extend(owner.hierarchy.iter().cloned());
                hierarchy.push(key.clone());

                let mut lineage = Vec::with_capacity(owner.lineage.len() + 1);
                lineage.extend_from_slice(&owner.lineage);
                lineage.push(unique_order);
                (hierarchy, lineage)
            }
            None => (vec![key.clone()], vec![unique_order]),
        };

        self.entities.push(Entity {
            hash,
            key,
            hierarchy: hierarchy.into(),
            lineage: lineage.into(),
            parent,
            unique_order,
            fence: 0,
            active_order: 0,
            value: TraceValue::Null,
            flags: Arc::new(TraceFlags::new(initial_subscribe_state)),
        });
        self.index.insert(hash, unique_order);

        unique_order
    }

    /// Stamp an entity as visited in the iteration `fence`.
    pub fn visit(&mut self, idx: usize, fence: u64, active_order: usize) {
        let entity = &mut self.entities[idx];
        entity.fence = fence;
        entity.active_order = active_order;
    }

    /// True when any strict ancestor of `idx` is folded.
    pub fn is_hidden_by_fold(&self, idx: usize) -> bool {
        let mut cursor = self.entities[idx].parent;
        while let Some(p) = cursor {
            let ancestor = &self.entities[p];
            if ancestor.flags.is_folded() {
                return true;
            }
            cursor = ancestor.parent;
        }
        false
    }

    pub fn get(&self, idx: usize) -> Option<&Entity> {
        self.entities.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Entity> {
        self.entities.get_mut(idx)
    }

    pub fn find(&self, hash: u64) -> Option<&Entity> {
        self.index.get(&hash).map(|&idx| &self.entities[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
