//! Structural hashing for entity addressing
//!
//! An entity's address is a pure function of its parent's address and its own
//! name: the parent hash seeds an FNV-1a fold over the name's bytes. The root
//! always maps to [`ROOT_HASH`], whatever name it is forked with.
//!
//! There is no collision handling. Two distinct (parent, name) pairs that fold
//! to the same value alias the same entity; the entity table logs when it
//! observes this but keeps the aliasing.

use fnv::FnvHasher;
use std::hash::Hasher;

/// FNV-1a 64-bit offset basis; address of every root entity
pub const ROOT_HASH: u64 = 0xcbf2_9ce4_8422_2325;

/// Hash of the entity named `name` under `parent` (`None` for the root).
pub fn structural_hash(parent: Option<u64>, name: &str) -> u64 {
    let Some(seed) = parent else {
        return ROOT_HASH;
    };

    let mut hasher = FnvHasher::with_key(seed);
    hasher.write(name.as_bytes());
    hasher.finish()
}
