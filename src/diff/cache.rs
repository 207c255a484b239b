// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use xxhash_rust::xxh3::xxh3_128;

use crate::common::ResourceId;
use crate::{Error, Result};

use super::ResourceDiffResult;

/// Identifies one comparison by the content of both sides.
///
/// Derived from bytes, never from paths or timestamps: two different files
/// with identical content share the key. The lengths ride along purely to
/// catch hash collisions, which are an invariant violation here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub left_hash: u128,
    pub left_len: usize,
    pub right_hash: u128,
    pub right_len: usize,
}

impl CacheKey {
    pub fn for_pair(left: &[u8], right: &[u8]) -> Self {
        Self {
            left_hash: xxh3_128(left),
            left_len: left.len(),
            right_hash: xxh3_128(right),
            right_len: right.len(),
        }
    }
}

struct Slot {
    left_len: usize,
    right_len: usize,
    cell: Arc<OnceLock<ResourceDiffResult>>,
}

/// A content-addressed memo of prior comparison outcomes.
///
/// Owned by the caller's session and passed by reference into the engine;
/// there is no process-lifetime state and no implicit expiry. Safe for
/// concurrent use: a miss claims its key under a short map lock, then
/// computes outside it, so each key is computed exactly once.
#[derive(Default)]
pub struct DiffCache {
    slots: Mutex<HashMap<(u128, u128), Slot>>,
}

impl DiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `key`, computing and publishing it on
    /// first sight. `compute` runs at most once per key across all threads.
    ///
    /// A slot whose recorded lengths disagree with `key` means two different
    /// payloads hashed identically; that is a hashing bug and is fatal.
    pub fn get_or_compute(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> ResourceDiffResult,
    ) -> Result<ResourceDiffResult> {
        let cell = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry((key.left_hash, key.right_hash)).or_insert_with(|| Slot {
                left_len: key.left_len,
                right_len: key.right_len,
                cell: Arc::new(OnceLock::new()),
            });

            if slot.left_len != key.left_len || slot.right_len != key.right_len {
                return Err(Error::CacheKeyCollision { key: key.left_hash });
            }

            slot.cell.clone()
        };

        Ok(cell.get_or_init(compute).clone())
    }

    /// Drops the entry for `key`, if present.
    pub fn invalidate(&self, key: &CacheKey) {
        self.slots
            .lock()
            .unwrap()
            .remove(&(key.left_hash, key.right_hash));
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One resource field that consumes a string reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrRefReference {
    pub id: ResourceId,
    /// The field inside the resource, as named by its adapter.
    pub field: String,
}

/// Maps each string-reference index to every resource field consuming it,
/// so a string-table diff can enumerate its dependents without re-scanning
/// the installation.
///
/// Built once per installation via
/// [`super::DiffEngine::build_strref_cache`]; it never refreshes itself —
/// call [`StrRefReferenceCache::rebuild`] when the installation changed.
#[derive(Default)]
pub struct StrRefReferenceCache {
    references: HashMap<u32, Vec<StrRefReference>>,
}

impl StrRefReferenceCache {
    pub(super) fn from_references(references: HashMap<u32, Vec<StrRefReference>>) -> Self {
        Self { references }
    }

    /// Every field referencing `strref`, in canonical resource order.
    pub fn references(&self, strref: u32) -> &[StrRefReference] {
        self.references
            .get(&strref)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    /// Replaces this cache's contents with a fresh scan.
    pub fn rebuild(
        &mut self,
        engine: &super::DiffEngine,
        installation: &crate::installation::Installation,
    ) {
        *self = engine.build_strref_cache(installation);
    }
}
