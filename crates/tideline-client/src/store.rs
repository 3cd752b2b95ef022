//! The materialized timeline: a versioned, insertion-ordered item collection.
//!
//! `order` reflects first-insertion order and is never reordered by an
//! update; only add, remove, and rekey touch it. Every operation is a total
//! function — unknown ids are no-ops, stale versions are discards, nothing
//! here can fail.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tideline_types::Item;
use tracing::trace;

/// What a merge did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merge {
    /// The item did not exist; it was appended to the timeline.
    Inserted,
    /// The item existed; scalar fields and props were merged.
    Updated,
    /// The incoming version was behind the stored one; the whole update
    /// was discarded (a duplicate or out-of-order delivery).
    Stale,
}

/// The materialized, versioned timeline for one target.
#[derive(Debug, Default)]
pub struct TimelineStore {
    by_id: HashMap<String, Item>,
    /// Item ids in first-insertion order.
    order: Vec<String>,
    /// Bumped on every state-changing mutation, for cheap change detection.
    revision: u64,
}

/// Shared handle to a [`TimelineStore`].
///
/// Mutation happens only on the session driver task; the lock exists so a
/// render thread can take a consistent read.
pub type SharedTimeline = Arc<Mutex<TimelineStore>>;

impl TimelineStore {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty shared timeline.
    pub fn shared() -> SharedTimeline {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Insert an item at the end of the timeline. No-op if the id exists.
    ///
    /// Returns `true` if the item was inserted.
    pub fn add(&mut self, item: Item) -> bool {
        if self.by_id.contains_key(&item.id) {
            return false;
        }
        self.order.push(item.id.clone());
        self.by_id.insert(item.id.clone(), item);
        self.revision += 1;
        true
    }

    /// Merge an item into the timeline.
    ///
    /// Absent id → insert. Present id → version-gated merge: a nonzero
    /// incoming version below the stored one discards the entire update; a
    /// nonzero version at or above it replaces the scalars and
    /// shallow-merges `props`; a zero (unversioned) incoming merge touches
    /// props and `updated_at` only. `kind` and `created_at` are fixed at
    /// first insertion.
    pub fn upsert(&mut self, item: Item) -> Merge {
        let Some(existing) = self.by_id.get_mut(&item.id) else {
            self.add(item);
            return Merge::Inserted;
        };

        if item.version != 0 && item.version < existing.version {
            trace!(
                id = %item.id,
                incoming = item.version,
                stored = existing.version,
                "discarding stale update"
            );
            return Merge::Stale;
        }

        if item.version != 0 {
            existing.version = item.version;
        }
        if item.updated_at.is_some() {
            existing.updated_at = item.updated_at;
        }
        for (key, value) in item.props {
            existing.props.insert(key, value);
        }
        self.revision += 1;
        Merge::Updated
    }

    /// Remove an item from the timeline. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Item> {
        let removed = self.by_id.remove(id)?;
        self.order.retain(|oid| oid != id);
        self.revision += 1;
        Some(removed)
    }

    /// Reconcile a provisional id with a confirmed one, preserving the
    /// provisional item's timeline position.
    ///
    /// If `to` already exists its fields win on conflict and its old
    /// position is dropped; props shallow-merge either way. Unknown `from`
    /// is a no-op. Returns `true` if anything changed.
    pub fn rekey(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        let Some(mut moved) = self.by_id.remove(from) else {
            return false;
        };
        moved.id = to.to_string();

        if let Some(mut confirmed) = self.by_id.remove(to) {
            // The confirmed item wins; the provisional one only contributes
            // props the server never saw.
            let mut props = moved.props;
            for (key, value) in std::mem::take(&mut confirmed.props) {
                props.insert(key, value);
            }
            confirmed.props = props;
            moved = confirmed;
            self.order.retain(|oid| oid != to);
        }

        if let Some(pos) = self.order.iter().position(|oid| oid == from) {
            self.order[pos] = to.to_string();
        }
        self.by_id.insert(to.to_string(), moved);
        self.revision += 1;
        true
    }

    /// Reset to empty.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.order.clear();
        self.revision += 1;
    }

    /// Get an item by id.
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.by_id.get(id)
    }

    /// All items in first-insertion order — the render-ready list.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Item ids in first-insertion order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Number of items in the timeline.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Mutation counter — changes iff the store changed.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
