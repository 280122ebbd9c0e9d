//! Keyed, concurrently readable collection of shared entities.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::patch::{AppliedDiff, Patch};

/// An entity shared between the store and its readers.
///
/// Writers take the lock for the whole patch, so readers observe an entity
/// either before or after an update, never halfway through one.
pub type Shared<V> = Arc<RwLock<V>>;

/// Result of [`Store::upsert`].
pub struct Upserted<V: Patch> {
    /// The live entry.
    pub entry: Shared<V>,
    /// Snapshot taken before patching (only when requested and the entity
    /// already existed).
    pub old: Option<V::Snapshot>,
    /// Whether the entity was created by this call.
    pub created: bool,
    /// Fields changed by the patch.
    pub diff: AppliedDiff,
}

/// Keyed collection of entities.
#[derive(Debug)]
pub struct Store<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Shared<V>>,
}

impl<K, V> Default for Store<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Copy,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity.
    pub fn get(&self, id: &K) -> Option<Shared<V>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert (or replace) an entity.
    pub fn set(&self, id: K, value: V) -> Shared<V> {
        let shared = Arc::new(RwLock::new(value));
        let _ = self.entries.insert(id, Arc::clone(&shared));
        shared
    }

    /// Remove an entity, returning it if it was present.
    pub fn delete(&self, id: &K) -> Option<Shared<V>> {
        self.entries.remove(id).map(|(_, value)| value)
    }

    /// Number of entities.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, in no particular order.
    pub fn ids(&self) -> Vec<K> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// All entries, in no particular order.
    pub fn values(&self) -> Vec<Shared<V>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Keep only the entries whose key satisfies `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Copy of an entity's current value.
    pub fn cloned(&self, id: &K) -> Option<V>
    where
        V: Clone,
    {
        self.get(id).map(|shared| shared.read().clone())
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Copy,
    V: Patch,
{
    /// Patch the entity at `id`, creating it with `init` first if absent.
    ///
    /// A new entity is fully patched before it becomes visible. With
    /// `keep_old`, an existing entity is snapshotted under the same write lock
    /// that applies the patch.
    pub fn upsert(
        &self,
        id: K,
        fields: &Map<String, Value>,
        keep_old: bool,
        init: impl FnOnce() -> V,
    ) -> Upserted<V> {
        let existing = match self.entries.entry(id) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let mut value = init();
                let diff = value.patch(fields);
                let entry = Arc::new(RwLock::new(value));
                let _ = vacant.insert(Arc::clone(&entry));
                return Upserted {
                    entry,
                    old: None,
                    created: true,
                    diff,
                };
            }
        };

        let (old, diff) = {
            let mut guard = existing.write();
            let old = keep_old.then(|| guard.snapshot());
            (old, guard.patch(fields))
        };
        Upserted {
            entry: existing,
            old,
            created: false,
            diff,
        }
    }
}
