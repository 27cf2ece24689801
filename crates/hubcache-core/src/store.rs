//! In-memory entity store.
//!
//! [`EntityStore`] maps [`EntityKey`]s to their last-known [`Entity`]. It is
//! the single shared mutable resource of a client session: every other
//! component reads and writes through it, and it is passed explicitly rather
//! than living in a global.
//!
//! # Write semantics
//!
//! - Writes are field-level merges. Fields missing from a write are kept;
//!   fields present replace the stored value wholesale (no deep diff below
//!   the first level).
//! - A write that creates the entity or changes at least one field takes
//!   the next store clock value as the entity's [`Version`] and notifies the
//!   observers of that key. A write that changes nothing is silent.
//! - Entities are never evicted. [`EntityStore::clear`] drops everything at
//!   session teardown.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::CacheError;
use crate::model::{Entity, EntityKey, Fields, Version};

/// Handle returned by [`EntityStore::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&EntityKey, &Entity)>;

/// Normalized entity cache for one client session.
pub struct EntityStore {
    entities: HashMap<EntityKey, Entity>,
    clock: u64,
    observers: BTreeMap<ObserverId, (EntityKey, Observer)>,
    next_observer: u64,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.entities.len())
            .field("clock", &self.clock)
            .field("observers", &self.observers.len())
            .field("next_observer", &self.next_observer)
            .finish()
    }
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            clock: 0,
            observers: BTreeMap::new(),
            next_observer: 0,
        }
    }

    /// Read the entity cached under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if nothing is cached under `key`.
    pub fn read(&self, key: &EntityKey) -> Result<&Entity, CacheError> {
        self.entities
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.clone()))
    }

    /// Like [`read`](Self::read) but without the error.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Current version of `key`, or `None` if it is not cached.
    #[must_use]
    pub fn version(&self, key: &EntityKey) -> Option<Version> {
        self.entities.get(key).map(Entity::version)
    }

    /// Merge `partial` into the entity under `key`, creating it if absent.
    ///
    /// Returns the entity's version after the write.
    pub fn write(&mut self, key: &EntityKey, partial: Fields) -> Version {
        let created = !self.entities.contains_key(key);
        let entity = self.entities.entry(key.clone()).or_default();
        let changed = entity.merge_fields(partial);

        if !(created || changed) {
            tracing::trace!(%key, "write changed nothing");
            return entity.version();
        }

        self.clock += 1;
        let version = Version::new(self.clock);
        entity.set_version(version);
        tracing::debug!(%key, %version, created, "entity written");

        self.notify(key);
        version
    }

    /// Write only if the entity is still at `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if `key` is not cached and
    /// [`CacheError::VersionConflict`] if another write landed since
    /// `expected` was observed. Nothing is written in either case.
    pub fn write_if_version(
        &mut self,
        key: &EntityKey,
        partial: Fields,
        expected: Version,
    ) -> Result<Version, CacheError> {
        let actual = self.read(key)?.version();
        if actual != expected {
            return Err(CacheError::VersionConflict {
                key: key.clone(),
                expected,
                actual,
            });
        }
        Ok(self.write(key, partial))
    }

    /// Register `callback` to run after every effective write to `key`.
    pub fn observe<F>(&mut self, key: EntityKey, callback: F) -> ObserverId
    where
        F: FnMut(&EntityKey, &Entity) + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.insert(id, (key, Box::new(callback)));
        id
    }

    /// Remove an observer. Returns `false` if it was already gone.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Cached keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&EntityKey> {
        let mut keys: Vec<_> = self.entities.keys().collect();
        keys.sort();
        keys
    }

    /// Drop every entity and observer (logout, navigation reset).
    ///
    /// The clock keeps running so versions stay monotonic across a clear.
    pub fn clear(&mut self) {
        tracing::debug!(entities = self.entities.len(), "clearing entity store");
        self.entities.clear();
        self.observers.clear();
    }

    fn notify(&mut self, key: &EntityKey) {
        let Some(entity) = self.entities.get(key) else {
            return;
        };
        for (watched, observer) in self.observers.values_mut() {
            if watched == key {
                observer(key, entity);
            }
        }
    }
}
