//! # Key Cache
//!
//! Bounded LRU mapping each atom to its most recently observed session key.
//! The fast path for hot lookups; entries may go stale after a link and are
//! corrected at the owning engine's next lookup.

use crate::config::ConfigError;
use crate::model::{Atom, SessionKey};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded atom → session-key cache with strict LRU eviction on insertion
/// and get-hit.
pub struct KeyCache {
    entries: LruCache<Atom, SessionKey>,
}

impl KeyCache {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is rejected with [`ConfigError::InvalidCacheCapacity`].
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::InvalidCacheCapacity)?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }

    /// Cached key for `atom`, promoting the entry to most recently used.
    pub fn get(&mut self, atom: &Atom) -> Option<SessionKey> {
        self.entries.get(atom).cloned()
    }

    /// Cached key without touching recency. Used by the history wrapper to
    /// observe previous keys without perturbing eviction order.
    pub fn peek(&self, atom: &Atom) -> Option<SessionKey> {
        self.entries.peek(atom).cloned()
    }

    /// Insert or overwrite, evicting the least-recently-used entry when at
    /// capacity.
    pub fn put(&mut self, atom: Atom, key: SessionKey) {
        self.entries.put(atom, key);
    }

    /// Drop one entry if present.
    pub fn remove(&mut self, atom: &Atom) {
        self.entries.pop(atom);
    }

    /// Drop every entry, keeping the capacity.
    pub fn purge(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
