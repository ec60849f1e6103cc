//! # Canonical-Root Engine
//!
//! Session keys derived from a deterministic representative atom per
//! component, selected by priority tier and lexicographic order. The key
//! is stable while the component's highest-priority tier keeps the same
//! lexicographic winner, so growth inside one tier rarely changes it.
//!
//! Lookup and link are O(α(n)): the engine maintains a `root → canonical`
//! map incrementally alongside the union-find instead of scanning the
//! component on every query.

use crate::cache::KeyCache;
use crate::config::{ConfigError, PriorityTable};
use crate::dsu::UnionFind;
use crate::engine::SessionEngine;
use crate::model::{Atom, EngineStats, Identifiers, SessionKey};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use tracing::debug;

/// Union-find plus the per-root canonical representative.
///
/// Both live under one lock: the canonical map is only valid relative to
/// the root set of the union-find it was built against.
#[derive(Debug, Default)]
struct GraphState {
    uf: UnionFind,
    canonical: FxHashMap<Atom, Atom>,
}

impl GraphState {
    /// `find` that seeds the canonical entry for fresh singletons.
    fn find_tracked(&mut self, atom: &Atom) -> Atom {
        let fresh = !self.uf.contains(atom);
        let root = self.uf.find(atom);
        if fresh {
            // A fresh singleton is its own root and its own representative.
            self.canonical.insert(root.clone(), atom.clone());
        }
        root
    }

    /// `union` that carries the winning representative onto the merged root.
    fn union_tracked(&mut self, a: &Atom, b: &Atom, priorities: &PriorityTable) -> Atom {
        let root_a = self.find_tracked(a);
        let root_b = self.find_tracked(b);
        if root_a == root_b {
            return root_a;
        }
        let best_a = self.canonical.remove(&root_a).unwrap_or_else(|| root_a.clone());
        let best_b = self.canonical.remove(&root_b).unwrap_or_else(|| root_b.clone());
        let root = self.uf.union(&root_a, &root_b);
        let winner = match priorities.compare(&best_a, &best_b) {
            Ordering::Greater => best_b,
            _ => best_a,
        };
        self.canonical.insert(root.clone(), winner);
        root
    }

    /// Representative for a root, recovering by component scan when the
    /// incremental map has no entry.
    fn canonical_for(&mut self, root: &Atom, priorities: &PriorityTable) -> Atom {
        if let Some(canonical) = self.canonical.get(root) {
            return canonical.clone();
        }
        debug!(root = %root, "recovering canonical representative by component scan");
        let members = self.uf.component_members(root);
        let best = priorities
            .select(members.iter())
            .cloned()
            .unwrap_or_else(|| root.clone());
        self.canonical.insert(root.clone(), best.clone());
        best
    }
}

/// Session-key engine backed by union-find with canonical root selection.
///
/// The recommended production engine: link stays O(α(n)) by invalidating
/// only the two linked atoms and letting the verify-on-read step of
/// [`get_session_key`](Self::get_session_key) correct any other member's
/// stale cache entry at its next lookup.
pub struct CanonicalEngine {
    state: RwLock<GraphState>,
    cache: Mutex<KeyCache>,
    priorities: PriorityTable,
}

impl CanonicalEngine {
    /// Engine with the default priority table.
    pub fn new(cache_capacity: usize) -> Result<Self, ConfigError> {
        Self::with_priorities(cache_capacity, PriorityTable::default())
    }

    /// Engine with a custom priority table.
    pub fn with_priorities(
        cache_capacity: usize,
        priorities: PriorityTable,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            state: RwLock::new(GraphState::default()),
            cache: Mutex::new(KeyCache::new(cache_capacity)?),
            priorities,
        })
    }

    /// The configured priority table.
    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    /// Stable session key for the given identifiers.
    ///
    /// All provided atoms are unioned *before* the cache is consulted, so
    /// every identifier in the input ends up linked even on a cache hit.
    /// A cached key for the first atom is trusted only when it equals the
    /// freshly derived canonical key; a stale entry is overwritten.
    pub fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        let atoms = ids.normalize();
        let Some(first) = atoms.first() else {
            return SessionKey::anonymous();
        };

        let canonical = {
            let mut state = self.state.write();
            let mut root = state.find_tracked(first);
            for other in &atoms[1..] {
                root = state.union_tracked(&root, other, &self.priorities);
            }
            state.canonical_for(&root, &self.priorities)
        };
        let fresh = SessionKey::derive(canonical.as_str());

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(first) {
            if cached == fresh {
                for other in &atoms[1..] {
                    cache.put(other.clone(), fresh.clone());
                }
                return fresh;
            }
            debug!(atom = %first, "stale cache entry corrected on lookup");
        }
        for atom in &atoms {
            cache.put(atom.clone(), fresh.clone());
        }
        fresh
    }

    /// Link two serialized atoms. Empty strings are no-ops; linking atoms
    /// that are already connected changes nothing.
    ///
    /// Invalidates the cache entries of the two endpoints only. Other
    /// members of the merged component may be served a stale key until
    /// their next lookup rewrites it.
    pub fn link(&self, a: &str, b: &str) {
        if a.is_empty() || b.is_empty() {
            return;
        }
        let a = Atom::from(a);
        let b = Atom::from(b);

        {
            let mut state = self.state.write();
            let root_a = state.find_tracked(&a);
            let root_b = state.find_tracked(&b);
            if root_a == root_b {
                return;
            }
            state.union_tracked(&root_a, &root_b, &self.priorities);
        }

        let mut cache = self.cache.lock();
        cache.remove(&a);
        cache.remove(&b);
    }

    /// Whether two atoms share a component. Reflexive for any non-empty
    /// atom; false for empty arguments or atoms the graph has never seen.
    pub fn are_linked(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        let a = Atom::from(a);
        let b = Atom::from(b);
        let mut state = self.state.write();
        if !state.uf.contains(&a) || !state.uf.contains(&b) {
            return false;
        }
        state.uf.connected(&a, &b)
    }

    /// Component size for an atom; 0 for empty or unknown atoms.
    pub fn session_size(&self, atom: &str) -> usize {
        if atom.is_empty() {
            return 0;
        }
        let atom = Atom::from(atom);
        let mut state = self.state.write();
        if !state.uf.contains(&atom) {
            return 0;
        }
        state.uf.component_size(&atom)
    }

    /// Every session with its sorted members. O(N); debugging only.
    pub fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        let mut state = self.state.write();
        let components = state.uf.all_components();
        let mut sessions = HashMap::with_capacity(components.len());
        for (root, mut members) in components {
            let canonical = state.canonical_for(&root, &self.priorities);
            members.sort();
            sessions.insert(SessionKey::derive(canonical.as_str()), members);
        }
        sessions
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> EngineStats {
        let (total_atoms, total_sessions) = {
            let mut state = self.state.write();
            (state.uf.len(), state.uf.all_components().len())
        };
        EngineStats {
            total_atoms,
            total_sessions,
            cache_size: self.cache.lock().len(),
        }
    }

    /// Drop cached keys; the identity graph is untouched.
    pub fn clear_cache(&self) {
        self.cache.lock().purge();
    }

    /// Drop the graph, the canonical map, and the cache.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.uf.clear();
        state.canonical.clear();
        self.cache.lock().purge();
    }

    fn peek_key(&self, atom: &Atom) -> Option<SessionKey> {
        self.cache.lock().peek(atom)
    }

    fn current_key(&self, atom: &Atom) -> SessionKey {
        let mut state = self.state.write();
        if !state.uf.contains(atom) {
            return SessionKey::derive(atom.as_str());
        }
        let root = state.uf.find(atom);
        let canonical = state.canonical_for(&root, &self.priorities);
        SessionKey::derive(canonical.as_str())
    }
}

impl SessionEngine for CanonicalEngine {
    fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        CanonicalEngine::get_session_key(self, ids)
    }

    fn link(&self, a: &str, b: &str) {
        CanonicalEngine::link(self, a, b)
    }

    fn are_linked(&self, a: &str, b: &str) -> bool {
        CanonicalEngine::are_linked(self, a, b)
    }

    fn session_size(&self, atom: &str) -> usize {
        CanonicalEngine::session_size(self, atom)
    }

    fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        CanonicalEngine::all_sessions(self)
    }

    fn stats(&self) -> EngineStats {
        CanonicalEngine::stats(self)
    }

    fn clear_cache(&self) {
        CanonicalEngine::clear_cache(self)
    }

    fn clear(&self) {
        CanonicalEngine::clear(self)
    }

    fn peek_key(&self, atom: &Atom) -> Option<SessionKey> {
        CanonicalEngine::peek_key(self, atom)
    }

    fn current_key(&self, atom: &Atom) -> SessionKey {
        CanonicalEngine::current_key(self, atom)
    }
}
