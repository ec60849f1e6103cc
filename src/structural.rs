//! # Structural-Hash Engine
//!
//! Session keys derived from a canonical hash over the connected
//! component's graph shape, adapted from the two-stage N-degree hashing of
//! RDF Dataset Canonicalization (RDFC-1.0).
//!
//! The key is stable only while the component's structure is unchanged:
//! any new edge re-fingerprints the whole component. Link is therefore
//! O(component_size), which is why the canonical-root engine is the
//! recommended production engine.

use crate::cache::KeyCache;
use crate::config::ConfigError;
use crate::dsu::UnionFind;
use crate::engine::SessionEngine;
use crate::model::{Atom, EngineStats, Identifiers, SessionKey};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::debug;

/// Bounded breadth-first exploration depth for collision disambiguation.
const N_DEGREE_MAX_DEPTH: usize = 3;

/// Undirected adjacency plus a union-find for O(α) connectivity answers.
///
/// The adjacency carries the multigraph shape the fingerprint is computed
/// over; the union-find tracks the same components.
#[derive(Debug, Default)]
struct GraphState {
    edges: FxHashMap<Atom, FxHashSet<Atom>>,
    uf: UnionFind,
}

impl GraphState {
    fn ensure_node(&mut self, atom: &Atom) {
        self.edges.entry(atom.clone()).or_default();
        self.uf.find(atom);
    }

    fn add_edge(&mut self, a: &Atom, b: &Atom) {
        self.ensure_node(a);
        self.ensure_node(b);
        if a == b {
            return;
        }
        self.edges.get_mut(a).expect("node ensured").insert(b.clone());
        self.edges.get_mut(b).expect("node ensured").insert(a.clone());
        self.uf.union(a, b);
    }

    /// Connected component containing `start`, via BFS over the adjacency.
    /// An unknown atom yields a singleton without being inserted.
    fn component(&self, start: &Atom) -> FxHashSet<Atom> {
        let mut visited = FxHashSet::default();
        visited.insert(start.clone());
        if !self.edges.contains_key(start) {
            return visited;
        }
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.edges.get(&current) {
                for neighbor in neighbors {
                    if visited.insert(neighbor.clone()) {
                        queue.push_back(neighbor.clone());
                    }
                }
            }
        }
        visited
    }
}

/// First 8 bytes of SHA-256 in lowercase hex.
fn short_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(&digest[..8])
}

/// Stage 1: hash of the node's own name plus its sorted in-component
/// neighbors. Node identity is part of the pre-image on purpose:
/// identifier names anchor the hash, they are not arbitrary labels.
fn first_degree_hash(state: &GraphState, node: &Atom, component: &FxHashSet<Atom>) -> String {
    let mut neighbors: Vec<&str> = state
        .edges
        .get(node)
        .map(|set| {
            set.iter()
                .filter(|neighbor| component.contains(*neighbor))
                .map(Atom::as_str)
                .collect()
        })
        .unwrap_or_default();
    neighbors.sort_unstable();
    short_hex(&format!("{}:{}", node.as_str(), neighbors.join(",")))
}

/// Stage 2: multi-hop path encoding for nodes whose first-degree hashes
/// collide. BFS up to `max_depth`, emitting one path signature per visited
/// node built from the sorted first-degree hashes of its in-component
/// neighbors.
fn n_degree_hash(
    state: &GraphState,
    node: &Atom,
    component: &FxHashSet<Atom>,
    first_degree: &FxHashMap<Atom, String>,
    max_depth: usize,
) -> String {
    let mut visited: FxHashMap<Atom, usize> = FxHashMap::default();
    visited.insert(node.clone(), 0);
    let mut paths = Vec::new();
    let mut queue = VecDeque::from([(node.clone(), 0usize)]);

    while let Some((current, depth)) = queue.pop_front() {
        if depth > max_depth {
            continue;
        }

        let in_component: Vec<&Atom> = state
            .edges
            .get(&current)
            .map(|set| set.iter().filter(|n| component.contains(*n)).collect())
            .unwrap_or_default();

        let mut neighbor_sigs: Vec<&str> = in_component
            .iter()
            .filter_map(|neighbor| first_degree.get(*neighbor).map(String::as_str))
            .collect();
        neighbor_sigs.sort_unstable();
        paths.push(format!(
            "{}@{}:{}",
            current.as_str(),
            depth,
            neighbor_sigs.join(",")
        ));

        for neighbor in in_component {
            let next_depth = depth + 1;
            let revisit = match visited.get(neighbor) {
                None => true,
                Some(&seen) => next_depth < seen,
            };
            if revisit {
                visited.insert(neighbor.clone(), next_depth);
                queue.push_back((neighbor.clone(), next_depth));
            }
        }
    }

    paths.sort_unstable();
    short_hex(&paths.join("|"))
}

/// Stage 3: the component fingerprint: sorted final per-node hashes joined
/// with `"|"`, hashed, `"sess_"`-prefixed.
fn component_fingerprint(state: &GraphState, component: &FxHashSet<Atom>) -> SessionKey {
    if component.is_empty() {
        return SessionKey::empty_component();
    }

    let first_degree: FxHashMap<Atom, String> = component
        .iter()
        .map(|node| (node.clone(), first_degree_hash(state, node, component)))
        .collect();

    let mut groups: HashMap<&String, Vec<&Atom>> = HashMap::new();
    for (node, sig) in &first_degree {
        groups.entry(sig).or_default().push(node);
    }

    let mut final_hashes = Vec::with_capacity(component.len());
    for (sig, nodes) in groups {
        if nodes.len() == 1 {
            final_hashes.push(sig.clone());
        } else {
            for node in nodes {
                final_hashes.push(n_degree_hash(
                    state,
                    node,
                    component,
                    &first_degree,
                    N_DEGREE_MAX_DEPTH,
                ));
            }
        }
    }

    final_hashes.sort_unstable();
    SessionKey::derive(&final_hashes.join("|"))
}

/// Session-key engine backed by graph canonicalization.
///
/// All atoms of a component share one fingerprint, computed once and
/// served from a per-atom fingerprint cache until the component's
/// structure changes.
pub struct StructuralEngine {
    state: RwLock<GraphState>,
    cache: Mutex<KeyCache>,
    /// Component fingerprint per atom. Swept for every member of a merged
    /// component on link; independent of any canonical-root engine cache.
    fingerprints: Mutex<FxHashMap<Atom, SessionKey>>,
}

impl StructuralEngine {
    pub fn new(cache_capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            state: RwLock::new(GraphState::default()),
            cache: Mutex::new(KeyCache::new(cache_capacity)?),
            fingerprints: Mutex::new(FxHashMap::default()),
        })
    }

    /// Session key for the given identifiers.
    ///
    /// Fast path: when every query atom has a cached key and all cached
    /// keys agree, that key is returned as-is (stale-but-non-contradictory
    /// values are tolerated). Otherwise the query atoms are linked as a
    /// clique, the component is fingerprinted, and the key is written back
    /// for every member.
    pub fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        let atoms = ids.normalize();
        if atoms.is_empty() {
            return SessionKey::anonymous();
        }

        {
            let mut cache = self.cache.lock();
            let mut agreed: Option<SessionKey> = None;
            let mut complete = true;
            for atom in &atoms {
                let Some(key) = cache.get(atom) else {
                    complete = false;
                    break;
                };
                match &agreed {
                    None => agreed = Some(key),
                    Some(prev) if *prev == key => {}
                    Some(_) => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                if let Some(key) = agreed {
                    return key;
                }
            }
        }

        let mut state = self.state.write();
        state.ensure_node(&atoms[0]);
        for i in 0..atoms.len() {
            for j in (i + 1)..atoms.len() {
                state.add_edge(&atoms[i], &atoms[j]);
            }
        }
        let component = state.component(&atoms[0]);
        let key = self.cached_or_compute(&state, &component);

        // Written while still holding the graph lock: a concurrent link
        // must observe either no entries or entries for the structure it is
        // about to sweep, never entries newer than its own sweep.
        let mut cache = self.cache.lock();
        for atom in &component {
            cache.put(atom.clone(), key.clone());
        }
        key
    }

    /// Fingerprint for a component, served from the per-atom fingerprint
    /// cache when any member still has an entry.
    fn cached_or_compute(&self, state: &GraphState, component: &FxHashSet<Atom>) -> SessionKey {
        let mut fingerprints = self.fingerprints.lock();
        if let Some(sample) = component.iter().next() {
            if let Some(key) = fingerprints.get(sample) {
                return key.clone();
            }
        }
        debug!(size = component.len(), "fingerprinting component");
        let key = component_fingerprint(state, component);
        for atom in component {
            fingerprints.insert(atom.clone(), key.clone());
        }
        key
    }

    /// Link two serialized atoms. Empty strings are no-ops; linking atoms
    /// that are already connected changes nothing.
    ///
    /// Both the key cache and the fingerprint cache are swept for every
    /// atom in the merged component, making link O(component_size).
    pub fn link(&self, a: &str, b: &str) {
        if a.is_empty() || b.is_empty() {
            return;
        }
        let a = Atom::from(a);
        let b = Atom::from(b);

        let component = {
            let mut state = self.state.write();
            if state.uf.contains(&a) && state.uf.contains(&b) && state.uf.connected(&a, &b) {
                return;
            }
            state.add_edge(&a, &b);
            state.component(&a)
        };

        let mut fingerprints = self.fingerprints.lock();
        for atom in &component {
            fingerprints.remove(atom);
        }
        drop(fingerprints);

        let mut cache = self.cache.lock();
        for atom in &component {
            cache.remove(atom);
        }
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
        let state = self.state.read();
        if !state.edges.contains_key(&atom) {
            return 0;
        }
        state.component(&atom).len()
    }

    /// Every session with its sorted members. O(V + E); debugging only.
    pub fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        let state = self.state.read();
        let mut visited: FxHashSet<Atom> = FxHashSet::default();
        let mut sessions = HashMap::new();
        let nodes: Vec<Atom> = state.edges.keys().cloned().collect();
        for node in nodes {
            if visited.contains(&node) {
                continue;
            }
            let component = state.component(&node);
            visited.extend(component.iter().cloned());

            let key = self.cached_or_compute(&state, &component);
            let mut members: Vec<Atom> = component.into_iter().collect();
            members.sort();
            sessions.insert(key, members);
        }
        sessions
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> EngineStats {
        let (total_atoms, total_sessions) = {
            let state = self.state.read();
            let mut visited: FxHashSet<Atom> = FxHashSet::default();
            let mut components = 0;
            for node in state.edges.keys() {
                if visited.contains(node) {
                    continue;
                }
                visited.extend(state.component(node));
                components += 1;
            }
            (state.edges.len(), components)
        };
        EngineStats {
            total_atoms,
            total_sessions,
            cache_size: self.cache.lock().len(),
        }
    }

    /// Drop both caches; the identity graph is untouched.
    pub fn clear_cache(&self) {
        self.cache.lock().purge();
        self.fingerprints.lock().clear();
    }

    /// Drop the graph and both caches.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.edges.clear();
        state.uf.clear();
        drop(state);
        self.clear_cache();
    }

    fn peek_key(&self, atom: &Atom) -> Option<SessionKey> {
        self.cache.lock().peek(atom)
    }

    fn current_key(&self, atom: &Atom) -> SessionKey {
        let state = self.state.read();
        if let Some(key) = self.fingerprints.lock().get(atom) {
            return key.clone();
        }
        let component = state.component(atom);
        component_fingerprint(&state, &component)
    }
}

impl SessionEngine for StructuralEngine {
    fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        StructuralEngine::get_session_key(self, ids)
    }

    fn link(&self, a: &str, b: &str) {
        StructuralEngine::link(self, a, b)
    }

    fn are_linked(&self, a: &str, b: &str) -> bool {
        StructuralEngine::are_linked(self, a, b)
    }

    fn session_size(&self, atom: &str) -> usize {
        StructuralEngine::session_size(self, atom)
    }

    fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        StructuralEngine::all_sessions(self)
    }

    fn stats(&self) -> EngineStats {
        StructuralEngine::stats(self)
    }

    fn clear_cache(&self) {
        StructuralEngine::clear_cache(self)
    }

    fn clear(&self) {
        StructuralEngine::clear(self)
    }

    fn peek_key(&self, atom: &Atom) -> Option<SessionKey> {
        StructuralEngine::peek_key(self, atom)
    }

    fn current_key(&self, atom: &Atom) -> SessionKey {
        StructuralEngine::current_key(self, atom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TAG_COOKIE, TAG_UID};

    fn atom(s: &str) -> Atom {
        Atom::from(s)
    }

    #[test]
    fn construction_rejects_zero_capacity() {
        assert!(matches!(
            StructuralEngine::new(0),
            Err(ConfigError::InvalidCacheCapacity)
        ));
    }

    #[test]
    fn anonymous_for_empty_input() {
        let engine = StructuralEngine::new(16).unwrap();
        assert_eq!(
            engine.get_session_key(&Identifiers::new()),
            SessionKey::anonymous()
        );
    }

    #[test]
    fn all_component_members_share_the_key() {
        let engine = StructuralEngine::new(16).unwrap();
        engine.link("cookie:abc", "uid:42");
        engine.link("uid:42", "jwt:tok");

        let k1 = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "abc"));
        let k2 = engine.get_session_key(&Identifiers::new().with(TAG_UID, "42"));
        let k3 = engine.get_session_key(&Identifiers::new().with("jwt", "tok"));
        assert_eq!(k1, k2);
        assert_eq!(k2, k3);
    }

    #[test]
    fn key_changes_when_structure_grows() {
        let engine = StructuralEngine::new(16).unwrap();
        let cookie = Identifiers::new().with(TAG_COOKIE, "abc");
        let before = engine.get_session_key(&cookie);
        engine.link("cookie:abc", "uid:42");
        let after = engine.get_session_key(&cookie);
        assert_ne!(before, after);
    }

    #[test]
    fn link_sweeps_every_member_of_the_merged_component() {
        let engine = StructuralEngine::new(16).unwrap();
        engine.link("cookie:a", "uid:1");
        // Populate the caches for the whole component.
        let stale = engine.get_session_key(&Identifiers::new().with(TAG_UID, "1"));

        // cookie:a is not an endpoint of this link, but its cached key must
        // not survive the merge.
        engine.link("uid:1", "device:d");
        let fresh = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "a"));
        assert_ne!(stale, fresh);
        assert_eq!(
            fresh,
            engine.get_session_key(&Identifiers::new().with("device", "d"))
        );
    }

    #[test]
    fn multi_atom_lookup_links_all_atoms() {
        let engine = StructuralEngine::new(16).unwrap();
        let ids = Identifiers::new()
            .with(TAG_COOKIE, "c")
            .with(TAG_UID, "u")
            .with("device", "d");
        engine.get_session_key(&ids);
        assert!(engine.are_linked("cookie:c", "device:d"));
        assert_eq!(engine.session_size("uid:u"), 3);
    }

    #[test]
    fn fingerprint_depends_only_on_structure() {
        let build_a = StructuralEngine::new(16).unwrap();
        build_a.link("cookie:A", "uid:1");
        build_a.link("email:x", "device:D");
        build_a.link("uid:1", "email:x");

        let build_b = StructuralEngine::new(16).unwrap();
        build_b.link("device:D", "email:x");
        build_b.link("email:x", "uid:1");
        build_b.link("uid:1", "cookie:A");

        let build_c = StructuralEngine::new(16).unwrap();
        build_c.link("uid:1", "email:x");
        build_c.link("email:x", "device:D");
        build_c.link("cookie:A", "uid:1");

        // Three insertion orders of the same edge set, one fingerprint.
        let key_a = build_a.get_session_key(&Identifiers::new().with(TAG_COOKIE, "A"));
        let key_b = build_b.get_session_key(&Identifiers::new().with(TAG_COOKIE, "A"));
        let key_c = build_c.get_session_key(&Identifiers::new().with(TAG_COOKIE, "A"));
        assert_eq!(key_a, key_b);
        assert_eq!(key_b, key_c);
    }

    #[test]
    fn n_degree_hash_is_deterministic() {
        let engine = StructuralEngine::new(16).unwrap();
        engine.link("a:1", "b:1");
        engine.link("b:1", "c:1");
        engine.link("c:1", "a:1");

        let state = engine.state.read();
        let component = state.component(&atom("a:1"));
        let first_degree: FxHashMap<Atom, String> = component
            .iter()
            .map(|node| (node.clone(), first_degree_hash(&state, node, &component)))
            .collect();

        let h1 = n_degree_hash(&state, &atom("a:1"), &component, &first_degree, 3);
        let h2 = n_degree_hash(&state, &atom("a:1"), &component, &first_degree, 3);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);

        // Structurally symmetric nodes still disambiguate by name.
        let hb = n_degree_hash(&state, &atom("b:1"), &component, &first_degree, 3);
        assert_ne!(h1, hb);
    }

    #[test]
    fn empty_component_sentinel() {
        let state = GraphState::default();
        let empty = FxHashSet::default();
        assert_eq!(
            component_fingerprint(&state, &empty),
            SessionKey::empty_component()
        );
    }

    #[test]
    fn reads_never_materialize_atoms() {
        let engine = StructuralEngine::new(16).unwrap();
        assert!(!engine.are_linked("uid:ghost", "uid:other"));
        assert_eq!(engine.session_size("uid:ghost"), 0);
        assert_eq!(engine.stats().total_atoms, 0);
    }

    #[test]
    fn clear_cache_preserves_graph() {
        let engine = StructuralEngine::new(16).unwrap();
        engine.link("cookie:a", "uid:1");
        let key = engine.get_session_key(&Identifiers::new().with(TAG_UID, "1"));
        engine.clear_cache();
        assert_eq!(engine.stats().cache_size, 0);
        assert_eq!(
            engine.get_session_key(&Identifiers::new().with(TAG_UID, "1")),
            key
        );
    }
}
