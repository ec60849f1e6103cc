//! # Session-Key History
//!
//! Session keys change when components merge: an anonymous visitor gets one
//! key, logs in, and every later lookup returns a different key. The
//! history tracker records those supersessions so queries by any past key
//! still resolve to the complete set of keys the identity has carried.
//!
//! Supersession records form a forward-only structure flattened eagerly on
//! each transition, so the reverse index always resolves in one hop.

use crate::engine::SessionEngine;
use crate::model::{Atom, EngineStats, Identifiers, SessionKey};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The recorded lineage of one live session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHistory {
    /// The live key.
    pub current: SessionKey,
    /// Superseded keys in first-observed order, deduplicated.
    pub old_keys: Vec<SessionKey>,
    /// Time of the last recorded transition (UTC).
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl KeyHistory {
    fn fresh(key: SessionKey, now: OffsetDateTime) -> Self {
        Self {
            current: key,
            old_keys: Vec::new(),
            updated_at: now,
        }
    }
}

/// Counters for a history-tracking engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Counters of the wrapped engine.
    #[serde(flatten)]
    pub engine: EngineStats,
    /// Superseded keys tracked by the reverse index.
    pub total_historical_keys: usize,
    /// Live keys that have experienced at least one transition.
    pub sessions_with_history: usize,
}

#[derive(Debug, Default)]
struct HistoryState {
    /// Live key → lineage.
    records: HashMap<SessionKey, KeyHistory>,
    /// Superseded key → live key. Depth 1 at all quiescent points.
    old_to_new: HashMap<SessionKey, SessionKey>,
}

impl HistoryState {
    /// Record that `old_key` has been superseded by `new_key`.
    ///
    /// If `old_key` carried its own lineage it is merged into `new_key`'s
    /// record and deleted, and every ancestor is repointed, so chains in
    /// `old_to_new` never exceed depth 1.
    fn track_change(&mut self, old_key: &SessionKey, new_key: &SessionKey, now: OffsetDateTime) {
        if old_key == new_key {
            return;
        }

        {
            let record = self
                .records
                .entry(new_key.clone())
                .or_insert_with(|| KeyHistory::fresh(new_key.clone(), now));
            if !record.old_keys.contains(old_key) {
                record.old_keys.push(old_key.clone());
            }
            record.updated_at = now;
        }

        self.old_to_new.insert(old_key.clone(), new_key.clone());

        if let Some(old_record) = self.records.remove(old_key) {
            for ancestor in &old_record.old_keys {
                self.old_to_new.insert(ancestor.clone(), new_key.clone());
            }
            let record = self
                .records
                .get_mut(new_key)
                .expect("record created above");
            for ancestor in old_record.old_keys {
                if !record.old_keys.contains(&ancestor) {
                    record.old_keys.push(ancestor);
                }
            }
        }
    }

    fn initialize(&mut self, key: &SessionKey, now: OffsetDateTime) {
        self.records
            .entry(key.clone())
            .or_insert_with(|| KeyHistory::fresh(key.clone(), now));
    }
}

/// History-tracking wrapper around either engine.
///
/// The history lock is taken only after the wrapped engine's own locks
/// have been released.
pub struct HistoryEngine<E> {
    engine: E,
    state: RwLock<HistoryState>,
}

impl<E: SessionEngine> HistoryEngine<E> {
    /// Wrap an engine with history tracking.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: RwLock::new(HistoryState::default()),
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Session key for the given identifiers, recording a transition for
    /// every query atom whose previously observed key is superseded by the
    /// result.
    pub fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        let atoms = ids.normalize();
        let previous: Vec<SessionKey> = atoms
            .iter()
            .filter_map(|atom| self.engine.peek_key(atom))
            .collect();

        let new_key = self.engine.get_session_key(ids);

        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();
        if previous.is_empty() {
            state.initialize(&new_key, now);
        } else {
            let mut tracked: Vec<&SessionKey> = Vec::new();
            for old_key in &previous {
                if old_key != &new_key && !tracked.contains(&old_key) {
                    state.track_change(old_key, &new_key, now);
                    tracked.push(old_key);
                }
            }
        }
        new_key
    }

    /// Link two atoms, recording a transition for each side whose key
    /// changed.
    pub fn link(&self, a: &str, b: &str) {
        if a.is_empty() || b.is_empty() {
            return;
        }
        let atom_a = Atom::from(a);
        let atom_b = Atom::from(b);

        let old_a = self
            .engine
            .peek_key(&atom_a)
            .unwrap_or_else(|| self.engine.current_key(&atom_a));
        let old_b = self
            .engine
            .peek_key(&atom_b)
            .unwrap_or_else(|| self.engine.current_key(&atom_b));

        self.engine.link(a, b);
        let new_key = self.engine.current_key(&atom_a);

        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();
        state.track_change(&old_a, &new_key, now);
        if old_b != old_a {
            state.track_change(&old_b, &new_key, now);
        }
    }

    /// Full lineage for a key, current or superseded. An unknown key gets
    /// a fresh empty record stamped now.
    pub fn history_of(&self, key: &SessionKey) -> KeyHistory {
        let state = self.state.read();
        let resolved = state.old_to_new.get(key).unwrap_or(key);
        match state.records.get(resolved) {
            Some(record) => record.clone(),
            None => KeyHistory::fresh(resolved.clone(), OffsetDateTime::now_utc()),
        }
    }

    /// Every key the identity has carried: `[current, *old_keys]`.
    /// `[key]` for a key with no recorded history.
    pub fn all_keys_for(&self, key: &SessionKey) -> Vec<SessionKey> {
        let history = self.history_of(key);
        let mut keys = Vec::with_capacity(1 + history.old_keys.len());
        keys.push(history.current);
        keys.extend(history.old_keys);
        keys
    }

    /// Engine counters plus history counters.
    pub fn stats(&self) -> HistoryStats {
        let engine = self.engine.stats();
        let state = self.state.read();
        HistoryStats {
            engine,
            total_historical_keys: state.old_to_new.len(),
            sessions_with_history: state
                .records
                .values()
                .filter(|record| !record.old_keys.is_empty())
                .count(),
        }
    }

    /// Whether two atoms share a component (delegated).
    pub fn are_linked(&self, a: &str, b: &str) -> bool {
        self.engine.are_linked(a, b)
    }

    /// Component size (delegated).
    pub fn session_size(&self, atom: &str) -> usize {
        self.engine.session_size(atom)
    }

    /// Every session with its sorted members (delegated).
    pub fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        self.engine.all_sessions()
    }

    /// Drop the wrapped engine's caches; history is untouched.
    pub fn clear_cache(&self) {
        self.engine.clear_cache();
    }

    /// Drop the wrapped engine's state and every history record.
    pub fn clear(&self) {
        self.engine.clear();
        let mut state = self.state.write();
        state.records.clear();
        state.old_to_new.clear();
    }
}

impl<E: SessionEngine> SessionEngine for HistoryEngine<E> {
    fn get_session_key(&self, ids: &Identifiers) -> SessionKey {
        HistoryEngine::get_session_key(self, ids)
    }

    fn link(&self, a: &str, b: &str) {
        HistoryEngine::link(self, a, b)
    }

    fn are_linked(&self, a: &str, b: &str) -> bool {
        HistoryEngine::are_linked(self, a, b)
    }

    fn session_size(&self, atom: &str) -> usize {
        HistoryEngine::session_size(self, atom)
    }

    fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>> {
        HistoryEngine::all_sessions(self)
    }

    /// Base engine counters; use [`HistoryEngine::stats`] for the history
    /// counters.
    fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    fn clear_cache(&self) {
        HistoryEngine::clear_cache(self)
    }

    fn clear(&self) {
        HistoryEngine::clear(self)
    }

    fn peek_key(&self, atom: &Atom) -> Option<SessionKey> {
        self.engine.peek_key(atom)
    }

    fn current_key(&self, atom: &Atom) -> SessionKey {
        self.engine.current_key(atom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalEngine;
    use crate::model::{TAG_COOKIE, TAG_UID};

    fn tracked() -> HistoryEngine<CanonicalEngine> {
        HistoryEngine::new(CanonicalEngine::new(64).unwrap())
    }

    #[test]
    fn first_lookup_initializes_history() {
        let engine = tracked();
        let key = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        let history = engine.history_of(&key);
        assert_eq!(history.current, key);
        assert!(history.old_keys.is_empty());
    }

    #[test]
    fn key_change_is_recorded() {
        let engine = tracked();
        let k1 = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        engine.link("cookie:c", "uid:u");
        let k2 = engine.get_session_key(&Identifiers::new().with(TAG_UID, "u"));
        assert_ne!(k1, k2);

        let history = engine.history_of(&k2);
        assert_eq!(history.current, k2);
        assert!(history.old_keys.contains(&k1));
        // The superseded key resolves to the same record.
        assert_eq!(engine.history_of(&k1), history);
    }

    #[test]
    fn flattening_keeps_chains_at_depth_one() {
        let engine = tracked();
        let k1 = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        engine.link("cookie:c", "uid:u");
        let k2 = engine.get_session_key(&Identifiers::new().with(TAG_UID, "u"));
        // A lexicographically smaller uid takes over the canonical slot.
        engine.link("uid:u", "uid:a");
        let k3 = engine.get_session_key(&Identifiers::new().with(TAG_UID, "a"));
        assert_ne!(k2, k3);

        for key in [&k1, &k2, &k3] {
            let all = engine.all_keys_for(key);
            assert!(all.contains(&k1), "missing k1 for {key}");
            assert!(all.contains(&k2), "missing k2 for {key}");
            assert!(all.contains(&k3), "missing k3 for {key}");
        }

        // The intermediate record was merged away: k1 and k2 both resolve
        // directly to the live key.
        let state = engine.state.read();
        assert_eq!(state.old_to_new[&k1], k3);
        assert_eq!(state.old_to_new[&k2], k3);
        assert!(!state.records.contains_key(&k2));
    }

    #[test]
    fn duplicate_transitions_are_deduplicated() {
        let engine = tracked();
        let k1 = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        engine.link("cookie:c", "uid:u");
        let k2 = engine.get_session_key(&Identifiers::new().with(TAG_UID, "u"));

        // Re-observing the same stale key must not append again.
        let mut state = engine.state.write();
        state.track_change(&k1, &k2, OffsetDateTime::now_utc());
        drop(state);

        assert_eq!(engine.history_of(&k2).old_keys, vec![k1]);
    }

    #[test]
    fn unknown_key_resolves_to_itself() {
        let engine = tracked();
        let ghost = SessionKey::derive("nowhere");
        assert_eq!(engine.all_keys_for(&ghost), vec![ghost.clone()]);
        assert!(engine.history_of(&ghost).old_keys.is_empty());
    }

    #[test]
    fn link_tracks_both_sides() {
        let engine = tracked();
        let k_cookie = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        let k_device = engine.get_session_key(&Identifiers::new().with("device", "d"));
        engine.link("cookie:c", "device:d");
        let merged = engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));

        let all = engine.all_keys_for(&merged);
        assert!(all.contains(&k_cookie));
        assert!(all.contains(&k_device));
    }

    #[test]
    fn stats_count_transitions() {
        let engine = tracked();
        engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        engine.link("cookie:c", "uid:u");
        engine.get_session_key(&Identifiers::new().with(TAG_UID, "u"));

        let stats = engine.stats();
        assert_eq!(stats.total_historical_keys, 1);
        assert_eq!(stats.sessions_with_history, 1);
        assert_eq!(stats.engine.total_atoms, 2);
    }

    #[test]
    fn clear_resets_history_and_engine() {
        let engine = tracked();
        engine.get_session_key(&Identifiers::new().with(TAG_COOKIE, "c"));
        engine.link("cookie:c", "uid:u");
        engine.clear();

        let stats = engine.stats();
        assert_eq!(stats.total_historical_keys, 0);
        assert_eq!(stats.sessions_with_history, 0);
        assert_eq!(stats.engine.total_atoms, 0);
    }
}
