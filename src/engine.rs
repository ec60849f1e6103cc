//! # Engine Contract
//!
//! The programmatic contract shared by the two session-key engines. The
//! history tracker wraps any implementation of this trait.

use crate::model::{Atom, EngineStats, Identifiers, SessionKey};
use hashbrown::HashMap;

/// Common operations of a session-key engine.
///
/// All operations are total: empty inputs map to documented defaults
/// (`sess_anonymous`, `false`, `0`) and never to errors. Implementations
/// are `Send + Sync`; every call runs to completion on the calling thread.
pub trait SessionEngine: Send + Sync {
    /// Union all provided identifiers pairwise and return the component's
    /// session key. An empty input yields `sess_anonymous`.
    fn get_session_key(&self, ids: &Identifiers) -> SessionKey;

    /// Link two already-serialized `"<type_tag>:<value>"` atoms.
    /// Empty strings are no-ops; repeating a link changes nothing.
    fn link(&self, a: &str, b: &str);

    /// True when both atoms belong to the same component. False for any
    /// empty argument or unknown atom; never materializes atoms.
    fn are_linked(&self, a: &str, b: &str) -> bool;

    /// Number of atoms in the atom's component; 0 for an empty argument or
    /// an unknown atom. Never materializes atoms.
    fn session_size(&self, atom: &str) -> usize;

    /// Every session key with its sorted member atoms. Expensive (full
    /// scan); debugging and monitoring only.
    fn all_sessions(&self) -> HashMap<SessionKey, Vec<Atom>>;

    /// Point-in-time counters.
    fn stats(&self) -> EngineStats;

    /// Drop cached keys while preserving the identity graph.
    fn clear_cache(&self);

    /// Drop all state: graph, caches, everything.
    fn clear(&self);

    /// Cached key for an atom without promoting the entry or touching the
    /// graph. History-tracking hook.
    fn peek_key(&self, atom: &Atom) -> Option<SessionKey>;

    /// Current component key for one atom, computed without creating any
    /// link; an unknown atom yields its singleton key without being
    /// inserted. History-tracking hook.
    fn current_key(&self, atom: &Atom) -> SessionKey;
}
