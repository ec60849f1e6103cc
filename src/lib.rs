//! # sessiongraph
//!
//! Identity resolution core: resolves heterogeneous, incrementally-revealed
//! identifiers (authenticated user IDs, emails, device fingerprints,
//! session cookies, bearer tokens, arbitrary tenant-defined tags) into a
//! single stable session key per connected identity component.
//!
//! Identifiers become linked either implicitly, by appearing together in
//! one lookup, or explicitly through [`link`](SessionEngine::link) (a login
//! event, say). Results are deterministic and independent of the order in
//! which links arrive.
//!
//! Two engines answer lookups over the shared identity graph:
//!
//! - [`CanonicalEngine`] derives the key from a canonical representative
//!   atom picked by priority tier and lexicographic order. O(α(n)) lookups
//!   and links; the key is stable while the component's top tier keeps the
//!   same winner. The recommended production engine.
//! - [`StructuralEngine`] derives the key from a canonical hash of the
//!   component's graph shape (an adaptation of RDF Dataset
//!   Canonicalization's N-degree hashing). Any structural change moves the
//!   key, and links cost O(component_size).
//!
//! [`HistoryEngine`] wraps either engine and records key supersessions, so
//! queries by any past key still recover the identity's complete lifetime.
//!
//! ```
//! use sessiongraph::{CanonicalEngine, Identifiers};
//!
//! let engine = CanonicalEngine::new(10_000).unwrap();
//!
//! // Anonymous visit.
//! let anon = engine.get_session_key(&Identifiers::new().with("cookie", "abc"));
//!
//! // Login: the cookie now belongs to a known user.
//! engine.link("cookie:abc", "uid:42");
//!
//! let authed = engine.get_session_key(&Identifiers::new().with("cookie", "abc"));
//! assert_ne!(anon, authed);
//! assert_eq!(authed, engine.get_session_key(&Identifiers::new().with("uid", "42")));
//! ```

pub mod cache;
pub mod canonical;
pub mod config;
pub mod dsu;
pub mod engine;
pub mod history;
pub mod model;
pub mod structural;

pub use canonical::CanonicalEngine;
pub use config::{ConfigError, PriorityTable, DEFAULT_PRIORITY_ORDER};
pub use engine::SessionEngine;
pub use history::{HistoryEngine, HistoryStats, KeyHistory};
pub use model::{
    Atom, EngineStats, Identifiers, SessionKey, ANONYMOUS_KEY, EMPTY_COMPONENT_KEY,
};
pub use structural::StructuralEngine;
