//! # Data Model
//!
//! Core data types for identity resolution: identifier atoms, lookup inputs,
//! session keys, and engine statistics.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Authenticated user ID (highest priority by default)
pub const TAG_UID: &str = "uid";
/// User email (value normalized to lowercase)
pub const TAG_EMAIL: &str = "email";
/// OAuth client ID
pub const TAG_CLIENT: &str = "client";
/// Device fingerprint
pub const TAG_DEVICE: &str = "device";
/// Session cookie ID
pub const TAG_COOKIE: &str = "cookie";
/// JWT token
pub const TAG_JWT: &str = "jwt";
/// IP address
pub const TAG_IP: &str = "ip";
/// Custom identifier
pub const TAG_CUSTOM: &str = "custom";

/// A single normalized identifier, serialized as `"<type_tag>:<value>"`.
///
/// The type tag is a short ASCII token drawn from the recommended vocabulary
/// (`uid`, `email`, `cookie`, ...) or any tenant-chosen tag. The first colon
/// is the delimiter; the value may itself contain colons. Equality and
/// ordering are byte-wise on the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Atom(String);

impl Atom {
    /// Build an atom from a type tag and a value.
    pub fn new(type_tag: &str, value: &str) -> Self {
        Atom(format!("{type_tag}:{value}"))
    }

    /// Wrap an already-serialized `"<type_tag>:<value>"` string.
    pub fn from_serialized(serialized: impl Into<String>) -> Self {
        Atom(serialized.into())
    }

    /// The serialized form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The portion before the first colon (the whole string if none).
    pub fn type_tag(&self) -> &str {
        self.0.split_once(':').map(|(tag, _)| tag).unwrap_or(&self.0)
    }

    /// The portion after the first colon (empty if none).
    pub fn value(&self) -> &str {
        self.0.split_once(':').map(|(_, value)| value).unwrap_or("")
    }

    /// True for the empty string, which every operation treats as a no-op.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Atom {
    fn from(serialized: &str) -> Self {
        Atom(serialized.to_string())
    }
}

impl From<String> for Atom {
    fn from(serialized: String) -> Self {
        Atom(serialized)
    }
}

/// A lookup input: a mapping from identifier type tag to value.
///
/// Example:
///
/// ```
/// use sessiongraph::Identifiers;
///
/// let ids = Identifiers::new()
///     .with("uid", "user_123")
///     .with("email", "User@Example.com")
///     .with("google_oauth", "google_id_456"); // custom tag
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifiers(BTreeMap<String, String>);

impl Identifiers {
    /// Create an empty identifier set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, type_tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(type_tag, value);
        self
    }

    /// Insert or replace one identifier.
    pub fn insert(&mut self, type_tag: impl Into<String>, value: impl Into<String>) {
        self.0.insert(type_tag.into(), value.into());
    }

    /// Look up the value for a type tag.
    pub fn get(&self, type_tag: &str) -> Option<&str> {
        self.0.get(type_tag).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(type_tag, value)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(tag, value)| (tag.as_str(), value.as_str()))
    }

    /// Normalize into sorted, deduplicated atoms.
    ///
    /// Entries with empty values are dropped. `email` values are lowercased
    /// with ASCII case folding only (no Unicode folding; documented
    /// compatibility constraint). The sort makes downstream union ordering
    /// deterministic for a given input, though union order never affects
    /// component identity.
    pub fn normalize(&self) -> Vec<Atom> {
        let mut atoms: Vec<Atom> = self
            .0
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(tag, value)| {
                if tag == TAG_EMAIL {
                    Atom::new(tag, &value.to_ascii_lowercase())
                } else {
                    Atom::new(tag, value)
                }
            })
            .collect();
        atoms.sort();
        atoms.dedup();
        atoms
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Identifiers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Identifiers(
            iter.into_iter()
                .map(|(tag, value)| (tag.into(), value.into()))
                .collect(),
        )
    }
}

/// The externally visible identifier of a session.
///
/// Format (boundary-stable): `"sess_"` followed by 16 lowercase hex
/// characters, 21 printable characters total. `sess_anonymous` and
/// `sess_empty` are the only non-hex sentinels. Comparison is
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

/// Key returned for lookups that carry zero non-empty identifiers.
pub const ANONYMOUS_KEY: &str = "sess_anonymous";

/// Key of the empty component. Only reachable internally; a normal lookup
/// always seeds at least one atom.
pub const EMPTY_COMPONENT_KEY: &str = "sess_empty";

impl SessionKey {
    /// Derive a key from canonical input: `"sess_" + hex(sha256(input)[..8])`.
    pub fn derive(input: &str) -> Self {
        let digest = Sha256::digest(input.as_bytes());
        SessionKey(format!("sess_{}", hex::encode(&digest[..8])))
    }

    /// The shared sentinel for anonymous lookups.
    pub fn anonymous() -> Self {
        SessionKey(ANONYMOUS_KEY.to_string())
    }

    /// The sentinel for an empty component.
    pub fn empty_component() -> Self {
        SessionKey(EMPTY_COMPONENT_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time counters for one engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Unique atoms tracked by the identity graph.
    pub total_atoms: usize,
    /// Connected components (sessions).
    pub total_sessions: usize,
    /// Entries currently held by the key cache.
    pub cache_size: usize,
}
