//! # Engine Configuration
//!
//! The canonical-root priority table and the construction-time error
//! taxonomy. Construction is the only fallible surface of the crate; every
//! runtime operation is a total function over its declared input domain.

use crate::model::Atom;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use thiserror::Error;

/// Default priority order, position 0 highest:
/// `uid > email > client > device > cookie > jwt > custom`.
pub const DEFAULT_PRIORITY_ORDER: [&str; 7] =
    ["uid", "email", "client", "device", "cookie", "jwt", "custom"];

/// Errors raised at engine construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Cache capacity must be at least 1.
    #[error("cache capacity must be positive")]
    InvalidCacheCapacity,
    /// The priority table failed validation.
    #[error("invalid priority table: {reason}")]
    InvalidPriorityTable { reason: String },
}

/// Ordered list of identifier type tags used by the canonical-root engine
/// to pick a component's representative atom.
///
/// Tags not present in the table all share the lowest tier, ordered by tag
/// name and then by the full serialized atom. The table is configured once
/// at construction and only ever read afterwards.
#[derive(Debug, Clone)]
pub struct PriorityTable {
    order: Vec<String>,
    rank: FxHashMap<String, usize>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_ORDER.iter().map(|tag| tag.to_string()))
            .expect("default priority order is valid")
    }
}

impl PriorityTable {
    /// Build a table from an ordered tag list.
    ///
    /// Tags must be non-empty, colon-free, and unique.
    pub fn new<I, S>(order: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        let mut rank = FxHashMap::default();
        for (position, tag) in order.iter().enumerate() {
            if tag.is_empty() {
                return Err(ConfigError::InvalidPriorityTable {
                    reason: "empty type tag".to_string(),
                });
            }
            if tag.contains(':') {
                return Err(ConfigError::InvalidPriorityTable {
                    reason: format!("type tag {tag:?} contains a colon"),
                });
            }
            if rank.insert(tag.clone(), position).is_some() {
                return Err(ConfigError::InvalidPriorityTable {
                    reason: format!("duplicate type tag {tag:?}"),
                });
            }
        }
        Ok(Self { order, rank })
    }

    /// Position of a tag in the table, if enumerated.
    pub fn rank(&self, type_tag: &str) -> Option<usize> {
        self.rank.get(type_tag).copied()
    }

    /// The configured order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Priority-then-lexicographic ordering between two atoms; the smaller
    /// atom is the better canonical representative.
    ///
    /// Enumerated tags compare by table position, ties broken by the full
    /// serialized atom. Unenumerated tags sort after every enumerated one,
    /// ordered among themselves by tag name and then by full atom.
    pub fn compare(&self, a: &Atom, b: &Atom) -> Ordering {
        match (self.rank(a.type_tag()), self.rank(b.type_tag())) {
            (Some(ra), Some(rb)) => ra.cmp(&rb).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a
                .type_tag()
                .cmp(b.type_tag())
                .then_with(|| a.cmp(b)),
        }
    }

    /// The best canonical representative among `atoms`, or `None` when the
    /// iterator is empty.
    pub fn select<'a, I>(&self, atoms: I) -> Option<&'a Atom>
    where
        I: IntoIterator<Item = &'a Atom>,
    {
        atoms
            .into_iter()
            .min_by(|a, b| self.compare(a, b))
    }
}
