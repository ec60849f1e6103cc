//! # Disjoint-Set Union
//!
//! Connectivity primitive for the identity graph: weighted quick-union with
//! path compression over identifier atoms. Amortized O(α(n)) for find and
//! union; α is effectively constant.

use crate::model::Atom;
use hashbrown::HashMap;
use rustc_hash::FxHashMap;

/// Union-find over atoms.
///
/// Stores only parent pointers and ranks, never the multiset of link
/// events: once two atoms are unioned, the individual edges between them
/// are not recoverable.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    /// Parent pointers; a root is its own parent.
    parent: FxHashMap<Atom, Atom>,
    /// Approximate tree depth per root.
    rank: FxHashMap<Atom, u32>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the set containing `atom`, inserting unknown atoms as their
    /// own rank-0 root.
    ///
    /// Every node visited on the way up is repointed directly at the root,
    /// so a second `find` on the same atom is O(1).
    pub fn find(&mut self, atom: &Atom) -> Atom {
        let Some(parent) = self.parent.get(atom) else {
            self.parent.insert(atom.clone(), atom.clone());
            self.rank.insert(atom.clone(), 0);
            return atom.clone();
        };
        if parent == atom {
            return atom.clone();
        }

        let mut path = Vec::new();
        let mut current = atom.clone();
        loop {
            let parent = self.parent[&current].clone();
            if parent == current {
                break;
            }
            path.push(current);
            current = parent;
        }
        for node in path {
            self.parent.insert(node, current.clone());
        }
        current
    }

    /// Membership test that never inserts.
    pub fn contains(&self, atom: &Atom) -> bool {
        self.parent.contains_key(atom)
    }

    /// Merge the sets containing `a` and `b`; returns the surviving root.
    ///
    /// Attaches by rank (smaller under larger); on a tie the first root
    /// wins and its rank increments.
    pub fn union(&mut self, a: &Atom, b: &Atom) -> Atom {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return root_a;
        }

        let rank_a = self.rank.get(&root_a).copied().unwrap_or(0);
        let rank_b = self.rank.get(&root_b).copied().unwrap_or(0);
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b.clone());
            root_b
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a.clone());
            root_a
        } else {
            self.parent.insert(root_b, root_a.clone());
            self.rank.insert(root_a.clone(), rank_a + 1);
            root_a
        }
    }

    /// True when both atoms share a root. Inserts unknown atoms; callers
    /// that must not materialize atoms check [`contains`](Self::contains)
    /// first.
    pub fn connected(&mut self, a: &Atom, b: &Atom) -> bool {
        self.find(a) == self.find(b)
    }

    /// All atoms in the component containing `atom`.
    ///
    /// Full scan over every tracked atom, O(N). Slow paths only
    /// (canonical-representative recovery, diagnostics).
    pub fn component_members(&mut self, atom: &Atom) -> Vec<Atom> {
        let root = self.find(atom);
        let atoms: Vec<Atom> = self.parent.keys().cloned().collect();
        let mut members = Vec::new();
        for node in atoms {
            if self.find(&node) == root {
                members.push(node);
            }
        }
        members
    }

    /// Number of atoms in the component containing `atom`. O(N).
    pub fn component_size(&mut self, atom: &Atom) -> usize {
        let root = self.find(atom);
        let atoms: Vec<Atom> = self.parent.keys().cloned().collect();
        atoms.into_iter().filter(|node| self.find(node) == root).count()
    }

    /// Every component, keyed by root. O(N).
    pub fn all_components(&mut self) -> HashMap<Atom, Vec<Atom>> {
        let atoms: Vec<Atom> = self.parent.keys().cloned().collect();
        let mut components: HashMap<Atom, Vec<Atom>> = HashMap::new();
        for node in atoms {
            let root = self.find(&node);
            components.entry(root).or_default().push(node);
        }
        components
    }

    /// Total number of tracked atoms.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Drop all atoms and components.
    pub fn clear(&mut self) {
        self.parent.clear();
        self.rank.clear();
    }
}
