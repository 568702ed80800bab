//! Unique-membership set shared between tasks.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::RwLock;

/// A thread-safe set of unique values with set difference.
///
/// Used to track which deployments and instances are already known, and
/// which instances are already done. Reads hand back owned snapshots.
#[derive(Debug)]
pub struct DedupSet<T = String> {
    items: RwLock<HashSet<T>>,
}

impl<T: Eq + Hash + Clone> DedupSet<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashSet::new()),
        }
    }

    /// Insert `value`. Returns `false` if it was already present.
    pub fn add(&self, value: T) -> bool {
        self.items.write().expect("set lock").insert(value)
    }

    pub fn has(&self, value: &T) -> bool {
        self.items.read().expect("set lock").contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current members, in no particular order.
    pub fn list(&self) -> Vec<T> {
        self.items.read().expect("set lock").iter().cloned().collect()
    }

    /// Members of `self` absent from `other`.
    pub fn difference(&self, other: &DedupSet<T>) -> Vec<T> {
        // Snapshot `other` first so the two locks are never held together.
        let other: HashSet<T> = other.items.read().expect("set lock").clone();
        self.difference_from(&other)
    }

    /// Members of `self` absent from `other`.
    pub fn difference_from(&self, other: &HashSet<T>) -> Vec<T> {
        self.items
            .read()
            .expect("set lock")
            .iter()
            .filter(|v| !other.contains(*v))
            .cloned()
            .collect()
    }
}

impl<T: Eq + Hash + Clone> Default for DedupSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for DedupSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: RwLock::new(iter.into_iter().collect()),
        }
    }
}
