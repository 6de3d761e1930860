//! Scope
//!
//! The scope is the versioned name → value store through which all nodes
//! communicate. Every write stamps the name with a fresh revision taken from
//! a per-scope clock, so revisions only ever grow.
//!
//! Only the engine writes to the scope: values enter through
//! [`CallGraph::inject`](super::CallGraph::inject) or as node results.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Monotonic write stamp of a scope value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(u64);

impl Revision {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    revision: Revision,
}

/// Name → value mapping with per-name revisions.
#[derive(Debug, Clone)]
pub struct Scope<V> {
    slots: IndexMap<String, Slot<V>>,
    clock: u64,
}

impl<V> Scope<V> {
    pub fn new() -> Self {
        Self {
            slots: IndexMap::new(),
            clock: 0,
        }
    }

    /// Current value of `name`, if it was ever set.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.slots.get(name).map(|slot| &slot.value)
    }

    /// Revision of the last write to `name`.
    pub fn revision(&self, name: &str) -> Option<Revision> {
        self.slots.get(name).map(|slot| slot.revision)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// The most recent revision handed out by this scope.
    pub fn latest(&self) -> Option<Revision> {
        (self.clock > 0).then_some(Revision(self.clock))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names in first-write order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Iterate `(name, value)` pairs in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), &slot.value))
    }

    /// Write a value, bumping the name's revision.
    pub(crate) fn set(&mut self, name: impl Into<String>, value: V) -> Revision {
        self.clock += 1;
        let revision = Revision(self.clock);
        self.slots.insert(name.into(), Slot { value, revision });
        revision
    }
}

impl<V> Default for Scope<V> {
    fn default() -> Self {
        Self::new()
    }
}
