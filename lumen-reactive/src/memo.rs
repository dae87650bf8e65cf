//! Memo slots for cached references
//!
//! A memo slot stores the last computed value together with the tag
//! snapshot taken right after computing it.

use crate::revision::Revision;
use crate::tag::Tag;
use parking_lot::Mutex;

/// A memoized value and the revision it was computed against
#[derive(Debug, Clone)]
pub struct MemoEntry<V> {
    /// The cached value
    pub value: V,

    /// Tag value observed right after computing
    pub revision: Revision,
}

impl<V> MemoEntry<V> {
    pub fn new(value: V, revision: Revision) -> Self {
        MemoEntry { value, revision }
    }

    /// Check if the entry is still current for `tag`
    pub fn is_valid_for(&self, tag: &dyn Tag) -> bool {
        tag.validate(self.revision)
    }
}

/// Interior-mutable holder of at most one memo entry
#[derive(Debug)]
pub struct MemoSlot<V> {
    entry: Mutex<Option<MemoEntry<V>>>,
}

impl<V: Clone> MemoSlot<V> {
    pub fn new() -> Self {
        MemoSlot {
            entry: Mutex::new(None),
        }
    }

    /// Return the cached value if it is still valid for `tag`
    pub fn get_valid(&self, tag: &dyn Tag) -> Option<V> {
        let entry = self.entry.lock();
        match entry.as_ref() {
            Some(entry) if entry.is_valid_for(tag) => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Replace the entry
    pub fn store(&self, value: V, revision: Revision) {
        *self.entry.lock() = Some(MemoEntry::new(value, revision));
    }

    /// Revision of the last computation, if any
    pub fn revision(&self) -> Option<Revision> {
        self.entry.lock().as_ref().map(|e| e.revision)
    }

    /// Last computed value regardless of validity
    pub fn peek(&self) -> Option<V> {
        self.entry.lock().as_ref().map(|e| e.value.clone())
    }

    /// Drop the entry
    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

impl<V: Clone> Default for MemoSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}
