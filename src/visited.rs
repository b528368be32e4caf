//! Identity-based visitation set shared by all walkers of one dump.
//!
//! Marks are keyed by object identity, never by value equality. The set is
//! monotonic: there is no removal, so once an object has been attributed it
//! stays attributed for the lifetime of the set.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{HeapRef, ObjectId};

/// Concurrent identity set.
///
/// Each marked object is pinned by a cloned handle so its address cannot be
/// reused by another allocation while the set is alive.
#[derive(Debug, Default)]
pub struct IdentitySet {
    marks: DashMap<ObjectId, HeapRef>,
}

impl IdentitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `obj` if it is not marked yet.
    ///
    /// Returns `true` when this call placed the mark, meaning the caller now
    /// owns attribution of the object. Concurrent callers racing on the same
    /// object see exactly one `true`.
    pub fn mark_if_absent(&self, obj: &HeapRef) -> bool {
        match self.marks.entry(ObjectId::of(obj)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(HeapRef::clone(obj));
                true
            }
        }
    }

    /// Whether `obj` is marked.
    pub fn contains(&self, obj: &HeapRef) -> bool {
        self.marks.contains_key(&ObjectId::of(obj))
    }

    /// Number of marked objects.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Whether nothing is marked.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
