//! Attribution tally snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Immutable snapshot of an accountant's tally.
///
/// Per-class maps are `BTreeMap`s so that renderers break ties between
/// equal values in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total number of attributed objects.
    pub object_count: u64,
    /// Total attributed bytes.
    pub memory_use: u64,
    /// Object count per class name.
    pub count_by_class: BTreeMap<String, u64>,
    /// Byte total per class name.
    pub bytes_by_class: BTreeMap<String, u64>,
}

impl MemoryStats {
    /// Whether nothing was attributed.
    pub fn is_empty(&self) -> bool {
        self.object_count == 0
    }

    /// Number of objects of `class`, zero if absent.
    pub fn count_of(&self, class: &str) -> u64 {
        self.count_by_class.get(class).copied().unwrap_or(0)
    }

    /// Bytes attributed to `class`, zero if absent.
    pub fn bytes_of(&self, class: &str) -> u64 {
        self.bytes_by_class.get(class).copied().unwrap_or(0)
    }
}
