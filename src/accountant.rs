//! Memory accounting.
//!
//! The [`MemoryAccountant`] is the sink of attributed objects. Each observed
//! object increments its class count and adds its measured size to the class
//! byte total. Sizes come from the first [`Measurer`] that claims the
//! object, falling back to [`ShallowSizeMeasurer`].
//!
//! `observe` is called concurrently by every walker of a transitive dump, so
//! all counters are atomics; the class table is behind a read-mostly lock
//! that is only taken for writing the first time a class is seen.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{HeapObject, HeapRef, MemoryStats, Shape};
use crate::walker::ObjectSink;

/// Allocation granularity.
pub const OBJECT_ALIGNMENT: u64 = 8;

/// Header size of an array allocation (mark word, class pointer, length).
pub const ARRAY_HEADER_BYTES: u64 = 16;

/// Size of one reference slot (compressed pointers).
pub const REFERENCE_BYTES: u64 = 4;

/// Round `bytes` up to the allocation granularity.
pub fn align(bytes: u64) -> u64 {
    bytes.saturating_add(OBJECT_ALIGNMENT - 1) / OBJECT_ALIGNMENT * OBJECT_ALIGNMENT
}

/// Size of an array allocation holding `length` elements of `element_bytes`.
pub fn array_bytes(element_bytes: u64, length: u64) -> u64 {
    align(ARRAY_HEADER_BYTES.saturating_add(element_bytes.saturating_mul(length)))
}

/// Computes the byte size of objects of a particular shape.
pub trait Measurer: Send + Sync {
    /// Whether this measurer knows how to size `obj`.
    fn claims(&self, obj: &HeapObject) -> bool;

    /// Size of `obj` in bytes. Only called when [`Measurer::claims`] is true.
    fn size_of(&self, obj: &HeapObject) -> u64;
}

/// Default measurer: the object's own allocation only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowSizeMeasurer;

impl Measurer for ShallowSizeMeasurer {
    fn claims(&self, _obj: &HeapObject) -> bool {
        true
    }

    fn size_of(&self, obj: &HeapObject) -> u64 {
        match *obj.shape() {
            Shape::Instance { shallow_bytes } => shallow_bytes,
            Shape::Array {
                element_bytes,
                length,
            } => array_bytes(u64::from(element_bytes), length),
            Shape::Collection { header_bytes, .. } => u64::from(header_bytes),
        }
    }
}

/// Sizes containers including their backing table and entry nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionMeasurer;

impl Measurer for CollectionMeasurer {
    fn claims(&self, obj: &HeapObject) -> bool {
        matches!(obj.shape(), Shape::Collection { .. })
    }

    fn size_of(&self, obj: &HeapObject) -> u64 {
        match *obj.shape() {
            Shape::Collection {
                header_bytes,
                capacity,
                entries,
                entry_bytes,
            } => {
                let table = if capacity == 0 {
                    0
                } else {
                    array_bytes(REFERENCE_BYTES, capacity)
                };
                u64::from(header_bytes)
                    .saturating_add(table)
                    .saturating_add(entries.saturating_mul(u64::from(entry_bytes)))
            }
            _ => ShallowSizeMeasurer.size_of(obj),
        }
    }
}

#[derive(Debug, Default)]
struct ClassCounters {
    count: AtomicU64,
    bytes: AtomicU64,
}

/// Aggregates attributed objects into per-class counts and byte totals.
pub struct MemoryAccountant {
    measurers: Vec<Arc<dyn Measurer>>,
    classes: RwLock<HashMap<Arc<str>, Arc<ClassCounters>>>,
    object_count: AtomicU64,
    memory_use: AtomicU64,
}

impl MemoryAccountant {
    /// Create an accountant that consults `measurers` in order.
    pub fn new(measurers: Vec<Arc<dyn Measurer>>) -> Self {
        Self {
            measurers,
            classes: RwLock::new(HashMap::new()),
            object_count: AtomicU64::new(0),
            memory_use: AtomicU64::new(0),
        }
    }

    /// Measurers used when none are given explicitly.
    pub fn default_measurers() -> Vec<Arc<dyn Measurer>> {
        vec![Arc::new(CollectionMeasurer)]
    }

    /// Size of `obj` according to the configured measurers.
    pub fn measure(&self, obj: &HeapObject) -> u64 {
        self.measurers
            .iter()
            .find(|m| m.claims(obj))
            .map(|m| m.size_of(obj))
            .unwrap_or_else(|| ShallowSizeMeasurer.size_of(obj))
    }

    /// Record one object.
    pub fn record(&self, obj: &HeapObject) {
        let bytes = self.measure(obj);
        let counters = self.counters_for(obj.class_arc());

        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.object_count.fetch_add(1, Ordering::Relaxed);
        self.memory_use.fetch_add(bytes, Ordering::Relaxed);
    }

    fn counters_for(&self, class: &Arc<str>) -> Arc<ClassCounters> {
        if let Some(counters) = self.classes.read().get(class) {
            return Arc::clone(counters);
        }
        let mut classes = self.classes.write();
        Arc::clone(classes.entry(Arc::clone(class)).or_default())
    }

    /// Snapshot of everything recorded so far.
    pub fn stats(&self) -> MemoryStats {
        let classes = self.classes.read();
        let mut count_by_class = BTreeMap::new();
        let mut bytes_by_class = BTreeMap::new();

        for (class, counters) in classes.iter() {
            count_by_class.insert(class.to_string(), counters.count.load(Ordering::Relaxed));
            bytes_by_class.insert(class.to_string(), counters.bytes.load(Ordering::Relaxed));
        }

        MemoryStats {
            object_count: self.object_count.load(Ordering::Relaxed),
            memory_use: self.memory_use.load(Ordering::Relaxed),
            count_by_class,
            bytes_by_class,
        }
    }
}

impl Default for MemoryAccountant {
    fn default() -> Self {
        Self::new(Self::default_measurers())
    }
}

impl std::fmt::Debug for MemoryAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAccountant")
            .field("measurers", &self.measurers.len())
            .field("object_count", &self.object_count.load(Ordering::Relaxed))
            .field("memory_use", &self.memory_use.load(Ordering::Relaxed))
            .finish()
    }
}

impl ObjectSink for MemoryAccountant {
    fn observe(&self, obj: &HeapRef) {
        self.record(obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn collection(capacity: u64, entries: u64) -> HeapObject {
        HeapObject::new(
            "HashMap",
            Shape::Collection {
                header_bytes: 48,
                capacity,
                entries,
                entry_bytes: 32,
            },
        )
    }

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 8);
        assert_eq!(align(8), 8);
        assert_eq!(align(17), 24);
    }

    #[test]
    fn test_sizes_saturate_instead_of_wrapping() {
        let ceiling = u64::MAX / OBJECT_ALIGNMENT * OBJECT_ALIGNMENT;
        assert_eq!(align(u64::MAX), ceiling);
        assert_eq!(array_bytes(u64::from(u32::MAX), u64::MAX), ceiling);
        assert_eq!(
            ShallowSizeMeasurer.size_of(&HeapObject::array("long[]", 8, u64::MAX)),
            ceiling
        );

        let huge = HeapObject::new(
            "HashMap",
            Shape::Collection {
                header_bytes: 48,
                capacity: u64::MAX,
                entries: u64::MAX,
                entry_bytes: 32,
            },
        );
        assert_eq!(CollectionMeasurer.size_of(&huge), u64::MAX);
    }

    #[test]
    fn test_shallow_measurer_shapes() {
        let m = ShallowSizeMeasurer;
        assert_eq!(m.size_of(&HeapObject::instance("Foo", 10)), 10);
        assert_eq!(m.size_of(&HeapObject::array("byte[]", 1, 5)), 24);
        assert_eq!(m.size_of(&collection(16, 3)), 48);
    }

    #[test]
    fn test_collection_measurer_claims_only_collections() {
        let m = CollectionMeasurer;
        assert!(m.claims(&collection(16, 3)));
        assert!(!m.claims(&HeapObject::instance("Foo", 10)));
        // 48 header + align(16 + 4 * 16) = 80 table + 3 * 32 entries
        assert_eq!(m.size_of(&collection(16, 3)), 48 + 80 + 96);
        assert_eq!(m.size_of(&collection(0, 0)), 48);
    }

    #[test]
    fn test_falls_back_to_shallow_size() {
        let accountant = MemoryAccountant::new(vec![Arc::new(CollectionMeasurer)]);
        assert_eq!(accountant.measure(&HeapObject::instance("Foo", 10)), 10);

        let bare = MemoryAccountant::new(Vec::new());
        assert_eq!(bare.measure(&collection(16, 3)), 48);
    }

    #[test]
    fn test_records_per_class_totals() {
        let accountant = MemoryAccountant::default();
        for _ in 0..3 {
            accountant.record(&HeapObject::instance("Foo", 10));
        }
        accountant.record(&HeapObject::instance("Bar", 5));

        let stats = accountant.stats();
        assert_eq!(stats.object_count, 4);
        assert_eq!(stats.memory_use, 35);
        assert_eq!(stats.count_by_class["Foo"], 3);
        assert_eq!(stats.bytes_by_class["Foo"], 30);
        assert_eq!(stats.count_by_class["Bar"], 1);
        assert_eq!(stats.bytes_by_class["Bar"], 5);
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 5_000;

        let accountant = Arc::new(MemoryAccountant::default());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let accountant = Arc::clone(&accountant);
                thread::spawn(move || {
                    let own = HeapObject::instance(format!("Class{}", t % 3), 8);
                    let shared = HeapObject::instance("Shared", 16);
                    for _ in 0..PER_THREAD {
                        accountant.record(&own);
                        accountant.record(&shared);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = accountant.stats();
        assert_eq!(stats.object_count, THREADS * PER_THREAD * 2);
        assert_eq!(stats.count_by_class["Shared"], THREADS * PER_THREAD);
        assert_eq!(stats.bytes_by_class["Shared"], THREADS * PER_THREAD * 16);
        let class_total: u64 = stats.count_by_class.values().sum();
        assert_eq!(class_total, stats.object_count);
    }
}
