//! Core types for the footprint engine.

pub mod key;
pub mod heap;
pub mod stats;

pub use key::{PackageId, Label, ConfigurationKey, NodeKey, LabelSyntaxError};
pub use heap::{HeapObject, HeapRef, ObjectId, ObjectCategory, Shape, Field};
pub use stats::MemoryStats;
