//! # node-footprint
//!
//! Retained-memory attribution for build graph nodes.
//!
//! The dumper answers one question:
//!
//! > Given a node of the build graph, how much heap memory does it retain?
//!
//! ## Core Contract
//!
//! 1. Resolve a subject (package, Starlark module, configured target) to a node key
//! 2. Walk the object graph below the node's value under a traversal policy
//! 3. Attribute every reached object exactly once, per class, in count and bytes
//!
//! ## Architecture
//!
//! ```text
//! Mode string → MemoryMode → resolve_subject → NodeKey
//!                                                 ↓
//!          GraphStore ← policy (isolated | reachable | transitive)
//!                                                 ↓
//!           ObjectGraphWalker → IdentitySet + MemoryAccountant → MemoryStats
//! ```
//!
//! ## Policies
//!
//! - `isolated`: objects reachable from the node and from none of its direct dependencies
//! - `reachable`: everything reachable from the node's value
//! - `transitive`: everything reachable from the node or anything in its closure;
//!   dependencies are processed concurrently and before their dependents, so shared
//!   objects are charged to the deepest node reaching them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod policy;
pub mod store;
pub mod visited;
pub mod walker;
pub mod accountant;
pub mod resolve;
pub mod transitive;
pub mod dumper;
pub mod render;
pub mod metrics;
pub mod config;
pub mod canonical;
pub mod error;

// Re-exports
pub use types::{
    PackageId, Label, ConfigurationKey, NodeKey, LabelSyntaxError,
    HeapObject, HeapRef, ObjectId, ObjectCategory, Shape, Field, MemoryStats,
};
pub use policy::{
    TraversalPolicy, DisplayMode, SubjectKind, ReportOptions, MemoryMode, ModeParseError,
};
pub use store::{
    GraphStore, InMemoryGraphStore, InMemoryError,
    GraphSnapshotFile, LoadedSnapshot, SnapshotError, load_snapshot,
};
pub use visited::IdentitySet;
pub use walker::{
    ObjectGraphWalker, ObjectSink, NoopSink, TraversalRule, BuildObjectRule,
    WalkOptions, WalkSummary, WalkInterrupted,
};
pub use accountant::{Measurer, ShallowSizeMeasurer, CollectionMeasurer, MemoryAccountant};
pub use resolve::{resolve_subject, resolve_configuration, split_configuration_suffix};
pub use transitive::{TransitiveScheduler, TransitiveSummary};
pub use dumper::{MemoryDumper, DumpReport};
pub use render::{render, write_report};
pub use metrics::{DumpMetrics, DumpEvent, NoOpMetrics, TestMetrics};
pub use config::DumperConfig;
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use error::{DumpError, ResolutionError};

