//! Graph storage backends.
//!
//! The engine only needs read access to a frozen graph: look up a node's
//! value and its direct dependencies, and enumerate realized build
//! configurations for subject resolution.

pub mod memory;
pub mod snapshot;

use async_trait::async_trait;

use crate::types::{ConfigurationKey, HeapRef, NodeKey};

/// Read-only accessor for the dependency graph.
///
/// Implementations must return direct dependencies in an order that is
/// stable for the duration of one dump.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Whether the graph has an entry for `key`.
    async fn contains(&self, key: &NodeKey) -> Result<bool, Self::Error>;

    /// Fetch the value attached to `key`, `None` if there is no entry.
    async fn get_value(&self, key: &NodeKey) -> Result<Option<HeapRef>, Self::Error>;

    /// Fetch the direct dependency keys of `key`.
    async fn get_direct_deps(&self, key: &NodeKey) -> Result<Vec<NodeKey>, Self::Error>;

    /// All realized build configurations (ordered by key).
    async fn realized_configurations(&self) -> Result<Vec<ConfigurationKey>, Self::Error>;

    /// The build's primary target configuration, if any.
    async fn target_configuration(&self) -> Result<Option<ConfigurationKey>, Self::Error>;
}

pub use memory::{InMemoryGraphStore, InMemoryError};
pub use snapshot::{load_snapshot, GraphSnapshotFile, LoadedSnapshot, SnapshotError};
