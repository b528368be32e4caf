//! In-memory graph store.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::GraphStore;
use crate::types::{ConfigurationKey, HeapRef, NodeKey};

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),
    /// A fetch of this node was configured to fail.
    #[error("Fetch interrupted at node {0}")]
    Interrupted(NodeKey),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    value: HeapRef,
    deps: Vec<NodeKey>,
}

/// In-memory graph store.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. Dependency
/// lists keep insertion order, duplicates ignored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    nodes: BTreeMap<NodeKey, NodeEntry>,
    target_configuration: Option<ConfigurationKey>,
    interrupt_on: BTreeSet<NodeKey>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, replacing the value of an existing one (dependencies kept).
    pub fn add_node(&mut self, key: NodeKey, value: HeapRef) {
        match self.nodes.get_mut(&key) {
            Some(entry) => entry.value = value,
            None => {
                self.nodes.insert(key, NodeEntry { value, deps: Vec::new() });
            }
        }
    }

    /// Add a dependency edge `from -> to`.
    ///
    /// Returns `false` if `from` is not in the store or the edge already exists.
    pub fn add_dep(&mut self, from: &NodeKey, to: NodeKey) -> bool {
        match self.nodes.get_mut(from) {
            Some(entry) if !entry.deps.contains(&to) => {
                entry.deps.push(to);
                true
            }
            _ => false,
        }
    }

    /// Set the primary target configuration.
    pub fn set_target_configuration(&mut self, configuration: ConfigurationKey) {
        self.target_configuration = Some(configuration);
    }

    /// Make every fetch touching `key` fail with [`InMemoryError::Interrupted`].
    pub fn interrupt_on(&mut self, key: NodeKey) {
        self.interrupt_on.insert(key);
    }

    /// Get number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Get number of dependency edges.
    pub fn num_edges(&self) -> usize {
        self.nodes.values().map(|e| e.deps.len()).sum()
    }

    /// All node keys, in key order.
    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.keys()
    }

    fn check_interrupt(&self, key: &NodeKey) -> Result<(), InMemoryError> {
        if self.interrupt_on.contains(key) {
            return Err(InMemoryError::Interrupted(key.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    type Error = InMemoryError;

    async fn contains(&self, key: &NodeKey) -> Result<bool, Self::Error> {
        Ok(self.nodes.contains_key(key))
    }

    async fn get_value(&self, key: &NodeKey) -> Result<Option<HeapRef>, Self::Error> {
        self.check_interrupt(key)?;
        Ok(self.nodes.get(key).map(|e| HeapRef::clone(&e.value)))
    }

    async fn get_direct_deps(&self, key: &NodeKey) -> Result<Vec<NodeKey>, Self::Error> {
        self.check_interrupt(key)?;
        self.nodes
            .get(key)
            .map(|e| e.deps.clone())
            .ok_or_else(|| InMemoryError::NodeNotFound(key.clone()))
    }

    async fn realized_configurations(&self) -> Result<Vec<ConfigurationKey>, Self::Error> {
        Ok(self
            .nodes
            .keys()
            .filter_map(NodeKey::as_configuration)
            .cloned()
            .collect())
    }

    async fn target_configuration(&self) -> Result<Option<ConfigurationKey>, Self::Error> {
        Ok(self.target_configuration.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeapObject, PackageId};

    fn pkg(path: &str) -> NodeKey {
        NodeKey::package(PackageId::main(path))
    }

    fn value(class: &str) -> HeapRef {
        HeapObject::instance(class, 8).into_ref()
    }

    #[tokio::test]
    async fn test_add_and_get_node() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(pkg("a"), value("Package"));

        assert!(store.contains(&pkg("a")).await.unwrap());
        assert!(!store.contains(&pkg("b")).await.unwrap());

        let retrieved = store.get_value(&pkg("a")).await.unwrap();
        assert_eq!(retrieved.unwrap().class(), "Package");
        assert!(store.get_value(&pkg("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deps_keep_insertion_order() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(pkg("a"), value("A"));

        assert!(store.add_dep(&pkg("a"), pkg("z")));
        assert!(store.add_dep(&pkg("a"), pkg("b")));
        assert!(!store.add_dep(&pkg("a"), pkg("z")));
        assert!(!store.add_dep(&pkg("missing"), pkg("b")));

        let deps = store.get_direct_deps(&pkg("a")).await.unwrap();
        assert_eq!(deps, vec![pkg("z"), pkg("b")]);
        assert_eq!(store.num_edges(), 2);
    }

    #[tokio::test]
    async fn test_realized_configurations() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(NodeKey::build_configuration(ConfigurationKey::new("bbb")), value("Cfg"));
        store.add_node(NodeKey::build_configuration(ConfigurationKey::new("aaa")), value("Cfg"));
        store.add_node(pkg("a"), value("A"));

        let configs = store.realized_configurations().await.unwrap();
        assert_eq!(configs, vec![ConfigurationKey::new("aaa"), ConfigurationKey::new("bbb")]);
        assert!(store.target_configuration().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupt_injection() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(pkg("a"), value("A"));
        store.interrupt_on(pkg("a"));

        assert!(matches!(
            store.get_value(&pkg("a")).await,
            Err(InMemoryError::Interrupted(_))
        ));
        assert!(store.contains(&pkg("a")).await.unwrap());
    }
}
