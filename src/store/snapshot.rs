//! JSON graph snapshots.
//!
//! A snapshot is a frozen copy of a dependency graph and the objects hanging
//! off its nodes, used to run dumps outside the process that built the
//! graph. Objects are listed once with numeric ids; fields, node values and
//! the builtins root refer to them by id.
//!
//! ```json
//! {
//!   "objects": [
//!     { "id": 1, "class": "Package", "shape": { "type": "instance", "shallow_bytes": 48 },
//!       "fields": [ { "name": "targets", "target": 2 } ] },
//!     { "id": 2, "class": "HashMap",
//!       "shape": { "type": "collection", "header_bytes": 48, "capacity": 16, "entries": 3, "entry_bytes": 32 } }
//!   ],
//!   "nodes": [ { "key": { "kind": "package", "package": { "repository": "", "path": "foo" } }, "value": 1 } ],
//!   "configurations": [],
//!   "builtins": null
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::memory::InMemoryGraphStore;
use crate::types::{ConfigurationKey, HeapObject, HeapRef, NodeKey, ObjectCategory, Shape};

/// Error loading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The file could not be read.
    #[error("cannot read snapshot: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a valid snapshot document.
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    /// Two objects share an id.
    #[error("duplicate object id {0}")]
    DuplicateObject(u64),
    /// A reference to an object id that is not defined.
    #[error("reference to unknown object id {0}")]
    UnknownObject(u64),
    /// Object references form a cycle through this id.
    #[error("object reference cycle through id {0}")]
    ObjectCycle(u64),
    /// Two nodes share a key.
    #[error("duplicate node {0}")]
    DuplicateNode(NodeKey),
    /// A dependency on a node that is not defined.
    #[error("node {from} depends on unknown node {to}")]
    UnknownDependency {
        /// The depending node.
        from: NodeKey,
        /// The missing dependency.
        to: NodeKey,
    },
    /// Node dependencies form a cycle through this node.
    #[error("dependency cycle through node {0}")]
    DependencyCycle(NodeKey),
    /// The target configuration is not among the realized configurations.
    #[error("target configuration {0} is not a realized configuration")]
    UnknownConfiguration(String),
}

/// One object in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Snapshot-local id.
    pub id: u64,
    /// Class name.
    pub class: String,
    /// Domain category.
    #[serde(default)]
    pub category: ObjectCategory,
    /// Memory layout.
    pub shape: Shape,
    /// Outgoing references.
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
}

/// One field of a snapshot object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Field name.
    pub name: String,
    /// Id of the referenced object.
    pub target: u64,
    /// Whether the field is transient.
    #[serde(default)]
    pub transient: bool,
}

/// One graph node in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node key.
    pub key: NodeKey,
    /// Id of the node's value object.
    pub value: u64,
    /// Direct dependency keys, in order.
    #[serde(default)]
    pub deps: Vec<NodeKey>,
}

/// One realized build configuration in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    /// Options checksum; computed from `options` when absent.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Build options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Id of the configuration value object.
    pub value: u64,
}

impl ConfigurationRecord {
    /// The configuration key this record describes.
    pub fn key(&self) -> ConfigurationKey {
        match &self.checksum {
            Some(checksum) => ConfigurationKey::new(checksum.clone()),
            None => ConfigurationKey::from_options(&self.options),
        }
    }
}

/// Snapshot document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshotFile {
    /// All objects.
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    /// All graph nodes.
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    /// Realized build configurations (become configuration nodes).
    #[serde(default)]
    pub configurations: Vec<ConfigurationRecord>,
    /// Checksum of the primary target configuration.
    #[serde(default)]
    pub target_configuration: Option<String>,
    /// Id of the always-excluded builtins root.
    #[serde(default)]
    pub builtins: Option<u64>,
}

/// A snapshot turned into a store.
#[derive(Debug)]
pub struct LoadedSnapshot {
    /// The graph.
    pub store: InMemoryGraphStore,
    /// The builtins root, if the snapshot names one.
    pub builtins: Option<HeapRef>,
}

/// Read and materialize a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<LoadedSnapshot, SnapshotError> {
    let reader = BufReader::new(File::open(path)?);
    let file: GraphSnapshotFile = serde_json::from_reader(reader)?;
    file.into_store()
}

impl GraphSnapshotFile {
    /// Parse a snapshot document.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Materialize objects and nodes into an [`InMemoryGraphStore`].
    pub fn into_store(self) -> Result<LoadedSnapshot, SnapshotError> {
        let objects = materialize_objects(&self.objects)?;
        let lookup = |id: u64| {
            objects
                .get(&id)
                .cloned()
                .ok_or(SnapshotError::UnknownObject(id))
        };

        let mut store = InMemoryGraphStore::new();
        let mut defined: HashSet<NodeKey> = HashSet::new();

        for config in &self.configurations {
            let key = NodeKey::build_configuration(config.key());
            if !defined.insert(key.clone()) {
                return Err(SnapshotError::DuplicateNode(key));
            }
            store.add_node(key, lookup(config.value)?);
        }

        for node in &self.nodes {
            if !defined.insert(node.key.clone()) {
                return Err(SnapshotError::DuplicateNode(node.key.clone()));
            }
            store.add_node(node.key.clone(), lookup(node.value)?);
        }

        for node in &self.nodes {
            for dep in &node.deps {
                if !defined.contains(dep) {
                    return Err(SnapshotError::UnknownDependency {
                        from: node.key.clone(),
                        to: dep.clone(),
                    });
                }
                store.add_dep(&node.key, dep.clone());
            }
        }
        check_acyclic(&self.nodes)?;

        if let Some(checksum) = &self.target_configuration {
            let key = ConfigurationKey::new(checksum.clone());
            if !defined.contains(&NodeKey::build_configuration(key.clone())) {
                return Err(SnapshotError::UnknownConfiguration(checksum.clone()));
            }
            store.set_target_configuration(key);
        }

        let builtins = self.builtins.map(lookup).transpose()?;

        Ok(LoadedSnapshot { store, builtins })
    }
}

/// Reject dependency cycles, including a node depending on itself.
fn check_acyclic(nodes: &[NodeRecord]) -> Result<(), SnapshotError> {
    let deps: HashMap<&NodeKey, &[NodeKey]> = nodes
        .iter()
        .map(|node| (&node.key, node.deps.as_slice()))
        .collect();
    // false while on the current path, true once all dependencies are done.
    let mut finished: HashMap<&NodeKey, bool> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        if finished.contains_key(&node.key) {
            continue;
        }
        finished.insert(&node.key, false);
        let mut stack: Vec<(&NodeKey, usize)> = vec![(&node.key, 0)];

        while let Some((key, next)) = stack.last_mut() {
            let edges = deps.get(*key).copied().unwrap_or_default();
            match edges.get(*next) {
                Some(dep) => {
                    *next += 1;
                    match finished.get(dep) {
                        Some(false) => return Err(SnapshotError::DependencyCycle(dep.clone())),
                        Some(true) => {}
                        None => {
                            finished.insert(dep, false);
                            stack.push((dep, 0));
                        }
                    }
                }
                None => {
                    finished.insert(*key, true);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}

/// Build shared objects bottom-up, so every field target exists before the
/// object referring to it. Objects referenced from several places become a
/// single shared allocation.
fn materialize_objects(records: &[ObjectRecord]) -> Result<HashMap<u64, HeapRef>, SnapshotError> {
    let mut by_id: BTreeMap<u64, &ObjectRecord> = BTreeMap::new();
    for record in records {
        if by_id.insert(record.id, record).is_some() {
            return Err(SnapshotError::DuplicateObject(record.id));
        }
    }

    let mut built: HashMap<u64, HeapRef> = HashMap::with_capacity(records.len());
    let mut on_path: HashSet<u64> = HashSet::new();

    for &root in by_id.keys() {
        if built.contains_key(&root) {
            continue;
        }
        // (id, fields_ready): the second visit builds the object.
        let mut stack: Vec<(u64, bool)> = vec![(root, false)];
        while let Some((id, fields_ready)) = stack.pop() {
            if built.contains_key(&id) {
                continue;
            }
            let record = by_id.get(&id).ok_or(SnapshotError::UnknownObject(id))?;

            if fields_ready {
                let mut obj = HeapObject::new(record.class.as_str(), record.shape)
                    .with_category(record.category);
                for field in &record.fields {
                    let target = built
                        .get(&field.target)
                        .cloned()
                        .ok_or(SnapshotError::UnknownObject(field.target))?;
                    obj = if field.transient {
                        obj.with_transient_field(field.name.as_str(), target)
                    } else {
                        obj.with_field(field.name.as_str(), target)
                    };
                }
                on_path.remove(&id);
                built.insert(id, obj.into_ref());
                continue;
            }

            if !on_path.insert(id) {
                return Err(SnapshotError::ObjectCycle(id));
            }
            stack.push((id, true));
            for field in &record.fields {
                if built.contains_key(&field.target) {
                    continue;
                }
                if on_path.contains(&field.target) {
                    return Err(SnapshotError::ObjectCycle(field.target));
                }
                stack.push((field.target, false));
            }
        }
    }

    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GraphStore;
    use crate::types::PackageId;
    use std::sync::Arc;

    const DIAMOND: &str = r#"{
        "objects": [
            { "id": 1, "class": "Package", "shape": { "type": "instance", "shallow_bytes": 48 },
              "fields": [ { "name": "a", "target": 3 }, { "name": "b", "target": 3 } ] },
            { "id": 2, "class": "Package", "shape": { "type": "instance", "shallow_bytes": 48 },
              "fields": [ { "name": "cache", "target": 3, "transient": true } ] },
            { "id": 3, "class": "HashMap",
              "shape": { "type": "collection", "header_bytes": 48, "capacity": 16, "entries": 3, "entry_bytes": 32 } },
            { "id": 4, "class": "BuildConfigurationValue", "category": "configuration",
              "shape": { "type": "instance", "shallow_bytes": 64 } },
            { "id": 5, "class": "RuleClassProvider", "shape": { "type": "instance", "shallow_bytes": 128 } }
        ],
        "nodes": [
            { "key": { "kind": "package", "package": { "repository": "", "path": "foo" } },
              "value": 1,
              "deps": [ { "kind": "package", "package": { "repository": "", "path": "bar" } } ] },
            { "key": { "kind": "package", "package": { "repository": "", "path": "bar" } }, "value": 2 }
        ],
        "configurations": [ { "checksum": "8a1f00", "value": 4 } ],
        "target_configuration": "8a1f00",
        "builtins": 5
    }"#;

    #[tokio::test]
    async fn test_load_snapshot() {
        let loaded = GraphSnapshotFile::from_json(DIAMOND).unwrap().into_store().unwrap();
        let store = loaded.store;

        assert_eq!(store.num_nodes(), 3);
        assert_eq!(loaded.builtins.unwrap().class(), "RuleClassProvider");

        let foo = NodeKey::package(PackageId::main("foo"));
        let bar = NodeKey::package(PackageId::main("bar"));
        assert_eq!(store.get_direct_deps(&foo).await.unwrap(), vec![bar.clone()]);
        assert_eq!(
            store.target_configuration().await.unwrap(),
            Some(ConfigurationKey::new("8a1f00"))
        );

        // Object 3 is a single shared allocation.
        let foo_value = store.get_value(&foo).await.unwrap().unwrap();
        let bar_value = store.get_value(&bar).await.unwrap().unwrap();
        let via_foo = foo_value.fields()[0].target();
        assert!(Arc::ptr_eq(via_foo, foo_value.fields()[1].target()));
        assert!(Arc::ptr_eq(via_foo, bar_value.fields()[0].target()));
        assert!(bar_value.fields()[0].is_transient());
    }

    #[test]
    fn test_checksum_computed_from_options() {
        let mut options = BTreeMap::new();
        options.insert("cpu".to_string(), "k8".to_string());
        let record = ConfigurationRecord {
            checksum: None,
            options: options.clone(),
            value: 1,
        };
        assert_eq!(record.key(), ConfigurationKey::from_options(&options));
    }

    fn object(id: u64, targets: &[u64]) -> ObjectRecord {
        ObjectRecord {
            id,
            class: "Obj".to_string(),
            category: ObjectCategory::Plain,
            shape: Shape::Instance { shallow_bytes: 8 },
            fields: targets
                .iter()
                .map(|&target| FieldRecord {
                    name: format!("f{}", target),
                    target,
                    transient: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_rejects_cycles() {
        let file = GraphSnapshotFile {
            objects: vec![object(1, &[2]), object(2, &[3]), object(3, &[1])],
            ..Default::default()
        };
        assert!(matches!(file.into_store(), Err(SnapshotError::ObjectCycle(_))));

        let self_loop = GraphSnapshotFile {
            objects: vec![object(1, &[1])],
            ..Default::default()
        };
        assert!(matches!(self_loop.into_store(), Err(SnapshotError::ObjectCycle(1))));
    }

    #[test]
    fn test_rejects_dangling_references() {
        let file = GraphSnapshotFile {
            objects: vec![object(1, &[9])],
            ..Default::default()
        };
        assert!(matches!(file.into_store(), Err(SnapshotError::UnknownObject(9))));

        let dup = GraphSnapshotFile {
            objects: vec![object(1, &[]), object(1, &[])],
            ..Default::default()
        };
        assert!(matches!(dup.into_store(), Err(SnapshotError::DuplicateObject(1))));
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let file = GraphSnapshotFile {
            objects: vec![object(1, &[])],
            nodes: vec![NodeRecord {
                key: NodeKey::package(PackageId::main("a")),
                value: 1,
                deps: vec![NodeKey::package(PackageId::main("missing"))],
            }],
            ..Default::default()
        };
        assert!(matches!(
            file.into_store(),
            Err(SnapshotError::UnknownDependency { .. })
        ));
    }

    fn node(path: &str, deps: &[&str]) -> NodeRecord {
        NodeRecord {
            key: NodeKey::package(PackageId::main(path)),
            value: 1,
            deps: deps.iter().map(|d| NodeKey::package(PackageId::main(*d))).collect(),
        }
    }

    #[test]
    fn test_rejects_dependency_cycles() {
        let self_dep = GraphSnapshotFile {
            objects: vec![object(1, &[])],
            nodes: vec![node("a", &["a"])],
            ..Default::default()
        };
        match self_dep.into_store() {
            Err(SnapshotError::DependencyCycle(key)) => {
                assert_eq!(key, NodeKey::package(PackageId::main("a")))
            }
            other => panic!("expected a dependency cycle, got {:?}", other.map(|_| ())),
        }

        let two_node = GraphSnapshotFile {
            objects: vec![object(1, &[])],
            nodes: vec![node("root", &["a"]), node("a", &["b"]), node("b", &["a"])],
            ..Default::default()
        };
        assert!(matches!(
            two_node.into_store(),
            Err(SnapshotError::DependencyCycle(_))
        ));

        // Shared dependencies without a back edge are fine.
        let diamond = GraphSnapshotFile {
            objects: vec![object(1, &[])],
            nodes: vec![
                node("top", &["left", "right"]),
                node("left", &["bottom"]),
                node("right", &["bottom"]),
                node("bottom", &[]),
            ],
            ..Default::default()
        };
        assert!(diamond.into_store().is_ok());
    }
}
