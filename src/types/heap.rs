//! Object model for values attached to graph nodes.
//!
//! A node's value is a [`HeapRef`]: a shared pointer to a [`HeapObject`]
//! whose fields point at further objects. Objects are compared by
//! **identity** (pointer address) when attributing memory; two objects with
//! equal contents are still two objects.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared handle to an object.
pub type HeapRef = Arc<HeapObject>;

/// Identity of an object: the address of its allocation.
///
/// Only meaningful while the object is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Identity of the object behind `obj`.
    pub fn of(obj: &HeapRef) -> Self {
        Self::of_object(obj)
    }

    /// Identity of an object reached through a plain borrow.
    ///
    /// Agrees with [`ObjectId::of`] for objects living behind a [`HeapRef`].
    pub fn of_object(obj: &HeapObject) -> Self {
        Self(obj as *const HeapObject as *const () as usize)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Domain category of an object, used by traversal rules to skip
/// infrastructure that should not be billed to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    /// Ordinary object.
    #[default]
    Plain,
    /// Build configuration object.
    Configuration,
    /// Precomputed (injected) value.
    Precomputed,
    /// Workspace status object.
    WorkspaceStatus,
}

/// Memory layout of an object, as seen by measurers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    /// A plain instance with a fixed shallow size.
    Instance {
        /// Bytes occupied by the instance itself.
        shallow_bytes: u64,
    },
    /// An array of fixed-size elements.
    Array {
        /// Bytes per element.
        element_bytes: u32,
        /// Number of elements.
        length: u64,
    },
    /// A hash-based or growable container.
    Collection {
        /// Bytes occupied by the container object itself.
        header_bytes: u32,
        /// Number of slots in the backing table.
        capacity: u64,
        /// Number of live entries.
        entries: u64,
        /// Bytes per internal entry node (0 for open-addressing tables).
        entry_bytes: u32,
    },
}

/// A reference from one object to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: Arc<str>,
    transient: bool,
    target: HeapRef,
}

impl Field {
    /// Name of the field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the field is transient (not part of the persistent state).
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// The referenced object.
    pub fn target(&self) -> &HeapRef {
        &self.target
    }
}

/// An object attached to (or reachable from) a graph node value.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    class: Arc<str>,
    category: ObjectCategory,
    shape: Shape,
    fields: Vec<Field>,
}

impl HeapObject {
    /// Create an object with the given class and shape and no fields.
    pub fn new(class: impl Into<Arc<str>>, shape: Shape) -> Self {
        Self {
            class: class.into(),
            category: ObjectCategory::Plain,
            shape,
            fields: Vec::new(),
        }
    }

    /// Plain instance of `shallow_bytes` bytes.
    pub fn instance(class: impl Into<Arc<str>>, shallow_bytes: u64) -> Self {
        Self::new(class, Shape::Instance { shallow_bytes })
    }

    /// Array of `length` elements of `element_bytes` bytes each.
    pub fn array(class: impl Into<Arc<str>>, element_bytes: u32, length: u64) -> Self {
        Self::new(
            class,
            Shape::Array {
                element_bytes,
                length,
            },
        )
    }

    /// Set the category.
    pub fn with_category(mut self, category: ObjectCategory) -> Self {
        self.category = category;
        self
    }

    /// Add a regular field.
    pub fn with_field(mut self, name: impl Into<Arc<str>>, target: HeapRef) -> Self {
        self.fields.push(Field {
            name: name.into(),
            transient: false,
            target,
        });
        self
    }

    /// Add a transient field.
    pub fn with_transient_field(mut self, name: impl Into<Arc<str>>, target: HeapRef) -> Self {
        self.fields.push(Field {
            name: name.into(),
            transient: true,
            target,
        });
        self
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> HeapRef {
        Arc::new(self)
    }

    /// Class name.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Shared class name, cheap to clone into per-class tables.
    pub fn class_arc(&self) -> &Arc<str> {
        &self.class
    }

    /// Domain category.
    pub fn category(&self) -> ObjectCategory {
        self.category
    }

    /// Memory layout.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Outgoing references, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

// Dropping the last handle to a long chain would otherwise recurse once per
// link. Uniquely owned targets are detached onto a work list instead.
impl Drop for HeapObject {
    fn drop(&mut self) {
        let mut pending: Vec<Field> = std::mem::take(&mut self.fields);
        while let Some(field) = pending.pop() {
            if let Ok(mut target) = Arc::try_unwrap(field.target) {
                pending.append(&mut target.fields);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_differs_for_equal_objects() {
        let a = HeapObject::instance("Foo", 10).into_ref();
        let b = HeapObject::instance("Foo", 10).into_ref();

        assert_eq!(*a, *b);
        assert_ne!(ObjectId::of(&a), ObjectId::of(&b));
        assert_eq!(ObjectId::of(&a), ObjectId::of(&Arc::clone(&a)));
    }

    #[test]
    fn test_builder_keeps_field_order() {
        let leaf = HeapObject::instance("Leaf", 16).into_ref();
        let obj = HeapObject::instance("Node", 24)
            .with_field("first", Arc::clone(&leaf))
            .with_transient_field("cache", leaf)
            .with_category(ObjectCategory::Configuration);

        assert_eq!(obj.class(), "Node");
        assert_eq!(obj.category(), ObjectCategory::Configuration);
        assert_eq!(obj.fields().len(), 2);
        assert_eq!(obj.fields()[0].name(), "first");
        assert!(!obj.fields()[0].is_transient());
        assert!(obj.fields()[1].is_transient());
    }

    #[test]
    fn test_object_id_matches_for_borrowed_object() {
        let obj = HeapObject::instance("Foo", 10).into_ref();
        assert_eq!(ObjectId::of(&obj), ObjectId::of_object(&obj));
    }

    #[test]
    fn test_dropping_deep_chain_does_not_recurse() {
        let mut head = HeapObject::instance("Link", 16).into_ref();
        for _ in 1..500_000 {
            head = HeapObject::instance("Link", 16).with_field("next", head).into_ref();
        }
        drop(head);
    }

    #[test]
    fn test_drop_keeps_shared_targets_alive() {
        let shared = HeapObject::instance("Shared", 8).into_ref();
        let owner = HeapObject::instance("Owner", 16)
            .with_field("a", Arc::clone(&shared))
            .with_field("b", Arc::clone(&shared))
            .into_ref();

        assert_eq!(Arc::strong_count(&shared), 3);
        drop(owner);
        assert_eq!(Arc::strong_count(&shared), 1);
        assert_eq!(shared.class(), "Shared");
    }
}
