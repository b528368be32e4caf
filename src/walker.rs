//! Object reachability walker.
//!
//! Given a root object, the walker enumerates every object reachable through
//! its fields that is not yet marked in the shared [`IdentitySet`], marking
//! each one as it goes. Marked objects are optionally handed to an
//! [`ObjectSink`] (normally the memory accountant).
//!
//! Several walkers may run at once against the same set, from different
//! roots: the atomic test-and-mark in the set decides which walker owns each
//! shared object.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::types::{HeapObject, HeapRef, ObjectCategory};
use crate::visited::IdentitySet;

/// How many objects are visited between two cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Receiver of objects attributed by a walker.
pub trait ObjectSink: Send + Sync {
    /// Called once per newly marked object.
    fn observe(&self, obj: &HeapRef);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObjectSink for NoopSink {
    fn observe(&self, _obj: &HeapRef) {}
}

/// Domain-specific rule telling the walker to skip certain objects.
///
/// An ignored object is neither marked, reported, nor descended into.
pub trait TraversalRule: Send + Sync + fmt::Debug {
    /// Whether the walker should skip `obj`.
    fn ignores(&self, obj: &HeapObject) -> bool;
}

/// Skips build infrastructure objects that the caller asked not to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildObjectRule {
    report_configuration: bool,
    report_precomputed: bool,
    report_workspace_status: bool,
}

impl BuildObjectRule {
    /// Create a rule; each flag set to `false` skips that category.
    pub fn new(
        report_configuration: bool,
        report_precomputed: bool,
        report_workspace_status: bool,
    ) -> Self {
        Self {
            report_configuration,
            report_precomputed,
            report_workspace_status,
        }
    }
}

impl Default for BuildObjectRule {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

impl TraversalRule for BuildObjectRule {
    fn ignores(&self, obj: &HeapObject) -> bool {
        match obj.category() {
            ObjectCategory::Plain => false,
            ObjectCategory::Configuration => !self.report_configuration,
            ObjectCategory::Precomputed => !self.report_precomputed,
            ObjectCategory::WorkspaceStatus => !self.report_workspace_status,
        }
    }
}

/// Raised when a walk observes cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("object walk interrupted")]
pub struct WalkInterrupted;

/// Counts produced by one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Objects newly marked by this walk.
    pub visited: u64,
    /// Objects handed to the sink.
    pub reported: u64,
}

/// Owned walker settings shared by every walk of one dump.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Skip rules.
    pub rules: Vec<Arc<dyn TraversalRule>>,
    /// Follow transient fields.
    pub traverse_transient: bool,
    /// Only report classes containing this substring.
    pub needle: Option<String>,
}

impl WalkOptions {
    /// Build a walker over `seen` with these settings.
    pub fn walker<'a>(
        &'a self,
        seen: &'a IdentitySet,
        report: bool,
        sink: &'a dyn ObjectSink,
    ) -> ObjectGraphWalker<'a> {
        ObjectGraphWalker::new(
            &self.rules,
            self.traverse_transient,
            seen,
            report,
            sink,
            self.needle.as_deref(),
        )
    }
}

/// Walks the object graph below a root.
pub struct ObjectGraphWalker<'a> {
    rules: &'a [Arc<dyn TraversalRule>],
    traverse_transient: bool,
    seen: &'a IdentitySet,
    report: bool,
    sink: &'a dyn ObjectSink,
    needle: Option<&'a str>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ObjectGraphWalker<'a> {
    /// Create a walker.
    ///
    /// # Arguments
    /// * `rules` - Skip rules consulted before marking each object
    /// * `traverse_transient` - Whether transient fields are followed
    /// * `seen` - Shared visitation set
    /// * `report` - Whether marked objects are handed to `sink`
    /// * `sink` - Receiver of attributed objects
    /// * `needle` - If set, only objects whose class name contains it are reported
    pub fn new(
        rules: &'a [Arc<dyn TraversalRule>],
        traverse_transient: bool,
        seen: &'a IdentitySet,
        report: bool,
        sink: &'a dyn ObjectSink,
        needle: Option<&'a str>,
    ) -> Self {
        Self {
            rules,
            traverse_transient,
            seen,
            report,
            sink,
            needle,
            cancel: None,
        }
    }

    /// Stop early with [`WalkInterrupted`] once `token` is cancelled.
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Walk everything reachable from `root`.
    ///
    /// Uses an explicit stack, so arbitrarily deep object chains do not
    /// overflow the thread stack.
    pub fn traverse(&self, root: &HeapRef) -> Result<WalkSummary, WalkInterrupted> {
        let mut summary = WalkSummary::default();
        let mut stack: Vec<HeapRef> = vec![HeapRef::clone(root)];

        while let Some(obj) = stack.pop() {
            if self.rules.iter().any(|rule| rule.ignores(&obj)) {
                continue;
            }
            if !self.seen.mark_if_absent(&obj) {
                continue;
            }

            summary.visited += 1;
            if summary.visited % CANCEL_CHECK_INTERVAL == 0 {
                self.check_cancelled()?;
            }

            if self.report && self.matches_needle(&obj) {
                self.sink.observe(&obj);
                summary.reported += 1;
            }

            // Push in reverse so fields are visited in declaration order.
            for field in obj.fields().iter().rev() {
                if field.is_transient() && !self.traverse_transient {
                    continue;
                }
                if !self.seen.contains(field.target()) {
                    stack.push(HeapRef::clone(field.target()));
                }
            }
        }

        self.check_cancelled()?;
        Ok(summary)
    }

    fn matches_needle(&self, obj: &HeapObject) -> bool {
        self.needle.map_or(true, |needle| obj.class().contains(needle))
    }

    fn check_cancelled(&self) -> Result<(), WalkInterrupted> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(WalkInterrupted),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        classes: Mutex<Vec<String>>,
    }

    impl ObjectSink for RecordingSink {
        fn observe(&self, obj: &HeapRef) {
            self.classes.lock().push(obj.class().to_string());
        }
    }

    fn no_rules() -> Vec<Arc<dyn TraversalRule>> {
        Vec::new()
    }

    #[test]
    fn test_reports_each_reachable_object_once() {
        let shared = HeapObject::instance("Shared", 8).into_ref();
        let root = HeapObject::instance("Root", 16)
            .with_field("a", Arc::clone(&shared))
            .with_field("b", Arc::clone(&shared))
            .into_ref();

        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        let rules = no_rules();
        let summary = ObjectGraphWalker::new(&rules, true, &seen, true, &sink, None)
            .traverse(&root)
            .unwrap();

        assert_eq!(summary.visited, 2);
        assert_eq!(*sink.classes.lock(), vec!["Root", "Shared"]);
    }

    #[test]
    fn test_skips_already_marked_objects() {
        let excluded = HeapObject::instance("Excluded", 8).into_ref();
        let root = HeapObject::instance("Root", 16)
            .with_field("x", Arc::clone(&excluded))
            .into_ref();

        let seen = IdentitySet::new();
        seen.mark_if_absent(&excluded);

        let sink = RecordingSink::default();
        let rules = no_rules();
        ObjectGraphWalker::new(&rules, true, &seen, true, &sink, None)
            .traverse(&root)
            .unwrap();

        assert_eq!(*sink.classes.lock(), vec!["Root"]);
    }

    #[test]
    fn test_transient_fields_can_be_skipped() {
        let cached = HeapObject::instance("Cache", 8).into_ref();
        let root = HeapObject::instance("Root", 16)
            .with_transient_field("cache", cached)
            .into_ref();

        let rules = no_rules();
        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        ObjectGraphWalker::new(&rules, false, &seen, true, &sink, None)
            .traverse(&root)
            .unwrap();
        assert_eq!(*sink.classes.lock(), vec!["Root"]);

        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        ObjectGraphWalker::new(&rules, true, &seen, true, &sink, None)
            .traverse(&root)
            .unwrap();
        assert_eq!(*sink.classes.lock(), vec!["Root", "Cache"]);
    }

    #[test]
    fn test_build_rule_skips_configuration_subtree() {
        let options = HeapObject::instance("BuildOptions", 64).into_ref();
        let config = HeapObject::instance("BuildConfigurationValue", 32)
            .with_category(ObjectCategory::Configuration)
            .with_field("options", options)
            .into_ref();
        let root = HeapObject::instance("ConfiguredTarget", 16)
            .with_field("config", Arc::clone(&config))
            .into_ref();

        let rules: Vec<Arc<dyn TraversalRule>> =
            vec![Arc::new(BuildObjectRule::new(false, true, true))];
        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        ObjectGraphWalker::new(&rules, true, &seen, true, &sink, None)
            .traverse(&root)
            .unwrap();

        assert_eq!(*sink.classes.lock(), vec!["ConfiguredTarget"]);
        assert!(!seen.contains(&config));
    }

    #[test]
    fn test_needle_restricts_reporting_not_marking() {
        let leaf = HeapObject::instance("StringLeaf", 8).into_ref();
        let root = HeapObject::instance("Root", 16)
            .with_field("leaf", Arc::clone(&leaf))
            .into_ref();

        let rules = no_rules();
        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        let summary = ObjectGraphWalker::new(&rules, true, &seen, true, &sink, Some("String"))
            .traverse(&root)
            .unwrap();

        assert_eq!(summary.visited, 2);
        assert_eq!(summary.reported, 1);
        assert_eq!(*sink.classes.lock(), vec!["StringLeaf"]);
        assert!(seen.contains(&root));
    }

    #[test]
    fn test_disabled_sink_only_marks() {
        let root = HeapObject::instance("Root", 16)
            .with_field("x", HeapObject::instance("X", 8).into_ref())
            .into_ref();

        let rules = no_rules();
        let seen = IdentitySet::new();
        let sink = RecordingSink::default();
        let summary = ObjectGraphWalker::new(&rules, true, &seen, false, &sink, None)
            .traverse(&root)
            .unwrap();

        assert_eq!(summary.visited, 2);
        assert!(sink.classes.lock().is_empty());
    }

    #[test]
    fn test_cancelled_walk_fails() {
        let root = HeapObject::instance("Root", 16).into_ref();
        let token = CancellationToken::new();
        token.cancel();

        let rules = no_rules();
        let seen = IdentitySet::new();
        let result = ObjectGraphWalker::new(&rules, true, &seen, true, &NoopSink, None)
            .with_cancellation(&token)
            .traverse(&root);

        assert_eq!(result, Err(WalkInterrupted));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut current = HeapObject::instance("Link", 16).into_ref();
        for _ in 0..200_000 {
            current = HeapObject::instance("Link", 16)
                .with_field("next", current)
                .into_ref();
        }

        let rules = no_rules();
        let seen = IdentitySet::new();
        let summary = ObjectGraphWalker::new(&rules, true, &seen, false, &NoopSink, None)
            .traverse(&current)
            .unwrap();
        assert_eq!(summary.visited, 200_001);

        drop(seen);
        drop(current);
    }
}
