//! Observation hooks for dump progress.
//!
//! The scheduler reports node-level events through [`DumpMetrics`]. The
//! default [`NoOpMetrics`] discards them; [`TestMetrics`] keeps an ordered
//! event log so tests can check scheduling properties.

use parking_lot::Mutex;

use crate::types::NodeKey;

/// Receiver of dump progress events. Must tolerate concurrent calls.
pub trait DumpMetrics: Send + Sync {
    /// A unit of work for `key` was created (first claim).
    fn node_claimed(&self, key: &NodeKey);

    /// A dependent joined the existing unit of work for `key`.
    fn node_joined(&self, key: &NodeKey);

    /// The walk over `key`'s own value is starting.
    fn walk_started(&self, key: &NodeKey);

    /// The walk over `key`'s own value finished, newly marking `objects` objects.
    fn walk_finished(&self, key: &NodeKey, objects: u64);
}

/// No-op metrics implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl DumpMetrics for NoOpMetrics {
    fn node_claimed(&self, _key: &NodeKey) {}
    fn node_joined(&self, _key: &NodeKey) {}
    fn walk_started(&self, _key: &NodeKey) {}
    fn walk_finished(&self, _key: &NodeKey, _objects: u64) {}
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEvent {
    /// See [`DumpMetrics::node_claimed`].
    Claimed(NodeKey),
    /// See [`DumpMetrics::node_joined`].
    Joined(NodeKey),
    /// See [`DumpMetrics::walk_started`].
    WalkStarted(NodeKey),
    /// See [`DumpMetrics::walk_finished`].
    WalkFinished(NodeKey, u64),
}

/// Metrics implementation that records every event in order.
#[derive(Debug, Default)]
pub struct TestMetrics {
    events: Mutex<Vec<DumpEvent>>,
}

impl TestMetrics {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, in the order they were recorded.
    pub fn events(&self) -> Vec<DumpEvent> {
        self.events.lock().clone()
    }

    /// Number of times `key` was claimed.
    pub fn claims_of(&self, key: &NodeKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, DumpEvent::Claimed(k) if k == key))
            .count()
    }

    /// Number of walks over `key`'s value.
    pub fn walks_of(&self, key: &NodeKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, DumpEvent::WalkStarted(k) if k == key))
            .count()
    }

    /// Position of the walk-start event for `key`.
    pub fn walk_start_index(&self, key: &NodeKey) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|e| matches!(e, DumpEvent::WalkStarted(k) if k == key))
    }

    /// Position of the walk-finish event for `key`.
    pub fn walk_finish_index(&self, key: &NodeKey) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|e| matches!(e, DumpEvent::WalkFinished(k, _) if k == key))
    }

    fn push(&self, event: DumpEvent) {
        self.events.lock().push(event);
    }
}

impl DumpMetrics for TestMetrics {
    fn node_claimed(&self, key: &NodeKey) {
        self.push(DumpEvent::Claimed(key.clone()));
    }

    fn node_joined(&self, key: &NodeKey) {
        self.push(DumpEvent::Joined(key.clone()));
    }

    fn walk_started(&self, key: &NodeKey) {
        self.push(DumpEvent::WalkStarted(key.clone()));
    }

    fn walk_finished(&self, key: &NodeKey, objects: u64) {
        self.push(DumpEvent::WalkFinished(key.clone(), objects));
    }
}
