//! Concurrent scheduler for the transitive policy.
//!
//! Every node of the root's transitive closure becomes one unit of work,
//! spawned on the tokio runtime. Units are memoized in a concurrent map keyed
//! by [`NodeKey`]: the first dependent to reach a node claims it and spawns
//! the unit, later dependents join the same shared future. A unit first
//! waits for all of its dependencies' units, then walks its own value into
//! the shared accountant.
//!
//! Two levels of deduplication are at work:
//!
//! - the memo table makes sure each node is processed once, however many
//!   paths lead to it;
//! - the identity set makes sure each object is attributed once, however
//!   many nodes reach it.
//!
//! Object walks are CPU-bound and run on the blocking pool, bounded by a
//! semaphore. The first failing unit cancels the dump's token; every pending
//! unit and running walk observes it and stops, and no partial tally is
//! returned.
//!
//! The graph must be acyclic: a dependency cycle would make units wait on
//! each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::accountant::MemoryAccountant;
use crate::error::DumpError;
use crate::metrics::DumpMetrics;
use crate::store::GraphStore;
use crate::types::{HeapRef, NodeKey};
use crate::visited::IdentitySet;
use crate::walker::{WalkInterrupted, WalkOptions, WalkSummary};

/// A memoized unit of work: processing one node and its closure.
type Unit = Shared<BoxFuture<'static, Result<(), DumpError>>>;

struct Inner<S> {
    store: Arc<S>,
    seen: Arc<IdentitySet>,
    accountant: Arc<MemoryAccountant>,
    walk: WalkOptions,
    metrics: Arc<dyn DumpMetrics>,
    units: DashMap<NodeKey, Unit>,
    walk_permits: Semaphore,
    cancel: CancellationToken,
    nodes_walked: AtomicU64,
    objects_walked: AtomicU64,
}

/// Runs the transitive policy for one dump.
pub struct TransitiveScheduler<S> {
    inner: Arc<Inner<S>>,
}

/// Outcome counters of a finished transitive run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitiveSummary {
    /// Distinct nodes whose value was walked.
    pub nodes: u64,
    /// Objects newly marked across all walks.
    pub objects: u64,
}

impl<S: GraphStore + 'static> TransitiveScheduler<S> {
    /// Create a scheduler.
    ///
    /// # Arguments
    /// * `store` - The graph
    /// * `seen` - Visitation set shared by all walks
    /// * `accountant` - Sink shared by all walks
    /// * `walk` - Walker settings
    /// * `metrics` - Progress hooks
    /// * `max_parallel_walks` - Bound on concurrently running walks
    /// * `cancel` - Token cancelled on the first failure (pass a child token
    ///   to keep failures from leaking to the caller's token)
    pub fn new(
        store: Arc<S>,
        seen: Arc<IdentitySet>,
        accountant: Arc<MemoryAccountant>,
        walk: WalkOptions,
        metrics: Arc<dyn DumpMetrics>,
        max_parallel_walks: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                seen,
                accountant,
                walk,
                metrics,
                units: DashMap::new(),
                walk_permits: Semaphore::new(max_parallel_walks.max(1)),
                cancel,
                nodes_walked: AtomicU64::new(0),
                objects_walked: AtomicU64::new(0),
            }),
        }
    }

    /// Process `root` and its whole closure; resolves once every unit is done.
    pub async fn run(&self, root: NodeKey) -> Result<TransitiveSummary, DumpError> {
        let result = self.inner.claim(root).await;
        if result.is_err() {
            self.inner.cancel.cancel();
        }
        result?;

        Ok(TransitiveSummary {
            nodes: self.inner.nodes_walked.load(Ordering::Acquire),
            objects: self.inner.objects_walked.load(Ordering::Acquire),
        })
    }

    /// Number of distinct nodes claimed so far.
    pub fn claimed_nodes(&self) -> usize {
        self.inner.units.len()
    }
}

impl<S: GraphStore + 'static> Inner<S> {
    /// Claim-or-join the unit for `key`.
    ///
    /// The map entry is held locked while the unit is spawned, so exactly one
    /// caller creates it.
    fn claim(self: &Arc<Self>, key: NodeKey) -> Unit {
        match self.units.entry(key) {
            Entry::Occupied(entry) => {
                self.metrics.node_joined(entry.key());
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                self.metrics.node_claimed(&key);

                let handle = tokio::spawn(Arc::clone(self).process(key.clone()));
                let unit = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(DumpError::interrupted(format!(
                            "unit for {} aborted: {}",
                            key, e
                        ))),
                    }
                }
                .boxed()
                .shared();

                entry.insert(unit.clone());
                unit
            }
        }
    }

    fn process(self: Arc<Self>, key: NodeKey) -> BoxFuture<'static, Result<(), DumpError>> {
        async move {
            let result = self.process_node(&key).await;
            if let Err(e) = &result {
                if !self.cancel.is_cancelled() {
                    warn!(node = %key, error = %e, "transitive unit failed, cancelling dump");
                }
                self.cancel.cancel();
            }
            result
        }
        .boxed()
    }

    async fn process_node(self: &Arc<Self>, key: &NodeKey) -> Result<(), DumpError> {
        self.check_cancelled()?;

        let value = self
            .store
            .get_value(key)
            .await
            .map_err(DumpError::from_store)?
            .ok_or_else(|| DumpError::interrupted(format!("node {} vanished from the graph", key)))?;
        let deps = self
            .store
            .get_direct_deps(key)
            .await
            .map_err(DumpError::from_store)?;

        trace!(node = %key, deps = deps.len(), "scheduling dependencies");
        let units: Vec<Unit> = deps.into_iter().map(|dep| self.claim(dep)).collect();

        tokio::select! {
            joined = try_join_all(units) => {
                joined?;
            }
            _ = self.cancel.cancelled() => {
                return Err(cancelled());
            }
        }

        // Dependencies are fully walked; only now may this node claim objects.
        let _permit = self
            .walk_permits
            .acquire()
            .await
            .map_err(|_| DumpError::interrupted("walk pool closed"))?;
        self.check_cancelled()?;

        self.metrics.walk_started(key);
        let inner = Arc::clone(self);
        let summary = tokio::task::spawn_blocking(move || inner.walk_value(&value))
            .await
            .map_err(|e| DumpError::interrupted(format!("walk of {} aborted: {}", key, e)))??;
        self.metrics.walk_finished(key, summary.visited);

        self.nodes_walked.fetch_add(1, Ordering::AcqRel);
        self.objects_walked.fetch_add(summary.visited, Ordering::AcqRel);
        trace!(node = %key, objects = summary.visited, "node walked");
        Ok(())
    }

    fn walk_value(&self, value: &HeapRef) -> Result<WalkSummary, WalkInterrupted> {
        self.walk
            .walker(&self.seen, true, self.accountant.as_ref())
            .with_cancellation(&self.cancel)
            .traverse(value)
    }

    fn check_cancelled(&self) -> Result<(), DumpError> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }
}

fn cancelled() -> DumpError {
    DumpError::interrupted("dump cancelled")
}
