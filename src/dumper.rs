//! Memory dump entry point.
//!
//! [`MemoryDumper`] resolves a subject to a node key, runs the requested
//! traversal policy against a [`GraphStore`], and returns the tally together
//! with its rendering.
//!
//! Every dump starts from a fresh visitation set, pre-seeded with the objects
//! reachable from the builtins root so interpreter-global state is never
//! attributed to any node.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::accountant::{Measurer, MemoryAccountant};
use crate::config::DumperConfig;
use crate::error::{DumpError, ResolutionError};
use crate::metrics::{DumpMetrics, NoOpMetrics};
use crate::policy::{DisplayMode, MemoryMode, ReportOptions, SubjectKind, TraversalPolicy};
use crate::render::render;
use crate::resolve::resolve_subject;
use crate::store::GraphStore;
use crate::transitive::TransitiveScheduler;
use crate::types::{HeapRef, MemoryStats, NodeKey};
use crate::visited::IdentitySet;
use crate::walker::{BuildObjectRule, NoopSink, TraversalRule, WalkOptions};

/// Result of one dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpReport {
    /// The node that was measured.
    pub key: NodeKey,
    /// The policy used.
    pub policy: TraversalPolicy,
    /// The display form of `rendered`.
    pub display: DisplayMode,
    /// The tally.
    pub stats: MemoryStats,
    /// `stats` rendered in the `display` form.
    pub rendered: String,
}

/// Measures the retained memory of build graph nodes.
pub struct MemoryDumper<S: GraphStore> {
    store: Arc<S>,
    config: DumperConfig,
    measurers: Vec<Arc<dyn Measurer>>,
    builtins: Option<HeapRef>,
    metrics: Arc<dyn DumpMetrics>,
    cancel: CancellationToken,
}

impl<S: GraphStore + 'static> MemoryDumper<S> {
    /// Create a dumper over `store`.
    pub fn new(store: Arc<S>, config: DumperConfig) -> Self {
        Self {
            store,
            config,
            measurers: MemoryAccountant::default_measurers(),
            builtins: None,
            metrics: Arc::new(NoOpMetrics),
            cancel: CancellationToken::new(),
        }
    }

    /// Exclude everything reachable from `root` from every dump.
    pub fn with_builtins(mut self, root: HeapRef) -> Self {
        self.builtins = Some(root);
        self
    }

    /// Replace the size measurers.
    pub fn with_measurers(mut self, measurers: Vec<Arc<dyn Measurer>>) -> Self {
        self.measurers = measurers;
        self
    }

    /// Set the metrics hooks.
    pub fn with_metrics(mut self, metrics: Arc<dyn DumpMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use `token` to cancel dumps from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels running dumps.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Dump with default report options.
    pub async fn run_dump(
        &self,
        kind: SubjectKind,
        subject: &str,
        policy: TraversalPolicy,
        display: DisplayMode,
    ) -> Result<DumpReport, DumpError> {
        self.dump(&MemoryMode::new(policy, display, kind, subject))
            .await
    }

    /// Parse a mode string and dump it.
    pub async fn dump_str(&self, mode: &str) -> Result<DumpReport, DumpError> {
        let mode: MemoryMode = mode.parse().map_err(ResolutionError::from)?;
        self.dump(&mode).await
    }

    /// Dump a parsed mode.
    pub async fn dump(&self, mode: &MemoryMode) -> Result<DumpReport, DumpError> {
        let span = info_span!(
            "memory_dump",
            subject = %mode.subject,
            kind = %mode.subject_kind,
            policy = %mode.policy,
            display = %mode.display,
            objects = tracing::field::Empty,
            bytes = tracing::field::Empty,
        );

        async {
            let key =
                resolve_subject(self.store.as_ref(), mode.subject_kind, &mode.subject).await?;
            debug!(node = %key, "subject resolved");
            let stats = self
                .tally(&key, mode.policy, &mode.report, mode.needle.as_deref())
                .await?;
            let rendered = render(&stats, mode.display);

            Ok(DumpReport {
                key,
                policy: mode.policy,
                display: mode.display,
                stats,
                rendered,
            })
        }
        .instrument(span)
        .await
    }

    /// Tally `key` under `policy`. `key` must be present in the graph.
    pub async fn collect(
        &self,
        key: &NodeKey,
        policy: TraversalPolicy,
        report: &ReportOptions,
        needle: Option<&str>,
    ) -> Result<MemoryStats, DumpError> {
        let span = info_span!(
            "memory_dump",
            node = %key,
            policy = %policy,
            objects = tracing::field::Empty,
            bytes = tracing::field::Empty,
        );
        self.tally(key, policy, report, needle).instrument(span).await
    }

    async fn tally(
        &self,
        key: &NodeKey,
        policy: TraversalPolicy,
        report: &ReportOptions,
        needle: Option<&str>,
    ) -> Result<MemoryStats, DumpError> {
        let started = Instant::now();
        let walk = walk_options(report, needle);

        let result = async {
            let seen = self.builtins_set(&walk).await?;
            debug!(preseeded = seen.len(), "visitation set prepared");

            match policy {
                TraversalPolicy::Isolated => self.collect_isolated(key, &walk, seen).await,
                TraversalPolicy::Reachable => self.collect_reachable(key, &walk, seen).await,
                TraversalPolicy::Transitive => self.collect_transitive(key, walk, seen).await,
            }
        }
        .await;

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                warn!(node = %key, error = %e, "memory dump failed");
                return Err(e);
            }
        };

        let span = tracing::Span::current();
        span.record("objects", stats.object_count);
        span.record("bytes", stats.memory_use);
        info!(
            objects = stats.object_count,
            bytes = stats.memory_use,
            classes = stats.count_by_class.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "memory dump complete"
        );
        Ok(stats)
    }

    /// Visitation set holding everything reachable from the builtins root.
    async fn builtins_set(&self, walk: &WalkOptions) -> Result<IdentitySet, DumpError> {
        let root = match &self.builtins {
            Some(root) if self.config.exclude_builtins => Arc::clone(root),
            _ => return Ok(IdentitySet::new()),
        };
        let seeding = WalkOptions {
            traverse_transient: true,
            needle: None,
            ..walk.clone()
        };
        let cancel = self.cancel.clone();

        run_blocking("builtins walk", move || {
            let seen = IdentitySet::new();
            seeding
                .walker(&seen, false, &NoopSink)
                .with_cancellation(&cancel)
                .traverse(&root)?;
            Ok(seen)
        })
        .await
    }

    async fn collect_isolated(
        &self,
        key: &NodeKey,
        walk: &WalkOptions,
        seen: IdentitySet,
    ) -> Result<MemoryStats, DumpError> {
        let deps = self
            .store
            .get_direct_deps(key)
            .await
            .map_err(DumpError::from_store)?;
        let mut excluded = Vec::with_capacity(deps.len());
        for dep in &deps {
            excluded.push(self.node_value(dep).await?);
        }
        let value = self.node_value(key).await?;

        self.walk_excluding(walk, seen, excluded, value).await
    }

    async fn collect_reachable(
        &self,
        key: &NodeKey,
        walk: &WalkOptions,
        seen: IdentitySet,
    ) -> Result<MemoryStats, DumpError> {
        let value = self.node_value(key).await?;
        self.walk_excluding(walk, seen, Vec::new(), value).await
    }

    /// Mark everything reachable from `excluded` without reporting it, then
    /// tally whatever `value` still reaches.
    async fn walk_excluding(
        &self,
        walk: &WalkOptions,
        seen: IdentitySet,
        excluded: Vec<HeapRef>,
        value: HeapRef,
    ) -> Result<MemoryStats, DumpError> {
        let walk = walk.clone();
        let accountant = MemoryAccountant::new(self.measurers.clone());
        let cancel = self.cancel.clone();

        run_blocking("object walk", move || {
            for root in &excluded {
                walk.walker(&seen, false, &NoopSink)
                    .with_cancellation(&cancel)
                    .traverse(root)?;
            }
            if !excluded.is_empty() {
                debug!(deps = excluded.len(), marked = seen.len(), "dependencies excluded");
            }

            walk.walker(&seen, true, &accountant)
                .with_cancellation(&cancel)
                .traverse(&value)?;
            Ok(accountant.stats())
        })
        .await
    }

    async fn collect_transitive(
        &self,
        key: &NodeKey,
        walk: WalkOptions,
        seen: IdentitySet,
    ) -> Result<MemoryStats, DumpError> {
        let accountant = Arc::new(MemoryAccountant::new(self.measurers.clone()));
        let scheduler = TransitiveScheduler::new(
            Arc::clone(&self.store),
            Arc::new(seen),
            Arc::clone(&accountant),
            walk,
            Arc::clone(&self.metrics),
            self.config.max_parallel_walks,
            self.cancel.child_token(),
        );

        let summary = scheduler.run(key.clone()).await?;
        debug!(nodes = summary.nodes, objects = summary.objects, "closure walked");
        Ok(accountant.stats())
    }

    async fn node_value(&self, key: &NodeKey) -> Result<HeapRef, DumpError> {
        self.store
            .get_value(key)
            .await
            .map_err(DumpError::from_store)?
            .ok_or_else(|| DumpError::interrupted(format!("node {} vanished from the graph", key)))
    }
}

/// Run a synchronous object walk on the blocking pool, inside the caller's span.
async fn run_blocking<T, F>(what: &'static str, walk: F) -> Result<T, DumpError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DumpError> + Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(walk))
        .await
        .map_err(|e| DumpError::interrupted(format!("{} aborted: {}", what, e)))?
}

fn walk_options(report: &ReportOptions, needle: Option<&str>) -> WalkOptions {
    let rule: Arc<dyn TraversalRule> = Arc::new(BuildObjectRule::new(
        report.configuration,
        report.precomputed,
        report.workspace_status,
    ));
    WalkOptions {
        rules: vec![rule],
        traverse_transient: report.transient,
        needle: needle.map(str::to_string),
    }
}
