//! # Tree: the registry of nodes and the reconciliation driver.
//!
//! The [`Tree`] owns every [`Node`], the event bus, the job pool and the root
//! cancellation token. Nodes and jobs hold child tokens of the root, so
//! [`Tree::close`] (or a shutdown signal in [`Tree::run`]) reaches all of them.
//!
//! ## Architecture
//! ```text
//! register / apply_diff / handle_diff            submit(job)
//!          │                                         │
//!          ▼                                         ▼
//!   RwLock<Vec<Arc<Node>>> ──► wakeup() ──► Node::wakeup() ...     JobPool ──► Reply ──► Report sinks
//!          │                        │
//!          │                        └─► AggregateError (busy excluded) ──► unwrap_err()
//!          ▼
//!        view() ──► View (serialized outside the locks)
//!
//! Node / Child / Job ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//! ```
//!
//! ## Rules
//! - The node list lock is never held across a node's wakeup or close
//! - Validation failures leave the tree unchanged
//! - Removal always happens; close failures are only reported

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio::{pin, select};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::builder::TreeBuilder;
use super::config::Config;
use super::diff::Diff;
use super::job::{Job, JobContext, JobPool};
use super::shutdown;
use super::view::View;
use crate::error::{AggregateError, DiffError, RegisterError, RuntimeError, SubmitError, WakeError};
use crate::events::{Bus, Event, EventKind};
use crate::node::{Node, NodeConfig, NodeState, Origin, RegisterOptions};
use crate::script::ScriptEngine;

/// Registry of nodes plus the job pool.
pub struct Tree {
    cfg: Config,
    engine: Arc<dyn ScriptEngine>,
    bus: Bus,
    token: CancellationToken,
    nodes: RwLock<Vec<Arc<Node>>>,
    errors: Mutex<Option<AggregateError>>,
    jobs: Arc<JobPool>,
}

impl Tree {
    /// Starts building a tree.
    ///
    /// ## Example
    /// ```rust
    /// use scriptvisor::{Config, FnEngine, Scope, Tree};
    ///
    /// #[tokio::main(flavor = "current_thread")]
    /// async fn main() {
    ///     let engine = FnEngine::new().script("ok-script", |_s: Scope| async { Ok(()) });
    ///     let tree = Tree::builder(Config::default(), engine).build();
    ///
    ///     tree.register("ingest", "ok-script", Default::default()).await.unwrap();
    ///     tree.wakeup().await.unwrap();
    ///     assert_eq!(tree.view().await.node("ingest").unwrap().status, "running");
    /// }
    /// ```
    pub fn builder(cfg: Config, engine: impl ScriptEngine) -> TreeBuilder {
        TreeBuilder::new(cfg, engine)
    }

    pub(crate) fn new(
        cfg: Config,
        engine: Arc<dyn ScriptEngine>,
        bus: Bus,
        token: CancellationToken,
        jobs: Arc<JobPool>,
    ) -> Self {
        Self {
            cfg,
            engine,
            bus,
            token,
            nodes: RwLock::new(Vec::new()),
            errors: Mutex::new(None),
            jobs,
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Root cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Receives every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn engine(&self) -> Arc<dyn ScriptEngine> {
        Arc::clone(&self.engine)
    }

    /// Registers a new node or updates the one already holding `key`.
    ///
    /// The script does not run here; the next [`wakeup`](Self::wakeup) runs it.
    /// When the node's last run failed, the update still lands and the failure is
    /// returned as [`RegisterError::Failed`].
    pub async fn register(
        self: &Arc<Self>,
        key: &str,
        source: impl Into<Vec<u8>>,
        opts: RegisterOptions,
    ) -> Result<(), RegisterError> {
        if self.token.is_cancelled() {
            return Err(RegisterError::Closed);
        }
        let cfg = NodeConfig::new(key, source, opts)?;
        self.insert(cfg).await
    }

    /// Registers a local script file.
    ///
    /// The key is the file stem, the dialect the extension.
    pub async fn register_file(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<(), RegisterError> {
        if self.token.is_cancelled() {
            return Err(RegisterError::Closed);
        }
        let cfg = NodeConfig::from_file(path).await?;
        self.insert(cfg).await
    }

    async fn insert(self: &Arc<Self>, cfg: NodeConfig) -> Result<(), RegisterError> {
        let mut nodes = self.nodes.write().await;
        if let Some(other) = nodes
            .iter()
            .find(|n| n.id() == cfg.id() && n.key() != cfg.key())
        {
            return Err(RegisterError::IdCollision {
                id: cfg.id(),
                key: cfg.key().to_string(),
                existing: other.key().to_string(),
            });
        }

        let Some(existing) = nodes.iter().find(|n| n.key() == cfg.key()).cloned() else {
            let node = Node::new(cfg, self);
            nodes.push(Arc::clone(&node));
            drop(nodes);
            self.bus
                .publish(Event::new(EventKind::NodeRegistered).with_node(node.key()));
            return Ok(());
        };
        drop(nodes);

        existing.update(cfg).await;
        match existing.last_error().await {
            Some(cause) => Err(RegisterError::Failed {
                key: existing.key().to_string(),
                cause,
            }),
            None => Ok(()),
        }
    }

    /// Removes the nodes holding `ids`, then closes them.
    pub async fn remove_by_id(&self, ids: &[u64]) -> Result<(), AggregateError> {
        let removed: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.write().await;
            let (gone, keep): (Vec<_>, Vec<_>) =
                nodes.drain(..).partition(|n| ids.contains(&n.id()));
            *nodes = keep;
            gone
        };

        let mut errs = AggregateError::new();
        for node in removed {
            if let Err(e) = node.close().await {
                errs.extend(e);
            }
            self.bus
                .publish(Event::new(EventKind::NodeRemoved).with_node(node.key()));
        }
        errs.into_result()
    }

    /// Runs one wakeup pass over every node, in registration order.
    ///
    /// Busy nodes and nodes removed mid-pass are skipped silently. The result is
    /// also kept for [`unwrap_err`](Self::unwrap_err).
    pub async fn wakeup(&self) -> Result<(), AggregateError> {
        let nodes = self.nodes().await;

        let mut errs = AggregateError::new();
        for node in nodes {
            match node.wakeup().await {
                Ok(()) => {}
                Err(e) if e.is_busy() || matches!(e, WakeError::Closed { .. }) => {}
                Err(e) => errs.push(node.key(), e),
            }
        }

        *self.errors.lock().await = (!errs.is_empty()).then(|| errs.clone());
        errs.into_result()
    }

    /// Errors of the last wakeup pass.
    pub async fn unwrap_err(&self) -> Option<AggregateError> {
        self.errors.lock().await.clone()
    }

    /// Looks a node up by key.
    pub async fn find(&self, key: &str) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .await
            .iter()
            .find(|n| n.key() == key)
            .cloned()
    }

    /// Snapshot of the node list, in registration order.
    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.clone()
    }

    /// Point-in-time copy of every node and child.
    pub async fn view(&self) -> View {
        let mut view = View::default();
        for node in self.nodes().await {
            view.nodes.push(node.view().await);
        }
        view
    }

    /// Applies removes, then updates, then wakes the tree and returns its view.
    ///
    /// An update whose non-empty hash equals the registered node's hash is
    /// skipped. An empty diff only returns the view.
    pub async fn apply_diff(self: &Arc<Self>, diff: Diff) -> View {
        if diff.is_empty() {
            return self.view().await;
        }

        if !diff.removes.is_empty() {
            if let Err(errs) = self.remove_by_id(&diff.removes).await {
                warn!("diff removes: {errs}");
            }
        }

        for update in diff.updates {
            if !update.hash.is_empty() {
                if let Some(node) = self.find(&update.name).await {
                    if node.hash().await == update.hash {
                        debug!(node = %update.name, "diff update unchanged");
                        continue;
                    }
                }
            }

            let opts = RegisterOptions {
                id: Some(update.id),
                hash: Some(update.hash),
                origin: Origin::Remote {
                    dialect: update.dialect,
                },
            };
            match self.register(&update.name, update.chunk, opts).await {
                Ok(()) => {}
                Err(e) if e.is_validation() => {
                    warn!(node = %update.name, label = e.as_label(), "diff update rejected: {e}")
                }
                Err(e) => debug!(node = %update.name, label = e.as_label(), "diff update: {e}"),
            }
        }

        if let Err(errs) = self.wakeup().await {
            debug!("diff wakeup: {errs}");
        }
        self.view().await
    }

    /// Decodes a JSON diff, applies it and returns the JSON view.
    ///
    /// An empty (or blank) body is a status request.
    pub async fn handle_diff(self: &Arc<Self>, body: &[u8]) -> Result<Vec<u8>, DiffError> {
        let diff = if body.iter().all(u8::is_ascii_whitespace) {
            Diff::default()
        } else {
            serde_json::from_slice(body).map_err(DiffError::Decode)?
        };
        let view = self.apply_diff(diff).await;
        serde_json::to_vec(&view).map_err(DiffError::Encode)
    }

    /// Queues a one-shot job; returns once it is accepted.
    pub async fn submit(self: &Arc<Self>, job: Job) -> Result<(), SubmitError> {
        if self.token.is_cancelled() {
            return Err(SubmitError::Closed);
        }
        let job = self.jobs.admit(job).await?;
        let timeout = self.cfg.job_timeout_for(job.timeout);
        let ctx = JobContext {
            engine: self.engine(),
            bus: self.bus.clone(),
            tree: Arc::downgrade(self),
            token: self.token.child_token(),
            timeout,
            deadline: deadline_after(timeout),
        };
        tokio::spawn(Arc::clone(&self.jobs).drive(job, ctx));
        Ok(())
    }

    /// Whether the execution `exec_id` is in flight.
    pub async fn have(&self, exec_id: &str) -> bool {
        self.jobs.have(exec_id).await
    }

    /// Cancels the root token and closes every node.
    pub async fn close(&self) -> Result<(), AggregateError> {
        self.token.cancel();
        let nodes: Vec<Arc<Node>> = self.nodes.write().await.drain(..).collect();

        let mut errs = AggregateError::new();
        for node in nodes {
            if let Err(e) = node.close().await {
                errs.extend(e);
            }
            self.bus
                .publish(Event::new(EventKind::NodeRemoved).with_node(node.key()));
        }
        errs.into_result()
    }

    /// Wakes the tree every `cfg.tick` until a termination signal or root
    /// cancellation, then closes it within `cfg.grace`.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let signal = shutdown::wait_for_shutdown_signal();
        pin!(signal);
        let mut ticker = self.cfg.tick_interval().map(|period| {
            let mut t = time::interval(period);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t
        });

        let mut signal_err = None;
        loop {
            select! {
                res = &mut signal => {
                    self.bus.publish(Event::new(EventKind::ShutdownRequested));
                    signal_err = res.err();
                    break;
                }
                _ = self.token.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    if let Err(errs) = self.wakeup().await {
                        debug!(failed = errs.len(), "tick: {errs}");
                    }
                }
            }
        }

        self.close_with_grace().await?;
        match signal_err {
            Some(e) => Err(RuntimeError::Signal(e)),
            None => Ok(()),
        }
    }

    async fn close_with_grace(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let nodes = self.nodes().await;

        match time::timeout(grace, self.close()).await {
            Ok(res) => {
                if let Err(errs) = res {
                    warn!(failed = errs.len(), "close: {errs}");
                }
                self.bus.publish(Event::new(EventKind::AllClosedWithin));
                Ok(())
            }
            Err(_elapsed) => {
                self.bus.publish(Event::new(EventKind::GraceExceeded));
                let mut stuck = Vec::new();
                for node in nodes {
                    if node.state().await != NodeState::Empty {
                        stuck.push(node.key().to_string());
                    }
                }
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("cfg", &self.cfg)
            .field("closed", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Deadline `timeout` from now, capped far in the future on overflow.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}
