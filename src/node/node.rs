//! # Node: one registered script and the children it declares.
//!
//! ## Wakeup
//! ```text
//! wakeup()
//!   ├─► busy?            → Err(Busy), nothing touched
//!   ├─► hold busy guard (released on drop, unwinding included)
//!   └─► match state
//!         ├─ Undefined                 → Err(Undefined)
//!         ├─ Empty                     → Err(Closed)
//!         ├─ Running | Panic | Disable → no-op
//!         ├─ Register | Fail           → run ─► classify
//!         └─ Update                    → reset children ─► run ─► sweep ─► classify
//! ```
//!
//! ## Rules
//! - No lock is held while the script runs
//! - A config that lands while the script runs bumps the revision; the stale
//!   result is then not applied and the node stays in `Update`
//! - Sweep closes every child the script did not re-declare, then evicts it;
//!   close failures stay on the child and are logged

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::Tree;
use crate::core::runner::{Panicked, guarded, run_once};
use crate::core::view::NodeView;
use crate::error::{AggregateError, ChildError, ScriptError, WakeError};
use crate::events::{Bus, Event, EventKind};
use crate::node::child::Child;
use crate::node::config::NodeConfig;
use crate::node::state::{BusyGuard, NodeState};
use crate::script::{Scope, ScriptEngine};

/// Process-wide source of node serials; a re-registered key gets a fresh one.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

struct NodeInner {
    config: NodeConfig,
    state: NodeState,
    revision: u64,
    since: Option<DateTime<Utc>>,
    failed: bool,
    cause: Option<String>,
    links: Vec<String>,
}

/// A registered script and its children.
pub struct Node {
    key: Arc<str>,
    serial: u64,
    id: AtomicU64,
    busy: AtomicBool,
    token: CancellationToken,
    protected: bool,
    engine: Arc<dyn ScriptEngine>,
    bus: Bus,
    tree: Weak<Tree>,
    inner: Mutex<NodeInner>,
    children: RwLock<Vec<Arc<Child>>>,
}

impl Node {
    pub(crate) fn new(config: NodeConfig, tree: &Arc<Tree>) -> Arc<Self> {
        Arc::new(Self {
            key: Arc::from(config.key()),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            id: AtomicU64::new(config.id()),
            busy: AtomicBool::new(false),
            token: tree.token().child_token(),
            protected: tree.config().protected,
            engine: tree.engine(),
            bus: tree.bus().clone(),
            tree: Arc::downgrade(tree),
            inner: Mutex::new(NodeInner {
                config,
                state: NodeState::Register,
                revision: 0,
                since: None,
                failed: false,
                cause: None,
                links: Vec::new(),
            }),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Unique node name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Id of the current config.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    /// Cancellation token bounding this node's session and child resources.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a wakeup pass is in progress.
    pub fn is_waking(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Current primary state.
    pub async fn state(&self) -> NodeState {
        self.inner.lock().await.state
    }

    /// Hash of the current config.
    pub async fn hash(&self) -> String {
        self.inner.lock().await.config.hash().to_string()
    }

    /// Last failure recorded by classification (`Fail` or `Panic`).
    pub async fn last_error(&self) -> Option<String> {
        let g = self.inner.lock().await;
        if g.failed { g.cause.clone() } else { None }
    }

    /// Keys of nodes imported by this node's script.
    pub async fn links(&self) -> Vec<String> {
        self.inner.lock().await.links.clone()
    }

    /// Children in declaration order.
    pub async fn children(&self) -> Vec<Arc<Child>> {
        self.children.read().await.clone()
    }

    /// Looks a child up by name.
    pub async fn child(&self, name: &str) -> Option<Arc<Child>> {
        self.children
            .read()
            .await
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Runs one reconciliation pass.
    ///
    /// At most one pass runs at a time; a concurrent call returns [`WakeError::Busy`]
    /// without touching any state.
    pub async fn wakeup(self: &Arc<Self>) -> Result<(), WakeError> {
        let Some(_guard) = BusyGuard::try_acquire(&self.busy) else {
            return Err(WakeError::Busy {
                key: self.key.to_string(),
            });
        };

        let (state, source, revision) = {
            let g = self.inner.lock().await;
            (g.state, Arc::clone(g.config.source()), g.revision)
        };

        match state {
            NodeState::Undefined => Err(WakeError::Undefined {
                key: self.key.to_string(),
            }),
            NodeState::Empty => Err(WakeError::Closed {
                key: self.key.to_string(),
            }),
            state if !state.needs_run() => Ok(()),
            NodeState::Update => {
                for child in self.children().await {
                    child.mark_reset().await;
                }
                let res = self.execute(&source).await;
                if let Err(errs) = self.sweep().await {
                    warn!(node = %self.key, "sweep: {errs}");
                }
                self.classify(res, revision).await
            }
            _ => {
                let res = self.execute(&source).await;
                self.classify(res, revision).await
            }
        }
    }

    /// Replaces the config and marks the node for reconciliation.
    pub(crate) async fn update(&self, config: NodeConfig) {
        let mut g = self.inner.lock().await;
        if g.state == NodeState::Empty {
            return;
        }
        self.id.store(config.id(), Ordering::Release);
        g.config = config;
        g.state = NodeState::Update;
        g.revision += 1;
        drop(g);
        self.bus
            .publish(Event::new(EventKind::NodeUpdated).with_node(Arc::clone(&self.key)));
    }

    /// Cancels the session and closes every child.
    ///
    /// Best effort: every child is closed even if some fail; failures are returned together.
    pub(crate) async fn close(&self) -> Result<(), AggregateError> {
        self.token.cancel();
        let children: Vec<Arc<Child>> = self.children.write().await.drain(..).collect();

        let mut errs = AggregateError::new();
        for child in children {
            if let Err(e) = child.close().await {
                errs.push(format!("{}/{}", self.key, child.name()), e);
            }
        }

        let mut g = self.inner.lock().await;
        g.state = NodeState::Empty;
        g.config.clear_source();
        drop(g);
        errs.into_result()
    }

    /// Returns the child `name`, defining it on first use.
    ///
    /// An existing child is returned only if `kind` matches its tag; it is then
    /// considered re-declared by the current run.
    pub(crate) async fn define_child(&self, name: &str, kind: &str) -> Result<Arc<Child>, ChildError> {
        if let Some(existing) = self.child(name).await {
            return self.redeclare(existing, kind).await;
        }

        let mut children = self.children.write().await;
        if let Some(existing) = children.iter().find(|c| c.name() == name).cloned() {
            drop(children);
            return self.redeclare(existing, kind).await;
        }
        let child = Arc::new(Child::new(
            name,
            kind,
            Arc::clone(&self.key),
            self.serial,
            self.protected,
            self.bus.clone(),
        ));
        children.push(Arc::clone(&child));
        Ok(child)
    }

    pub(crate) async fn link(&self, key: &str) {
        let mut g = self.inner.lock().await;
        if !g.links.iter().any(|l| l == key) {
            g.links.push(key.to_string());
        }
    }

    /// Identity used for child ownership checks.
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn tree(&self) -> Weak<Tree> {
        Weak::clone(&self.tree)
    }

    pub(crate) async fn view(&self) -> NodeView {
        let (mut view, children) = {
            let g = self.inner.lock().await;
            let uptime = match (g.state, g.since) {
                (NodeState::Running, Some(since)) => {
                    (Utc::now() - since).num_seconds().max(0) as u64
                }
                _ => 0,
            };
            let view = NodeView {
                id: g.config.id(),
                name: self.key.to_string(),
                hash: g.config.hash().to_string(),
                links: g.links.clone(),
                origin: g.config.origin().label().to_string(),
                dialect: g.config.origin().dialect().to_string(),
                status: g.state.as_str().to_string(),
                waking: self.is_waking(),
                since: g.since,
                uptime,
                failed: g.failed,
                cause: g.cause.clone(),
                children: Vec::new(),
            };
            (view, self.children.read().await.clone())
        };
        for child in children {
            view.children.push(child.view().await);
        }
        view
    }

    async fn redeclare(&self, existing: Arc<Child>, kind: &str) -> Result<Arc<Child>, ChildError> {
        if existing.kind() != kind {
            return Err(ChildError::TypeMismatch {
                name: existing.name().to_string(),
                bound: existing.kind().to_string(),
                declared: kind.to_string(),
            });
        }
        existing.unmark_reset().await;
        Ok(existing)
    }

    async fn execute(self: &Arc<Self>, source: &[u8]) -> Result<Result<(), ScriptError>, Panicked> {
        let scope = Scope::for_node(Arc::clone(self));
        guarded(
            self.protected,
            run_once(self.engine.as_ref(), source, &self.key, scope, None),
        )
        .await
    }

    /// Closes and evicts every child still marked reset.
    async fn sweep(&self) -> Result<(), AggregateError> {
        let mut stale = Vec::new();
        for child in self.children().await {
            if child.is_reset().await {
                stale.push(child);
            }
        }

        let mut errs = AggregateError::new();
        for child in &stale {
            if let Err(e) = child.close().await {
                errs.push(format!("{}/{}", self.key, child.name()), e);
            }
            self.bus.publish(
                Event::new(EventKind::ChildEvicted)
                    .with_node(Arc::clone(&self.key))
                    .with_child(child.name()),
            );
        }
        if !stale.is_empty() {
            self.children
                .write()
                .await
                .retain(|c| !stale.iter().any(|s| Arc::ptr_eq(s, c)));
        }
        errs.into_result()
    }

    /// Folds the outcome of a run into the node state.
    async fn classify(
        &self,
        res: Result<Result<(), ScriptError>, Panicked>,
        revision: u64,
    ) -> Result<(), WakeError> {
        let mut g = self.inner.lock().await;
        let applies = g.revision == revision && g.state != NodeState::Empty;
        if !applies {
            debug!(node = %self.key, "config changed during run; result dropped");
        }

        let (kind, outcome) = match res {
            Ok(Ok(())) => {
                if applies {
                    g.state = NodeState::Running;
                    g.failed = false;
                    g.cause = None;
                    g.since = Some(Utc::now());
                    g.config.clear_source();
                }
                (EventKind::NodeRunning, Ok(()))
            }
            Ok(Err(ScriptError::Disabled { reason })) => {
                if applies {
                    g.state = NodeState::Disable;
                    g.failed = false;
                    g.cause = Some(reason.clone());
                    g.since = None;
                    g.config.clear_source();
                }
                (EventKind::NodeDisabled, Ok(()))
            }
            Ok(Err(cause)) => {
                if applies {
                    g.state = NodeState::Fail;
                    g.failed = true;
                    g.cause = Some(cause.to_string());
                    g.since = None;
                }
                (
                    EventKind::NodeFailed,
                    Err(WakeError::Failed {
                        key: self.key.to_string(),
                        cause,
                    }),
                )
            }
            Err(Panicked(message)) => {
                if applies {
                    g.state = NodeState::Panic;
                    g.failed = true;
                    g.cause = Some(format!("panic: {message}"));
                    g.since = None;
                }
                (
                    EventKind::NodePanicked,
                    Err(WakeError::Panicked {
                        key: self.key.to_string(),
                        cause: message,
                    }),
                )
            }
        };
        let reason = g.cause.clone();
        drop(g);

        let mut ev = Event::new(kind).with_node(Arc::clone(&self.key));
        if let Some(reason) = reason.filter(|_| applies) {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
        outcome
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("id", &self.id())
            .field("waking", &self.is_waking())
            .finish_non_exhaustive()
    }
}
