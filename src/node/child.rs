//! # Child resources owned by a node.
//!
//! A [`Child`] wraps one externally supplied [`Resource`] declared by a node's
//! script. It is defined lazily by name, bound to a resource, started/closed by
//! the script (through [`Scope`](crate::Scope)) and closed by the update sweep
//! once the script stops declaring it.
//!
//! ## State
//! ```text
//! Defined ── start ok ──► Succeed ── start (reloadable) ──► reload ──► Succeed/Failed
//!    │                       │
//!    └─ start err ─► Failed  └─ close ──► Stopped      (close err/panic ─► StopFailed)
//! ```
//!
//! ## Rules
//! - The type tag given at first declaration never changes
//! - Lifecycle calls on one child are serialized (`ops` lock); state reads never
//!   wait for a resource call
//! - `close` is idempotent and always catches panics from the resource
//! - `start` catches panics only under protected execution

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::runner::{Panicked, guarded};
use crate::core::view::ChildView;
use crate::error::ChildError;
use crate::events::{Bus, Event, EventKind};

/// Error type returned by resource calls.
pub type ResourceError = Box<dyn std::error::Error + Send + Sync>;

/// # Externally supplied resource managed as a child.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use scriptvisor::{Resource, ResourceError};
///
/// struct Listener;
///
/// #[async_trait]
/// impl Resource for Listener {
///     async fn start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
///         Ok(())
///     }
///
///     async fn close(&self) -> Result<(), ResourceError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Starts the resource. `ctx` is cancelled when the owning node closes.
    async fn start(&self, ctx: CancellationToken) -> Result<(), ResourceError>;

    /// Releases the resource.
    async fn close(&self) -> Result<(), ResourceError>;

    /// Optional in-place reload capability.
    fn as_reload(&self) -> Option<&dyn Reload> {
        None
    }

    /// Free-form metadata reported in views.
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Optional capability: apply new settings without a close/start cycle.
#[async_trait]
pub trait Reload: Send + Sync {
    /// Reloads a started resource.
    async fn reload(&self, ctx: CancellationToken) -> Result<(), ResourceError>;
}

/// Lifecycle state of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Declared, not started.
    Defined,
    /// Started (or reloaded) successfully.
    Succeed,
    /// Start or reload failed.
    Failed,
    /// Closed.
    Stopped,
    /// Closed, but the close failed or panicked.
    StopFailed,
}

impl ChildState {
    /// Status text used in views.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildState::Defined => "defined",
            ChildState::Succeed => "succeed",
            ChildState::Failed => "failed",
            ChildState::Stopped => "stopped",
            ChildState::StopFailed => "stopped|failed",
        }
    }

    /// Whether the resource may hold something that needs closing.
    fn was_started(&self) -> bool {
        matches!(self, ChildState::Succeed | ChildState::Failed)
    }

    /// Whether the child is closed.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ChildState::Stopped | ChildState::StopFailed)
    }
}

struct ChildInner {
    state: ChildState,
    reset: bool,
    private: bool,
    cause: Option<String>,
    reloads: u32,
    data: Option<Arc<dyn Resource>>,
}

/// One named resource declared by a node.
pub struct Child {
    name: String,
    kind: String,
    from: Arc<str>,
    owner: u64,
    protected: bool,
    bus: Bus,
    ops: Mutex<()>,
    inner: Mutex<ChildInner>,
}

/// Identity of the script acting on a child.
///
/// `node` is the serial of the calling node, `None` for jobs. Keys are kept for
/// error messages only; ownership is decided by the serial.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Caller<'a> {
    pub(crate) key: &'a str,
    pub(crate) node: Option<u64>,
}

/// Outcome of one resource call, before it is folded into the child state.
enum Step {
    Started,
    Reloaded,
}

impl Child {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        from: Arc<str>,
        owner: u64,
        protected: bool,
        bus: Bus,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            from,
            owner,
            protected,
            bus,
            ops: Mutex::new(()),
            inner: Mutex::new(ChildInner {
                state: ChildState::Defined,
                reset: false,
                private: false,
                cause: None,
                reloads: 0,
                data: None,
            }),
        }
    }

    /// Child name, unique within its node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag given at first declaration.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Key of the declaring node.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Current state.
    pub async fn state(&self) -> ChildState {
        self.inner.lock().await.state
    }

    /// Last recorded error.
    pub async fn cause(&self) -> Option<String> {
        self.inner.lock().await.cause.clone()
    }

    /// Whether access is restricted to the owning node.
    pub async fn is_private(&self) -> bool {
        self.inner.lock().await.private
    }

    /// Number of successful in-place reloads.
    pub async fn reloads(&self) -> u32 {
        self.inner.lock().await.reloads
    }

    /// Attaches a resource.
    ///
    /// A previously started resource is closed first; the child returns to `Defined`.
    /// Callers outside the crate go through [`Scope::bind`](crate::Scope::bind).
    pub(crate) async fn bind(&self, resource: Arc<dyn Resource>) {
        let _op = self.ops.lock().await;
        let previous = {
            let mut g = self.inner.lock().await;
            let started = g.state.was_started();
            let previous = g.data.take().filter(|_| started);
            g.data = Some(resource);
            g.state = ChildState::Defined;
            g.cause = None;
            previous
        };
        if let Some(old) = previous {
            match guarded(true, old.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(node = %self.from, child = %self.name, "close on rebind: {e}"),
                Err(Panicked(m)) => {
                    warn!(node = %self.from, child = %self.name, "close on rebind panicked: {m}")
                }
            }
        }
    }

    /// Starts (or reloads) the resource on behalf of `caller`.
    ///
    /// Checks, in order: a resource is bound, `caller` owns the child, `caller`
    /// is not disabled. The resource is never touched when a check fails.
    pub(crate) async fn start(
        &self,
        caller: Caller<'_>,
        caller_disabled: bool,
        ctx: CancellationToken,
    ) -> Result<(), ChildError> {
        let _op = self.ops.lock().await;
        let (data, state) = {
            let g = self.inner.lock().await;
            (g.data.clone(), g.state)
        };

        let Some(data) = data else {
            return Err(ChildError::NotFound {
                name: self.name.clone(),
            });
        };
        self.check_owner(caller)?;
        if caller_disabled {
            return Err(ChildError::Disabled {
                node: caller.key.to_string(),
            });
        }

        if state == ChildState::Succeed {
            if let Some(reloader) = data.as_reload() {
                let res = guarded(self.protected, reloader.reload(ctx)).await;
                return self.settle(res, Step::Reloaded).await;
            }
        }
        if state.was_started() {
            if let Err(cause) = Self::close_resource(data.as_ref()).await {
                warn!(node = %self.from, child = %self.name, "close before restart: {cause}");
            }
        }
        let res = guarded(self.protected, data.start(ctx)).await;
        self.settle(res, Step::Started).await
    }

    /// Closes the resource.
    ///
    /// Idempotent: a stopped child is left as is. Errors and panics raised by the
    /// resource end in `StopFailed` with the cause recorded, and are returned.
    pub(crate) async fn close(&self) -> Result<(), ChildError> {
        let _op = self.ops.lock().await;
        let data = {
            let mut g = self.inner.lock().await;
            if g.state.is_stopped() {
                return Ok(());
            }
            match g.data.clone() {
                Some(data) => data,
                None => {
                    g.state = ChildState::Stopped;
                    return Ok(());
                }
            }
        };

        let res = Self::close_resource(data.as_ref()).await;
        let mut g = self.inner.lock().await;
        match res {
            Ok(()) => {
                g.state = ChildState::Stopped;
                drop(g);
                self.publish(EventKind::ChildClosed, None);
                Ok(())
            }
            Err(cause) => {
                g.state = ChildState::StopFailed;
                g.cause = Some(cause.clone());
                drop(g);
                self.publish(EventKind::ChildFailed, Some(&cause));
                Err(ChildError::Failed {
                    name: self.name.clone(),
                    cause,
                })
            }
        }
    }

    /// Fails with `Ownership` unless `caller` is the node that declared this child.
    pub(crate) fn check_owner(&self, caller: Caller<'_>) -> Result<(), ChildError> {
        if self.is_owned_by(caller.node) {
            Ok(())
        } else {
            Err(ChildError::Ownership {
                name: self.name.clone(),
                owner: self.from.to_string(),
                caller: caller.key.to_string(),
            })
        }
    }

    pub(crate) fn is_owned_by(&self, node: Option<u64>) -> bool {
        node == Some(self.owner)
    }

    pub(crate) async fn set_private(&self) {
        self.inner.lock().await.private = true;
    }

    pub(crate) async fn mark_reset(&self) {
        self.inner.lock().await.reset = true;
    }

    pub(crate) async fn unmark_reset(&self) {
        self.inner.lock().await.reset = false;
    }

    pub(crate) async fn is_reset(&self) -> bool {
        self.inner.lock().await.reset
    }

    pub(crate) async fn view(&self) -> ChildView {
        let g = self.inner.lock().await;
        ChildView {
            name: self.name.clone(),
            kind: self.kind.clone(),
            status: g.state.as_str().to_string(),
            from: self.from.to_string(),
            private: g.private,
            cause: g.cause.clone(),
            reloads: g.reloads,
            metadata: g.data.as_ref().map(|d| d.metadata()).unwrap_or_default(),
        }
    }

    async fn close_resource(data: &dyn Resource) -> Result<(), String> {
        match guarded(true, data.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(Panicked(m)) => Err(format!("panic: {m}")),
        }
    }

    async fn settle(
        &self,
        res: Result<Result<(), ResourceError>, Panicked>,
        step: Step,
    ) -> Result<(), ChildError> {
        let cause = match res {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(Panicked(m)) => Some(format!("panic: {m}")),
        };

        let mut g = self.inner.lock().await;
        match cause {
            None => {
                g.state = ChildState::Succeed;
                g.cause = None;
                let kind = match step {
                    Step::Started => EventKind::ChildStarted,
                    Step::Reloaded => {
                        g.reloads += 1;
                        EventKind::ChildReloaded
                    }
                };
                drop(g);
                self.publish(kind, None);
                Ok(())
            }
            Some(cause) => {
                g.state = ChildState::Failed;
                g.cause = Some(cause.clone());
                drop(g);
                self.publish(EventKind::ChildFailed, Some(&cause));
                Err(ChildError::Failed {
                    name: self.name.clone(),
                    cause,
                })
            }
        }
    }

    fn publish(&self, kind: EventKind, reason: Option<&str>) {
        let mut ev = Event::new(kind)
            .with_node(Arc::clone(&self.from))
            .with_child(self.name.as_str());
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
    }
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Child")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        closes: AtomicUsize,
        fail_start: bool,
        panic_close: bool,
    }

    #[async_trait]
    impl Resource for Counting {
        async fn start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err("port in use".into());
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), ResourceError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.panic_close {
                panic!("close exploded");
            }
            Ok(())
        }
    }

    struct Reloading {
        reloads: AtomicUsize,
    }

    #[async_trait]
    impl Resource for Reloading {
        async fn start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), ResourceError> {
            Ok(())
        }

        fn as_reload(&self) -> Option<&dyn Reload> {
            Some(self)
        }
    }

    #[async_trait]
    impl Reload for Reloading {
        async fn reload(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const OWNER: u64 = 7;

    fn me() -> Caller<'static> {
        Caller {
            key: "n",
            node: Some(OWNER),
        }
    }

    fn child(owner: &str) -> Child {
        Child::new("listener", "tcp", Arc::from(owner), OWNER, true, Bus::new(8))
    }

    #[tokio::test]
    async fn start_without_resource_is_not_found() {
        let c = child("n");
        let err = c.start(me(), false, CancellationToken::new()).await;
        assert!(matches!(err, Err(ChildError::NotFound { .. })));
        assert_eq!(c.state().await, ChildState::Defined);
    }

    #[tokio::test]
    async fn start_from_other_owner_never_touches_resource() {
        let c = child("n");
        let res = Arc::new(Counting::default());
        c.bind(res.clone()).await;

        let intruder = Caller {
            key: "intruder",
            node: Some(OWNER + 1),
        };
        let err = c.start(intruder, false, CancellationToken::new()).await;
        assert!(matches!(err, Err(ChildError::Ownership { .. })));

        let job = Caller { key: "n", node: None };
        let err = c.start(job, false, CancellationToken::new()).await;
        assert!(matches!(err, Err(ChildError::Ownership { .. })));
        assert_eq!(res.starts.load(Ordering::SeqCst), 0);
        assert_eq!(c.state().await, ChildState::Defined);
    }

    #[tokio::test]
    async fn start_when_disabled_is_rejected() {
        let c = child("n");
        let res = Arc::new(Counting::default());
        c.bind(res.clone()).await;
        let err = c.start(me(), true, CancellationToken::new()).await;
        assert!(matches!(err, Err(ChildError::Disabled { .. })));
        assert_eq!(res.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restart_closes_then_starts() {
        let c = child("n");
        let res = Arc::new(Counting::default());
        c.bind(res.clone()).await;

        c.start(me(), false, CancellationToken::new()).await.unwrap();
        c.start(me(), false, CancellationToken::new()).await.unwrap();
        assert_eq!(res.starts.load(Ordering::SeqCst), 2);
        assert_eq!(res.closes.load(Ordering::SeqCst), 1);
        assert_eq!(c.state().await, ChildState::Succeed);
    }

    #[tokio::test]
    async fn reloadable_resource_reloads_in_place() {
        let c = child("n");
        let res = Arc::new(Reloading {
            reloads: AtomicUsize::new(0),
        });
        c.bind(res.clone()).await;

        c.start(me(), false, CancellationToken::new()).await.unwrap();
        c.start(me(), false, CancellationToken::new()).await.unwrap();
        assert_eq!(res.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(c.reloads().await, 1);
    }

    #[tokio::test]
    async fn failed_start_records_cause() {
        let c = child("n");
        c.bind(Arc::new(Counting {
            fail_start: true,
            ..Counting::default()
        }))
        .await;

        let err = c.start(me(), false, CancellationToken::new()).await;
        assert!(matches!(err, Err(ChildError::Failed { .. })));
        assert_eq!(c.state().await, ChildState::Failed);
        assert_eq!(c.cause().await.as_deref(), Some("port in use"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let c = child("n");
        let res = Arc::new(Counting::default());
        c.bind(res.clone()).await;
        c.start(me(), false, CancellationToken::new()).await.unwrap();

        c.close().await.unwrap();
        c.close().await.unwrap();
        assert_eq!(res.closes.load(Ordering::SeqCst), 1);
        assert_eq!(c.state().await, ChildState::Stopped);
    }

    #[tokio::test]
    async fn close_panic_becomes_stop_failed() {
        let c = child("n");
        c.bind(Arc::new(Counting {
            panic_close: true,
            ..Counting::default()
        }))
        .await;

        assert!(c.close().await.is_err());
        assert_eq!(c.state().await, ChildState::StopFailed);
        let cause = c.cause().await.unwrap();
        assert!(cause.contains("close exploded"), "{cause}");
    }

    #[tokio::test]
    async fn rebind_closes_started_resource() {
        let c = child("n");
        let first = Arc::new(Counting::default());
        c.bind(first.clone()).await;
        c.start(me(), false, CancellationToken::new()).await.unwrap();

        let second = Arc::new(Counting::default());
        c.bind(second.clone()).await;
        assert_eq!(first.closes.load(Ordering::SeqCst), 1);
        assert_eq!(c.state().await, ChildState::Defined);

        c.start(me(), false, CancellationToken::new()).await.unwrap();
        assert_eq!(second.starts.load(Ordering::SeqCst), 1);
        assert_eq!(second.closes.load(Ordering::SeqCst), 0);
    }
}
