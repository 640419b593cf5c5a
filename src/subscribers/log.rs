//! # LogWriter: event renderer over `tracing`
//!
//! A subscriber that turns incoming [`Event`]s into `tracing` records with
//! structured fields. Install any `tracing` subscriber in the host to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  node registered node="gateway"
//! WARN  node failed node="gateway" reason="connect refused"
//! INFO  child started node="gateway" child="listener"
//! WARN  job timed out node="report" exec_id="r-1" timeout_ms=1000
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let node = e.node.as_deref().unwrap_or("-");
        let child = e.child.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::AllClosedWithin => info!(seq = e.seq, "all nodes closed within grace"),
            EventKind::GraceExceeded => warn!(seq = e.seq, "grace exceeded"),
            EventKind::NodeRegistered => info!(node, "node registered"),
            EventKind::NodeUpdated => info!(node, "node updated"),
            EventKind::NodeRunning => info!(node, "node running"),
            EventKind::NodeDisabled => info!(node, reason, "node disabled"),
            EventKind::NodeFailed => warn!(node, reason, "node failed"),
            EventKind::NodePanicked => error!(node, reason, "node panicked"),
            EventKind::NodeRemoved => info!(node, "node removed"),
            EventKind::ChildStarted => info!(node, child, "child started"),
            EventKind::ChildReloaded => info!(node, child, "child reloaded"),
            EventKind::ChildFailed => warn!(node, child, reason, "child failed"),
            EventKind::ChildClosed => debug!(node, child, "child closed"),
            EventKind::ChildEvicted => info!(node, child, "child evicted"),
            EventKind::JobStarting => debug!(
                node,
                exec_id = e.exec_id.as_deref().unwrap_or("-"),
                timeout_ms = e.timeout_ms,
                "job starting"
            ),
            EventKind::JobFinished => {
                let exec_id = e.exec_id.as_deref().unwrap_or("-");
                if reason.is_empty() {
                    info!(node, exec_id, "job succeeded");
                } else {
                    warn!(node, exec_id, reason, "job failed");
                }
            }
            EventKind::JobTimeout => warn!(
                node,
                exec_id = e.exec_id.as_deref().unwrap_or("-"),
                timeout_ms = e.timeout_ms,
                "job timed out"
            ),
            EventKind::SubscriberOverflow => warn!(subscriber = node, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => error!(subscriber = node, reason, "subscriber panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
