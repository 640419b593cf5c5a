//! # Runtime events emitted by the tree, nodes, children and jobs.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Node events**: registration, reconciliation outcome, removal
//! - **Child events**: start/reload/close outcome, eviction by the sweep
//! - **Job events**: start and final reply
//! - **Runtime events**: shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as timestamps, node and
//! child names, reasons and execution ids.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use scriptvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::NodeFailed)
//!     .with_node("gateway")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::NodeFailed);
//! assert_eq!(ev.node.as_deref(), Some("gateway"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `node`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `node`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or root cancellation observed).
    ShutdownRequested,

    /// Every node closed within the configured grace period.
    AllClosedWithin,

    /// Grace period exceeded; some nodes did not close in time.
    GraceExceeded,

    // === Node events ===
    /// A never-seen key was registered.
    ///
    /// Sets:
    /// - `node`: node key
    NodeRegistered,

    /// An existing node received a new config and awaits reconciliation.
    ///
    /// Sets:
    /// - `node`: node key
    NodeUpdated,

    /// Script finished successfully; node is running.
    ///
    /// Sets:
    /// - `node`: node key
    NodeRunning,

    /// Script asked for the node to be disabled.
    ///
    /// Sets:
    /// - `node`: node key
    /// - `reason`: disable reason
    NodeDisabled,

    /// Script failed.
    ///
    /// Sets:
    /// - `node`: node key
    /// - `reason`: failure message
    NodeFailed,

    /// Script panicked under protected execution.
    ///
    /// Sets:
    /// - `node`: node key
    /// - `reason`: panic message
    NodePanicked,

    /// Node was removed from the tree and closed.
    ///
    /// Sets:
    /// - `node`: node key
    NodeRemoved,

    // === Child events ===
    /// Child resource started.
    ///
    /// Sets:
    /// - `node`: owning node key
    /// - `child`: child name
    ChildStarted,

    /// Child resource reloaded in place.
    ///
    /// Sets:
    /// - `node`: owning node key
    /// - `child`: child name
    ChildReloaded,

    /// Child resource failed to start, reload or close.
    ///
    /// Sets:
    /// - `node`: owning node key
    /// - `child`: child name
    /// - `reason`: resource error or panic message
    ChildFailed,

    /// Child resource closed.
    ///
    /// Sets:
    /// - `node`: owning node key
    /// - `child`: child name
    ChildClosed,

    /// Child was no longer declared by its node's script and got evicted.
    ///
    /// Sets:
    /// - `node`: owning node key
    /// - `child`: child name
    ChildEvicted,

    // === Job events ===
    /// Job acquired a worker and is starting.
    ///
    /// Sets:
    /// - `node`: job name
    /// - `exec_id`: execution id
    /// - `timeout_ms`: effective timeout
    JobStarting,

    /// Job produced its reply.
    ///
    /// Sets:
    /// - `node`: job name
    /// - `exec_id`: execution id
    /// - `reason`: failure reason (absent on success)
    JobFinished,

    /// Job exceeded its timeout (always followed by `JobFinished`).
    ///
    /// Sets:
    /// - `node`: job name
    /// - `exec_id`: execution id
    /// - `timeout_ms`: effective timeout
    JobTimeout,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Node key, job name or subscriber name.
    pub node: Option<Arc<str>>,
    /// Child name, if applicable.
    pub child: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Job execution id.
    pub exec_id: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            node: None,
            child: None,
            reason: None,
            exec_id: None,
            timeout_ms: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a node key.
    #[inline]
    pub fn with_node(mut self, node: impl Into<Arc<str>>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attaches a child name.
    #[inline]
    pub fn with_child(mut self, child: impl Into<Arc<str>>) -> Self {
        self.child = Some(child.into());
        self
    }

    /// Attaches a job execution id.
    #[inline]
    pub fn with_exec_id(mut self, exec_id: impl Into<Arc<str>>) -> Self {
        self.exec_id = Some(exec_id.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_node(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_node(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::NodeRegistered);
        let b = Event::new(EventKind::NodeRunning);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_timeout_is_clamped() {
        let ev = Event::new(EventKind::JobTimeout).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
