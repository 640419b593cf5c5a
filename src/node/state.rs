//! # Node lifecycle state and the wakeup guard.
//!
//! ```text
//!  register ──► Register ──┐
//!                          ├─ wakeup ─► Running   (script ok)
//!  Fail ───────────────────┤          ├► Disable   (ScriptError::Disabled)
//!                          │          ├► Fail      (script error)
//!  update ──► Update ──────┘          └► Panic     (caught panic)
//!
//!  Running / Panic / Disable ── wakeup ─► no-op (only update retries)
//!  any ── close ─► Empty
//! ```
//!
//! The busy guard is not part of the state: it is an atomic flag held for the
//! duration of one wakeup pass and released on drop, unwinding included.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Primary lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No usable config.
    Undefined,
    /// Registered, never executed.
    Register,
    /// Last run succeeded.
    Running,
    /// Last run panicked (protected mode).
    Panic,
    /// Last run failed; retried on every wakeup.
    Fail,
    /// New config awaiting reconciliation.
    Update,
    /// Script asked to be disabled.
    Disable,
    /// Closed and removed from its tree.
    Empty,
}

impl NodeState {
    /// Lowercase status text used in views.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Undefined => "undefined",
            NodeState::Register => "register",
            NodeState::Running => "running",
            NodeState::Panic => "panic",
            NodeState::Fail => "fail",
            NodeState::Update => "update",
            NodeState::Disable => "disable",
            NodeState::Empty => "empty",
        }
    }

    /// States that wakeup executes.
    pub fn needs_run(&self) -> bool {
        matches!(
            self,
            NodeState::Register | NodeState::Fail | NodeState::Update
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the busy flag for one wakeup pass.
pub(crate) struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// Sets the flag, or returns `None` if it was already set.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = BusyGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(BusyGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(!flag.load(Ordering::Acquire));
        assert!(BusyGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn guard_is_released_on_unwind() {
        let flag = AtomicBool::new(false);
        let res = std::panic::catch_unwind(|| {
            let _g = BusyGuard::try_acquire(&flag);
            panic!("inside pass");
        });
        assert!(res.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn run_states() {
        assert!(NodeState::Register.needs_run());
        assert!(NodeState::Fail.needs_run());
        assert!(NodeState::Update.needs_run());
        assert!(!NodeState::Running.needs_run());
        assert!(!NodeState::Disable.needs_run());
        assert!(!NodeState::Panic.needs_run());
        assert_eq!(NodeState::Running.to_string(), "running");
    }
}
