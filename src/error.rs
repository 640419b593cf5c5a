//! Error types used by the scriptvisor runtime, nodes, children and jobs.
//!
//! Every enum provides `as_label()`, a short stable snake_case label for logs/metrics.
//!
//! - [`ConfigError`] / [`RegisterError`]: validation failures at register time.
//! - [`ScriptError`]: outcome of a script execution as classified by the engine.
//! - [`ChildError`]: child lookup, ownership and lifecycle failures.
//! - [`WakeError`]: per-node reconciliation results.
//! - [`AggregateError`]: several independent failures joined together.
//! - [`SubmitError`]: job admission failures.
//! - [`DiffError`]: diff payload decoding failures.
//! - [`RuntimeError`]: failures of the runtime itself (shutdown).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while building a [`NodeConfig`](crate::NodeConfig).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key is empty.
    #[error("empty node key")]
    EmptyKey,

    /// Key does not start with a letter or contains characters outside `[A-Za-z0-9_/-]`.
    #[error("invalid node key {key:?}")]
    InvalidKey {
        /// Offending key.
        key: String,
    },

    /// Script source is empty.
    #[error("empty source for node {key:?}")]
    EmptySource {
        /// Node key.
        key: String,
    },

    /// A local script file could not be read.
    #[error("read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::EmptyKey => "config_empty_key",
            ConfigError::InvalidKey { .. } => "config_invalid_key",
            ConfigError::EmptySource { .. } => "config_empty_source",
            ConfigError::Io { .. } => "config_io",
        }
    }
}

/// # Errors returned by [`Tree::register`](crate::Tree::register).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegisterError {
    /// The config did not validate; the tree is unchanged.
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    /// Another node already owns this id; the tree is unchanged.
    #[error("id {id} of {key:?} collides with node {existing:?}")]
    IdCollision {
        /// Colliding id.
        id: u64,
        /// Key being registered.
        key: String,
        /// Key already holding the id.
        existing: String,
    },

    /// The node was registered, but its last classified run failed.
    #[error("node {key:?} last failed: {cause}")]
    Failed {
        /// Node key.
        key: String,
        /// Last recorded failure.
        cause: String,
    },

    /// The tree has been closed.
    #[error("tree closed")]
    Closed,
}

impl RegisterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegisterError::Invalid(e) => e.as_label(),
            RegisterError::IdCollision { .. } => "register_id_collision",
            RegisterError::Failed { .. } => "register_last_failed",
            RegisterError::Closed => "register_closed",
        }
    }

    /// Whether the node was left untouched because the input was rejected.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegisterError::Invalid(_) | RegisterError::IdCollision { .. }
        )
    }
}

/// # Outcome of a failed script execution.
///
/// The engine decides the category; the orchestrator only maps it:
/// [`ScriptError::Disabled`] parks the node, anything else marks it failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Source could not be loaded (unknown chunk, parse error).
    #[error("load {chunk}: {message}")]
    Load {
        /// Chunk name given to `load`.
        chunk: String,
        /// Engine message.
        message: String,
    },

    /// Script asked for its node to be disabled.
    #[error("disabled: {reason}")]
    Disabled {
        /// Reason given by the script.
        reason: String,
    },

    /// Script raised an error while running.
    #[error("{message}")]
    Runtime {
        /// Engine message.
        message: String,
    },

    /// Script observed cancellation and returned early.
    #[error("context cancelled")]
    Canceled,

    /// Execution exceeded its time budget.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },
}

impl ScriptError {
    /// Builds a runtime error from anything displayable.
    pub fn runtime(message: impl fmt::Display) -> Self {
        ScriptError::Runtime {
            message: message.to_string(),
        }
    }

    /// Builds the disable signal.
    pub fn disabled(reason: impl Into<String>) -> Self {
        ScriptError::Disabled {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScriptError::Load { .. } => "script_load",
            ScriptError::Disabled { .. } => "script_disabled",
            ScriptError::Runtime { .. } => "script_runtime",
            ScriptError::Canceled => "script_canceled",
            ScriptError::Timeout { .. } => "script_timeout",
        }
    }

    /// True for the disable signal.
    pub fn is_disabled(&self) -> bool {
        matches!(self, ScriptError::Disabled { .. })
    }
}

impl From<ChildError> for ScriptError {
    fn from(e: ChildError) -> Self {
        ScriptError::runtime(e)
    }
}

/// # Errors produced by child lookup and lifecycle operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChildError {
    /// No child of that name, or no resource bound to it.
    #[error("child {name:?} not found")]
    NotFound {
        /// Child name.
        name: String,
    },

    /// The child belongs to another node.
    #[error("child {name:?} belongs to {owner:?}, not {caller:?}")]
    Ownership {
        /// Child name.
        name: String,
        /// Declaring node.
        owner: String,
        /// Node that attempted the operation.
        caller: String,
    },

    /// The child is private to its owner.
    #[error("child {name:?} is private to {owner:?}")]
    Private {
        /// Child name.
        name: String,
        /// Declaring node.
        owner: String,
    },

    /// Re-declaration with a different type tag.
    #[error("child {name:?} is {bound}, not {declared}")]
    TypeMismatch {
        /// Child name.
        name: String,
        /// Tag bound at first declaration.
        bound: String,
        /// Tag of the rejected declaration.
        declared: String,
    },

    /// The owning node is disabled.
    #[error("node {node:?} is disabled")]
    Disabled {
        /// Owning node key.
        node: String,
    },

    /// The operation needs a node scope but runs inside a job.
    #[error("no owning node in this scope")]
    NoNode,

    /// The resource failed to start or reload.
    #[error("child {name:?} failed: {cause}")]
    Failed {
        /// Child name.
        name: String,
        /// Resource error.
        cause: String,
    },
}

impl ChildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChildError::NotFound { .. } => "child_not_found",
            ChildError::Ownership { .. } => "child_ownership",
            ChildError::Private { .. } => "child_private",
            ChildError::TypeMismatch { .. } => "child_type_mismatch",
            ChildError::Disabled { .. } => "child_node_disabled",
            ChildError::NoNode => "child_no_node",
            ChildError::Failed { .. } => "child_failed",
        }
    }
}

/// # Per-node reconciliation errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WakeError {
    /// Another wakeup of this node is in progress.
    #[error("node {key:?} busy")]
    Busy {
        /// Node key.
        key: String,
    },

    /// Node has no usable state.
    #[error("node {key:?} undefined")]
    Undefined {
        /// Node key.
        key: String,
    },

    /// Node was closed.
    #[error("node {key:?} closed")]
    Closed {
        /// Node key.
        key: String,
    },

    /// Script failed.
    #[error("node {key:?} failed: {cause}")]
    Failed {
        /// Node key.
        key: String,
        /// Script error.
        cause: ScriptError,
    },

    /// Script panicked under protected execution.
    #[error("node {key:?} panicked: {cause}")]
    Panicked {
        /// Node key.
        key: String,
        /// Panic message.
        cause: String,
    },
}

impl WakeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WakeError::Busy { .. } => "wake_busy",
            WakeError::Undefined { .. } => "wake_undefined",
            WakeError::Closed { .. } => "wake_closed",
            WakeError::Failed { .. } => "wake_failed",
            WakeError::Panicked { .. } => "wake_panicked",
        }
    }

    /// Key of the node that produced the error.
    pub fn key(&self) -> &str {
        match self {
            WakeError::Busy { key }
            | WakeError::Undefined { key }
            | WakeError::Closed { key }
            | WakeError::Failed { key, .. }
            | WakeError::Panicked { key, .. } => key,
        }
    }

    /// True when the error only means "try later".
    pub fn is_busy(&self) -> bool {
        matches!(self, WakeError::Busy { .. })
    }
}

/// One keyed entry of an [`AggregateError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Node or child key.
    pub key: String,
    /// Failure message.
    pub message: String,
}

/// # Several independent failures joined together.
///
/// Sweeps never short-circuit: every failing node/child contributes one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateError {
    failures: Vec<Failure>,
}

impl AggregateError {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one failure.
    pub fn push(&mut self, key: impl Into<String>, message: impl fmt::Display) {
        self.failures.push(Failure {
            key: key.into(),
            message: message.to_string(),
        });
    }

    /// Appends every failure of `other`.
    pub fn extend(&mut self, other: AggregateError) {
        self.failures.extend(other.failures);
    }

    /// Collected failures in insertion order.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Returns `true` if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// `Ok(())` when empty, `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.key, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// # Errors returned by [`Tree::submit`](crate::Tree::submit).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Job name is not a valid key.
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    /// The same execution is already in flight.
    #[error("execution {exec_id:?} already in flight")]
    Duplicate {
        /// Execution id.
        exec_id: String,
    },

    /// The tree has been closed.
    #[error("tree closed")]
    Closed,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::Invalid(e) => e.as_label(),
            SubmitError::Duplicate { .. } => "submit_duplicate",
            SubmitError::Closed => "submit_closed",
        }
    }
}

/// # Errors returned by [`Tree::handle_diff`](crate::Tree::handle_diff).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DiffError {
    /// Payload is not a valid diff document.
    #[error("decode diff: {0}")]
    Decode(#[source] serde_json::Error),

    /// The resulting view could not be encoded.
    #[error("encode view: {0}")]
    Encode(#[source] serde_json::Error),
}

impl DiffError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DiffError::Decode(_) => "diff_decode",
            DiffError::Encode(_) => "diff_encode",
        }
    }
}

/// # Errors produced by the scriptvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some nodes did not finish closing.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Keys of nodes that were still closing.
        stuck: Vec<String>,
    },

    /// OS signal handlers could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use scriptvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_joins_every_failure() {
        let mut agg = AggregateError::new();
        assert!(agg.is_empty());
        agg.push("a", "boom");
        agg.push("b", ScriptError::runtime("bad"));
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.to_string(), "a: boom; b: bad");
        assert!(agg.into_result().is_err());
    }

    #[test]
    fn empty_aggregate_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[test]
    fn disabled_is_typed() {
        assert!(ScriptError::disabled("maintenance").is_disabled());
        assert!(!ScriptError::runtime("disabled").is_disabled());
    }

    #[test]
    fn validation_errors_are_flagged() {
        assert!(RegisterError::from(ConfigError::EmptyKey).is_validation());
        let failed = RegisterError::Failed {
            key: "n".into(),
            cause: "x".into(),
        };
        assert!(!failed.is_validation());
        assert_eq!(failed.as_label(), "register_last_failed");
    }
}
