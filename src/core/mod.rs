//! Runtime core: the tree, its configuration and execution plumbing.
//!
//! Internal modules:
//! - [`runner`]: guarded execution and the one-shot script call with timeout;
//! - [`tree`]: registry, wakeup aggregation, diff handling and the run loop;
//! - [`builder`]: assembles a tree with subscribers and reply sinks;
//! - [`job`]: one-shot jobs on a bounded worker pool;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod config;
mod diff;
mod job;
pub(crate) mod runner;
mod shutdown;
mod tree;
pub(crate) mod view;

pub use builder::TreeBuilder;
pub use config::{Config, DEFAULT_JOB_TIMEOUT};
pub use diff::{Diff, DiffUpdate};
pub use job::{Job, Reply, Report, ReportError};
pub use tree::Tree;
pub use view::{ChildView, NodeView, View};
