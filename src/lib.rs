//! # scriptvisor
//!
//! **Scriptvisor** is an embedded-script lifecycle orchestrator.
//!
//! It registers named units of script configuration ("nodes"), runs their
//! bodies through an opaque [`ScriptEngine`], tracks the resources ("children")
//! each script declares, and reconciles everything whenever the tree is woken
//! up: on a timer, on diff delivery, or on demand. One-shot [`Job`]s run on a
//! bounded pool with a timeout and produce a [`Reply`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Diff (JSON) ──► handle_diff ──┐          Job ──► submit ──► JobPool ──► Reply ──► Report sinks
//!   register / register_file ─────┤
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Tree (registry)                                                  │
//! │  - RwLock<Vec<Arc<Node>>>                                         │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► LogWriter, ...    │
//! │  - root CancellationToken                                         │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────┐       ┌──────────┐       ┌──────────┐
//!     │  Node    │       │  Node    │       │  Node    │  wakeup(): guarded,
//!     │ (script) │       │ (script) │       │ (script) │  one pass at a time
//!     └┬─────────┘       └┬─────────┘       └┬─────────┘
//!      │ Scope            │ Scope            │ Scope
//!      ▼                  ▼                  ▼
//!    Child, Child       Child              Child ...   (Resource: start/close/reload)
//! ```
//!
//! ### Node lifecycle
//! ```text
//! register ──► Register ─┐
//! update   ──► Update  ──┼─ wakeup ─► run script ─► Running | Disable | Fail | Panic
//! Fail ──────────────────┘
//!
//! Update pass: reset children ─► run ─► close + evict children not re-declared
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                      |
//! |-------------------|---------------------------------------------------------------|-----------------------------------------|
//! | **Registry**      | Register, update, remove and wake nodes.                      | [`Tree`], [`Node`], [`NodeConfig`]      |
//! | **Scripts**       | Opaque engine, closure-backed engine, script capability.      | [`ScriptEngine`], [`FnEngine`], [`Scope`] |
//! | **Children**      | External resources owned by a node.                           | [`Resource`], [`Reload`], [`Child`]     |
//! | **Diffs**         | JSON batch delivery and point-in-time views.                  | [`Diff`], [`View`]                      |
//! | **Jobs**          | One-shot, timeout-bounded executions.                         | [`Job`], [`Reply`], [`Report`]          |
//! | **Subscriber API**| Hook into node, child and job lifecycle events.               | [`Subscribe`], [`Event`]                |
//! | **Configuration** | Centralize runtime settings.                                  | [`Config`]                              |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use scriptvisor::{Config, FnEngine, Resource, ResourceError, Scope, ScriptError, Tree};
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Listener;
//!
//! #[async_trait]
//! impl Resource for Listener {
//!     async fn start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> { Ok(()) }
//!     async fn close(&self) -> Result<(), ResourceError> { Ok(()) }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = FnEngine::new().script("serve", |scope: Scope| async move {
//!         let child = scope.create("listener", "tcp").await?;
//!         scope.bind(&child, Arc::new(Listener)).await?;
//!         scope.start(&child).await?;
//!         Ok::<_, ScriptError>(())
//!     });
//!
//!     let tree = Tree::builder(Config::default(), engine).build();
//!     tree.register("gateway", "serve", Default::default()).await?;
//!     tree.wakeup().await?;
//!
//!     let view = tree.view().await;
//!     assert_eq!(view.node("gateway").unwrap().children[0].status, "succeed");
//!
//!     tree.close().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod node;
mod script;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    ChildView, Config, DEFAULT_JOB_TIMEOUT, Diff, DiffUpdate, Job, NodeView, Reply, Report,
    ReportError, Tree, TreeBuilder, View,
};
pub use error::{
    AggregateError, ChildError, ConfigError, DiffError, Failure, RegisterError, RuntimeError,
    ScriptError, SubmitError, WakeError,
};
pub use events::{Bus, Event, EventKind};
pub use node::{
    Child, ChildState, Node, NodeConfig, NodeState, Origin, RegisterOptions, Reload, Resource,
    ResourceError, derive_id, validate_key,
};
pub use script::{BoxScriptFuture, Executable, FnEngine, Imported, Scope, ScriptEngine};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in logger subscriber.
// Disable with: `--no-default-features`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
