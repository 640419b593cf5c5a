//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the tree, nodes, children,
//! jobs and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Tree`, `Node::wakeup`, `Child` lifecycle, job workers,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the listener spawned by `TreeBuilder::build` (fans out to `SubscriberSet`)
//!   and anyone holding [`Tree::subscribe`](crate::Tree::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
