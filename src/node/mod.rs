//! Nodes and the children they declare.
//!
//! - [`config`]: verified node description and key/id rules;
//! - [`state`]: primary state and the wakeup busy guard;
//! - [`child`]: resource wrapper with its own small lifecycle;
//! - [`node`]: the wakeup state machine and update sweep.

mod child;
mod config;
#[allow(clippy::module_inception)]
mod node;
mod state;

pub(crate) use child::Caller;
pub use child::{Child, ChildState, Reload, Resource, ResourceError};
pub use config::{NodeConfig, Origin, RegisterOptions, derive_id, validate_key};
pub use node::Node;
pub use state::NodeState;
