//! Script execution interface.
//!
//! - [`ScriptEngine`] / [`Executable`]: the opaque embedded runtime.
//! - [`FnEngine`]: closure-backed engine for embedding hosts and tests.
//! - [`Scope`] / [`Imported`]: the capability a running script receives.

mod engine;
mod fn_engine;
mod scope;

pub use engine::{Executable, ScriptEngine};
pub use fn_engine::{BoxScriptFuture, FnEngine};
pub(crate) use scope::JobOutput;
pub use scope::{Imported, Scope};
