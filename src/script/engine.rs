//! # Script engine interface.
//!
//! The embedded runtime is an opaque capability: it turns source bytes into an
//! [`Executable`], which is then called exactly once with the [`Scope`] of the
//! node or job that owns the run.
//!
//! ## Rules
//! - `load` must not execute anything; syntax/lookup failures are `ScriptError::Load`
//! - `call` consumes the executable; a fresh one is loaded per run
//! - A script disables its node by returning `ScriptError::Disabled`

use async_trait::async_trait;

use super::Scope;
use crate::error::ScriptError;

/// Loads source bytes into something callable.
pub trait ScriptEngine: Send + Sync + 'static {
    /// Compiles or looks up `source`. `chunk` names the unit in error messages.
    fn load(&self, source: &[u8], chunk: &str) -> Result<Box<dyn Executable>, ScriptError>;
}

/// One loaded script body.
#[async_trait]
pub trait Executable: Send {
    /// Runs the body to completion.
    ///
    /// Long-running bodies should watch [`Scope::cancelled`]; a run that outlives
    /// its timeout is dropped.
    async fn call(self: Box<Self>, scope: Scope) -> Result<(), ScriptError>;
}
