//! # Closure-backed engine (`FnEngine`)
//!
//! [`FnEngine`] maps script text to host closures `F: Fn(Scope) -> Fut`. Each
//! `load` produces a fresh future per run, so no state leaks between runs unless
//! the closure captures an `Arc<...>` explicitly.
//!
//! Lookup is by exact source text, surrounding whitespace ignored. Unknown text
//! fails to load.
//!
//! ## Example
//! ```rust
//! use scriptvisor::{FnEngine, Scope, ScriptError};
//!
//! let engine = FnEngine::new()
//!     .script("ok-script", |_scope: Scope| async { Ok(()) })
//!     .script("off", |_scope: Scope| async { Err(ScriptError::disabled("maintenance")) });
//!
//! assert!(engine.contains("ok-script"));
//! assert!(!engine.contains("missing"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Executable, Scope, ScriptEngine};
use crate::error::ScriptError;

/// Boxed future returned by a registered script closure.
pub type BoxScriptFuture = Pin<Box<dyn Future<Output = Result<(), ScriptError>> + Send + 'static>>;

type ScriptFn = Arc<dyn Fn(Scope) -> BoxScriptFuture + Send + Sync>;

/// Script engine backed by host closures.
#[derive(Default, Clone)]
pub struct FnEngine {
    scripts: HashMap<String, ScriptFn>,
}

impl FnEngine {
    /// Creates an engine with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` as the body of `source`.
    ///
    /// Registering the same text again replaces the previous body.
    pub fn script<F, Fut>(mut self, source: impl AsRef<str>, f: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ScriptError>> + Send + 'static,
    {
        let f: ScriptFn = Arc::new(move |scope| Box::pin(f(scope)));
        self.scripts.insert(source.as_ref().trim().to_string(), f);
        self
    }

    /// Whether `source` resolves to a registered body.
    pub fn contains(&self, source: &str) -> bool {
        self.scripts.contains_key(source.trim())
    }
}

impl ScriptEngine for FnEngine {
    fn load(&self, source: &[u8], chunk: &str) -> Result<Box<dyn Executable>, ScriptError> {
        let text = std::str::from_utf8(source).map_err(|e| ScriptError::Load {
            chunk: chunk.to_string(),
            message: e.to_string(),
        })?;
        let f = self
            .scripts
            .get(text.trim())
            .cloned()
            .ok_or_else(|| ScriptError::Load {
                chunk: chunk.to_string(),
                message: "unknown script".to_string(),
            })?;
        Ok(Box::new(FnExecutable { f }))
    }
}

impl std::fmt::Debug for FnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FnEngine").field("scripts", &names).finish()
    }
}

struct FnExecutable {
    f: ScriptFn,
}

#[async_trait]
impl Executable for FnExecutable {
    async fn call(self: Box<Self>, scope: Scope) -> Result<(), ScriptError> {
        (self.f)(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_fails_to_load() {
        let engine = FnEngine::new().script("known", |_s: Scope| async { Ok(()) });
        assert!(engine.load(b"  known\n", "n").is_ok());

        let err = engine.load(b"unknown", "n").err().unwrap();
        assert!(matches!(err, ScriptError::Load { ref chunk, .. } if chunk == "n"));

        let err = engine.load(&[0xff, 0xfe], "bin").err().unwrap();
        assert!(matches!(err, ScriptError::Load { .. }));
    }
}
