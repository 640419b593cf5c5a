//! # Guarded execution of scripts and resource calls.
//!
//! Two wrappers shared by nodes, children and jobs:
//!
//! - [`guarded`] runs a future, catching panics when protection is enabled.
//! - [`run_once`] loads and calls one script under an optional timeout.
//!
//! ## Rules
//! - Protected mode converts a panic into `Err(Panicked(message))`
//! - Unprotected mode lets the panic unwind to the caller
//! - On timeout the child token is cancelled before returning `ScriptError::Timeout`
//! - A cancelled token ends the call with `ScriptError::Canceled`
//! - The script sees the child token through its [`Scope`]; cancelling it does not affect the parent

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::{select, time};

use crate::error::ScriptError;
use crate::script::{Scope, ScriptEngine};

/// A panic caught under protected execution, carrying its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Panicked(pub String);

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(any: &(dyn Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Awaits `fut`, catching a panic when `protected` is set.
pub(crate) async fn guarded<F, T>(protected: bool, fut: F) -> Result<T, Panicked>
where
    F: Future<Output = T>,
{
    if !protected {
        return Ok(fut.await);
    }
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| Panicked(panic_message(&*payload)))
}

/// Loads `source` and executes it once with `scope`.
///
/// The call is dropped as soon as the scope token is cancelled (`ScriptError::Canceled`).
///
/// ### Timeout behavior
/// If `timeout` is `Some(dur)` and `dur > 0`:
/// - Wraps execution in `tokio::time::timeout`
/// - On timeout: drops the call, cancels the scope token, returns `ScriptError::Timeout`
pub(crate) async fn run_once(
    engine: &dyn ScriptEngine,
    source: &[u8],
    chunk: &str,
    scope: Scope,
    timeout: Option<Duration>,
) -> Result<(), ScriptError> {
    let exe = engine.load(source, chunk)?;
    let token = scope.token().clone();
    let call = exe.call(scope);
    let bounded = async {
        select! {
            biased;
            _ = token.cancelled() => Err(ScriptError::Canceled),
            res = call => res,
        }
    };

    match timeout.filter(|d| *d > Duration::ZERO) {
        Some(dur) => match time::timeout(dur, bounded).await {
            Ok(res) => res,
            Err(_elapsed) => {
                token.cancel();
                Err(ScriptError::Timeout { timeout: dur })
            }
        },
        None => bounded.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Weak};

    use tokio_util::sync::CancellationToken;

    use crate::script::{FnEngine, JobOutput};

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        let res: Result<(), Panicked> = guarded(true, async { panic!("kaboom") }).await;
        assert_eq!(res, Err(Panicked("kaboom".into())));
    }

    #[tokio::test]
    async fn test_guarded_passes_value() {
        assert_eq!(guarded(true, async { 7 }).await, Ok(7));
        assert_eq!(guarded(false, async { 7 }).await, Ok(7));
    }

    fn job_scope(token: CancellationToken) -> Scope {
        Scope::for_job("check", Arc::new(JobOutput::default()), token, Weak::new())
    }

    #[tokio::test]
    async fn test_run_once_timeout_cancels_token() {
        let engine = FnEngine::new().script("hang", |_s: Scope| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let token = CancellationToken::new();
        let res = run_once(
            &engine,
            b"hang",
            "check",
            job_scope(token.clone()),
            Some(Duration::from_millis(20)),
        )
        .await;
        assert!(matches!(res, Err(ScriptError::Timeout { .. })));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_once_stops_on_cancel() {
        let engine = FnEngine::new().script("hang", |_s: Scope| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let token = CancellationToken::new();
        token.cancel();
        let res = run_once(&engine, b"hang", "check", job_scope(token), None).await;
        assert_eq!(res, Err(ScriptError::Canceled));
    }

    #[test]
    fn test_panic_message_formats() {
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*s), "owned");
        let n: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*n), "unknown panic");
    }
}
