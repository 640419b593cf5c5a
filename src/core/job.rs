//! # One-shot jobs.
//!
//! A [`Job`] runs a script body once, bounded by a timeout, on a worker pool
//! shared by the whole tree. It is never retained: its only trace is the
//! [`Reply`] handed to every [`Report`] sink and the `JobFinished` event.
//!
//! ## Flow
//! ```text
//! Tree::submit(job)
//!   ├─► validate (name, code, exec id not in flight) ─► Err(SubmitError)
//!   └─► spawn drive():
//!         ├─► acquire pool permit (cancellable, bounded by the deadline)
//!         ├─► publish JobStarting
//!         ├─► spawn worker: run_once(code, timeout) ─► JoinHandle
//!         ├─► await JoinHandle (panic ─► failed Reply)
//!         ├─► publish JobTimeout (if timed out)
//!         ├─► report Reply to every sink
//!         └─► publish JobFinished
//! ```
//!
//! ## Rules
//! - Exactly one Reply per accepted job, whatever the outcome
//! - The job token is a child of the tree's root token
//! - The deadline is fixed at submission; a job still queued when it passes
//!   gets a timed-out Reply without running
//! - A worker panic never reaches the pool

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::time::{self, Instant};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::Tree;
use crate::core::runner::{panic_message, run_once};
use crate::error::{ConfigError, ScriptError, SubmitError};
use crate::events::{Bus, Event, EventKind};
use crate::node::validate_key;
use crate::script::{JobOutput, Scope, ScriptEngine};

/// One-shot script execution request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    /// Caller-side id, echoed in the reply.
    pub id: u64,
    /// Execution id; one execution per id may be in flight.
    pub exec_id: String,
    /// Job name, used as the script's scope key.
    pub name: String,
    /// Script source.
    pub code: String,
    /// Timeout in seconds on the wire; `None` or zero uses the configured default.
    #[serde(with = "secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Job {
    /// Creates a job without timeout override.
    pub fn new(
        id: u64,
        exec_id: impl Into<String>,
        name: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            exec_id: exec_id.into(),
            name: name.into(),
            code: code.into(),
            timeout: None,
        }
    }

    /// Overrides the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub exec_id: String,
    pub succeed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Values written by the script through [`Scope::set`].
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Error type returned by reply sinks.
pub type ReportError = Box<dyn std::error::Error + Send + Sync>;

/// Sink receiving job replies.
#[async_trait]
pub trait Report: Send + Sync + 'static {
    /// Delivers one reply.
    async fn report(&self, reply: &Reply) -> Result<(), ReportError>;
}

#[async_trait]
impl Report for mpsc::Sender<Reply> {
    async fn report(&self, reply: &Reply) -> Result<(), ReportError> {
        self.send(reply.clone())
            .await
            .map_err(|_| "reply channel closed".into())
    }
}

/// Bounded worker pool and in-flight bookkeeping.
pub(crate) struct JobPool {
    semaphore: Option<Arc<Semaphore>>,
    inflight: Mutex<HashSet<String>>,
    reporters: Vec<Arc<dyn Report>>,
    seq: AtomicU64,
}

/// Everything a worker needs besides the job itself.
pub(crate) struct JobContext {
    pub(crate) engine: Arc<dyn ScriptEngine>,
    pub(crate) bus: Bus,
    pub(crate) tree: Weak<Tree>,
    pub(crate) token: CancellationToken,
    pub(crate) timeout: Duration,
    /// Fixed at submission; queueing time counts against it.
    pub(crate) deadline: Instant,
}

impl JobPool {
    pub(crate) fn new(limit: Option<usize>, reporters: Vec<Arc<dyn Report>>) -> Arc<Self> {
        Arc::new(Self {
            semaphore: limit.map(Semaphore::new).map(Arc::new),
            inflight: Mutex::new(HashSet::new()),
            reporters,
            seq: AtomicU64::new(1),
        })
    }

    /// Validates `job` and marks it in flight.
    ///
    /// An empty exec id is replaced by a generated `name-N`.
    pub(crate) async fn admit(&self, mut job: Job) -> Result<Job, SubmitError> {
        validate_key(&job.name)?;
        if job.code.trim().is_empty() {
            return Err(ConfigError::EmptySource { key: job.name }.into());
        }
        if job.exec_id.is_empty() {
            job.exec_id = format!("{}-{}", job.name, self.seq.fetch_add(1, Ordering::Relaxed));
        }
        if !self.inflight.lock().await.insert(job.exec_id.clone()) {
            return Err(SubmitError::Duplicate {
                exec_id: job.exec_id,
            });
        }
        Ok(job)
    }

    pub(crate) async fn have(&self, exec_id: &str) -> bool {
        self.inflight.lock().await.contains(exec_id)
    }

    /// Runs one admitted job to its reply.
    ///
    /// The deadline covers the wait for a pool permit as well as the run.
    pub(crate) async fn drive(self: Arc<Self>, job: Job, ctx: JobContext) {
        let JobContext {
            engine,
            bus,
            tree,
            token,
            timeout,
            deadline,
        } = ctx;

        let permit = match &self.semaphore {
            Some(sem) => {
                let permit = sem.clone().acquire_owned();
                tokio::pin!(permit);
                select! {
                    biased;
                    _ = token.cancelled() => Err(ScriptError::Canceled),
                    _ = time::sleep_until(deadline) => Err(ScriptError::Timeout { timeout }),
                    res = &mut permit => res.map(Some).map_err(|_| ScriptError::Canceled),
                }
            }
            None => Ok(None),
        };

        let output = Arc::new(JobOutput::default());
        let res = match permit {
            Err(e) => Err(e),
            Ok(_permit) => {
                bus.publish(
                    Event::new(EventKind::JobStarting)
                        .with_node(job.name.as_str())
                        .with_exec_id(job.exec_id.as_str())
                        .with_timeout(timeout),
                );
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Err(ScriptError::Timeout { timeout })
                } else {
                    let scope = Scope::for_job(&job.name, Arc::clone(&output), token, tree);
                    Self::execute(engine, &job, scope, remaining)
                        .await
                        .map_err(|e| match e {
                            ScriptError::Timeout { .. } => ScriptError::Timeout { timeout },
                            e => e,
                        })
                }
            }
        };

        if let Err(ScriptError::Timeout { .. }) = &res {
            bus.publish(
                Event::new(EventKind::JobTimeout)
                    .with_node(job.name.as_str())
                    .with_exec_id(job.exec_id.as_str())
                    .with_timeout(timeout),
            );
        }
        let res = res.map_err(|e| e.to_string());
        let data = output.take().await;

        self.inflight.lock().await.remove(&job.exec_id);
        let reply = Reply {
            id: job.id,
            exec_id: job.exec_id,
            succeed: res.is_ok(),
            reason: res.err(),
            data,
        };

        for sink in &self.reporters {
            if let Err(e) = sink.report(&reply).await {
                warn!(job = %job.name, exec_id = %reply.exec_id, "report: {e}");
            }
        }

        let mut ev = Event::new(EventKind::JobFinished)
            .with_node(job.name.as_str())
            .with_exec_id(reply.exec_id.as_str());
        if let Some(reason) = &reply.reason {
            ev = ev.with_reason(reason.as_str());
        }
        bus.publish(ev);
    }

    /// Runs the script on its own task so a panic ends up in the join error.
    async fn execute(
        engine: Arc<dyn ScriptEngine>,
        job: &Job,
        scope: Scope,
        timeout: Duration,
    ) -> Result<(), ScriptError> {
        let code = job.code.clone();
        let name = job.name.clone();
        let worker = tokio::spawn(async move {
            run_once(engine.as_ref(), code.as_bytes(), &name, scope, Some(timeout)).await
        });

        match worker.await {
            Ok(res) => res,
            Err(join) if join.is_panic() => Err(ScriptError::runtime(format!(
                "panic: {}",
                panic_message(&*join.into_panic())
            ))),
            Err(_) => Err(ScriptError::Canceled),
        }
    }
}

/// `Option<Duration>` as fractional seconds.
mod secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_f64(d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(s) if s.is_finite() && s > 0.0 => Duration::try_from_secs_f64(s)
                .map(Some)
                .map_err(D::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_timeout_is_seconds_on_the_wire() {
        let job: Job = serde_json::from_str(
            r#"{"id":3,"exec_id":"e1","name":"check","code":"x","timeout":1.5}"#,
        )
        .unwrap();
        assert_eq!(job.timeout, Some(Duration::from_millis(1500)));

        let zero: Job = serde_json::from_str(r#"{"name":"check","code":"x","timeout":0}"#).unwrap();
        assert_eq!(zero.timeout, None);

        let huge = serde_json::from_str::<Job>(r#"{"name":"check","code":"x","timeout":1e30}"#);
        assert!(huge.is_err());

        let json = serde_json::to_value(Job::new(1, "e", "n", "c").with_timeout(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(json["timeout"], 2.0);
    }

    #[tokio::test]
    async fn admit_rejects_bad_jobs_and_duplicates() {
        let pool = JobPool::new(None, Vec::new());

        let err = pool.admit(Job::new(1, "e", "9bad", "x")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ConfigError::InvalidKey { .. })));

        let err = pool.admit(Job::new(1, "e", "ok", "  ")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(ConfigError::EmptySource { .. })));

        pool.admit(Job::new(1, "e", "ok", "x")).await.unwrap();
        assert!(pool.have("e").await);
        let err = pool.admit(Job::new(2, "e", "ok", "x")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Duplicate { .. }));

        let generated = pool.admit(Job::new(3, "", "ok", "x")).await.unwrap();
        assert!(generated.exec_id.starts_with("ok-"));
    }

    #[tokio::test]
    async fn sender_is_a_reply_sink() {
        let (tx, mut rx) = mpsc::channel::<Reply>(1);
        let reply = Reply {
            id: 1,
            exec_id: "e".into(),
            succeed: true,
            ..Reply::default()
        };
        tx.report(&reply).await.unwrap();
        assert_eq!(rx.recv().await, Some(reply.clone()));

        drop(rx);
        assert!(tx.report(&reply).await.is_err());
    }
}
