use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::job::{JobPool, Report};
use super::tree::Tree;
use crate::events::Bus;
use crate::script::ScriptEngine;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Tree`] with optional features.
pub struct TreeBuilder {
    cfg: Config,
    engine: Arc<dyn ScriptEngine>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    reporters: Vec<Arc<dyn Report>>,
    parent: Option<CancellationToken>,
}

impl TreeBuilder {
    /// Creates a new builder with the given configuration and script engine.
    pub fn new(cfg: Config, engine: impl ScriptEngine) -> Self {
        Self {
            cfg,
            engine: Arc::new(engine),
            subscribers: Vec::new(),
            reporters: Vec::new(),
            parent: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (node, child and job lifecycle)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds a sink receiving every job reply.
    pub fn with_reporter(mut self, reporter: Arc<dyn Report>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Derives the root token from `parent`, so cancelling it closes the tree's sessions.
    pub fn with_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Builds the tree.
    ///
    /// Spawns the subscriber workers, so it must be called from within a tokio runtime.
    pub fn build(self) -> Arc<Tree> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let jobs = JobPool::new(self.cfg.job_limit(), self.reporters);

        if !self.subscribers.is_empty() {
            let subs = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(&bus, subs);
        }
        Arc::new(Tree::new(self.cfg, self.engine, bus, token, jobs))
    }
}

/// Forwards bus events to the subscriber set until the bus closes.
fn subscriber_listener(bus: &Bus, set: SubscriberSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
