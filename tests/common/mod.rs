//! Shared test doubles.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scriptvisor::{Child, ChildState, Config, FnEngine, Resource, ResourceError, Scope, Tree};
use tokio_util::sync::CancellationToken;

/// Resource counting its start/close calls.
#[derive(Default)]
pub struct Recorder {
    starts: AtomicUsize,
    closes: AtomicUsize,
    panic_on_close: bool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_close: true,
            ..Self::default()
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resource for Recorder {
    async fn start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_close {
            panic!("close exploded");
        }
        Ok(())
    }
}

/// Config without the timer and with a short grace.
pub fn config() -> Config {
    Config {
        tick: Duration::ZERO,
        grace: Duration::from_secs(5),
        ..Config::default()
    }
}

pub fn tree(engine: FnEngine) -> Arc<Tree> {
    Tree::builder(config(), engine).build()
}

/// Declares `name`, binding and starting `res` the first time only.
pub async fn declare(
    scope: &Scope,
    name: &str,
    kind: &str,
    res: Arc<Recorder>,
) -> Result<Arc<Child>, scriptvisor::ChildError> {
    let child = scope.create(name, kind).await?;
    if child.state().await == ChildState::Defined {
        scope.bind(&child, res).await?;
        scope.start(&child).await?;
    }
    Ok(child)
}
