//! # Capability handed to a running script.
//!
//! A [`Scope`] is the only way a script reaches the host: it declares and drives
//! its node's children, imports other nodes, and (for jobs) writes reply data.
//! Child operations are checked against the identity of the owning node (never
//! its key), so a job or another node cannot act on them. A script never holds a
//! reference to the tree itself.
//!
//! ```text
//! Scope (node "edge")
//!   ├─ create("listener", "tcp") ─► Child owned by "edge"
//!   ├─ bind(&child, res)         ─► ownership check ─► attach resource
//!   ├─ start(&child)             ─► ownership check ─► Resource::start / reload
//!   ├─ import("auth")            ─► wake "auth" (busy ignored) ─► link ─► Imported
//!   └─ cancelled()               ─► resolves when the run is cancelled or timed out
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::Tree;
use crate::error::{ChildError, ScriptError};
use crate::node::{Caller, Child, Node, NodeState, Resource};

/// Reply data collected by a job's script.
#[derive(Debug, Default)]
pub(crate) struct JobOutput {
    data: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JobOutput {
    pub(crate) async fn take(&self) -> BTreeMap<String, serde_json::Value> {
        std::mem::take(&mut *self.data.lock().await)
    }
}

#[derive(Clone)]
enum Owner {
    Node(Arc<Node>),
    Job(Arc<JobOutput>),
}

/// Host capability for one script run.
#[derive(Clone)]
pub struct Scope {
    owner: Owner,
    key: Arc<str>,
    token: CancellationToken,
    tree: Weak<Tree>,
}

impl Scope {
    pub(crate) fn for_node(node: Arc<Node>) -> Self {
        Self {
            key: Arc::from(node.key()),
            token: node.token().child_token(),
            tree: node.tree(),
            owner: Owner::Node(node),
        }
    }

    pub(crate) fn for_job(
        name: &str,
        output: Arc<JobOutput>,
        token: CancellationToken,
        tree: Weak<Tree>,
    ) -> Self {
        Self {
            key: Arc::from(name),
            token,
            tree,
            owner: Owner::Job(output),
        }
    }

    /// Node key, or job name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token cancelled when this run is cancelled or times out.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this run is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Owning node, `None` for jobs.
    pub fn node(&self) -> Option<&Arc<Node>> {
        match &self.owner {
            Owner::Node(node) => Some(node),
            Owner::Job(_) => None,
        }
    }

    /// Declares (or re-declares) the child `name` of type `kind`.
    ///
    /// Re-declaring with another type fails with [`ChildError::TypeMismatch`] and
    /// leaves the existing child as it was.
    pub async fn create(&self, name: &str, kind: &str) -> Result<Arc<Child>, ChildError> {
        self.owner_node()?.define_child(name, kind).await
    }

    /// Looks up a child of the owning node.
    pub async fn child(&self, name: &str) -> Result<Arc<Child>, ChildError> {
        self.owner_node()?
            .child(name)
            .await
            .ok_or_else(|| ChildError::NotFound {
                name: name.to_string(),
            })
    }

    /// Attaches `resource` to `child`, closing a previously started one.
    pub async fn bind(
        &self,
        child: &Arc<Child>,
        resource: Arc<dyn Resource>,
    ) -> Result<(), ChildError> {
        child.check_owner(self.caller())?;
        child.bind(resource).await;
        Ok(())
    }

    /// Starts (or reloads) `child`.
    ///
    /// The resource receives the owning node's token, so it outlives this run and
    /// is cancelled when the node closes.
    pub async fn start(&self, child: &Arc<Child>) -> Result<(), ChildError> {
        let (disabled, ctx) = match &self.owner {
            Owner::Node(node) => (
                node.state().await == NodeState::Disable,
                node.token().clone(),
            ),
            Owner::Job(_) => (false, self.token.clone()),
        };
        child.start(self.caller(), disabled, ctx).await
    }

    /// Closes `child`. Idempotent.
    pub async fn shutdown(&self, child: &Arc<Child>) -> Result<(), ChildError> {
        child.check_owner(self.caller())?;
        child.close().await
    }

    /// Hides `child` from imports by other nodes and jobs.
    pub async fn private(&self, child: &Arc<Child>) -> Result<(), ChildError> {
        child.check_owner(self.caller())?;
        child.set_private().await;
        Ok(())
    }

    /// Imports the node `key`.
    ///
    /// The imported node is woken first (a concurrent pass is not an error), and
    /// the link is recorded on the importing node.
    pub async fn import(&self, key: &str) -> Result<Imported, ScriptError> {
        let tree = self
            .tree
            .upgrade()
            .ok_or_else(|| ScriptError::runtime("import: tree closed"))?;
        let node = tree
            .find(key)
            .await
            .ok_or_else(|| ScriptError::runtime(format!("import {key:?}: no such node")))?;

        let is_self = self.node().is_some_and(|me| Arc::ptr_eq(me, &node));
        if !is_self {
            match node.wakeup().await {
                Err(e) if !e.is_busy() => {
                    return Err(ScriptError::runtime(format!("import: {e}")));
                }
                _ => {}
            }
            if let Some(me) = self.node() {
                me.link(key).await;
            }
        }

        Ok(Imported {
            node,
            caller: self.node().map(|me| me.serial()),
        })
    }

    /// Writes one value into the job reply.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Result<(), ScriptError> {
        match &self.owner {
            Owner::Job(output) => {
                output.data.lock().await.insert(key.into(), value);
                Ok(())
            }
            Owner::Node(_) => Err(ScriptError::runtime("set: only jobs carry reply data")),
        }
    }

    fn caller(&self) -> Caller<'_> {
        Caller {
            key: &self.key,
            node: self.node().map(|me| me.serial()),
        }
    }

    fn owner_node(&self) -> Result<&Arc<Node>, ChildError> {
        self.node().ok_or(ChildError::NoNode)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let owner = match self.owner {
            Owner::Node(_) => "node",
            Owner::Job(_) => "job",
        };
        f.debug_struct("Scope")
            .field("key", &self.key)
            .field("owner", &owner)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Read-only handle on another node, returned by [`Scope::import`].
#[derive(Debug, Clone)]
pub struct Imported {
    node: Arc<Node>,
    caller: Option<u64>,
}

impl Imported {
    /// Imported node key.
    pub fn key(&self) -> &str {
        self.node.key()
    }

    /// Imported node state.
    pub async fn state(&self) -> NodeState {
        self.node.state().await
    }

    /// Looks up a child of the imported node.
    ///
    /// Private children are visible only to their own node, never to jobs.
    pub async fn child(&self, name: &str) -> Result<Arc<Child>, ChildError> {
        let child = self
            .node
            .child(name)
            .await
            .ok_or_else(|| ChildError::NotFound {
                name: name.to_string(),
            })?;
        if !child.is_owned_by(self.caller) && child.is_private().await {
            return Err(ChildError::Private {
                name: name.to_string(),
                owner: child.from().to_string(),
            });
        }
        Ok(child)
    }
}
