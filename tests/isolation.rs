mod common;

use std::sync::{Arc, Mutex};

use common::{Recorder, tree};
use scriptvisor::{ChildError, ChildState, FnEngine, RegisterOptions, Scope, ScriptError};

#[derive(Default)]
struct Seen {
    start: Option<ChildError>,
    secret: Option<ChildError>,
    shutdown: Option<ChildError>,
    bind: Option<ChildError>,
}

fn engine(svc: Arc<Recorder>, seen: Arc<Mutex<Seen>>) -> FnEngine {
    FnEngine::new()
        .script("owner", move |scope: Scope| {
            let svc = svc.clone();
            async move {
                let child = scope.create("svc", "tcp").await?;
                scope.bind(&child, svc).await?;
                let secret = scope.create("secret", "key").await?;
                scope.private(&secret).await?;
                Ok(())
            }
        })
        .script("intruder", move |scope: Scope| {
            let seen = seen.clone();
            async move {
                let owner = scope.import("owner").await?;
                let svc = owner.child("svc").await?;

                let start = scope.start(&svc).await.err();
                let shutdown = scope.shutdown(&svc).await.err();
                let bind = scope.bind(&svc, Recorder::new()).await.err();
                let secret = owner.child("secret").await.err();

                let mut g = seen.lock().unwrap();
                g.start = start;
                g.shutdown = shutdown;
                g.bind = bind;
                g.secret = secret;
                Ok(())
            }
        })
}

#[tokio::test]
async fn other_nodes_cannot_drive_foreign_children() {
    let svc = Recorder::new();
    let seen = Arc::new(Mutex::new(Seen::default()));
    let tree = tree(engine(svc.clone(), seen.clone()));

    tree.register("owner", "owner", RegisterOptions::default()).await.unwrap();
    tree.register("intruder", "intruder", RegisterOptions::default()).await.unwrap();
    tree.wakeup().await.unwrap();

    let g = seen.lock().unwrap();
    assert!(matches!(g.start, Some(ChildError::Ownership { ref owner, ref caller, .. })
        if owner == "owner" && caller == "intruder"));
    assert!(matches!(g.shutdown, Some(ChildError::Ownership { .. })));
    assert!(matches!(g.bind, Some(ChildError::Ownership { .. })));
    assert!(matches!(g.secret, Some(ChildError::Private { .. })));
    drop(g);

    assert_eq!(svc.starts(), 0);
    assert_eq!(svc.closes(), 0);
    let owner = tree.find("owner").await.unwrap();
    assert_eq!(owner.child("svc").await.unwrap().state().await, ChildState::Defined);
}

#[tokio::test]
async fn import_wakes_and_links() {
    let svc = Recorder::new();
    let seen = Arc::new(Mutex::new(Seen::default()));
    let tree = tree(engine(svc, seen));

    // intruder first: its import has to bring owner up itself
    tree.register("intruder", "intruder", RegisterOptions::default()).await.unwrap();
    tree.register("owner", "owner", RegisterOptions::default()).await.unwrap();

    let intruder = tree.find("intruder").await.unwrap();
    intruder.wakeup().await.unwrap();

    let view = tree.view().await;
    assert_eq!(view.node("owner").unwrap().status, "running");
    assert_eq!(view.node("intruder").unwrap().links, vec!["owner".to_string()]);
    let secret = view
        .node("owner")
        .unwrap()
        .children
        .iter()
        .find(|c| c.name == "secret")
        .unwrap();
    assert!(secret.private);
}

#[tokio::test]
async fn import_of_unknown_node_fails_the_importer() {
    let engine = FnEngine::new().script("lonely", |scope: Scope| async move {
        scope.import("ghost").await?;
        Ok::<_, ScriptError>(())
    });
    let tree = tree(engine);
    tree.register("n", "lonely", RegisterOptions::default()).await.unwrap();

    let errs = tree.wakeup().await.unwrap_err();
    assert!(errs.to_string().contains("ghost"));
}

#[tokio::test]
async fn jobs_have_no_children() {
    let seen: Arc<Mutex<Option<ChildError>>> = Arc::new(Mutex::new(None));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<scriptvisor::Reply>(1);
    let engine = {
        let seen = seen.clone();
        FnEngine::new().script("lonely-job", move |scope: Scope| {
            let seen = seen.clone();
            async move {
                let res = scope.create("x", "svc").await.err();
                *seen.lock().unwrap() = res;
                Ok(())
            }
        })
    };
    let tree = scriptvisor::Tree::builder(common::config(), engine)
        .with_reporter(Arc::new(tx))
        .build();

    tree.submit(scriptvisor::Job::new(1, "e1", "check", "lonely-job")).await.unwrap();
    let reply = rx.recv().await.unwrap();
    assert!(reply.succeed);
    assert!(matches!(*seen.lock().unwrap(), Some(ChildError::NoNode)));
}

#[tokio::test]
async fn job_named_like_a_node_cannot_touch_its_children() {
    let svc = Recorder::new();
    let seen: Arc<Mutex<Seen>> = Arc::default();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<scriptvisor::Reply>(1);
    let engine = {
        let svc = svc.clone();
        let seen = seen.clone();
        FnEngine::new()
            .script("owner", move |scope: Scope| {
                let svc = svc.clone();
                async move {
                    let child = scope.create("svc", "tcp").await?;
                    scope.bind(&child, svc).await?;
                    scope.private(&child).await?;
                    let open = scope.create("open", "tcp").await?;
                    scope.bind(&open, Recorder::new()).await?;
                    Ok(())
                }
            })
            .script("hijack", move |scope: Scope| {
                let seen = seen.clone();
                async move {
                    let owner = scope.import("owner").await?;
                    let secret = owner.child("svc").await.err();
                    let open = owner.child("open").await?;

                    let mut res = Seen {
                        secret,
                        ..Seen::default()
                    };
                    res.start = scope.start(&open).await.err();
                    res.shutdown = scope.shutdown(&open).await.err();
                    res.bind = scope.bind(&open, Recorder::new()).await.err();
                    *seen.lock().unwrap() = res;
                    Ok(())
                }
            })
    };
    let tree = scriptvisor::Tree::builder(common::config(), engine)
        .with_reporter(Arc::new(tx))
        .build();
    tree.register("owner", "owner", RegisterOptions::default()).await.unwrap();
    tree.wakeup().await.unwrap();

    // same name as the node: ownership must not follow the name
    tree.submit(scriptvisor::Job::new(1, "e1", "owner", "hijack")).await.unwrap();
    assert!(rx.recv().await.unwrap().succeed);

    let g = seen.lock().unwrap();
    assert!(matches!(g.secret, Some(ChildError::Private { .. })));
    assert!(matches!(g.start, Some(ChildError::Ownership { .. })));
    assert!(matches!(g.shutdown, Some(ChildError::Ownership { .. })));
    assert!(matches!(g.bind, Some(ChildError::Ownership { .. })));
    drop(g);

    assert_eq!(svc.starts(), 0);
    let owner = tree.find("owner").await.unwrap();
    assert_eq!(owner.child("open").await.unwrap().state().await, ChildState::Defined);
}
