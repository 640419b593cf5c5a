mod common;

use std::sync::{Arc, Mutex};

use common::tree;
use scriptvisor::{Diff, DiffUpdate, FnEngine, Scope, View};

fn decode(bytes: &[u8]) -> View {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn diff_round_trip() {
    let engine = FnEngine::new().script("ok-script", |_s: Scope| async { Ok(()) });
    let tree = tree(engine);

    let body = br#"{"updates":[{"id":1,"name":"n","chunk":"ok-script"}]}"#;
    let view = decode(&tree.handle_diff(body).await.unwrap());
    let n = view.node("n").unwrap();
    assert_eq!(n.id, 1);
    assert_eq!(n.status, "running");
    assert!(!n.failed);
    assert_eq!(n.origin, "remote");
    assert!(n.since.is_some());

    let view = decode(&tree.handle_diff(br#"{"removes":[1]}"#).await.unwrap());
    assert!(view.node("n").is_none());
    assert!(tree.find("n").await.is_none());
}

#[tokio::test]
async fn empty_body_is_a_status_request() {
    let runs = Arc::new(Mutex::new(0usize));
    let engine = {
        let runs = runs.clone();
        FnEngine::new().script("count", move |_s: Scope| {
            let runs = runs.clone();
            async move {
                *runs.lock().unwrap() += 1;
                Ok(())
            }
        })
    };
    let tree = tree(engine);
    tree.register("n", "count", Default::default()).await.unwrap();

    let view = decode(&tree.handle_diff(b"  ").await.unwrap());
    assert_eq!(view.node("n").unwrap().status, "register");
    assert_eq!(*runs.lock().unwrap(), 0);

    assert!(tree.handle_diff(b"{not json").await.is_err());
}

#[tokio::test]
async fn unchanged_hash_is_skipped() {
    let engine = FnEngine::new()
        .script("v1", |_s: Scope| async { Ok(()) })
        .script("v2", |_s: Scope| async { Ok(()) });
    let tree = tree(engine);

    let update = |hash: &str, chunk: &str| Diff {
        removes: Vec::new(),
        updates: vec![DiffUpdate {
            id: 7,
            name: "n".into(),
            hash: hash.into(),
            dialect: "lua".into(),
            chunk: chunk.into(),
        }],
    };

    let view = tree.apply_diff(update("h1", "v1")).await;
    assert_eq!(view.node("n").unwrap().hash, "h1");
    assert_eq!(view.node("n").unwrap().dialect, "lua");

    // same hash: not even registered again
    let node = tree.find("n").await.unwrap();
    tree.apply_diff(update("h1", "v2")).await;
    assert_eq!(node.hash().await, "h1");
    assert_eq!(node.state().await.as_str(), "running");

    let view = tree.apply_diff(update("h2", "v2")).await;
    assert_eq!(view.node("n").unwrap().hash, "h2");
    assert_eq!(view.node("n").unwrap().status, "running");
}
