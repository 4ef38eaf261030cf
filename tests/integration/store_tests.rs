//! Post store feeding the runner

use crate::common::{controller, setup_test_logging, wait_idle};
use assert_matches::assert_matches;
use dynnode_common::{CodeFields, FileStore, NewPost, PostStore, StoreError};

#[tokio::test]
async fn test_saved_code_runs_against_sample_context() {
    setup_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("posts.json"));

    let post = store
        .create(NewPost::new("echo", "return ctx;"))
        .await
        .unwrap();

    // Default sample context is an empty object with whitespace.
    let fields = store.get_code(&post.id).await.unwrap();
    let controller = controller();
    assert!(controller.run(&fields.code, &fields.context_text, 2000));
    let state = wait_idle(&controller).await;
    assert_eq!(state.result_text, "{}");

    store
        .save_code(
            &post.id,
            CodeFields {
                code: "function main(ctx){ return ctx.items.length; }".into(),
                context_text: r#"{"items":[1,2,3]}"#.into(),
            },
        )
        .await
        .unwrap();

    let fields = store.get_code(&post.id).await.unwrap();
    assert!(controller.run(&fields.code, &fields.context_text, 2000));
    let state = wait_idle(&controller).await;
    assert_eq!(state.result_text, "3");

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].updated_at >= listed[0].created_at);
}

#[tokio::test]
async fn test_unknown_post() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("posts.json"));

    assert_matches!(store.get_code("dn_0_000000").await, Err(StoreError::NotFound(_)));
    assert_matches!(
        store
            .save_code(
                "dn_0_000000",
                CodeFields {
                    code: "return 1;".into(),
                    context_text: "{}".into(),
                },
            )
            .await,
        Err(StoreError::NotFound(_))
    );
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.json");

    let id = {
        let store = FileStore::new(&path);
        store
            .create(NewPost::new("kept", "return 1;").with_sample_ctx("{\"a\":1}"))
            .await
            .unwrap()
            .id
    };

    let reopened = FileStore::new(&path);
    let fields = reopened.get_code(&id).await.unwrap();
    assert_eq!(fields.code, "return 1;");
    assert_eq!(fields.context_text, "{\"a\":1}");

    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["items"][0]["sampleCtx"], "{\"a\":1}");
    assert_eq!(doc["items"][0]["status"], "DRAFT");
}
