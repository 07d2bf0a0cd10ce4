mod common;

use common::{mock_upstream, spawn_app, test_config, valid_chat_body};
use reqwest::Client;
use serde_json::{json, Value};

#[tokio::test]
async fn clear_empties_the_session_history() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"reply"}}]}),
    )
    .await;
    let (base, state, handle) = spawn_app(test_config(&upstream.url)).await;
    let client = Client::new();

    client
        .post(format!("{base}/chat/send"))
        .header("authorization", "Bearer clear-session")
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(state.history.read("clear-session").len(), 2);

    let resp = client
        .post(format!("{base}/history/clear"))
        .header("authorization", "Bearer clear-session")
        .json(&json!({"clear": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], json!(true));
    assert!(state.history.read("clear-session").is_empty());

    // The next turn composes from a fresh history.
    client
        .post(format!("{base}/chat/send"))
        .header("authorization", "Bearer clear-session")
        .json(&valid_chat_body("again"))
        .send()
        .await
        .unwrap();
    let bodies = upstream.bodies.lock().unwrap();
    let last = bodies.last().unwrap()["messages"].as_array().unwrap();
    assert_eq!(last.len(), 2);
    handle.abort();
}

#[tokio::test]
async fn clear_without_the_flag_is_invalid() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"reply"}}]}),
    )
    .await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/history/clear"))
        .header("authorization", "Bearer flag-session")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorKind"], json!("InvalidInput"));
    handle.abort();
}

#[tokio::test]
async fn clear_only_affects_the_calling_session() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"reply"}}]}),
    )
    .await;
    let (base, state, handle) = spawn_app(test_config(&upstream.url)).await;
    let client = Client::new();

    for session in ["Bearer keep-session", "Bearer drop-session"] {
        client
            .post(format!("{base}/chat/send"))
            .header("authorization", session)
            .json(&valid_chat_body("hello"))
            .send()
            .await
            .unwrap();
    }
    client
        .post(format!("{base}/history/clear"))
        .header("authorization", "Bearer drop-session")
        .json(&json!({"clear": true}))
        .send()
        .await
        .unwrap();

    assert!(state.history.read("drop-session").is_empty());
    assert_eq!(state.history.read("keep-session").len(), 2);
    handle.abort();
}
