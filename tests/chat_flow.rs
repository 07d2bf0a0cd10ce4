mod common;

use common::{mock_upstream, spawn_app, test_config, valid_chat_body};
use reqwest::Client;
use serde_json::{json, Value};

const SESSION: &str = "Bearer integration-session";

#[tokio::test]
async fn successful_turn_composes_system_then_user() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"role":"assistant","content":"hi there"}}]}),
    )
    .await;
    let (base, state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["text"], json!("hi there"));
    assert!(body.get("errorKind").is_none());

    // Exactly [system, user("hello")] went upstream.
    {
        let bodies = upstream.bodies.lock().unwrap();
        let messages = bodies[0]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], json!("system"));
        assert_eq!(messages[1]["role"], json!("user"));
        assert_eq!(messages[1]["content"], json!("hello"));
    }

    // History now holds the user turn and the assistant reply.
    let history = state.history.read("integration-session");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "hi there");
    handle.abort();
}

#[tokio::test]
async fn validated_parameters_are_forwarded() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"ok"}}]}),
    )
    .await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&json!({
            "message": "hello",
            "credential": "sk-abcdefghij",
            "model": "gpt-4o",
            "temperature": 0.2,
            "maxTokens": 1500,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let bodies = upstream.bodies.lock().unwrap();
    assert_eq!(bodies[0]["model"], json!("gpt-4o"));
    assert_eq!(bodies[0]["temperature"], json!(0.2));
    assert_eq!(bodies[0]["max_tokens"], json!(1500));
    handle.abort();
}

#[tokio::test]
async fn upstream_http_error_leaves_history_untouched() {
    let upstream = mock_upstream(500, json!({"oops": true})).await;
    let (base, state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    // Upstream failures stay structured 200s at this boundary.
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["errorKind"], json!("UpstreamHTTPError"));
    assert!(state.history.read("integration-session").is_empty());
    handle.abort();
}

#[tokio::test]
async fn upstream_service_error_propagates_the_message() {
    let upstream = mock_upstream(200, json!({"error":{"message":"quota exceeded"}})).await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorKind"], json!("UpstreamServiceError"));
    assert!(body["text"].as_str().unwrap().contains("quota exceeded"));
    handle.abort();
}

#[tokio::test]
async fn missing_reply_content_is_a_malformed_response() {
    let upstream = mock_upstream(200, json!({"choices": []})).await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;

    let resp = Client::new()
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorKind"], json!("UpstreamMalformedResponse"));
    handle.abort();
}

#[tokio::test]
async fn second_turn_carries_the_stored_history() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"reply"}}]}),
    )
    .await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;
    let client = Client::new();

    for message in ["first", "second"] {
        client
            .post(format!("{base}/chat/send"))
            .header("authorization", SESSION)
            .json(&valid_chat_body(message))
            .send()
            .await
            .unwrap();
    }

    let bodies = upstream.bodies.lock().unwrap();
    let second = bodies[1]["messages"].as_array().unwrap();
    // system + prior user/assistant pair + new user turn.
    assert_eq!(second.len(), 4);
    assert_eq!(second[1]["content"], json!("first"));
    assert_eq!(second[2]["role"], json!("assistant"));
    assert_eq!(second[3]["content"], json!("second"));
    handle.abort();
}

#[tokio::test]
async fn flagged_replies_are_neutralized_and_counted() {
    let upstream = mock_upstream(
        200,
        json!({"choices":[{"message":{"content":"<script>alert(1)</script>done"}}]}),
    )
    .await;
    let (base, _state, handle) = spawn_app(test_config(&upstream.url)).await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/chat/send"))
        .header("authorization", SESSION)
        .json(&valid_chat_body("hello"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], json!(true));
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("&lt;script&gt;"));
    assert!(!text.contains("<script>"));

    let metrics = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("chatgate_flagged_replies_total 1"));
    handle.abort();
}
