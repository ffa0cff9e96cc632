//! End-to-end tests for the batch engine

use super::mock_transport::MockTransport;
use crate::config::CallOptions;
use crate::client::RpcClient;
use crate::error::codes;
use crate::transport::methods;
use serde_json::{Value, json};

/// Host stub answering the batch with one success and one failure.
fn mixed_host() -> MockTransport {
    MockTransport::new(|method, args| {
        assert_eq!(method, methods::CALL_BATCH);
        let requests = args["batch"]["requests"].as_array().cloned().unwrap_or_default();
        let results: Vec<Value> = requests
            .iter()
            .map(|request| {
                let id = request["id"].clone();
                match request["path"].as_str() {
                    Some("health") => json!({"id": id, "data": {"status": "ok"}}),
                    _ => json!({
                        "id": id,
                        "error": {"code": "NOT_FOUND", "message": "no user"},
                    }),
                }
            })
            .collect();
        Ok(json!({ "results": results }))
    })
}

#[tokio::test]
async fn test_batch_mixed_outcome() {
    // One success and one failure; the batch itself still succeeds.
    let client = RpcClient::new(mixed_host());
    let response = client
        .batch()
        .add("a", "health")
        .add_with_input("b", "user.get", json!({"id": 999}))
        .send(CallOptions::default())
        .await
        .unwrap();

    assert_eq!(response.success_count(), 1);
    assert_eq!(response.error_count(), 1);
    assert!(response.is_success("a"));
    assert_eq!(response.get_result("a").data.unwrap(), json!({"status": "ok"}));
    assert_eq!(response.get_result("b").error.unwrap().code, "NOT_FOUND");
}

#[tokio::test]
async fn test_batch_wire_shape_and_null_normalization() {
    let transport = mixed_host();
    let client = RpcClient::new(transport.clone());
    client
        .batch()
        .add("a", "health")
        .add_with_input("b", "user.get", json!({"id": 1}))
        .send(CallOptions::default())
        .await
        .unwrap();

    let sent = &transport.invocations_of(methods::CALL_BATCH)[0];
    assert_eq!(
        sent["batch"]["requests"],
        json!([
            {"id": "a", "path": "health", "input": null},
            {"id": "b", "path": "user.get", "input": {"id": 1}},
        ])
    );
}

#[tokio::test]
async fn test_batch_result_order_matches_request_order() {
    let client = RpcClient::new(mixed_host());
    let response = client
        .batch()
        .add("first", "health")
        .add("second", "user.get")
        .add("third", "health")
        .send(CallOptions::default())
        .await
        .unwrap();

    let ids: Vec<&str> = response.results().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
    // Exactly one of data/error per entry.
    for result in response.results() {
        assert_ne!(result.data.is_some(), result.error.is_some());
    }
}

#[tokio::test]
async fn test_batch_invalid_path_rejects_whole_batch() {
    let transport = mixed_host();
    let client = RpcClient::new(transport.clone());
    let err = client
        .batch()
        .add("good", "health")
        .add("bad", "user..get")
        .send(CallOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::VALIDATION_ERROR);
    let details = err.details.unwrap();
    assert_eq!(details["invalid"][0]["id"], "bad");
    // Nothing was sent.
    assert!(transport.invocations().is_empty());
}

#[tokio::test]
async fn test_batch_duplicate_ids_rejected() {
    let client = RpcClient::new(mixed_host());
    let err = client
        .batch()
        .add("a", "health")
        .add("a", "user.get")
        .send(CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::VALIDATION_ERROR);
    assert!(err.message.contains("Duplicate"));
}

#[tokio::test]
async fn test_ids_absent_from_response_resolve_to_not_found() {
    // Host that drops one result entirely.
    let transport = MockTransport::new(|_, _| {
        Ok(json!({"results": [{"id": "kept", "data": 1}]}))
    });
    let client = RpcClient::new(transport);
    let response = client
        .batch()
        .add("kept", "health")
        .add("dropped", "health")
        .send(CallOptions::default())
        .await
        .unwrap();

    let missing = response.get_result("dropped");
    assert_eq!(missing.error.unwrap().code, codes::NOT_FOUND);
    assert!(!response.is_success("dropped"));
    assert!(response.is_success("kept"));
}
