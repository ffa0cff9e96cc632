//! End-to-end tests for the subscription engine
//!
//! These drive the full iterator over the in-memory transport: ordered
//! delivery, resumption, reconnect budgets, shutdown determinism and the
//! callback consumer.

use super::mock_transport::MockTransport;
use crate::client::RpcClient;
use crate::config::SubscribeOptions;
use crate::error::codes;
use crate::signal::CancellationSignal;
use crate::subscription::{ConsumeCallbacks, FinishReason, consume_event_iterator};
use crate::transport::{TransportError, methods};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Host stub that accepts subscribe/unsubscribe and nothing else.
fn sub_host() -> MockTransport {
    MockTransport::new(|method, _| match method {
        methods::SUBSCRIBE | methods::UNSUBSCRIBE => Ok(Value::Null),
        other => panic!("unexpected method {}", other),
    })
}

fn data_event(value: i64, id: Option<&str>) -> Value {
    match id {
        Some(id) => json!({"type": "data", "payload": {"data": value, "id": id}}),
        None => json!({"type": "data", "payload": {"data": value}}),
    }
}

fn error_event(code: &str) -> Value {
    json!({"type": "error", "payload": {"code": code, "message": "stream broke"}})
}

fn completed_event() -> Value {
    json!({"type": "completed"})
}

/// The channel of the n-th `rpc_subscribe` issued so far.
fn subscribe_channel(transport: &MockTransport, n: usize) -> String {
    let subs = transport.invocations_of(methods::SUBSCRIBE);
    let id = subs[n]["request"]["id"].as_str().expect("subscribe id").to_string();
    format!("rpc:subscription:{}", id)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

fn fast_options() -> SubscribeOptions {
    SubscribeOptions::new().with_reconnect_delay(Duration::from_millis(10))
}

// =============================================================================
// Ordered Delivery and Completion
// =============================================================================

#[tokio::test]
async fn test_ordered_stream_with_completion() {
    // data(1), data(2), data(3), completed → [1, 2, 3] then done.
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap();

    let channel = subscribe_channel(&transport, 0);
    for n in 1..=3 {
        assert!(transport.emit(&channel, data_event(n, None)));
    }
    transport.emit(&channel, completed_event());

    let mut collected = Vec::new();
    while let Some(item) = iterator.next().await {
        collected.push(item.unwrap());
    }
    assert_eq!(collected, vec![json!(1), json!(2), json!(3)]);

    // The iterator stays done.
    assert!(iterator.next().await.is_none());

    // Completion ran the shutdown path: listener released before the
    // best-effort unsubscribe, and released exactly once.
    wait_until(|| !transport.invocations_of(methods::UNSUBSCRIBE).is_empty()).await;
    let ops = transport.ops();
    let unlisten_at = ops.iter().position(|op| op == &format!("unlisten:{}", channel));
    let unsub_at = ops.iter().position(|op| op == "invoke:rpc_unsubscribe");
    assert!(unlisten_at.unwrap() < unsub_at.unwrap());
    assert_eq!(
        ops.iter().filter(|op| op.starts_with("unlisten:")).count(),
        1
    );
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test]
async fn test_last_event_id_tracks_latest_data_event() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap();
    assert!(iterator.last_event_id().is_none());

    let channel = subscribe_channel(&transport, 0);
    transport.emit(&channel, data_event(1, Some("a")));
    transport.emit(&channel, data_event(2, None));
    transport.emit(&channel, data_event(3, Some("c")));

    for _ in 0..3 {
        iterator.next().await.unwrap().unwrap();
    }
    // Events without an id leave the resume token alone.
    assert_eq!(iterator.last_event_id().as_deref(), Some("c"));
    iterator.close().await;
}

// =============================================================================
// Reconnection and Resumption
// =============================================================================

#[tokio::test]
async fn test_reconnect_resumes_from_last_event_id() {
    // data(a,1), data(b,2), error → re-subscribe with lastEventId=b →
    // data(c,3), completed → total [1, 2, 3].
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe(
            "stream.ticks",
            Value::Null,
            Some(fast_options().with_max_reconnects(1)),
        )
        .await
        .unwrap();

    let first_channel = subscribe_channel(&transport, 0);
    transport.emit(&first_channel, data_event(1, Some("a")));
    transport.emit(&first_channel, data_event(2, Some("b")));
    transport.emit(&first_channel, error_event("INTERNAL_ERROR"));

    let consumer = {
        let iterator = iterator.clone();
        tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(item) = iterator.next().await {
                collected.push(item.unwrap());
            }
            collected
        })
    };

    // The engine re-subscribes with the remembered resume token and a
    // fresh id.
    wait_until(|| transport.invocations_of(methods::SUBSCRIBE).len() == 2).await;
    let subs = transport.invocations_of(methods::SUBSCRIBE);
    assert_eq!(subs[1]["request"]["lastEventId"], "b");
    assert_ne!(subs[0]["request"]["id"], subs[1]["request"]["id"]);
    assert!(subs[0]["request"].get("lastEventId").is_none());

    let second_channel = subscribe_channel(&transport, 1);
    wait_until(|| transport.active_channels() == vec![second_channel.clone()]).await;
    transport.emit(&second_channel, data_event(3, Some("c")));
    transport.emit(&second_channel, completed_event());

    let collected = consumer.await.unwrap();
    assert_eq!(collected, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_max_reconnects_exceeded_rejects_all_pending_consumers() {
    // The host accepts every subscribe but errors the stream immediately;
    // after the budget is spent every pending consumer sees the terminal
    // error.
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe(
            "stream.x",
            Value::Null,
            Some(fast_options().with_max_reconnects(2)),
        )
        .await
        .unwrap();

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let iterator = iterator.clone();
        consumers.push(tokio::spawn(async move {
            loop {
                match iterator.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Some(err),
                    None => return None,
                }
            }
        }));
    }

    // Initial connect plus two reconnect attempts, each answered with an
    // immediate error event.
    let driver = {
        let transport = transport.clone();
        tokio::spawn(async move {
            for n in 0..3 {
                wait_until(|| transport.invocations_of(methods::SUBSCRIBE).len() > n).await;
                let channel = subscribe_channel(&transport, n);
                wait_until(|| transport.emit(&channel, error_event("INTERNAL_ERROR"))).await;
            }
        })
    };
    driver.await.unwrap();

    for consumer in consumers {
        let err = consumer
            .await
            .unwrap()
            .expect("consumer should observe the terminal error");
        assert_eq!(err.code, codes::MAX_RECONNECTS_EXCEEDED);
        let details = err.details.unwrap();
        assert_eq!(details["attempts"], 2);
        assert_eq!(details["maxReconnects"], 2);
        assert_eq!(details["path"], "stream.x");
    }
    assert_eq!(transport.invocations_of(methods::SUBSCRIBE).len(), 3);
}

#[tokio::test]
async fn test_error_without_auto_reconnect_is_terminal() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe(
            "stream.ticks",
            Value::Null,
            Some(SubscribeOptions::new().with_auto_reconnect(false)),
        )
        .await
        .unwrap();

    let channel = subscribe_channel(&transport, 0);
    transport.emit(&channel, error_event("STREAM_BROKEN"));

    // The processing consumer observes the host error directly.
    let err = iterator.next().await.unwrap().unwrap_err();
    assert_eq!(err.code, "STREAM_BROKEN");
    // The broadcast copy reaches one late consumer, then the iterator is
    // simply done.
    let err = iterator.next().await.unwrap().unwrap_err();
    assert_eq!(err.code, "STREAM_BROKEN");
    assert!(iterator.next().await.is_none());

    // No reconnect was attempted; cleanup still ran.
    assert_eq!(transport.invocations_of(methods::SUBSCRIBE).len(), 1);
    wait_until(|| !transport.invocations_of(methods::UNSUBSCRIBE).is_empty()).await;
    assert_eq!(transport.listener_count(), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_close_unblocks_every_pending_consumer_with_done() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap();

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let iterator = iterator.clone();
        consumers.push(tokio::spawn(async move { iterator.next().await }));
    }
    // Let all three block on the queue.
    tokio::time::sleep(Duration::from_millis(20)).await;

    iterator.close().await;
    // Idempotent.
    iterator.close().await;

    for consumer in consumers {
        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should unblock")
            .unwrap();
        assert!(item.is_none(), "shutdown must resolve with done, not error");
    }
    assert_eq!(transport.invocations_of(methods::UNSUBSCRIBE).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_failure_does_not_propagate() {
    let transport = MockTransport::new(|method, _| match method {
        methods::SUBSCRIBE => Ok(Value::Null),
        methods::UNSUBSCRIBE => Err(TransportError::Message("host gone".into())),
        other => panic!("unexpected method {}", other),
    });
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap();

    // close() swallows the unsubscribe failure; the listener is still
    // released first.
    iterator.close().await;
    assert_eq!(transport.listener_count(), 0);
    assert!(iterator.next().await.is_none());
}

#[tokio::test]
async fn test_subscribe_rejection_detaches_listener_before_error() {
    let transport = MockTransport::new(|method, _| match method {
        methods::SUBSCRIBE => Err(TransportError::Message("refused".into())),
        other => panic!("unexpected method {}", other),
    });
    let client = RpcClient::new(transport.clone());

    let err = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::INTERNAL_ERROR);

    // The short-lived registration was released again.
    assert_eq!(transport.listener_count(), 0);
    let ops = transport.ops();
    assert!(ops.iter().any(|op| op.starts_with("listen:")));
    assert!(ops.iter().any(|op| op.starts_with("unlisten:")));
}

#[tokio::test]
async fn test_abort_signal_runs_shutdown_path() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let signal = CancellationSignal::shared();
    let iterator = client
        .subscribe(
            "stream.ticks",
            Value::Null,
            Some(SubscribeOptions::new().with_signal(signal.clone())),
        )
        .await
        .unwrap();

    let consumer = {
        let iterator = iterator.clone();
        tokio::spawn(async move { iterator.next().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    signal.cancel();

    let item = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .expect("abort should unblock the consumer")
        .unwrap();
    assert!(item.is_none());

    wait_until(|| !transport.invocations_of(methods::UNSUBSCRIBE).is_empty()).await;
    assert_eq!(transport.listener_count(), 0);

    // Abort and explicit close are idempotent with each other.
    iterator.close().await;
    assert_eq!(transport.invocations_of(methods::UNSUBSCRIBE).len(), 1);
}

// =============================================================================
// Callback Consumer
// =============================================================================

#[tokio::test]
async fn test_consume_success_flow() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let finishes = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(Mutex::new(false));

    let handle = consume_event_iterator(
        {
            let client = client.clone();
            async move { client.subscribe("stream.ticks", Value::Null, None).await }
        },
        ConsumeCallbacks::new()
            .on_event({
                let events = events.clone();
                move |value| events.lock().unwrap().push(value)
            })
            .on_complete({
                let completed = completed.clone();
                move || *completed.lock().unwrap() = true
            })
            .on_finish({
                let finishes = finishes.clone();
                move |reason| finishes.lock().unwrap().push(reason)
            }),
    );

    wait_until(|| !transport.invocations_of(methods::SUBSCRIBE).is_empty()).await;
    let channel = subscribe_channel(&transport, 0);
    wait_until(|| transport.emit(&channel, data_event(1, None))).await;
    transport.emit(&channel, data_event(2, None));
    transport.emit(&channel, completed_event());

    handle.join().await;
    assert_eq!(*events.lock().unwrap(), vec![json!(1), json!(2)]);
    assert!(*completed.lock().unwrap());
    assert_eq!(*finishes.lock().unwrap(), vec![FinishReason::Success]);
}

#[tokio::test]
async fn test_consume_cancel_flow() {
    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let finishes = Arc::new(Mutex::new(Vec::new()));

    let handle = consume_event_iterator(
        {
            let client = client.clone();
            async move { client.subscribe("stream.ticks", Value::Null, None).await }
        },
        ConsumeCallbacks::new().on_finish({
            let finishes = finishes.clone();
            move |reason| finishes.lock().unwrap().push(reason)
        }),
    );

    wait_until(|| !transport.invocations_of(methods::SUBSCRIBE).is_empty()).await;
    handle.cancel();
    assert!(handle.is_cancelled());
    handle.join().await;

    assert_eq!(*finishes.lock().unwrap(), vec![FinishReason::Cancelled]);
    // Cancellation closed the iterator.
    wait_until(|| !transport.invocations_of(methods::UNSUBSCRIBE).is_empty()).await;
    assert_eq!(transport.listener_count(), 0);
}

#[tokio::test]
async fn test_consume_error_flow_when_subscribe_fails() {
    let transport = MockTransport::new(|method, _| match method {
        methods::SUBSCRIBE => Err(TransportError::Message("refused".into())),
        other => panic!("unexpected method {}", other),
    });
    let client = RpcClient::new(transport);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let finishes = Arc::new(Mutex::new(Vec::new()));

    let handle = consume_event_iterator(
        {
            let client = client.clone();
            async move { client.subscribe("stream.ticks", Value::Null, None).await }
        },
        ConsumeCallbacks::new()
            .on_error({
                let errors = errors.clone();
                move |err| errors.lock().unwrap().push(err.code)
            })
            .on_finish({
                let finishes = finishes.clone();
                move |reason| finishes.lock().unwrap().push(reason)
            }),
    );

    handle.join().await;
    assert_eq!(*errors.lock().unwrap(), vec![codes::INTERNAL_ERROR.to_string()]);
    assert_eq!(*finishes.lock().unwrap(), vec![FinishReason::Error]);
}

// =============================================================================
// Typed Iterator
// =============================================================================

#[tokio::test]
async fn test_typed_iterator_deserializes_elements() {
    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Tick {
        n: i64,
    }

    let transport = sub_host();
    let client = RpcClient::new(transport.clone());
    let iterator = client
        .subscribe("stream.ticks", Value::Null, None)
        .await
        .unwrap()
        .typed::<Tick>();

    let channel = subscribe_channel(&transport, 0);
    transport.emit(&channel, json!({"type": "data", "payload": {"data": {"n": 1}}}));
    transport.emit(&channel, completed_event());

    assert_eq!(iterator.next().await.unwrap().unwrap(), Tick { n: 1 });
    assert!(iterator.next().await.is_none());
}
