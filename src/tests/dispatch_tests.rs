//! Dispatch engine tests: routing, validation, concurrency, backpressure,
//! cancellation, timeouts, and the one-terminal-per-id invariant

use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{error_kind, fast_config, recv_message, test_engine, test_registry};
use crate::protocol::message::{Message, RequestId};

#[tokio::test]
async fn echo_dispatch_produces_matching_response() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": "hi" } }),
    );

    match recv_message(&mut rx).await {
        Message::Response { id, result } => {
            assert_eq!(id, RequestId::Number(1));
            assert_eq!(result, json!({ "text": "hi" }));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn abbreviated_args_key_is_accepted() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "echo", "args": { "text": "hi" } }),
    );

    match recv_message(&mut rx).await {
        Message::Response { result, .. } => assert_eq!(result, json!({ "text": "hi" })),
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_method_yields_not_found() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(RequestId::Number(2), "tools/destroy", json!({}));

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "NotFoundError");
}

#[tokio::test]
async fn unknown_tool_yields_not_found() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(2),
        "tools/call",
        json!({ "name": "ghost", "arguments": {} }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "NotFoundError");
    match message {
        Message::Error { id, .. } => assert_eq!(id, Some(RequestId::Number(2))),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn schema_mismatch_never_invokes_handler() {
    let (registry, invocations) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    // "text" is required by the echo schema
    engine.dispatch(
        RequestId::Number(3),
        "tools/call",
        json!({ "name": "echo", "arguments": { "wrong": 1 } }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "InvalidArgumentError");
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrongly_typed_argument_never_invokes_handler() {
    let (registry, invocations) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(3),
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": 42 } }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "InvalidArgumentError");
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_failure_maps_to_handler_error() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(4),
        "tools/call",
        json!({ "name": "failing", "arguments": { "text": "x" } }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "HandlerError");
}

#[tokio::test]
async fn handler_exhaustion_maps_to_overloaded() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(5),
        "tools/call",
        json!({ "name": "busy", "arguments": {} }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "OverloadedError");
}

#[tokio::test]
async fn concurrent_requests_each_get_exactly_one_terminal() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    let n = 8;
    for i in 0..n {
        engine.dispatch(
            RequestId::Number(i),
            "tools/call",
            json!({ "name": "slow", "arguments": { "ms": 20 } }),
        );
    }

    let mut seen = HashSet::new();
    for _ in 0..n {
        match recv_message(&mut rx).await {
            Message::Response { id, .. } => {
                assert!(seen.insert(id), "duplicate terminal for an id");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }
    engine.wait_idle().await;
    assert_eq!(seen.len(), n as usize);
    // No extra terminal messages follow
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn ceiling_queues_rather_than_rejects() {
    let (registry, _) = test_registry();
    let mut config = fast_config();
    config.max_in_flight = 1;
    config.queue_timeout = Duration::from_secs(2);
    let (engine, mut rx) = test_engine(config, registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 100 } }),
    );
    engine.dispatch(
        RequestId::Number(2),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 10 } }),
    );

    // With a ceiling of one the first request must finish first even
    // though the second sleeps for less time
    match recv_message(&mut rx).await {
        Message::Response { id, .. } => assert_eq!(id, RequestId::Number(1)),
        other => panic!("expected response, got {other:?}"),
    }
    match recv_message(&mut rx).await {
        Message::Response { id, .. } => assert_eq!(id, RequestId::Number(2)),
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn queue_timeout_yields_overloaded() {
    let (registry, _) = test_registry();
    let mut config = fast_config();
    config.max_in_flight = 1;
    config.queue_timeout = Duration::from_millis(50);
    config.request_timeout = Duration::from_secs(5);
    let (engine, mut rx) = test_engine(config, registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 400 } }),
    );
    engine.dispatch(
        RequestId::Number(2),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 10 } }),
    );

    // The queued request gives up first
    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "OverloadedError");
    match message {
        Message::Error { id, .. } => assert_eq!(id, Some(RequestId::Number(2))),
        _ => unreachable!(),
    }

    match recv_message(&mut rx).await {
        Message::Response { id, .. } => assert_eq!(id, RequestId::Number(1)),
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_of_in_flight_request_resolves_it() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 5000 } }),
    );
    // Give the handler a beat to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.cancel(&RequestId::Number(1));

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "HandlerError");
    engine.wait_idle().await;
}

#[tokio::test]
async fn cancelling_a_completed_request_is_a_no_op() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": "done" } }),
    );
    let first = recv_message(&mut rx).await;
    assert!(matches!(first, Message::Response { .. }));
    engine.wait_idle().await;

    engine.cancel(&RequestId::Number(1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "late cancellation produced a message");
}

#[tokio::test]
async fn unacknowledged_cancellation_times_out() {
    let (registry, _) = test_registry();
    let mut config = fast_config();
    config.request_timeout = Duration::from_millis(100);
    config.cancel_grace = Duration::from_millis(50);
    let (engine, mut rx) = test_engine(config, registry);

    // "stubborn" never checks its token, so the grace period expires and
    // the task is force-abandoned
    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "stubborn", "arguments": { "ms": 10000 } }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "TimeoutError");
    engine.wait_idle().await;
}

#[tokio::test]
async fn cooperative_handler_resolves_within_grace_on_timeout() {
    let (registry, _) = test_registry();
    let mut config = fast_config();
    config.request_timeout = Duration::from_millis(100);
    config.cancel_grace = Duration::from_millis(500);
    let (engine, mut rx) = test_engine(config, registry);

    // "slow" observes its token, so it resolves during the grace period
    // with a handler error rather than being abandoned
    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 10000 } }),
    );

    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "HandlerError");
}

#[tokio::test]
async fn resource_read_routes_to_resource_handler() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "resources/read",
        json!({ "uri": "memo://note" }),
    );

    match recv_message(&mut rx).await {
        Message::Response { result, .. } => {
            assert_eq!(result["contents"][0]["uri"], "memo://note");
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn prompt_get_requires_declared_arguments() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry.clone());

    engine.dispatch(
        RequestId::Number(1),
        "prompts/get",
        json!({ "name": "greet", "arguments": {} }),
    );
    let message = recv_message(&mut rx).await;
    assert_eq!(error_kind(&message), "InvalidArgumentError");

    engine.dispatch(
        RequestId::Number(2),
        "prompts/get",
        json!({ "name": "greet", "arguments": { "name": "Ada" } }),
    );
    match recv_message(&mut rx).await {
        Message::Response { result, .. } => {
            assert!(result["messages"].is_array());
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn list_methods_enumerate_in_registration_order() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(RequestId::Number(1), "tools/list", json!(null));
    match recv_message(&mut rx).await {
        Message::Response { result, .. } => {
            let names: Vec<&str> = result["tools"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["name"].as_str().unwrap())
                .collect();
            assert_eq!(names, vec!["echo", "slow", "stubborn", "failing", "busy"]);
        }
        other => panic!("expected response, got {other:?}"),
    }

    engine.dispatch(RequestId::Number(2), "resources/list", json!(null));
    match recv_message(&mut rx).await {
        Message::Response { result, .. } => {
            assert_eq!(result["resources"][0]["uri"], "memo://note");
            assert_eq!(result["resources"][0]["mimeType"], "text/plain");
        }
        other => panic!("expected response, got {other:?}"),
    }

    engine.dispatch(RequestId::Number(3), "prompts/list", json!(null));
    match recv_message(&mut rx).await {
        Message::Response { result, .. } => {
            let prompt = &result["prompts"][0];
            assert_eq!(prompt["name"], "greet");
            assert_eq!(prompt["arguments"][0]["name"], "name");
            assert_eq!(prompt["arguments"][0]["required"], true);
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_in_flight_id_is_rejected() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 300 } }),
    );
    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "echo", "arguments": { "text": "dupe" } }),
    );

    let first = recv_message(&mut rx).await;
    assert_eq!(error_kind(&first), "InvalidArgumentError");

    // The original request still resolves normally
    match recv_message(&mut rx).await {
        Message::Response { id, .. } => assert_eq!(id, RequestId::Number(1)),
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn wait_idle_returns_once_in_flight_drains() {
    let (registry, _) = test_registry();
    let (engine, mut rx) = test_engine(fast_config(), registry);

    engine.dispatch(
        RequestId::Number(1),
        "tools/call",
        json!({ "name": "slow", "arguments": { "ms": 50 } }),
    );
    assert_eq!(engine.in_flight_len(), 1);

    engine.wait_idle().await;
    assert_eq!(engine.in_flight_len(), 0);
    assert!(matches!(
        recv_message(&mut rx).await,
        Message::Response { .. }
    ));
}
