//! TCP peer tests against the programmable mock controller.

mod common;

use std::time::Duration;

use serde_json::{json, Value};

use common::{mock_controller, MockBehavior};

use uiabridge_core::peer::{PeerError, PeerExchange, TcpPeer};
use uiabridge_core::protocol::{Command, ResultEnvelope};

const WAIT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// 1. Command round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_exchange_returns_command_text() {
    let (addr, requests) = mock_controller(vec![MockBehavior::Respond(
        json!({"command": {"id": "1", "method": "uia.target.get_model", "params": []}}),
    )])
    .await;
    let mut peer = TcpPeer::new(addr.to_string());

    let text = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap().unwrap();

    let command = Command::parse(&text).unwrap();
    assert_eq!(command.method, "uia.target.get_model");
    assert!(peer.is_connected());

    let requests = requests.lock().await;
    assert_eq!(requests[0]["op"], "send_result_and_get_next");
    assert_eq!(requests[0]["result"]["result"], "BootstrapStandBy");
    assert_eq!(requests[0]["timeout"], json!(1));
}

#[tokio::test]
async fn test_null_command_means_nothing_queued() {
    let (addr, _requests) = mock_controller(vec![MockBehavior::Respond(json!({"command": null}))]).await;
    let mut peer = TcpPeer::new(addr.to_string());

    assert_eq!(peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap(), None);
}

#[tokio::test]
async fn test_connection_is_reused_between_exchanges() {
    let (addr, requests) = mock_controller(vec![
        MockBehavior::Respond(json!({"command": {"id": 1, "method": "a"}})),
        MockBehavior::Respond(json!({"command": {"id": 2, "method": "b"}})),
    ])
    .await;
    let mut peer = TcpPeer::new(addr.to_string());

    peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap();
    let second = peer
        .exchange(&ResultEnvelope::ok(json!(1), json!("done")), WAIT)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(Command::parse(&second).unwrap().method, "b");
    let requests: Vec<Value> = requests.lock().await.clone();
    assert_eq!(requests[1]["result"], json!({"id": 1, "result": "done", "error": null}));
}

#[tokio::test]
async fn test_deliver_sends_final_result() {
    let (addr, requests) = mock_controller(vec![MockBehavior::Swallow]).await;
    let mut peer = TcpPeer::new(addr.to_string());

    peer.deliver(&ResultEnvelope::released(json!("9")), WAIT).await.unwrap();

    // Give the mock a moment to read the line.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let requests = requests.lock().await;
    assert_eq!(requests[0]["op"], "send_result");
    assert_eq!(requests[0]["result"]["result"], "released");
}

// ---------------------------------------------------------------------------
// 2. Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_reply_is_recoverable() {
    let (addr, _requests) =
        mock_controller(vec![MockBehavior::Respond(json!({"status": 3, "output": "queue locked"}))]).await;
    let mut peer = TcpPeer::new(addr.to_string());

    let err = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap_err();

    assert_eq!(err, PeerError::Status { code: 3, output: "queue locked".into() });
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_garbage_reply_is_a_status_failure() {
    let (addr, _requests) = mock_controller(vec![MockBehavior::SendGarbage]).await;
    let mut peer = TcpPeer::new(addr.to_string());

    let err = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap_err();

    assert!(matches!(err, PeerError::Status { code: -1, .. }));
}

#[tokio::test]
async fn test_non_utf8_reply_is_recoverable() {
    let (addr, _requests) = mock_controller(vec![
        MockBehavior::Raw(b"\xff\xfe garbage\n".to_vec()),
        MockBehavior::Respond(json!({"command": {"id": 2, "method": "uia.target.get_name"}})),
    ])
    .await;
    let mut peer = TcpPeer::new(addr.to_string());

    let err = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap_err();
    assert!(matches!(err, PeerError::Status { code: -1, .. }));
    assert!(!err.is_fatal());
    assert!(peer.is_connected());

    let next = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap().unwrap();
    assert_eq!(Command::parse(&next).unwrap().method, "uia.target.get_name");
}

#[tokio::test]
async fn test_closed_connection_is_broken() {
    let (addr, _requests) = mock_controller(vec![MockBehavior::Drop]).await;
    let mut peer = TcpPeer::new(addr.to_string());

    let err = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap_err();

    assert!(matches!(err, PeerError::Broken(_)));
    assert!(err.is_fatal());
    assert!(!peer.is_connected());
}

#[tokio::test]
async fn test_slow_controller_times_out_and_drops_stream() {
    let (addr, _requests) = mock_controller(vec![MockBehavior::Delay(
        Duration::from_secs(10),
        json!({"command": {"id": 1, "method": "late"}}),
    )])
    .await;
    let mut peer = TcpPeer::new(addr.to_string());

    // One second of wait plus the read grace.
    let outcome = tokio::time::timeout(
        Duration::from_secs(8),
        peer.exchange(&ResultEnvelope::standby(), WAIT),
    )
    .await
    .expect("exchange must be bounded");

    assert_eq!(outcome, Err(PeerError::Timeout));
    assert!(!peer.is_connected());
}

#[tokio::test]
async fn test_unreachable_controller() {
    // Bind and immediately drop a listener to get a port nothing listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let mut peer = TcpPeer::new(addr.to_string());

    let err = peer.exchange(&ResultEnvelope::standby(), WAIT).await.unwrap_err();

    assert!(matches!(err, PeerError::Unreachable(_)));
    assert!(!err.is_fatal());
}
