//! Integration Tests: request/response correlation
//!
//! These tests verify:
//! 1. Wallet errors come back as values
//! 2. Timeout vs caller cancellation precedence
//! 3. Protocol violations and dropped subscriptions

mod common;

use common::*;
use nwc_lightning::nwc::message::{EmptyParams, GetBalanceResult};
use nwc_lightning::nwc::{Method, Reply, WalletEndpoint};
use nwc_lightning::relay::Encryption;
use nwc_lightning::{NwcError, ProtocolRequestExecutor, Result, WalletConnectParams};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn endpoint() -> WalletEndpoint {
    let params = WalletConnectParams::parse(&uri()).expect("uri");
    WalletEndpoint::new(Arc::new(params), Encryption::Nip04)
}

async fn balance(h: &Harness, timeout: Duration, cancel: &CancellationToken) -> Result<Reply<GetBalanceResult>> {
    ProtocolRequestExecutor::new(h.pool.clone())
        .send(&endpoint(), Method::GetBalance, EmptyParams {}, timeout, cancel)
        .await
}

/// Test: result is decoded into the typed reply
#[tokio::test]
async fn correlated_result() {
    let h = Harness::standard();
    let reply = balance(&h, Duration::from_secs(1), &CancellationToken::new()).await.expect("send");
    assert_eq!(reply.expect("ok").balance, 21_000_000);

    let sent = h.relay.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].params, json!({}));
    assert_eq!(sent[0].event.recipient, WALLET);
}

/// Test: every wallet error code is a value, never Err
#[tokio::test]
async fn remote_errors_are_values() {
    for code in ["RATE_LIMITED", "NOT_IMPLEMENTED", "QUOTA_EXCEEDED", "SOMETHING_NEW"] {
        let h = Harness::new();
        h.relay.on_request(move |_: &str, _: &Value| WalletReply::Error(code, "nope"));
        let reply = balance(&h, Duration::from_secs(1), &CancellationToken::new()).await.expect("send");
        let remote = reply.expect_err("remote error");
        assert_eq!(remote.code, code);
        assert_eq!(remote.message, "nope");
    }
}

/// Test: a silent wallet runs into the deadline
#[tokio::test]
async fn silent_wallet_times_out() {
    let h = Harness::new();
    let err = balance(&h, Duration::from_millis(100), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, NwcError::Timeout(_)), "{}", err);
    assert!(err.is_deadline());
}

/// Test: caller cancellation wins even when the deadline has also passed
#[tokio::test]
async fn cancellation_wins_over_timeout() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = balance(&h, Duration::ZERO, &cancel).await.unwrap_err();
    assert!(matches!(err, NwcError::Cancelled), "{}", err);
}

/// Test: cancelling mid-wait aborts the request
#[tokio::test]
async fn cancel_during_wait() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = balance(&h, Duration::from_secs(5), &cancel).await.unwrap_err();
    assert!(matches!(err, NwcError::Cancelled));
}

/// Test: a response for another method is a protocol violation
#[tokio::test]
async fn mismatched_result_type() {
    let h = Harness::new();
    h.relay.on_request(|_: &str, _: &Value| {
        WalletReply::Raw(json!({"result_type": "get_info", "result": {"balance": 1}}))
    });
    let err = balance(&h, Duration::from_secs(1), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, NwcError::UnexpectedResponse(_)));
}

/// Test: relay link dropping before the answer is a transport error
#[tokio::test]
async fn subscription_end_is_transport_error() {
    let h = Harness::new();
    let relay = h.relay.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        relay.drop_subscribers();
    });
    let err = balance(&h, Duration::from_secs(5), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, NwcError::Transport(_)), "{}", err);
}

/// Test: the usage token is returned after every call, success or not
#[tokio::test]
async fn pool_reference_released() {
    let h = Harness::new();
    let _ = balance(&h, Duration::from_millis(50), &CancellationToken::new()).await;
    let stats = h.pool.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].ref_count, 0);
}
