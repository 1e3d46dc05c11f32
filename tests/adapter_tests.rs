//! Integration Tests: wallet adapter against a scripted wallet
//!
//! These tests verify:
//! 1. Capability negotiation (mandatory commands, network check)
//! 2. Connection string handler behaviour
//! 3. Operation mapping, remote errors as values
//! 4. Pay with confirmatory lookup fallback
//! 5. Unsupported operations

mod common;

use chrono::DateTime;
use common::*;
use nwc_lightning::bolt11::Bolt11Details;
use nwc_lightning::lightning::{ListInvoicesQuery, ListPaymentsQuery};
use nwc_lightning::relay::Encryption;
use nwc_lightning::{
    AdapterConfig, ConnectionStringHandler, CreateInvoiceRequest, InvoiceStatus, LightningClient,
    ListenerMode, Network, NwcConnectionStringHandler, NwcError, PayRequest, PaymentStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

// ============================================================================
// Negotiation
// ============================================================================

/// Test: wallet advertising every mandatory command connects
#[tokio::test]
async fn connects_with_mandatory_commands() {
    let h = Harness::standard();
    let adapter = h.connect().await.expect("connect");

    assert!(adapter.capabilities().methods.contains("lookup_invoice"));
    assert_eq!(adapter.capabilities().encryption, Encryption::Nip04);
    assert_eq!(adapter.remote_info().alias, "mock-wallet");
    assert_eq!(adapter.remote_info().network, Some(Network::Bitcoin));
    assert_eq!(h.relay.count("get_info"), 1);
}

/// Test: a missing mandatory command rejects the connection string
#[tokio::test]
async fn missing_command_rejected() {
    let h = Harness::new();
    h.relay.set_info("get_info make_invoice list_transactions pay_invoice", None, None);
    h.relay.on_request(standard_wallet);

    let err = h.connect().await.err().expect("must fail");
    match err {
        NwcError::Configuration(msg) => assert!(msg.contains("lookup_invoice"), "{}", msg),
        other => panic!("unexpected error: {}", other),
    }
    // rejected before get_info is ever sent
    assert_eq!(h.relay.count("get_info"), 0);
}

/// Test: a wallet on another chain is rejected
#[tokio::test]
async fn network_mismatch_rejected() {
    let h = Harness::new();
    h.relay.set_info(ALL_METHODS, None, None);
    h.relay.on_request(|method: &str, params: &Value| match method {
        "get_info" => WalletReply::Result(get_info(Some("signet"))),
        other => standard_wallet(other, params),
    });

    assert!(matches!(h.connect().await, Err(NwcError::Configuration(_))));
    let signet = h.connect_with(config_for(Network::Signet)).await.expect("signet connect");
    assert_eq!(signet.remote_info().network, Some(Network::Signet));
}

fn config_for(network: Network) -> AdapterConfig {
    AdapterConfig { network, ..config() }
}

/// Test: a wallet that omits its network is accepted
#[tokio::test]
async fn missing_network_accepted() {
    let h = Harness::new();
    h.relay.set_info(ALL_METHODS, None, None);
    h.relay.on_request(|method: &str, params: &Value| match method {
        "get_info" => WalletReply::Result(get_info(None)),
        other => standard_wallet(other, params),
    });

    let adapter = h.connect().await.expect("connect");
    assert_eq!(adapter.remote_info().network, None);
}

/// Test: without an info event, get_info supplies the command list
#[tokio::test]
async fn falls_back_to_get_info_methods() {
    let h = Harness::new();
    h.relay.on_request(standard_wallet);

    let adapter = h.connect().await.expect("connect");
    assert!(adapter.capabilities().methods.contains("make_invoice"));
    assert_eq!(h.relay.count("get_info"), 1);
}

/// Test: relays reporting end of stored events cut the info wait short
#[tokio::test]
async fn missing_info_event_does_not_wait_for_timeout() {
    let h = Harness::new();
    h.relay.on_request(standard_wallet);
    let slow = config().with_info_timeout(Duration::from_secs(30));

    let adapter = tokio::time::timeout(Duration::from_secs(5), h.connect_with(slow))
        .await
        .expect("negotiation finished before the info timeout")
        .expect("connect");
    assert_eq!(adapter.capabilities().encryption, Encryption::Nip04);
    assert_eq!(h.relay.count("get_info"), 1);
}

/// Test: NIP-44 wallets get NIP-44 requests with the encryption tag
#[tokio::test]
async fn nip44_negotiated_from_info_event() {
    let h = Harness::new();
    h.relay.set_info(ALL_METHODS, None, Some("nip44_v2 nip04"));
    h.relay.on_request(standard_wallet);

    let adapter = h.connect().await.expect("connect");
    adapter.get_balance(&cancel()).await.expect("balance");

    let request = h.relay.requests().into_iter().find(|r| r.method == "get_balance").expect("sent");
    assert_eq!(request.event.encryption, Encryption::Nip44);
    assert!(request.event.tags.contains(&vec!["encryption".to_string(), "nip44_v2".to_string()]));
    assert!(request.event.tags.contains(&vec!["p".to_string(), WALLET.to_string()]));
}

/// Test: unreachable relays fail negotiation and leave the pool empty
#[tokio::test]
async fn unreachable_relay_fails_connect() {
    let h = Harness::standard();
    h.relay.fail_connect.store(true, Ordering::SeqCst);

    assert!(matches!(h.connect().await, Err(NwcError::Transport(_))));
    assert!(h.pool.stats().is_empty());
}

/// Test: every operation re-checks the pooled connection
#[tokio::test]
async fn relay_outage_surfaces_and_recovers() {
    let h = Harness::standard();
    let adapter = h.connect().await.expect("connect");

    h.relay.fail_connect.store(true, Ordering::SeqCst);
    let err = adapter.get_balance(&cancel()).await.unwrap_err();
    assert!(matches!(err, NwcError::Transport(_)), "{}", err);

    h.relay.fail_connect.store(false, Ordering::SeqCst);
    let balance = adapter.get_balance(&cancel()).await.expect("balance after recovery");
    assert_eq!(balance.local_msat, 21_000_000);
    assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(h.pool.stats()[0].ref_count, 0);
}

// ============================================================================
// Connection string handler
// ============================================================================

/// Test: the handler declines foreign schemes and reports errors as strings
#[tokio::test]
async fn handler_scheme_dispatch() {
    let h = Harness::standard();
    let handler = NwcConnectionStringHandler::new(h.pool.clone(), h.parser.clone(), config());

    let foreign = handler.create("type=lnd-rest;server=https://localhost", &cancel()).await;
    assert!(matches!(foreign, Ok(None)));

    let bad = handler.create("nostr+walletconnect://nothex?relay=wss://x", &cancel()).await;
    assert!(bad.is_err());

    let client = handler.create(&uri(), &cancel()).await.expect("create").expect("client");
    let balance = client.get_balance(&cancel()).await.expect("balance");
    assert_eq!(balance.local_msat, 21_000_000);
}

// ============================================================================
// Operations
// ============================================================================

/// Test: get_invoice maps status; remote errors raise for invoices only
#[tokio::test]
async fn lookup_errors_differ_for_invoices_and_payments() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "lookup_invoice" if params["payment_hash"] == "known" => WalletReply::Result(settled_incoming("known")),
        "lookup_invoice" => WalletReply::Error("NOT_FOUND", "no such invoice"),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let invoice = adapter.get_invoice("known", &cancel()).await.expect("lookup").expect("invoice");
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.paid_at, DateTime::from_timestamp(1_700_000_100, 0));

    let err = adapter.get_invoice("missing", &cancel()).await.unwrap_err();
    assert!(matches!(err, NwcError::Protocol(ref e) if e.code == "NOT_FOUND"));

    assert!(adapter.get_payment("missing", &cancel()).await.expect("no error").is_none());
    // incoming record is not a payment
    assert!(adapter.get_payment("known", &cancel()).await.expect("lookup").is_none());
}

/// Test: list_invoices / list_payments send the right filters
#[tokio::test]
async fn list_operations() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match (method, params["type"].as_str()) {
        ("list_transactions", Some("incoming")) => WalletReply::Result(json!({"transactions": [
            settled_incoming("paid"),
            {"type": "incoming", "payment_hash": "open", "amount": 5, "created_at": 4_000_000_000i64},
        ]})),
        ("list_transactions", Some("outgoing")) => WalletReply::Result(json!({"transactions": [
            {"type": "outgoing", "payment_hash": "p1", "amount": 10, "preimage": "aa", "created_at": 1},
            {"type": "outgoing", "payment_hash": "p2", "amount": 20, "state": "pending", "created_at": 2},
        ]})),
        (other, _) => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let all = adapter.list_invoices(ListInvoicesQuery::default(), &cancel()).await.expect("list");
    assert_eq!(all.len(), 2);
    let pending = adapter
        .list_invoices(ListInvoicesQuery { pending_only: true, limit: Some(5), ..Default::default() }, &cancel())
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payment_hash, "open");

    let payments = adapter.list_payments(ListPaymentsQuery::default(), &cancel()).await.expect("list");
    assert_eq!(payments.len(), 2);
    let settled = adapter
        .list_payments(ListPaymentsQuery { include_pending: false, ..Default::default() }, &cancel())
        .await
        .expect("list");
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].status, PaymentStatus::Complete);

    let sent = h.relay.requests();
    let limited = sent.iter().find(|r| r.params["limit"] == 5).expect("limit forwarded");
    assert_eq!(limited.params["unpaid"], true);
    let settled_only = sent.iter().filter(|r| r.params["type"] == "outgoing").last().expect("sent");
    assert_eq!(settled_only.params["unpaid"], false);
}

/// Test: create_invoice forwards params and marks the result incoming
#[tokio::test]
async fn create_invoice_maps_result() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "make_invoice" => WalletReply::Result(json!({
            "invoice": "lnbc-new",
            "payment_hash": "new",
            "amount": params["amount"],
            "created_at": 4_000_000_000i64,
            "expires_at": 4_000_000_600i64,
        })),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let request = CreateInvoiceRequest::new(21_000).with_description("coffee").with_expiry(Duration::from_secs(600));
    let invoice = adapter.create_invoice(request, &cancel()).await.expect("invoice");
    assert_eq!(invoice.amount_msat, 21_000);
    assert_eq!(invoice.status, InvoiceStatus::Unpaid);
    assert_eq!(invoice.description.as_deref(), Some("coffee"));

    let sent = h.relay.requests().into_iter().find(|r| r.method == "make_invoice").expect("sent");
    assert_eq!(sent.params, json!({"amount": 21_000, "description": "coffee", "expiry": 600}));
}

/// Test: a remote error from get_balance surfaces as Protocol
#[tokio::test]
async fn balance_remote_error() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "get_balance" => WalletReply::Error("RESTRICTED", "not allowed"),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");
    assert!(matches!(adapter.get_balance(&cancel()).await, Err(NwcError::Protocol(_))));
}

// ============================================================================
// Pay
// ============================================================================

const ZERO_PREIMAGE_HASH: &str = "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925";

/// Test: failed confirmatory lookup still reports success with the local hash
#[tokio::test]
async fn pay_succeeds_when_lookup_fails() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_invoice" => WalletReply::Result(json!({"preimage": "00".repeat(32), "fees_paid": 3000})),
        "lookup_invoice" => WalletReply::Error("INTERNAL", "db down"),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let response = adapter.pay(PayRequest::invoice("lnbc-any").with_amount(10_000), &cancel()).await.expect("pay");
    let details = response.details.expect("details");
    assert_eq!(details.payment_hash, ZERO_PREIMAGE_HASH);
    assert_eq!(details.preimage, "00".repeat(32));
    assert_eq!(details.fee_msat, 3000);
    assert_eq!(details.total_amount_msat, 13_000);
    assert_eq!(details.status, PaymentStatus::Complete);

    let lookup = h.relay.requests().into_iter().find(|r| r.method == "lookup_invoice").expect("lookup sent");
    assert_eq!(lookup.params["payment_hash"], ZERO_PREIMAGE_HASH);
}

/// Test: a silent lookup times out and pay still succeeds
#[tokio::test]
async fn pay_succeeds_when_lookup_times_out() {
    let details = Bolt11Details {
        payment_hash: ZERO_PREIMAGE_HASH.into(),
        amount_msat: Some(7_000),
        created_at: DateTime::from_timestamp(1_700_000_000, 0).expect("ts"),
        expires_at: DateTime::from_timestamp(1_700_003_600, 0).expect("ts"),
    };
    let h = Harness::with_parser(StubParser::default().with("lnbc-7k", details));
    h.relay.set_info(ALL_METHODS, None, None);
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_invoice" => WalletReply::Result(json!({"preimage": "00".repeat(32)})),
        "lookup_invoice" => WalletReply::Silent,
        other => standard_wallet(other, params),
    });
    let adapter = h
        .connect_with(config().with_request_timeout(Duration::from_millis(200)))
        .await
        .expect("connect");

    let response = adapter.pay(PayRequest::invoice("lnbc-7k"), &cancel()).await.expect("pay");
    let details = response.details.expect("details");
    assert_eq!(details.payment_hash, ZERO_PREIMAGE_HASH);
    assert_eq!(details.total_amount_msat, 7_000);
}

/// Test: a successful lookup refines fee and amount
#[tokio::test]
async fn pay_uses_lookup_details() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_keysend" => WalletReply::Result(json!({"preimage": "00".repeat(32)})),
        "lookup_invoice" => WalletReply::Result(json!({
            "type": "outgoing", "payment_hash": ZERO_PREIMAGE_HASH, "amount": 5_000,
            "fees_paid": 12, "preimage": "00".repeat(32), "created_at": 1,
        })),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let response = adapter.pay(PayRequest::keysend("02abc", 5_000), &cancel()).await.expect("pay");
    let details = response.details.expect("details");
    assert_eq!(details.fee_msat, 12);
    assert_eq!(details.total_amount_msat, 5_012);
    assert_eq!(details.status, PaymentStatus::Complete);

    let keysend = h.relay.requests().into_iter().find(|r| r.method == "pay_keysend").expect("sent");
    assert_eq!(keysend.params, json!({"amount": 5_000, "pubkey": "02abc"}));
}

/// Test: the lookup's status wins over the optimistic local one
#[tokio::test]
async fn pay_takes_status_from_lookup() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_keysend" => WalletReply::Result(json!({"preimage": "00".repeat(32)})),
        "lookup_invoice" => WalletReply::Result(json!({
            "type": "outgoing", "state": "pending", "payment_hash": ZERO_PREIMAGE_HASH,
            "amount": 5_000, "created_at": 1,
        })),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let response = adapter.pay(PayRequest::keysend("02abc", 5_000), &cancel()).await.expect("pay");
    let details = response.details.expect("details");
    assert_eq!(details.status, PaymentStatus::Pending);
    assert_eq!(details.payment_hash, ZERO_PREIMAGE_HASH);
    assert_eq!(details.total_amount_msat, 5_000);
}

/// Test: absurd fee values from the wallet saturate instead of overflowing
#[tokio::test]
async fn pay_total_saturates() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_keysend" => WalletReply::Result(json!({"preimage": "00".repeat(32), "fees_paid": u64::MAX})),
        "lookup_invoice" => WalletReply::Error("NOT_FOUND", "gone"),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let response = adapter.pay(PayRequest::keysend("02abc", 5_000), &cancel()).await.expect("pay");
    let details = response.details.expect("details");
    assert_eq!(details.fee_msat, u64::MAX);
    assert_eq!(details.total_amount_msat, u64::MAX);
    assert_eq!(details.status, PaymentStatus::Complete);
}

/// Test: a wallet error during payment is an error response, not Err
#[tokio::test]
async fn pay_error_is_reported_in_response() {
    let h = Harness::standard();
    h.relay.on_request(|method: &str, params: &Value| match method {
        "pay_invoice" => WalletReply::Error("INSUFFICIENT_BALANCE", "not enough funds"),
        other => standard_wallet(other, params),
    });
    let adapter = h.connect().await.expect("connect");

    let response = adapter.pay(PayRequest::invoice("lnbc-any"), &cancel()).await.expect("pay");
    assert!(response.details.is_none());
    assert!(response.error.expect("message").contains("INSUFFICIENT_BALANCE"));
    assert_eq!(h.relay.count("lookup_invoice"), 0);
}

/// Test: a pay request with neither invoice nor destination is refused locally
#[tokio::test]
async fn pay_needs_invoice_or_destination() {
    let h = Harness::standard();
    let adapter = h.connect().await.expect("connect");
    let err = adapter.pay(PayRequest::default(), &cancel()).await.unwrap_err();
    assert!(matches!(err, NwcError::InvalidInvoice(_)));
}

// ============================================================================
// Unsupported operations, listener selection
// ============================================================================

/// Test: node management operations are not offered
#[tokio::test]
async fn unsupported_operations() {
    let h = Harness::standard();
    let adapter = h.connect().await.expect("connect");
    let c = cancel();

    assert!(matches!(adapter.get_info(&c).await, Err(NwcError::NotSupported("get_info"))));
    assert!(matches!(adapter.open_channel("node@host", 100_000, &c).await, Err(NwcError::NotSupported(_))));
    assert!(matches!(adapter.get_deposit_address(&c).await, Err(NwcError::NotSupported(_))));
    assert!(matches!(adapter.connect_to("node@host", &c).await, Err(NwcError::NotSupported(_))));
    assert!(matches!(adapter.cancel_invoice("hash", &c).await, Err(NwcError::NotSupported(_))));
    assert!(matches!(adapter.list_channels(&c).await, Err(NwcError::NotSupported(_))));
}

/// Test: listener type follows the advertised notifications
#[tokio::test]
async fn listener_selection() {
    let push = Harness::new();
    push.relay.set_info(ALL_METHODS, Some("payment_received payment_sent"), None);
    push.relay.on_request(standard_wallet);
    let adapter = push.connect().await.expect("connect");
    let mut listener = adapter.listen(&cancel()).await.expect("listen");
    assert_eq!(listener.mode(), ListenerMode::Notifications);
    listener.dispose().await;

    let pull = Harness::new();
    pull.relay.set_info(ALL_METHODS, Some("payment_sent"), None);
    pull.relay.on_request(standard_wallet);
    let adapter = pull.connect().await.expect("connect");
    assert_eq!(adapter.listener_mode(), ListenerMode::Polling);
    let mut listener = adapter.listen(&cancel()).await.expect("listen");
    assert_eq!(listener.mode(), ListenerMode::Polling);
    listener.dispose().await;
}

/// Test: repeated operations share one pooled transport
#[tokio::test]
async fn operations_share_pooled_transport() {
    let h = Harness::standard();
    let adapter = h.connect().await.expect("connect");
    for _ in 0..3 {
        adapter.get_balance(&cancel()).await.expect("balance");
    }
    assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);

    let stats = h.pool.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].ref_count, 0);
}
