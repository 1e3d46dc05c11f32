//! In-memory relay + scripted wallet for integration tests.
//!
//! The mock transport skips crypto: published requests arrive as plaintext,
//! responses are handed to subscribers already "decrypted". Routing still
//! goes through `EventFilter::matches`, so author / p-tag / kind filtering is
//! exercised the same way the websocket transport does it.

#![allow(dead_code)]

use async_trait::async_trait;
use nwc_lightning::bolt11::{Bolt11Details, Bolt11Parser};
use nwc_lightning::nwc::kinds;
use nwc_lightning::relay::{
    EventStream, IncomingEvent, OutgoingEvent, RelayTransport, SubscriptionRequest, TransportFactory,
};
use nwc_lightning::{
    AdapterConfig, Network, NwcError, PoolConfig, RelayConnectionPool, Result, WalletAdapter,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

pub const WALLET: &str = "b889ff5b1513b641e2a139f661a661364979c5beee91842f8f0ef42ab558e9d4";
pub const SECRET: &str = "71a8c14c1407c113601079c4302dab36460f0ccd0ad506f1f2dc73b5100e4f3c";
pub const ALL_METHODS: &str =
    "pay_invoice pay_keysend get_balance get_info make_invoice lookup_invoice list_transactions";

pub fn uri() -> String {
    format!("nostr+walletconnect://{}?relay=wss://relay.mock&secret={}", WALLET, SECRET)
}

pub fn client_pubkey() -> String {
    nostr::Keys::parse(SECRET).expect("keys").public_key().to_hex()
}

/// What the scripted wallet does with one request.
#[derive(Debug, Clone)]
pub enum WalletReply {
    Result(Value),
    Error(&'static str, &'static str),
    /// Full response body, for malformed-response tests
    Raw(Value),
    Silent,
}

type Handler = Arc<dyn Fn(&str, &Value) -> WalletReply + Send + Sync>;

/// A request as the wallet saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub params: Value,
    pub event: OutgoingEvent,
}

struct Subscriber {
    id: String,
    request: SubscriptionRequest,
    tx: mpsc::Sender<IncomingEvent>,
    stored_done: watch::Sender<bool>,
}

#[derive(Default)]
struct RelayState {
    subscribers: Vec<Subscriber>,
    requests: Vec<SeenRequest>,
    info: Option<IncomingEvent>,
}

pub struct MockRelay {
    state: Mutex<RelayState>,
    handler: Mutex<Handler>,
    next_id: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub disconnects: AtomicUsize,
}

impl MockRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RelayState::default()),
            handler: Mutex::new(Arc::new(|_: &str, _: &Value| WalletReply::Silent)),
            next_id: AtomicUsize::new(1),
            fail_connect: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_id(&self) -> String {
        format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn on_request(&self, handler: impl Fn(&str, &Value) -> WalletReply + Send + Sync + 'static) {
        *self.handler.lock().unwrap_or_else(|p| p.into_inner()) = Arc::new(handler);
    }

    /// Publish the wallet's info event (kind 13194).
    pub fn set_info(&self, methods: &str, notifications: Option<&str>, encryption: Option<&str>) {
        let mut tags = Vec::new();
        if let Some(n) = notifications {
            tags.push(vec!["notifications".to_string(), n.to_string()]);
        }
        if let Some(e) = encryption {
            tags.push(vec!["encryption".to_string(), e.to_string()]);
        }
        let event = IncomingEvent {
            id: self.next_id(),
            author: WALLET.to_string(),
            kind: kinds::INFO,
            created_at: 1_700_000_000,
            tags,
            content: methods.to_string(),
        };
        self.state().info = Some(event);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.state().requests.iter().filter(|r| r.method == method).count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Send a wallet notification to the client.
    pub fn notify(&self, notification_type: &str, transaction: Value) {
        let content = json!({"notification_type": notification_type, "notification": transaction});
        let event = IncomingEvent {
            id: self.next_id(),
            author: WALLET.to_string(),
            kind: kinds::NOTIFICATION,
            created_at: chrono::Utc::now().timestamp(),
            tags: vec![vec!["p".to_string(), client_pubkey()]],
            content: content.to_string(),
        };
        self.deliver(event);
    }

    /// End every open subscription, as a dropped relay link would.
    pub fn drop_subscribers(&self) {
        self.state().subscribers.clear();
    }

    fn deliver(&self, event: IncomingEvent) {
        let state = self.state();
        for sub in state.subscribers.iter().filter(|s| s.request.filter.matches(&event)) {
            let _ = sub.tx.try_send(event.clone());
        }
    }

    fn respond(&self, request_id: &str, method: &str, reply: WalletReply) {
        let body = match reply {
            WalletReply::Silent => return,
            WalletReply::Result(result) => json!({"result_type": method, "result": result}),
            WalletReply::Error(code, message) => {
                json!({"result_type": method, "error": {"code": code, "message": message}})
            }
            WalletReply::Raw(body) => body,
        };
        let event = IncomingEvent {
            id: self.next_id(),
            author: WALLET.to_string(),
            kind: kinds::RESPONSE,
            created_at: chrono::Utc::now().timestamp(),
            tags: vec![
                vec!["p".to_string(), client_pubkey()],
                vec!["e".to_string(), request_id.to_string()],
            ],
            content: body.to_string(),
        };
        self.deliver(event);
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    async fn connect_and_wait(&self, _timeout: Duration) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(NwcError::Transport("mock relay unreachable".into()));
        }
        Ok(())
    }

    async fn publish(&self, _secret: &str, event: OutgoingEvent) -> Result<String> {
        let id = self.next_id();
        if event.kind != kinds::REQUEST {
            return Ok(id);
        }
        let body: Value = serde_json::from_str(&event.content)?;
        let method = body["method"].as_str().unwrap_or_default().to_string();
        let params = body["params"].clone();
        self.state().requests.push(SeenRequest { method: method.clone(), params: params.clone(), event });

        let handler = self.handler.lock().unwrap_or_else(|p| p.into_inner()).clone();
        let reply = handler(&method, &params);
        self.respond(&id, &method, reply);
        Ok(id)
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<EventStream> {
        let id = self.next_id();
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.state();
        if let Some(info) = state.info.clone().filter(|i| request.filter.matches(i)) {
            let _ = tx.try_send(info);
        }
        // Everything stored has been queued: EOSE right away
        let (stored_done, stored_rx) = watch::channel(true);
        state.subscribers.push(Subscriber { id: id.clone(), request, tx, stored_done });
        Ok(EventStream::new(id, rx).with_end_of_stored(stored_rx))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state().subscribers.clear();
    }
}

/// Hands out the same mock relay for every relay set.
pub struct MockFactory {
    pub relay: Arc<MockRelay>,
    pub created: AtomicUsize,
}

impl TransportFactory for MockFactory {
    fn create(&self, _relays: &[Url]) -> Result<Arc<dyn RelayTransport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.relay.clone())
    }
}

/// BOLT11 parser returning canned details per invoice string.
#[derive(Default)]
pub struct StubParser {
    known: Mutex<Vec<(String, Bolt11Details)>>,
}

impl StubParser {
    pub fn with(self, invoice: &str, details: Bolt11Details) -> Self {
        self.known.lock().unwrap_or_else(|p| p.into_inner()).push((invoice.to_string(), details));
        self
    }
}

impl Bolt11Parser for StubParser {
    fn parse(&self, invoice: &str, _network: Network) -> Result<Bolt11Details> {
        self.known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(k, _)| k == invoice)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| NwcError::InvalidInvoice(format!("unknown invoice {}", invoice)))
    }
}

pub struct Harness {
    pub relay: Arc<MockRelay>,
    pub factory: Arc<MockFactory>,
    pub pool: Arc<RelayConnectionPool>,
    pub parser: Arc<StubParser>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parser(StubParser::default())
    }

    pub fn with_parser(parser: StubParser) -> Self {
        let relay = MockRelay::new();
        let factory = Arc::new(MockFactory { relay: relay.clone(), created: AtomicUsize::new(0) });
        let pool = Arc::new(RelayConnectionPool::new(factory.clone(), PoolConfig::default()));
        Self { relay, factory, pool, parser: Arc::new(parser) }
    }

    /// A wallet advertising every command, on mainnet.
    pub fn standard() -> Self {
        let h = Self::new();
        h.relay.set_info(ALL_METHODS, None, None);
        h.relay.on_request(standard_wallet);
        h
    }

    pub async fn connect(&self) -> Result<WalletAdapter> {
        self.connect_with(config()).await
    }

    pub async fn connect_with(&self, config: AdapterConfig) -> Result<WalletAdapter> {
        WalletAdapter::connect(&uri(), self.pool.clone(), self.parser.clone(), config, &CancellationToken::new()).await
    }
}

/// Short deadlines so failure paths finish quickly.
pub fn config() -> AdapterConfig {
    AdapterConfig::new(Network::Bitcoin)
        .with_request_timeout(Duration::from_secs(2))
        .with_info_timeout(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(20))
}

pub fn get_info(network: Option<&str>) -> Value {
    let mut info = json!({
        "alias": "mock-wallet",
        "pubkey": "02".to_string() + &"11".repeat(32),
        "block_height": 840000,
        "methods": ALL_METHODS.split(' ').collect::<Vec<_>>(),
        "notifications": [],
    });
    if let Some(n) = network {
        info["network"] = json!(n);
    }
    info
}

pub fn standard_wallet(method: &str, _params: &Value) -> WalletReply {
    match method {
        "get_info" => WalletReply::Result(get_info(Some("mainnet"))),
        "get_balance" => WalletReply::Result(json!({"balance": 21_000_000})),
        _ => WalletReply::Error("NOT_IMPLEMENTED", "mock"),
    }
}

pub fn settled_incoming(hash: &str) -> Value {
    json!({
        "type": "incoming",
        "state": "settled",
        "invoice": format!("lnbc-{}", hash),
        "payment_hash": hash,
        "amount": 1000,
        "created_at": 1_700_000_000,
        "expires_at": 1_700_003_600,
        "settled_at": 1_700_000_100,
    })
}

/// Replays `cycles` for successive `list_transactions` calls, repeating the last.
pub fn scripted_cycles(cycles: Vec<Vec<Value>>) -> impl Fn(&str, &Value) -> WalletReply + Send + Sync {
    let queue = Mutex::new(VecDeque::from(cycles));
    move |method: &str, params: &Value| match method {
        "list_transactions" => {
            let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
            let txs = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            WalletReply::Result(json!({"transactions": txs.unwrap_or_default()}))
        }
        other => standard_wallet(other, params),
    }
}
