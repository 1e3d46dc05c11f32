//! Relay transport over tokio-tungstenite WebSockets
//!
//! One writer task and one reader task per relay. Subscriptions fan out to
//! every connected relay; events are verified, de-duplicated by id and
//! decrypted before they reach an [`EventStream`].

use crate::error::{NwcError, Result};
use crate::relay::{
    Encryption, EventFilter, EventStream, IncomingEvent, OutgoingEvent, RelayTransport,
    SubscriptionRequest, TransportFactory,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nostr::nips::{nip04, nip44};
use nostr::{Keys, PublicKey};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_BUFFER: usize = 32;
const STREAM_BUFFER: usize = 64;
/// Event ids remembered per subscription for cross-relay de-duplication.
const SEEN_CAPACITY: usize = 512;

/// Relay message types (NIP-01)
#[derive(Debug)]
pub enum RelayMessage {
    Event { sub_id: String, event: Value },
    Ok { event_id: String, accepted: bool, message: Option<String> },
    Eose { sub_id: String },
    Closed { sub_id: String, message: Option<String> },
    Notice { message: String },
}

/// Parse a relay frame. Unknown or malformed frames yield `None`.
pub fn parse_relay_message(msg: &str) -> Option<RelayMessage> {
    let arr: Vec<Value> = serde_json::from_str(msg).ok()?;
    let cmd = arr.first()?.as_str()?;
    let text = |i: usize| arr.get(i).and_then(Value::as_str).map(String::from);
    match cmd {
        "EVENT" => Some(RelayMessage::Event { sub_id: text(1)?, event: arr.get(2)?.clone() }),
        "OK" => Some(RelayMessage::Ok {
            event_id: text(1)?,
            accepted: arr.get(2)?.as_bool()?,
            message: text(3),
        }),
        "EOSE" => Some(RelayMessage::Eose { sub_id: text(1)? }),
        "CLOSED" => Some(RelayMessage::Closed { sub_id: text(1)?, message: text(2) }),
        "NOTICE" => Some(RelayMessage::Notice { message: text(1)? }),
        _ => None,
    }
}

/// Event fields after signature verification.
#[derive(Deserialize)]
struct WireEvent {
    id: String,
    pubkey: String,
    created_at: i64,
    kind: u16,
    #[serde(default)]
    tags: Vec<Vec<String>>,
    content: String,
}

fn verify_event(raw: Value) -> Option<WireEvent> {
    let event: nostr::Event = serde_json::from_value(raw.clone()).ok()?;
    if let Err(e) = event.verify() {
        debug!("dropping event with bad signature: {}", e);
        return None;
    }
    serde_json::from_value(raw).ok()
}

fn parse_keys(secret: &str) -> Result<Keys> {
    Keys::parse(secret).map_err(|e| NwcError::Configuration(format!("invalid secret: {}", e)))
}

fn parse_pubkey(hex: &str) -> Result<PublicKey> {
    PublicKey::from_hex(hex).map_err(|e| NwcError::Configuration(format!("invalid pubkey '{}': {}", hex, e)))
}

fn encrypt(keys: &Keys, recipient: &PublicKey, scheme: Encryption, plaintext: &str) -> Result<String> {
    match scheme {
        Encryption::Nip04 => nip04::encrypt(keys.secret_key(), recipient, plaintext)
            .map_err(|e| NwcError::Transport(format!("NIP-04 encryption failed: {}", e))),
        Encryption::Nip44 => nip44::encrypt(keys.secret_key(), recipient, plaintext, nip44::Version::V2)
            .map_err(|e| NwcError::Transport(format!("NIP-44 encryption failed: {}", e))),
    }
}

/// NIP-04 payloads carry an `?iv=` suffix; anything else is treated as NIP-44.
fn decrypt(keys: &Keys, author: &str, content: &str) -> Option<String> {
    let author = PublicKey::from_hex(author).ok()?;
    let result = if content.contains("?iv=") {
        nip04::decrypt(keys.secret_key(), &author, content).map_err(|e| e.to_string())
    } else {
        nip44::decrypt(keys.secret_key(), &author, content).map_err(|e| e.to_string())
    };
    match result {
        Ok(plain) => Some(plain),
        Err(e) => {
            debug!("could not decrypt event content: {}", e);
            None
        }
    }
}

/// Recently delivered event ids, oldest forgotten first.
#[derive(Default)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    /// `false` if `id` was already delivered.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct Subscriber {
    filter: EventFilter,
    keys: Option<Keys>,
    tx: mpsc::Sender<IncomingEvent>,
    seen: SeenIds,
    /// Relays that have not sent EOSE yet.
    awaiting_eose: usize,
    stored_done: watch::Sender<bool>,
}

/// Count one relay's EOSE; the stream learns once every relay has sent it.
fn mark_eose(subscribers: &Subscribers, sub_id: &str) {
    let mut subs = lock(subscribers);
    let Some(sub) = subs.get_mut(sub_id) else { return };
    sub.awaiting_eose = sub.awaiting_eose.saturating_sub(1);
    if sub.awaiting_eose == 0 {
        sub.stored_done.send_replace(true);
    }
}

type Subscribers = Arc<Mutex<HashMap<String, Subscriber>>>;

fn lock(subs: &Subscribers) -> MutexGuard<'_, HashMap<String, Subscriber>> {
    subs.lock().unwrap_or_else(|p| p.into_inner())
}

struct RelayLink {
    url: Url,
    tx: mpsc::Sender<String>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RelayLink {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Multi-relay WebSocket transport
pub struct WebSocketTransport {
    relays: Vec<Url>,
    links: RwLock<Vec<RelayLink>>,
    subscribers: Subscribers,
    next_sub: AtomicU64,
}

impl WebSocketTransport {
    pub fn new(relays: Vec<Url>) -> Self {
        Self {
            relays,
            links: RwLock::new(Vec::new()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_sub: AtomicU64::new(0),
        }
    }

    pub fn relays(&self) -> &[Url] {
        &self.relays
    }

    pub async fn connected_relays(&self) -> Vec<Url> {
        self.links.read().await.iter().filter(|l| l.is_alive()).map(|l| l.url.clone()).collect()
    }

    async fn open(&self, url: &Url, live: Arc<AtomicU64>) -> Result<RelayLink> {
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| NwcError::Transport(format!("{}: {}", url, e)))?;
        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let alive = Arc::new(AtomicBool::new(true));

        let alive_w = alive.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(Message::Text(msg)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
            alive_w.store(false, Ordering::SeqCst);
        });

        live.fetch_add(1, Ordering::SeqCst);
        let alive_r = alive.clone();
        let subscribers = self.subscribers.clone();
        let relay = url.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match parse_relay_message(&text) {
                    Some(RelayMessage::Event { sub_id, event }) => {
                        dispatch(&subscribers, &sub_id, event).await;
                    }
                    Some(RelayMessage::Ok { event_id, accepted: false, message }) => {
                        warn!(relay = %relay, event_id, "relay rejected event: {}", message.unwrap_or_default());
                    }
                    Some(RelayMessage::Eose { sub_id }) => mark_eose(&subscribers, &sub_id),
                    Some(RelayMessage::Closed { sub_id, message }) => {
                        debug!(relay = %relay, sub_id, "subscription closed by relay: {}", message.unwrap_or_default());
                    }
                    Some(RelayMessage::Notice { message }) => debug!(relay = %relay, "notice: {}", message),
                    _ => {}
                }
            }
            alive_r.store(false, Ordering::SeqCst);
            warn!(relay = %relay, "relay connection closed");
            // Last relay gone: end every stream
            if live.fetch_sub(1, Ordering::SeqCst) == 1 {
                lock(&subscribers).clear();
            }
        });

        info!(relay = %url, "connected to relay");
        Ok(RelayLink { url: url.clone(), tx: out_tx, alive, reader })
    }

    async fn broadcast(&self, frame: &str) -> usize {
        let links = self.links.read().await;
        let mut sent = 0;
        for link in links.iter().filter(|l| l.is_alive()) {
            if link.tx.send(frame.to_string()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

async fn dispatch(subscribers: &Subscribers, sub_id: &str, raw: Value) {
    let Some(event) = verify_event(raw) else { return };

    let target = {
        let mut subs = lock(subscribers);
        let Some(sub) = subs.get_mut(sub_id) else { return };
        if !sub.seen.insert(&event.id) {
            return;
        }
        (sub.tx.clone(), sub.keys.clone(), sub.filter.clone())
    };
    let (tx, keys, filter) = target;

    let content = match keys {
        Some(keys) => match decrypt(&keys, &event.pubkey, &event.content) {
            Some(plain) => plain,
            None => return,
        },
        None => event.content,
    };
    let incoming = IncomingEvent {
        id: event.id,
        author: event.pubkey,
        kind: event.kind,
        created_at: event.created_at,
        tags: event.tags,
        content,
    };
    if !filter.matches(&incoming) {
        return;
    }
    if tx.send(incoming).await.is_err() {
        lock(subscribers).remove(sub_id);
    }
}

#[async_trait]
impl RelayTransport for WebSocketTransport {
    async fn connect_and_wait(&self, timeout: Duration) -> Result<()> {
        let mut links = self.links.write().await;
        if links.iter().any(RelayLink::is_alive) {
            return Ok(());
        }
        links.clear();

        let live = Arc::new(AtomicU64::new(0));
        let attempts = self.relays.iter().map(|url| {
            let live = live.clone();
            async move {
                match tokio::time::timeout(timeout, self.open(url, live)).await {
                    Ok(Ok(link)) => Some(link),
                    Ok(Err(e)) => {
                        warn!("relay connect failed: {}", e);
                        None
                    }
                    Err(_) => {
                        warn!(relay = %url, "relay connect timed out");
                        None
                    }
                }
            }
        });
        let opened: Vec<RelayLink> = futures_util::future::join_all(attempts).await.into_iter().flatten().collect();
        if opened.is_empty() {
            return Err(NwcError::Transport(format!(
                "could not connect to any of {} relays",
                self.relays.len()
            )));
        }
        *links = opened;
        Ok(())
    }

    async fn publish(&self, secret: &str, event: OutgoingEvent) -> Result<String> {
        let keys = parse_keys(secret)?;
        let recipient = parse_pubkey(&event.recipient)?;
        let content = encrypt(&keys, &recipient, event.encryption, &event.content)?;
        let tags = event
            .tags
            .iter()
            .map(|t| nostr::Tag::parse(t).map_err(|e| NwcError::Transport(format!("bad tag {:?}: {}", t, e))))
            .collect::<Result<Vec<_>>>()?;

        let signed = nostr::UnsignedEvent::new(
            keys.public_key(),
            nostr::Timestamp::now(),
            nostr::Kind::Custom(event.kind),
            tags,
            content,
        )
        .sign_with_keys(&keys)
        .map_err(|e| NwcError::Transport(format!("signing failed: {}", e)))?;

        let frame = json!(["EVENT", signed]).to_string();
        let sent = self.broadcast(&frame).await;
        if sent == 0 {
            return Err(NwcError::Transport("no connected relay accepted the event".into()));
        }
        let id = signed.id.to_hex();
        debug!(event_id = %id, kind = event.kind, relays = sent, "published event");
        Ok(id)
    }

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<EventStream> {
        let keys = request.decrypt_with.as_deref().map(parse_keys).transpose()?;
        let sub_id = format!("nwc-{}", self.next_sub.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (stored_done, stored_rx) = watch::channel(false);
        let awaiting_eose = self.links.read().await.iter().filter(|l| l.is_alive()).count();

        lock(&self.subscribers).insert(
            sub_id.clone(),
            Subscriber {
                filter: request.filter.clone(),
                keys,
                tx,
                seen: SeenIds::default(),
                awaiting_eose,
                stored_done,
            },
        );

        let frame = json!(["REQ", sub_id, request.filter]).to_string();
        if self.broadcast(&frame).await == 0 {
            lock(&self.subscribers).remove(&sub_id);
            return Err(NwcError::Transport("no connected relay for subscription".into()));
        }

        let senders: Vec<mpsc::Sender<String>> =
            self.links.read().await.iter().map(|l| l.tx.clone()).collect();
        let subscribers = self.subscribers.clone();
        let close_id = sub_id.clone();
        Ok(EventStream::new(sub_id, rx).with_end_of_stored(stored_rx).with_close(move || {
            lock(&subscribers).remove(&close_id);
            let frame = json!(["CLOSE", close_id]).to_string();
            for tx in senders {
                let _ = tx.try_send(frame.clone());
            }
        }))
    }

    async fn disconnect(&self) {
        let links: Vec<RelayLink> = self.links.write().await.drain(..).collect();
        for link in links {
            link.reader.abort();
            link.alive.store(false, Ordering::SeqCst);
            debug!(relay = %link.url, "disconnected");
        }
        lock(&self.subscribers).clear();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for link in self.links.get_mut().iter() {
            link.reader.abort();
        }
    }
}

/// Builds a [`WebSocketTransport`] per relay set.
#[derive(Debug, Default, Clone)]
pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn create(&self, relays: &[Url]) -> Result<Arc<dyn RelayTransport>> {
        if relays.is_empty() {
            return Err(NwcError::Configuration("no relays to connect to".into()));
        }
        Ok(Arc::new(WebSocketTransport::new(relays.to_vec())))
    }
}
