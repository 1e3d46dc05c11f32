//! Relay transport contract
//!
//! The adapter never touches sockets or crypto directly. It talks to a
//! [`RelayTransport`]: connect, publish a plaintext payload for a recipient
//! (the transport signs and encrypts), subscribe with a filter (the transport
//! verifies and decrypts). Transports are shared per relay set through
//! [`RelayConnectionPool`].
//!
//! - [`client::WebSocketTransport`] - tokio-tungstenite implementation (feature `native`)
//! - [`pool::RelayConnectionPool`] - ref-counted sharing with idle eviction

#[cfg(feature = "native")]
pub mod client;
pub mod pool;

#[cfg(feature = "native")]
pub use client::{WebSocketFactory, WebSocketTransport};
pub use pool::{PoolEntryStats, RelayConnectionPool, UsageToken};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

/// Payload encryption scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encryption {
    #[default]
    Nip04,
    Nip44,
}

impl Encryption {
    /// Tag value advertised in info events and sent on NIP-44 requests.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Encryption::Nip04 => "nip04",
            Encryption::Nip44 => "nip44_v2",
        }
    }
}

/// Event filter for subscriptions (NIP-01)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = u16>) -> Self {
        Self { kinds: Some(kinds.into_iter().collect()), ..Default::default() }
    }
    pub fn author(mut self, pubkey: impl Into<String>) -> Self { self.authors = Some(vec![pubkey.into()]); self }
    pub fn p_tag(mut self, pubkey: impl Into<String>) -> Self { self.p_tags = Some(vec![pubkey.into()]); self }
    pub fn since(mut self, ts: i64) -> Self { self.since = Some(ts); self }
    pub fn limit(mut self, n: usize) -> Self { self.limit = Some(n); self }

    /// Client-side match, for transports that fan one relay feed out to many subscribers.
    pub fn matches(&self, event: &IncomingEvent) -> bool {
        fn allows<T: PartialEq>(list: &Option<Vec<T>>, value: &T) -> bool {
            list.as_ref().map_or(true, |l| l.contains(value))
        }
        fn tag_allows(list: &Option<Vec<String>>, event: &IncomingEvent, name: &str) -> bool {
            list.as_ref().map_or(true, |l| {
                event.tag_values(name).any(|v| l.iter().any(|x| x == v))
            })
        }
        allows(&self.ids, &event.id)
            && allows(&self.authors, &event.author)
            && allows(&self.kinds, &event.kind)
            && tag_allows(&self.p_tags, event, "p")
            && tag_allows(&self.e_tags, event, "e")
            && self.since.map_or(true, |s| event.created_at >= s)
            && self.until.map_or(true, |u| event.created_at <= u)
    }
}

/// Subscription parameters. With `decrypt_with` set, event content is
/// decrypted with that secret against the event author before delivery.
#[derive(Clone, Default)]
pub struct SubscriptionRequest {
    pub filter: EventFilter,
    pub decrypt_with: Option<String>,
}

impl SubscriptionRequest {
    pub fn plain(filter: EventFilter) -> Self {
        Self { filter, decrypt_with: None }
    }

    pub fn encrypted(filter: EventFilter, secret: impl Into<String>) -> Self {
        Self { filter, decrypt_with: Some(secret.into()) }
    }
}

/// Event to publish. `content` is plaintext; the transport encrypts it for
/// `recipient` with `encryption` and signs with the caller's secret.
#[derive(Debug, Clone)]
pub struct OutgoingEvent {
    pub kind: u16,
    pub recipient: String,
    pub encryption: Encryption,
    pub content: String,
    pub tags: Vec<Vec<String>>,
}

/// Verified event as delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub id: String,
    pub author: String,
    pub kind: u16,
    pub created_at: i64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl IncomingEvent {
    pub fn tag_values<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    /// Id of the event this one answers (`e` tag).
    pub fn reply_to(&self) -> Option<&str> {
        self.tag("e")
    }
}

/// Live subscription. Ends (`next` returns `None`) when the relay link drops.
/// Dropping it closes the subscription on the relays.
pub struct EventStream {
    id: String,
    rx: mpsc::Receiver<IncomingEvent>,
    stored_done: Option<watch::Receiver<bool>>,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl EventStream {
    pub fn new(id: impl Into<String>, rx: mpsc::Receiver<IncomingEvent>) -> Self {
        Self { id: id.into(), rx, stored_done: None, on_close: None }
    }

    /// Flag flipped to `true` once the relays have sent every stored event (EOSE).
    pub fn with_end_of_stored(mut self, done: watch::Receiver<bool>) -> Self {
        self.stored_done = Some(done);
        self
    }

    pub fn with_close(mut self, on_close: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn next(&mut self) -> Option<IncomingEvent> {
        self.rx.recv().await
    }

    /// Resolves after EOSE. Never resolves for transports that do not report it.
    ///
    /// The future does not borrow the stream, so it can race [`EventStream::next`].
    pub fn end_of_stored_events(&self) -> impl Future<Output = ()> + Send + 'static {
        let done = self.stored_done.clone();
        async move {
            if let Some(mut done) = done {
                if done.wait_for(|done| *done).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Connect to the relay set; succeeds once at least one relay is up.
    async fn connect_and_wait(&self, timeout: Duration) -> Result<()>;

    /// Sign and publish, returning the event id.
    async fn publish(&self, secret: &str, event: OutgoingEvent) -> Result<String>;

    async fn subscribe(&self, request: SubscriptionRequest) -> Result<EventStream>;

    /// Close every relay link. Active streams end.
    async fn disconnect(&self);
}

/// Constructs transports for the pool.
pub trait TransportFactory: Send + Sync {
    fn create(&self, relays: &[Url]) -> Result<Arc<dyn RelayTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: u16, tags: Vec<Vec<&str>>) -> IncomingEvent {
        IncomingEvent {
            id: "id1".into(),
            author: "wallet".into(),
            kind,
            created_at: 100,
            tags: tags.into_iter().map(|t| t.into_iter().map(String::from).collect()).collect(),
            content: String::new(),
        }
    }

    #[test]
    fn filter_serializes_tag_keys() {
        let filter = EventFilter::kinds([23195]).author("wallet").p_tag("client");
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(value["#p"][0], "client");
        assert_eq!(value["authors"][0], "wallet");
        assert!(value.get("since").is_none());
    }

    #[test]
    fn filter_matches_kind_author_and_tags() {
        let filter = EventFilter::kinds([23195]).author("wallet").p_tag("client");
        assert!(filter.matches(&event(23195, vec![vec!["p", "client"], vec!["e", "req"]])));
        assert!(!filter.matches(&event(23196, vec![vec!["p", "client"]])));
        assert!(!filter.matches(&event(23195, vec![vec!["p", "someone"]])));
        assert!(!EventFilter::kinds([23195]).since(200).matches(&event(23195, vec![])));
    }

    #[test]
    fn reply_to_reads_e_tag() {
        let ev = event(23195, vec![vec!["p", "client"], vec!["e", "req-1"]]);
        assert_eq!(ev.reply_to(), Some("req-1"));
        assert_eq!(event(23195, vec![]).reply_to(), None);
    }

    #[tokio::test]
    async fn end_of_stored_events_follows_flag() {
        let (_tx, rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);
        let stream = EventStream::new("s", rx).with_end_of_stored(done_rx);

        let early = tokio::time::timeout(Duration::from_millis(20), stream.end_of_stored_events()).await;
        assert!(early.is_err());

        done_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(100), stream.end_of_stored_events())
            .await
            .expect("resolves after EOSE");
    }

    #[tokio::test]
    async fn end_of_stored_events_pending_without_support() {
        let (_tx, rx) = mpsc::channel(1);
        let stream = EventStream::new("s", rx);
        let waited = tokio::time::timeout(Duration::from_millis(20), stream.end_of_stored_events()).await;
        assert!(waited.is_err());
    }
}
