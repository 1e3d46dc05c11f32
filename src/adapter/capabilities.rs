use crate::error::{NwcError, Result};
use crate::lightning::Network;
use crate::nwc::message::GetInfoResult;
use crate::nwc::{kinds, Method, WalletConnectParams, MANDATORY_METHODS};
use crate::relay::{Encryption, EventFilter, IncomingEvent, RelayConnectionPool, SubscriptionRequest};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the wallet says it can do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletCapabilities {
    pub methods: BTreeSet<String>,
    pub notifications: BTreeSet<String>,
    pub encryption: Encryption,
}

fn words(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split_whitespace().map(str::to_string)
}

fn negotiate_encryption<'a>(schemes: impl IntoIterator<Item = &'a str>) -> Encryption {
    if schemes.into_iter().any(|s| s == Encryption::Nip44.as_tag()) {
        Encryption::Nip44
    } else {
        Encryption::Nip04
    }
}

impl WalletCapabilities {
    /// From the replaceable info event: content lists methods, the
    /// `notifications` and `encryption` tags list the rest. No `encryption`
    /// tag means NIP-04 only.
    pub fn from_info_event(event: &IncomingEvent) -> Self {
        let methods = words(&event.content).collect();
        let notifications = event.tag_values("notifications").flat_map(words).collect();
        let schemes: Vec<String> = event.tag_values("encryption").flat_map(words).collect();
        Self {
            methods,
            notifications,
            encryption: negotiate_encryption(schemes.iter().map(String::as_str)),
        }
    }

    /// From a `get_info` reply, for wallets that publish no info event.
    pub fn from_info_result(info: &GetInfoResult) -> Self {
        Self {
            methods: info.methods.iter().cloned().collect(),
            notifications: info.notifications.iter().cloned().collect(),
            encryption: Encryption::Nip04,
        }
    }

    pub fn supports(&self, method: Method) -> bool {
        self.methods.contains(method.as_str())
    }

    pub fn notifies(&self, notification_type: &str) -> bool {
        self.notifications.contains(notification_type)
    }

    pub fn missing_mandatory(&self) -> Vec<&'static str> {
        MANDATORY_METHODS
            .iter()
            .filter(|m| !self.supports(**m))
            .map(Method::as_str)
            .collect()
    }

    pub fn require_mandatory(&self) -> Result<()> {
        let missing = self.missing_mandatory();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NwcError::Configuration(format!(
                "wallet does not support required commands: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Compare the wallet's reported chain with the configured one. A wallet
/// that reports nothing is accepted.
pub fn check_network(expected: Network, reported: Option<&str>) -> Result<Option<Network>> {
    let Some(reported) = reported.filter(|r| !r.trim().is_empty()) else {
        warn!(expected = expected.as_str(), "wallet did not report its network");
        return Ok(None);
    };
    match Network::from_name(reported) {
        Some(network) if network == expected => Ok(Some(network)),
        _ => Err(NwcError::Configuration(format!(
            "wallet is on {}, expected {}",
            reported,
            expected.as_str()
        ))),
    }
}

/// Fetch the wallet's info event, `None` if none arrives in time.
pub(crate) async fn fetch_info_event(
    pool: &RelayConnectionPool,
    params: &WalletConnectParams,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<IncomingEvent>> {
    let (transport, _usage) = pool.acquire(&params.relays).await?;
    let filter = EventFilter::kinds([kinds::INFO]).author(params.wallet_pubkey.clone()).limit(1);
    let mut stream = transport.subscribe(SubscriptionRequest::plain(filter)).await?;
    let stored_done = stream.end_of_stored_events();

    // Stored events are queued before EOSE is flagged, so `next` goes first.
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NwcError::Cancelled),
        event = stream.next() => Ok(event),
        _ = stored_done => {
            debug!(wallet = %params.wallet_pubkey, "relays hold no info event");
            Ok(None)
        }
        _ = tokio::time::sleep(timeout) => {
            debug!(wallet = %params.wallet_pubkey, "no info event within {:?}", timeout);
            Ok(None)
        }
    }
}
