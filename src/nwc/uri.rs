//! Connection URI: `nostr+walletconnect://<wallet pubkey>?relay=<url>&secret=<hex>[&lud16=<addr>]`

use crate::error::{NwcError, Result};
use std::fmt;
use url::Url;

const SCHEMES: &[&str] = &["nostr+walletconnect", "nwc"];

/// Parsed wallet connection. Immutable for the adapter's lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletConnectParams {
    /// Hex x-only pubkey of the wallet service
    pub wallet_pubkey: String,
    /// Hex secret key the client signs and encrypts with
    pub secret: String,
    /// Hex pubkey derived from `secret`
    pub client_pubkey: String,
    pub relays: Vec<Url>,
    pub lud16: Option<String>,
}

impl fmt::Debug for WalletConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConnectParams")
            .field("wallet_pubkey", &self.wallet_pubkey)
            .field("client_pubkey", &self.client_pubkey)
            .field("relays", &self.relays.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("lud16", &self.lud16)
            .finish_non_exhaustive()
    }
}

impl WalletConnectParams {
    /// True if the string uses a scheme this parser handles.
    pub fn is_wallet_connect_uri(value: &str) -> bool {
        value
            .trim()
            .split_once(':')
            .map(|(scheme, _)| SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let url = Url::parse(value.trim())
            .map_err(|e| NwcError::Configuration(format!("invalid connection string: {}", e)))?;

        if !SCHEMES.contains(&url.scheme()) {
            return Err(NwcError::Configuration(format!(
                "unsupported scheme '{}', expected nostr+walletconnect://",
                url.scheme()
            )));
        }

        // `scheme://pubkey?..` puts the key in the host, `scheme:pubkey?..` in the path
        let wallet_pubkey = url
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| url.path().trim_start_matches('/'))
            .to_ascii_lowercase();
        if !is_hex_key(&wallet_pubkey) {
            return Err(NwcError::Configuration(
                "wallet pubkey must be 64 hex characters".into(),
            ));
        }

        let mut relays = Vec::new();
        let mut secret = None;
        let mut lud16 = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" => {
                    let relay = Url::parse(&value)
                        .map_err(|e| NwcError::Configuration(format!("invalid relay '{}': {}", value, e)))?;
                    if !matches!(relay.scheme(), "ws" | "wss") {
                        return Err(NwcError::Configuration(format!(
                            "relay '{}' must use ws:// or wss://",
                            relay
                        )));
                    }
                    if !relays.contains(&relay) {
                        relays.push(relay);
                    }
                }
                "secret" => secret = Some(value.to_ascii_lowercase()),
                "lud16" if !value.is_empty() => lud16 = Some(value.into_owned()),
                _ => {}
            }
        }

        if relays.is_empty() {
            return Err(NwcError::Configuration("connection string has no relay".into()));
        }
        let secret = secret
            .ok_or_else(|| NwcError::Configuration("connection string has no secret".into()))?;
        if !is_hex_key(&secret) {
            return Err(NwcError::Configuration("secret must be 64 hex characters".into()));
        }
        let client_pubkey = nostr::Keys::parse(&secret)
            .map_err(|e| NwcError::Configuration(format!("invalid secret: {}", e)))?
            .public_key()
            .to_hex();

        Ok(Self { wallet_pubkey, secret, client_pubkey, relays, lud16 })
    }
}

fn is_hex_key(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
