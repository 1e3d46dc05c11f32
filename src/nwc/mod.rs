//! Nostr Wallet Connect (NIP-47) protocol surface
//!
//! - [`WalletConnectParams`] - the parsed connection URI
//! - [`message`] - typed request, response and notification payloads
//! - [`kinds`] - event kinds used on the relays
//!
//! # Event flow
//!
//! ```text
//! client ── kind 23194 (encrypted request, p=wallet) ──▶ relays ──▶ wallet
//! client ◀── kind 23195 (encrypted response, e=request) ── relays ◀── wallet
//! client ◀── kind 23196/23197 (notification, p=client) ── relays ◀── wallet
//! client ◀── kind 13194 (info: methods, notifications) ── relays ◀── wallet
//! ```

pub mod message;
mod uri;

pub use message::{Method, Reply};
pub use uri::WalletConnectParams;

use crate::relay::Encryption;
use std::sync::Arc;

/// NIP-47 event kinds
pub mod kinds {
    /// Replaceable capability announcement
    pub const INFO: u16 = 13194;
    pub const REQUEST: u16 = 23194;
    pub const RESPONSE: u16 = 23195;
    /// NIP-04 encrypted notification
    pub const NOTIFICATION: u16 = 23196;
    /// NIP-44 encrypted notification
    pub const NOTIFICATION_NIP44: u16 = 23197;
}

/// Notification types
pub mod notifications {
    pub const PAYMENT_RECEIVED: &str = "payment_received";
    pub const PAYMENT_SENT: &str = "payment_sent";
}

/// Commands every wallet must advertise before an adapter is built.
pub const MANDATORY_METHODS: &[Method] = &[
    Method::GetInfo,
    Method::MakeInvoice,
    Method::LookupInvoice,
    Method::ListTransactions,
];

/// A wallet connection plus the encryption scheme negotiated with it.
#[derive(Debug, Clone)]
pub struct WalletEndpoint {
    pub params: Arc<WalletConnectParams>,
    pub encryption: Encryption,
}

impl WalletEndpoint {
    pub fn new(params: Arc<WalletConnectParams>, encryption: Encryption) -> Self {
        Self { params, encryption }
    }
}
