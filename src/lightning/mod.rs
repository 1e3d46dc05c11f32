//! Lightning client contract
//!
//! The uniform surface a host application talks to, independent of how the
//! wallet is reached. [`crate::adapter::WalletAdapter`] implements it over
//! Nostr Wallet Connect.
//!
//! | Operation | Wallet connect |
//! |-----------|----------------|
//! | `get_invoice` / `get_payment` | `lookup_invoice` |
//! | `list_invoices` / `list_payments` | `list_transactions` |
//! | `create_invoice` | `make_invoice` |
//! | `pay` | `pay_invoice` / `pay_keysend` |
//! | `get_balance` | `get_balance` |
//! | `listen` | notifications or polling |
//! | everything else | `NotSupported` |

mod types;

pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// How a listener detects settled invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    Notifications,
    Polling,
}

/// Stream of invoices paid after the listener was created.
#[async_trait]
pub trait InvoiceListener: Send {
    fn mode(&self) -> ListenerMode;

    /// Wait for the next paid invoice.
    async fn wait_invoice(&mut self, cancel: &CancellationToken) -> Result<Invoice>;

    /// Release subscriptions and pooled connections. Idempotent.
    async fn dispose(&mut self);
}

#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_invoice(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<Option<Invoice>>;
    async fn list_invoices(&self, query: ListInvoicesQuery, cancel: &CancellationToken) -> Result<Vec<Invoice>>;
    async fn get_payment(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<Option<Payment>>;
    async fn list_payments(&self, query: ListPaymentsQuery, cancel: &CancellationToken) -> Result<Vec<Payment>>;
    async fn create_invoice(&self, request: CreateInvoiceRequest, cancel: &CancellationToken) -> Result<Invoice>;
    async fn listen(&self, cancel: &CancellationToken) -> Result<Box<dyn InvoiceListener>>;
    async fn get_balance(&self, cancel: &CancellationToken) -> Result<LightningBalance>;
    async fn pay(&self, request: PayRequest, cancel: &CancellationToken) -> Result<PayResponse>;

    async fn get_info(&self, cancel: &CancellationToken) -> Result<NodeInfo>;
    async fn open_channel(&self, node_uri: &str, amount_sat: u64, cancel: &CancellationToken) -> Result<String>;
    async fn get_deposit_address(&self, cancel: &CancellationToken) -> Result<String>;
    async fn connect_to(&self, node_uri: &str, cancel: &CancellationToken) -> Result<()>;
    async fn cancel_invoice(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<()>;
    async fn list_channels(&self, cancel: &CancellationToken) -> Result<Vec<ChannelSummary>>;
}

/// Builds a client from a host's connection string.
///
/// `Ok(None)` means the string belongs to another handler; `Err` carries a
/// human readable reason the string was rejected.
#[async_trait]
pub trait ConnectionStringHandler: Send + Sync {
    async fn create(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<Box<dyn LightningClient>>, String>;
}
