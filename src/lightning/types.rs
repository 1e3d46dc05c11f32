//! Value objects shared by every Lightning client implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Bitcoin,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }

    /// Accepts both chain names and the `mainnet` spelling wallets report.
    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" | "main" => Some(Network::Bitcoin),
            "testnet" | "testnet3" | "testnet4" | "test" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Network::from_name(value).ok_or_else(|| format!("unknown network '{}'", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_hash: String,
    pub amount_msat: u64,
    pub preimage: Option<String>,
    pub bolt11: String,
    pub description: Option<String>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Complete,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
    pub amount_msat: u64,
    pub fee_msat: u64,
    pub preimage: Option<String>,
    pub bolt11: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateInvoiceRequest {
    pub amount_msat: u64,
    pub description: Option<String>,
    pub description_hash: Option<String>,
    pub expiry: Option<Duration>,
}

impl CreateInvoiceRequest {
    pub fn new(amount_msat: u64) -> Self {
        Self { amount_msat, ..Default::default() }
    }
    pub fn with_description(mut self, d: impl Into<String>) -> Self { self.description = Some(d.into()); self }
    pub fn with_description_hash(mut self, h: impl Into<String>) -> Self { self.description_hash = Some(h.into()); self }
    pub fn with_expiry(mut self, expiry: Duration) -> Self { self.expiry = Some(expiry); self }
}

#[derive(Debug, Clone, Default)]
pub struct ListInvoicesQuery {
    /// Only return invoices that are still unpaid.
    pub pending_only: bool,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ListPaymentsQuery {
    pub include_pending: bool,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Default for ListPaymentsQuery {
    fn default() -> Self {
        Self { include_pending: true, offset: None, limit: None }
    }
}

/// Either `bolt11` is set (invoice payment) or `destination` + `amount_msat` (keysend).
#[derive(Debug, Clone, Default)]
pub struct PayRequest {
    pub bolt11: Option<String>,
    pub amount_msat: Option<u64>,
    pub destination: Option<String>,
}

impl PayRequest {
    pub fn invoice(bolt11: impl Into<String>) -> Self {
        Self { bolt11: Some(bolt11.into()), ..Default::default() }
    }

    pub fn keysend(destination: impl Into<String>, amount_msat: u64) -> Self {
        Self { destination: Some(destination.into()), amount_msat: Some(amount_msat), bolt11: None }
    }

    pub fn with_amount(mut self, amount_msat: u64) -> Self { self.amount_msat = Some(amount_msat); self }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayResult {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayDetails {
    pub payment_hash: String,
    pub preimage: String,
    pub fee_msat: u64,
    pub total_amount_msat: u64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayResponse {
    pub result: PayResult,
    pub error: Option<String>,
    pub details: Option<PayDetails>,
}

impl PayResponse {
    pub fn ok(details: PayDetails) -> Self {
        Self { result: PayResult::Ok, error: None, details: Some(details) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { result: PayResult::Error, error: Some(message.into()), details: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightningBalance {
    pub local_msat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub alias: String,
    pub pubkey: String,
    pub network: Option<Network>,
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_id: String,
    pub capacity_sat: u64,
    pub local_balance_msat: u64,
    pub active: bool,
}
