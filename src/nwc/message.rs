//! Typed NIP-47 payloads. Everything crossing the relay boundary is decoded
//! into these structs before it reaches adapter logic.

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};

/// Outcome of a request: the wallet's result, or the error object it sent back.
pub type Reply<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    PayInvoice,
    PayKeysend,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    GetBalance,
    GetInfo,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::PayInvoice => "pay_invoice",
            Method::PayKeysend => "pay_keysend",
            Method::MakeInvoice => "make_invoice",
            Method::LookupInvoice => "lookup_invoice",
            Method::ListTransactions => "list_transactions",
            Method::GetBalance => "get_balance",
            Method::GetInfo => "get_info",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Request<P> {
    pub method: Method,
    pub params: P,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response<T> {
    pub result_type: String,
    #[serde(default)]
    pub error: Option<RemoteError>,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyParams {}

#[derive(Debug, Clone, Serialize)]
pub struct PayInvoiceParams {
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayKeysendParams {
    pub amount: u64,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MakeInvoiceParams {
    pub amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LookupInvoiceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListTransactionsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Include unpaid invoices; wallets return settled ones only when false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpaid: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TransactionType>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Settled,
    Expired,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Wallet-side transaction record (`make_invoice`, `lookup_invoice`,
/// `list_transactions` entries and notification payloads).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type", default)]
    pub kind: Option<TransactionType>,
    #[serde(default)]
    pub state: Option<TransactionState>,
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_hash: Option<String>,
    #[serde(default)]
    pub preimage: Option<String>,
    #[serde(default)]
    pub payment_hash: String,
    /// Millisatoshis
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub fees_paid: Option<u64>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub settled_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTransactionsResult {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetBalanceResult {
    /// Millisatoshis
    pub balance: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayResult {
    pub preimage: String,
    #[serde(default)]
    pub fees_paid: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetInfoResult {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
}

/// Decrypted notification content. The payload stays raw until the type is
/// known, since wallets send shapes this crate does not model.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub notification_type: String,
    #[serde(default)]
    pub notification: serde_json::Value,
}

impl Notification {
    pub fn transaction(&self) -> serde_json::Result<Transaction> {
        Transaction::deserialize(&self.notification)
    }
}
