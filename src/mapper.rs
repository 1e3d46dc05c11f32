//! Wallet transaction records to host-facing invoices and payments.

use crate::bolt11::{Bolt11Details, Bolt11Parser};
use crate::lightning::{Invoice, InvoiceStatus, Network, Payment, PaymentStatus};
use crate::nwc::message::{Transaction, TransactionState, TransactionType};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Expiry assumed when neither the record nor the invoice states one.
const DEFAULT_EXPIRY_SECS: i64 = 3600;

#[derive(Clone)]
pub struct ResponseMapper {
    parser: Arc<dyn Bolt11Parser>,
    network: Network,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Zero means "not settled" for several wallets.
fn settled_at(tx: &Transaction) -> Option<i64> {
    tx.settled_at.filter(|&t| t > 0)
}

/// Settled means a settlement timestamp, whatever `state` claims.
pub(crate) fn is_settled(tx: &Transaction) -> bool {
    settled_at(tx).is_some()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl ResponseMapper {
    pub fn new(parser: Arc<dyn Bolt11Parser>, network: Network) -> Self {
        Self { parser, network }
    }

    fn decode(&self, tx: &Transaction) -> Option<Bolt11Details> {
        let bolt11 = tx.invoice.as_deref().filter(|s| !s.is_empty())?;
        match self.parser.parse(bolt11, self.network) {
            Ok(details) => Some(details),
            Err(e) => {
                debug!(payment_hash = %tx.payment_hash, "could not decode invoice: {}", e);
                None
            }
        }
    }

    /// `None` unless the record is incoming.
    pub fn to_invoice(&self, tx: &Transaction, now: DateTime<Utc>) -> Option<Invoice> {
        if tx.kind != Some(TransactionType::Incoming) {
            return None;
        }
        let details = self.decode(tx);

        let created_at = match (&details, tx.created_at) {
            (Some(d), 0) => d.created_at,
            (_, secs) => timestamp(secs),
        };
        let expires_at = match (tx.expires_at, &details) {
            (Some(secs), _) => timestamp(secs),
            (None, Some(d)) => d.expires_at,
            (None, None) => created_at + Duration::seconds(DEFAULT_EXPIRY_SECS),
        };
        let payment_hash = match (&details, tx.payment_hash.is_empty()) {
            (Some(d), true) => d.payment_hash.clone(),
            _ => tx.payment_hash.clone(),
        };
        let amount_msat = match (&details, tx.amount) {
            (Some(d), 0) => d.amount_msat.unwrap_or(0),
            (_, amount) => amount,
        };

        let paid_at = settled_at(tx).map(timestamp);
        let status = if paid_at.is_some() {
            InvoiceStatus::Paid
        } else if expires_at < now {
            InvoiceStatus::Expired
        } else {
            InvoiceStatus::Unpaid
        };

        Some(Invoice {
            payment_hash,
            amount_msat,
            preimage: non_empty(&tx.preimage),
            bolt11: tx.invoice.clone().unwrap_or_default(),
            description: tx.description.clone(),
            status,
            created_at,
            expires_at,
            paid_at,
        })
    }

    /// `None` unless the record is outgoing. Settled if a settlement time or a
    /// preimage is present.
    pub fn to_payment(&self, tx: &Transaction) -> Option<Payment> {
        if tx.kind != Some(TransactionType::Outgoing) {
            return None;
        }
        let preimage = non_empty(&tx.preimage);
        let status = if settled_at(tx).is_some() || preimage.is_some() {
            PaymentStatus::Complete
        } else {
            match tx.state {
                Some(TransactionState::Failed | TransactionState::Expired) => PaymentStatus::Failed,
                Some(TransactionState::Pending) | None => PaymentStatus::Pending,
                // settled without a timestamp or preimage
                Some(TransactionState::Settled) => PaymentStatus::Complete,
                Some(TransactionState::Unknown) => PaymentStatus::Unknown,
            }
        };

        let payment_hash = if tx.payment_hash.is_empty() {
            self.decode(tx).map(|d| d.payment_hash).unwrap_or_default()
        } else {
            tx.payment_hash.clone()
        };

        Some(Payment {
            payment_hash,
            amount_msat: tx.amount,
            fee_msat: tx.fees_paid.unwrap_or(0),
            preimage,
            bolt11: tx.invoice.clone().unwrap_or_default(),
            status,
            created_at: timestamp(tx.created_at),
        })
    }
}
