//! BOLT11 decoding behind a small trait, so hosts and tests can swap the parser.

use crate::error::Result;
use crate::lightning::Network;
use chrono::{DateTime, Utc};

/// Fields the adapter needs from a payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bolt11Details {
    pub payment_hash: String,
    pub amount_msat: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub trait Bolt11Parser: Send + Sync {
    /// Decode `invoice`, rejecting requests for a chain other than `network`.
    fn parse(&self, invoice: &str, network: Network) -> Result<Bolt11Details>;
}

#[cfg(feature = "native")]
pub use native::LightningInvoiceParser;

#[cfg(feature = "native")]
mod native {
    use super::*;
    use crate::error::NwcError;
    use lightning_invoice::{Bolt11Invoice, Currency};
    use std::str::FromStr;

    /// Parser backed by the `lightning-invoice` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LightningInvoiceParser;

    pub(super) fn network_of(currency: Currency) -> Network {
        match currency {
            Currency::Bitcoin => Network::Bitcoin,
            Currency::BitcoinTestnet => Network::Testnet,
            Currency::Signet => Network::Signet,
            Currency::Regtest | Currency::Simnet => Network::Regtest,
        }
    }

    fn timestamp(secs: u64) -> Result<DateTime<Utc>> {
        i64::try_from(secs)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .ok_or_else(|| NwcError::InvalidInvoice(format!("timestamp {} out of range", secs)))
    }

    impl Bolt11Parser for LightningInvoiceParser {
        fn parse(&self, invoice: &str, network: Network) -> Result<Bolt11Details> {
            let decoded = Bolt11Invoice::from_str(invoice.trim())
                .map_err(|e| NwcError::InvalidInvoice(e.to_string()))?;

            let invoice_network = network_of(decoded.currency());
            if invoice_network != network {
                return Err(NwcError::InvalidInvoice(format!(
                    "invoice is for {}, wallet is on {}",
                    invoice_network.as_str(),
                    network.as_str()
                )));
            }

            let created = decoded.duration_since_epoch();
            let expires = created.saturating_add(decoded.expiry_time());
            Ok(Bolt11Details {
                payment_hash: decoded.payment_hash().to_string(),
                amount_msat: decoded.amount_milli_satoshis(),
                created_at: timestamp(created.as_secs())?,
                expires_at: timestamp(expires.as_secs())?,
            })
        }
    }
}
