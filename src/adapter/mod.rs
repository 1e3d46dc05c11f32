//! Wallet connect implementation of [`LightningClient`]
//!
//! # Connecting
//!
//! 1. Parse the connection URI
//! 2. Read the wallet's capabilities (info event, else `get_info`)
//! 3. Require `get_info`, `make_invoice`, `lookup_invoice`, `list_transactions`
//! 4. Call `get_info` and reject a network mismatch
//!
//! Failure at any step yields [`NwcError::Configuration`] and no adapter.
//! The listener kind is decided once, from the advertised notifications.

mod capabilities;
mod handler;

pub use capabilities::{check_network, WalletCapabilities};
pub use handler::NwcConnectionStringHandler;

use crate::bolt11::Bolt11Parser;
use crate::config::AdapterConfig;
use crate::error::{NwcError, Result};
use crate::executor::ProtocolRequestExecutor;
use crate::lightning::{
    ChannelSummary, CreateInvoiceRequest, Invoice, InvoiceListener, InvoiceStatus, LightningBalance,
    LightningClient, ListInvoicesQuery, ListPaymentsQuery, ListenerMode, NodeInfo, PayDetails,
    PayRequest, PayResponse, Payment, PaymentStatus,
};
use crate::listener::{NotificationInvoiceListener, PollingInvoiceListener};
use crate::mapper::ResponseMapper;
use crate::nwc::message::{
    EmptyParams, GetBalanceResult, GetInfoResult, ListTransactionsParams, ListTransactionsResult,
    LookupInvoiceParams, MakeInvoiceParams, PayInvoiceParams, PayKeysendParams, PayResult,
    Transaction, TransactionType,
};
use crate::nwc::{notifications, Method, Reply, WalletConnectParams, WalletEndpoint};
use crate::relay::{Encryption, RelayConnectionPool};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `payment_hash = SHA-256(preimage)`, `None` if the preimage is not hex.
pub fn payment_hash_of(preimage: &str) -> Option<String> {
    let bytes = hex::decode(preimage.trim()).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}

pub struct WalletAdapter {
    wallet: WalletEndpoint,
    executor: ProtocolRequestExecutor,
    mapper: ResponseMapper,
    parser: Arc<dyn Bolt11Parser>,
    config: AdapterConfig,
    capabilities: WalletCapabilities,
    info: GetInfoResult,
    lifetime: CancellationToken,
}

impl WalletAdapter {
    /// Negotiate with the wallet behind `connection_string`.
    pub async fn connect(
        connection_string: &str,
        pool: Arc<RelayConnectionPool>,
        parser: Arc<dyn Bolt11Parser>,
        config: AdapterConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let params = Arc::new(WalletConnectParams::parse(connection_string)?);
        let executor = ProtocolRequestExecutor::new(pool.clone());
        debug!(wallet = %params.wallet_pubkey, relays = params.relays.len(), "negotiating with wallet");

        let advertised = capabilities::fetch_info_event(&pool, &params, config.info_timeout, cancel).await?;
        let mut info_reply = None;
        let capabilities = match advertised {
            Some(event) => WalletCapabilities::from_info_event(&event),
            None => {
                // No info event: get_info lists the methods too
                let endpoint = WalletEndpoint::new(params.clone(), Encryption::Nip04);
                let info = fetch_info(&executor, &endpoint, config.request_timeout, cancel).await?;
                let caps = WalletCapabilities::from_info_result(&info);
                info_reply = Some(info);
                caps
            }
        };
        capabilities.require_mandatory()?;

        let wallet = WalletEndpoint::new(params, capabilities.encryption);
        let info = match info_reply {
            Some(info) => info,
            None => fetch_info(&executor, &wallet, config.request_timeout, cancel).await?,
        };
        check_network(config.network, info.network.as_deref())?;

        info!(
            wallet = %wallet.params.wallet_pubkey,
            alias = %info.alias,
            encryption = wallet.encryption.as_tag(),
            notifications = capabilities.notifies(notifications::PAYMENT_RECEIVED),
            "wallet connected"
        );

        Ok(Self {
            mapper: ResponseMapper::new(parser.clone(), config.network),
            wallet,
            executor,
            parser,
            config,
            capabilities,
            info,
            lifetime: CancellationToken::new(),
        })
    }

    pub fn capabilities(&self) -> &WalletCapabilities {
        &self.capabilities
    }

    /// Node details reported by `get_info` during negotiation.
    pub fn remote_info(&self) -> NodeInfo {
        NodeInfo {
            alias: self.info.alias.clone(),
            pubkey: self.info.pubkey.clone(),
            network: self.info.network.as_deref().and_then(crate::lightning::Network::from_name),
            block_height: self.info.block_height,
        }
    }

    pub fn params(&self) -> &WalletConnectParams {
        &self.wallet.params
    }

    pub fn listener_mode(&self) -> ListenerMode {
        if self.capabilities.notifies(notifications::PAYMENT_RECEIVED) {
            ListenerMode::Notifications
        } else {
            ListenerMode::Polling
        }
    }

    /// Stop every polling listener created by this adapter.
    pub fn close(&self) {
        if !self.lifetime.is_cancelled() {
            info!(wallet = %self.wallet.params.wallet_pubkey, "closing wallet adapter");
            self.lifetime.cancel();
        }
    }

    async fn call<P, R>(&self, method: Method, params: P, cancel: &CancellationToken) -> Result<Reply<R>>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.config.request_timeout, cancel).await
    }

    async fn call_with_timeout<P, R>(
        &self,
        method: Method,
        params: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Reply<R>>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.executor.send(&self.wallet, method, params, timeout, cancel).await
    }

    async fn list_transactions(
        &self,
        params: ListTransactionsParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<Transaction>> {
        let result: ListTransactionsResult = self.call(Method::ListTransactions, params, cancel).await??;
        Ok(result.transactions)
    }

    async fn lookup(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<Reply<Transaction>> {
        let params = LookupInvoiceParams { payment_hash: Some(payment_hash.to_string()), invoice: None };
        self.call(Method::LookupInvoice, params, cancel).await
    }

    /// Details for a payment the wallet reported as sent. A successful lookup
    /// decides status, fee and amount; any failure keeps the locally derived
    /// values and reports the payment complete.
    async fn confirm_payment(
        &self,
        request: &PayRequest,
        sent: PayResult,
        cancel: &CancellationToken,
    ) -> PayDetails {
        let bolt11 = request.bolt11.as_deref().and_then(|b| self.parser.parse(b, self.config.network).ok());
        let payment_hash = payment_hash_of(&sent.preimage)
            .or_else(|| bolt11.as_ref().map(|d| d.payment_hash.clone()))
            .unwrap_or_else(|| {
                warn!("wallet returned a non-hex preimage");
                String::new()
            });
        let fee_msat = sent.fees_paid.unwrap_or(0);
        let amount_msat = request
            .amount_msat
            .or_else(|| bolt11.as_ref().and_then(|d| d.amount_msat))
            .unwrap_or(0);

        let mut details = PayDetails {
            payment_hash: payment_hash.clone(),
            preimage: sent.preimage,
            fee_msat,
            total_amount_msat: amount_msat.saturating_add(fee_msat),
            status: PaymentStatus::Complete,
        };
        if payment_hash.is_empty() {
            return details;
        }

        match self.lookup(&payment_hash, cancel).await {
            Ok(Ok(mut tx)) => {
                tx.kind.get_or_insert(TransactionType::Outgoing);
                if let Some(payment) = self.mapper.to_payment(&tx) {
                    let fee = if payment.fee_msat > 0 { payment.fee_msat } else { fee_msat };
                    let amount = if payment.amount_msat > 0 { payment.amount_msat } else { amount_msat };
                    details.fee_msat = fee;
                    details.total_amount_msat = amount.saturating_add(fee);
                    details.status = payment.status;
                }
            }
            Ok(Err(remote)) => debug!(payment_hash = %payment_hash, "payment lookup failed: {}", remote),
            Err(e) => debug!(payment_hash = %payment_hash, "payment lookup failed: {}", e),
        }
        details
    }
}

impl Drop for WalletAdapter {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}

async fn fetch_info(
    executor: &ProtocolRequestExecutor,
    wallet: &WalletEndpoint,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<GetInfoResult> {
    let reply: Reply<GetInfoResult> = executor.send(wallet, Method::GetInfo, EmptyParams {}, timeout, cancel).await?;
    reply.map_err(|e| NwcError::Configuration(format!("get_info failed: {}", e)))
}

#[async_trait]
impl LightningClient for WalletAdapter {
    async fn get_invoice(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<Option<Invoice>> {
        let tx = self.lookup(payment_hash, cancel).await??;
        Ok(self.mapper.to_invoice(&tx, Utc::now()))
    }

    async fn list_invoices(&self, query: ListInvoicesQuery, cancel: &CancellationToken) -> Result<Vec<Invoice>> {
        let params = ListTransactionsParams {
            kind: Some(TransactionType::Incoming),
            unpaid: Some(true),
            offset: query.offset,
            limit: query.limit,
            ..Default::default()
        };
        let now = Utc::now();
        let invoices = self
            .list_transactions(params, cancel)
            .await?
            .iter()
            .filter_map(|tx| self.mapper.to_invoice(tx, now))
            .filter(|inv| !query.pending_only || inv.status == InvoiceStatus::Unpaid)
            .collect();
        Ok(invoices)
    }

    async fn get_payment(&self, payment_hash: &str, cancel: &CancellationToken) -> Result<Option<Payment>> {
        match self.lookup(payment_hash, cancel).await? {
            Ok(tx) => Ok(self.mapper.to_payment(&tx)),
            Err(remote) => {
                debug!(payment_hash, "payment not found: {}", remote);
                Ok(None)
            }
        }
    }

    async fn list_payments(&self, query: ListPaymentsQuery, cancel: &CancellationToken) -> Result<Vec<Payment>> {
        let params = ListTransactionsParams {
            kind: Some(TransactionType::Outgoing),
            unpaid: Some(query.include_pending),
            offset: query.offset,
            limit: query.limit,
            ..Default::default()
        };
        let payments = self
            .list_transactions(params, cancel)
            .await?
            .iter()
            .filter_map(|tx| self.mapper.to_payment(tx))
            .filter(|p| query.include_pending || p.status != PaymentStatus::Pending)
            .collect();
        Ok(payments)
    }

    async fn create_invoice(&self, request: CreateInvoiceRequest, cancel: &CancellationToken) -> Result<Invoice> {
        let params = MakeInvoiceParams {
            amount: request.amount_msat,
            description: request.description.clone(),
            description_hash: request.description_hash,
            expiry: request.expiry.map(|e| e.as_secs()),
        };
        let mut tx: Transaction = self.call(Method::MakeInvoice, params, cancel).await??;
        tx.kind.get_or_insert(TransactionType::Incoming);
        if tx.description.is_none() {
            tx.description = request.description;
        }
        if tx.created_at == 0 {
            tx.created_at = Utc::now().timestamp();
        }
        self.mapper
            .to_invoice(&tx, Utc::now())
            .ok_or_else(|| NwcError::UnexpectedResponse("make_invoice returned a non-incoming transaction".into()))
    }

    async fn listen(&self, cancel: &CancellationToken) -> Result<Box<dyn InvoiceListener>> {
        match self.listener_mode() {
            ListenerMode::Notifications => {
                let listener =
                    NotificationInvoiceListener::open(self.executor.pool(), &self.wallet, self.mapper.clone(), cancel)
                        .await?;
                Ok(Box::new(listener))
            }
            ListenerMode::Polling => Ok(Box::new(PollingInvoiceListener::start(
                self.executor.clone(),
                self.wallet.clone(),
                self.mapper.clone(),
                &self.config,
                &self.lifetime,
            ))),
        }
    }

    async fn get_balance(&self, cancel: &CancellationToken) -> Result<LightningBalance> {
        let result: GetBalanceResult = self
            .call_with_timeout(Method::GetBalance, EmptyParams {}, self.config.balance_timeout, cancel)
            .await??;
        Ok(LightningBalance { local_msat: result.balance })
    }

    async fn pay(&self, request: PayRequest, cancel: &CancellationToken) -> Result<PayResponse> {
        let reply: Reply<PayResult> = match (&request.bolt11, &request.destination, request.amount_msat) {
            (Some(invoice), _, amount) => {
                let params = PayInvoiceParams { invoice: invoice.clone(), amount };
                self.call(Method::PayInvoice, params, cancel).await?
            }
            (None, Some(pubkey), Some(amount)) => {
                let params = PayKeysendParams { amount, pubkey: pubkey.clone(), preimage: None };
                self.call(Method::PayKeysend, params, cancel).await?
            }
            _ => {
                return Err(NwcError::InvalidInvoice(
                    "pay needs a bolt11 invoice, or a destination and amount".into(),
                ))
            }
        };

        match reply {
            Ok(sent) => {
                let details = self.confirm_payment(&request, sent, cancel).await;
                info!(payment_hash = %details.payment_hash, fee_msat = details.fee_msat, "payment sent");
                Ok(PayResponse::ok(details))
            }
            Err(remote) => {
                warn!("payment failed: {}", remote);
                Ok(PayResponse::error(remote.to_string()))
            }
        }
    }

    async fn get_info(&self, _cancel: &CancellationToken) -> Result<NodeInfo> {
        Err(NwcError::NotSupported("get_info"))
    }

    async fn open_channel(&self, _node_uri: &str, _amount_sat: u64, _cancel: &CancellationToken) -> Result<String> {
        Err(NwcError::NotSupported("open_channel"))
    }

    async fn get_deposit_address(&self, _cancel: &CancellationToken) -> Result<String> {
        Err(NwcError::NotSupported("get_deposit_address"))
    }

    async fn connect_to(&self, _node_uri: &str, _cancel: &CancellationToken) -> Result<()> {
        Err(NwcError::NotSupported("connect_to"))
    }

    async fn cancel_invoice(&self, _payment_hash: &str, _cancel: &CancellationToken) -> Result<()> {
        Err(NwcError::NotSupported("cancel_invoice"))
    }

    async fn list_channels(&self, _cancel: &CancellationToken) -> Result<Vec<ChannelSummary>> {
        Err(NwcError::NotSupported("list_channels"))
    }
}
