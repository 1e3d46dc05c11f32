use crate::config::AdapterConfig;
use crate::error::{NwcError, Result};
use crate::executor::ProtocolRequestExecutor;
use crate::lightning::{Invoice, InvoiceListener, ListenerMode};
use crate::mapper::{is_settled, ResponseMapper};
use crate::nwc::message::{ListTransactionsParams, ListTransactionsResult, Transaction, TransactionType};
use crate::nwc::{Method, WalletEndpoint};
use crate::runtime::TaskScope;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Settled incoming transactions seen in one polling cycle.
#[derive(Debug, Default, Clone)]
pub struct TransactionSnapshot {
    transactions: Vec<Transaction>,
    hashes: HashSet<String>,
}

impl TransactionSnapshot {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        let transactions: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| tx.kind != Some(TransactionType::Outgoing) && is_settled(tx))
            .collect();
        let hashes = transactions.iter().map(|tx| tx.payment_hash.clone()).collect();
        Self { transactions, hashes }
    }

    pub fn contains(&self, payment_hash: &str) -> bool {
        self.hashes.contains(payment_hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Transactions present here but absent from `previous`, in wallet order.
    pub fn newly_settled<'a>(&'a self, previous: &'a TransactionSnapshot) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions.iter().filter(move |tx| !previous.contains(&tx.payment_hash))
    }
}

/// Invoices detected by repeatedly listing recent settled transactions.
///
/// The first cycle only records what is already settled. Each later cycle
/// emits what was not in the previous cycle, then replaces the snapshot, so a
/// transaction that drops out of the window and comes back is emitted again.
/// Any failure stops the loop for good.
pub struct PollingInvoiceListener {
    rx: mpsc::UnboundedReceiver<Invoice>,
    scope: TaskScope,
    stop_reason: Arc<Mutex<Option<String>>>,
    disposed: bool,
}

struct PollLoop {
    executor: ProtocolRequestExecutor,
    wallet: WalletEndpoint,
    mapper: ResponseMapper,
    interval: Duration,
    request_timeout: Duration,
    limit: u64,
}

impl PollLoop {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<Transaction>> {
        let params = ListTransactionsParams {
            limit: Some(self.limit),
            unpaid: Some(false),
            kind: Some(TransactionType::Incoming),
            ..Default::default()
        };
        let reply: ListTransactionsResult = self
            .executor
            .send(&self.wallet, Method::ListTransactions, params, self.request_timeout, cancel)
            .await??;
        Ok(reply.transactions)
    }

    async fn run(self, token: CancellationToken, tx: &mpsc::UnboundedSender<Invoice>) -> Result<()> {
        let mut previous: Option<TransactionSnapshot> = None;
        loop {
            let current = TransactionSnapshot::new(self.fetch(&token).await?);
            match &previous {
                None => debug!(seeded = current.len(), "polling snapshot seeded"),
                Some(prev) => {
                    for settled in current.newly_settled(prev) {
                        let Some(invoice) = self.mapper.to_invoice(settled, Utc::now()) else { continue };
                        debug!(payment_hash = %invoice.payment_hash, "invoice paid");
                        if tx.send(invoice).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            previous = Some(current);

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

impl PollingInvoiceListener {
    /// Start polling. The loop also stops when `lifetime` is cancelled.
    pub fn start(
        executor: ProtocolRequestExecutor,
        wallet: WalletEndpoint,
        mapper: ResponseMapper,
        config: &AdapterConfig,
        lifetime: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let scope = TaskScope::child_of("invoice-poller", lifetime);
        let stop_reason = Arc::new(Mutex::new(None));

        let poll = PollLoop {
            executor,
            wallet,
            mapper,
            interval: config.poll_interval,
            request_timeout: config.request_timeout,
            limit: config.poll_limit,
        };
        let reason = stop_reason.clone();
        scope.spawn(move |token| async move {
            // Record the stop reason before the sender drops.
            match poll.run(token.clone(), &tx).await {
                Ok(()) => debug!("invoice polling stopped"),
                Err(NwcError::Cancelled) if token.is_cancelled() => debug!("invoice polling cancelled"),
                Err(e) => {
                    error!("invoice polling stopped: {}", e);
                    *reason.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                    token.cancel();
                }
            }
            drop(tx);
        });
        info!(interval = ?config.poll_interval, limit = config.poll_limit, "polling for paid invoices");

        Self { rx, scope, stop_reason, disposed: false }
    }
}

fn stopped(reason: &Mutex<Option<String>>) -> NwcError {
    let reason = reason.lock().unwrap_or_else(|p| p.into_inner()).clone();
    NwcError::ListenerStopped(reason.unwrap_or_else(|| "listener closed".into()))
}

#[async_trait]
impl InvoiceListener for PollingInvoiceListener {
    fn mode(&self) -> ListenerMode {
        ListenerMode::Polling
    }

    async fn wait_invoice(&mut self, cancel: &CancellationToken) -> Result<Invoice> {
        if self.disposed {
            return Err(NwcError::Disposed);
        }
        let reason = self.stop_reason.clone();
        let lifetime = self.scope.token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NwcError::Cancelled),
            invoice = self.rx.recv() => invoice.ok_or_else(|| stopped(&reason)),
            _ = lifetime.cancelled() => Err(stopped(&reason)),
        }
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.scope.shutdown().await;
        self.rx.close();
    }
}
