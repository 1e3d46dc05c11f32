use crate::error::{NwcError, Result};
use crate::lightning::{Invoice, InvoiceListener, ListenerMode};
use crate::mapper::ResponseMapper;
use crate::nwc::message::Notification;
use crate::nwc::{kinds, notifications, WalletEndpoint};
use crate::relay::{EventFilter, EventStream, RelayConnectionPool, SubscriptionRequest, UsageToken};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Invoices delivered by the wallet's `payment_received` notifications.
///
/// Holds the pooled connection for as long as it lives. When the relay
/// subscription ends the listener reports [`NwcError::StreamEnded`]; it does
/// not switch to polling.
pub struct NotificationInvoiceListener {
    stream: Option<EventStream>,
    usage: Option<UsageToken>,
    mapper: ResponseMapper,
}

impl NotificationInvoiceListener {
    pub async fn open(
        pool: &RelayConnectionPool,
        wallet: &WalletEndpoint,
        mapper: ResponseMapper,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let params = &wallet.params;
        let subscribe = async {
            let (transport, usage) = pool.acquire(&params.relays).await?;
            let filter = EventFilter::kinds([kinds::NOTIFICATION, kinds::NOTIFICATION_NIP44])
                .author(params.wallet_pubkey.clone())
                .p_tag(params.client_pubkey.clone())
                .since(Utc::now().timestamp());
            let stream = transport
                .subscribe(SubscriptionRequest::encrypted(filter, params.secret.clone()))
                .await?;
            Ok::<_, NwcError>((stream, usage))
        };

        let (stream, usage) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NwcError::Cancelled),
            opened = subscribe => opened?,
        };
        info!(subscription = stream.id(), "listening for wallet notifications");
        Ok(Self { stream: Some(stream), usage: Some(usage), mapper })
    }

    fn map(&self, content: &str) -> Option<Invoice> {
        let notification: Notification = match serde_json::from_str(content) {
            Ok(n) => n,
            Err(e) => {
                warn!("skipping undecodable notification: {}", e);
                return None;
            }
        };
        if notification.notification_type != notifications::PAYMENT_RECEIVED {
            debug!(kind = %notification.notification_type, "ignoring notification");
            return None;
        }
        match notification.transaction() {
            Ok(tx) => self.mapper.to_invoice(&tx, Utc::now()),
            Err(e) => {
                warn!("skipping payment_received with bad payload: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl InvoiceListener for NotificationInvoiceListener {
    fn mode(&self) -> ListenerMode {
        ListenerMode::Notifications
    }

    async fn wait_invoice(&mut self, cancel: &CancellationToken) -> Result<Invoice> {
        loop {
            let stream = self.stream.as_mut().ok_or(NwcError::Disposed)?;
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NwcError::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else {
                warn!("notification stream ended");
                return Err(NwcError::StreamEnded);
            };
            if let Some(invoice) = self.map(&event.content) {
                debug!(payment_hash = %invoice.payment_hash, "invoice paid");
                return Ok(invoice);
            }
        }
    }

    async fn dispose(&mut self) {
        if self.stream.take().is_some() {
            debug!("notification listener disposed");
        }
        if let Some(usage) = self.usage.take() {
            usage.release();
        }
    }
}
