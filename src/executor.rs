//! Request/response correlation over pooled relays.
//!
//! One call = acquire the relay set, subscribe for responses addressed to the
//! client, publish the encrypted request, then wait for the response whose
//! `e` tag names the request. The wait is bounded by both the caller's token
//! and a per-operation deadline; the caller's token is checked first.

use crate::error::{NwcError, Result};
use crate::nwc::message::{Request, Response};
use crate::nwc::{kinds, Method, Reply, WalletEndpoint};
use crate::relay::{
    Encryption, EventFilter, OutgoingEvent, RelayConnectionPool, SubscriptionRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ProtocolRequestExecutor {
    pool: Arc<RelayConnectionPool>,
}

impl ProtocolRequestExecutor {
    pub fn new(pool: Arc<RelayConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<RelayConnectionPool> {
        &self.pool
    }

    /// Send `method` and wait for its reply.
    ///
    /// A wallet error object comes back as `Ok(Err(remote))`. `Err` is
    /// reserved for timeout, cancellation, transport and decoding failures.
    pub async fn send<P, R>(
        &self,
        wallet: &WalletEndpoint,
        method: Method,
        params: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Reply<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_string(&Request { method, params })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NwcError::Cancelled),
            _ = tokio::time::sleep(timeout) => {
                warn!(method = method.as_str(), ?timeout, "wallet request timed out");
                Err(NwcError::Timeout(format!("{} after {:?}", method.as_str(), timeout)))
            }
            reply = self.exchange(wallet, method, payload) => reply,
        }
    }

    async fn exchange<R: DeserializeOwned>(
        &self,
        wallet: &WalletEndpoint,
        method: Method,
        payload: String,
    ) -> Result<Reply<R>> {
        let params = &wallet.params;
        let (transport, _usage) = self.pool.acquire(&params.relays).await?;

        // Subscribe before publishing so a fast wallet cannot answer unseen
        let filter = EventFilter::kinds([kinds::RESPONSE])
            .author(params.wallet_pubkey.clone())
            .p_tag(params.client_pubkey.clone());
        let mut responses = transport
            .subscribe(SubscriptionRequest::encrypted(filter, params.secret.clone()))
            .await?;

        let mut tags = vec![vec!["p".to_string(), params.wallet_pubkey.clone()]];
        if wallet.encryption == Encryption::Nip44 {
            tags.push(vec!["encryption".to_string(), Encryption::Nip44.as_tag().to_string()]);
        }
        let request_id = transport
            .publish(
                &params.secret,
                OutgoingEvent {
                    kind: kinds::REQUEST,
                    recipient: params.wallet_pubkey.clone(),
                    encryption: wallet.encryption,
                    content: payload,
                    tags,
                },
            )
            .await?;
        debug!(method = method.as_str(), request_id = %request_id, "request published");

        while let Some(event) = responses.next().await {
            if event.reply_to() != Some(request_id.as_str()) {
                continue;
            }
            return decode_response(method, &event.content);
        }
        Err(NwcError::Transport(format!(
            "relay subscription ended before {} was answered",
            method.as_str()
        )))
    }
}

fn decode_response<R: DeserializeOwned>(method: Method, content: &str) -> Result<Reply<R>> {
    let response: Response<R> = serde_json::from_str(content)?;
    if response.result_type != method.as_str() {
        return Err(NwcError::UnexpectedResponse(format!(
            "expected {} response, got {}",
            method.as_str(),
            response.result_type
        )));
    }
    match (response.error, response.result) {
        (Some(err), _) => {
            debug!(method = method.as_str(), code = %err.code, "wallet returned error");
            Ok(Err(err))
        }
        (None, Some(result)) => Ok(Ok(result)),
        (None, None) => Err(NwcError::UnexpectedResponse(format!(
            "{} response has neither result nor error",
            method.as_str()
        ))),
    }
}
