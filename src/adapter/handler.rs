use super::WalletAdapter;
use crate::bolt11::Bolt11Parser;
use crate::config::AdapterConfig;
use crate::lightning::{ConnectionStringHandler, LightningClient};
use crate::nwc::WalletConnectParams;
use crate::relay::RelayConnectionPool;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Turns `nostr+walletconnect://` strings into [`WalletAdapter`]s. Strings
/// with any other scheme are left for other handlers.
#[derive(Clone)]
pub struct NwcConnectionStringHandler {
    pool: Arc<RelayConnectionPool>,
    parser: Arc<dyn Bolt11Parser>,
    config: AdapterConfig,
}

impl NwcConnectionStringHandler {
    pub fn new(pool: Arc<RelayConnectionPool>, parser: Arc<dyn Bolt11Parser>, config: AdapterConfig) -> Self {
        Self { pool, parser, config }
    }
}

#[async_trait]
impl ConnectionStringHandler for NwcConnectionStringHandler {
    async fn create(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn LightningClient>>, String> {
        if !WalletConnectParams::is_wallet_connect_uri(connection_string) {
            return Ok(None);
        }
        match WalletAdapter::connect(
            connection_string,
            self.pool.clone(),
            self.parser.clone(),
            self.config.clone(),
            cancel,
        )
        .await
        {
            Ok(adapter) => Ok(Some(Box::new(adapter))),
            Err(e) => {
                warn!("wallet connect rejected: {}", e);
                Err(e.to_string())
            }
        }
    }
}
