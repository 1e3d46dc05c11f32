//! Adapter and pool configuration - passed from the host

use crate::lightning::Network;
use std::time::Duration;

/// Per-adapter settings. Hosts construct this; `from_env` covers the CLI.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Chain the wallet must report through `get_info`.
    pub network: Network,
    /// Deadline for most wallet requests.
    pub request_timeout: Duration,
    /// Deadline for `get_balance`.
    pub balance_timeout: Duration,
    /// How long to wait for the wallet's info event during negotiation.
    pub info_timeout: Duration,
    /// Idle time between polling cycles.
    pub poll_interval: Duration,
    /// Most recent settled transactions fetched per polling cycle.
    pub poll_limit: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            request_timeout: Duration::from_secs(10),
            balance_timeout: Duration::from_secs(5),
            info_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            poll_limit: 10,
        }
    }
}

impl AdapterConfig {
    pub fn new(network: Network) -> Self {
        Self { network, ..Default::default() }
    }
    pub fn with_request_timeout(mut self, t: Duration) -> Self { self.request_timeout = t; self }
    pub fn with_balance_timeout(mut self, t: Duration) -> Self { self.balance_timeout = t; self }
    pub fn with_info_timeout(mut self, t: Duration) -> Self { self.info_timeout = t; self }
    pub fn with_poll_interval(mut self, i: Duration) -> Self { self.poll_interval = i; self }
    pub fn with_poll_limit(mut self, n: u64) -> Self { self.poll_limit = n.max(1); self }

    /// Read overrides from the environment.
    ///
    /// - `NWC_NETWORK` - bitcoin/mainnet, testnet, signet, regtest
    /// - `NWC_REQUEST_TIMEOUT_SECS`, `NWC_BALANCE_TIMEOUT_SECS`, `NWC_INFO_TIMEOUT_SECS`
    /// - `NWC_POLL_INTERVAL_MS`, `NWC_POLL_LIMIT`
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("NWC_NETWORK") {
            config.network = Network::from_name(&value)
                .ok_or_else(|| format!("NWC_NETWORK: unknown network '{}'", value))?;
        }
        if let Some(secs) = env_u64("NWC_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NWC_BALANCE_TIMEOUT_SECS")? {
            config.balance_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NWC_INFO_TIMEOUT_SECS")? {
            config.info_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("NWC_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("NWC_POLL_LIMIT")? {
            config = config.with_poll_limit(n);
        }
        Ok(config)
    }
}

/// Relay connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// A released connection is closed once idle this long.
    pub idle_ttl: Duration,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
    /// Deadline for connecting a new transport.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self { self.idle_ttl = ttl; self }
    pub fn with_sweep_interval(mut self, i: Duration) -> Self { self.sweep_interval = i; self }
    pub fn with_connect_timeout(mut self, t: Duration) -> Self { self.connect_timeout = t; self }

    /// Read overrides from `NWC_POOL_IDLE_SECS`, `NWC_POOL_SWEEP_SECS`, `NWC_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(secs) = env_u64("NWC_POOL_IDLE_SECS")? {
            config.idle_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("NWC_POOL_SWEEP_SECS")? {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_u64("NWC_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, String> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| format!("{}: {}", name, e)),
        Err(_) => Ok(None),
    }
}
