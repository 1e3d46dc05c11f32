//! nwc-lightning: Lightning payments through a Nostr Wallet Connect wallet.
//!
//! # Architecture
//!
//! ```text
//! Host
//!   │
//!   ├── NwcConnectionStringHandler ("nostr+walletconnect://...")
//!   │     └── WalletAdapter (LightningClient)
//!   │           ├── ProtocolRequestExecutor ── request/response correlation
//!   │           ├── ResponseMapper ──────────── transactions → invoices/payments
//!   │           └── listen()
//!   │                 ├── NotificationInvoiceListener (payment_received)
//!   │                 └── PollingInvoiceListener (list_transactions diff)
//!   │
//!   └── RelayConnectionPool (shared, ref-counted, idle sweep)
//!         └── RelayTransport ── WebSocketTransport (tokio-tungstenite)
//! ```
//!
//! # Features
//!
//! - `native` (default) - websocket transport, `lightning-invoice` BOLT11
//!   parser, tracing subscriber setup and the `nwc` binary
//!
//! # Usage
//!
//! ```ignore
//! use nwc_lightning::{
//!     AdapterConfig, LightningClient, LightningInvoiceParser, PoolConfig,
//!     RelayConnectionPool, WalletAdapter, WebSocketFactory,
//! };
//!
//! let pool = Arc::new(RelayConnectionPool::new(Arc::new(WebSocketFactory), PoolConfig::default()));
//! pool.start();
//!
//! let cancel = CancellationToken::new();
//! let wallet = WalletAdapter::connect(uri, pool.clone(), Arc::new(LightningInvoiceParser), AdapterConfig::default(), &cancel).await?;
//! let invoice = wallet.create_invoice(CreateInvoiceRequest::new(21_000), &cancel).await?;
//! ```

pub mod adapter;
pub mod bolt11;
pub mod config;
pub mod error;
pub mod executor;
pub mod lightning;
pub mod listener;
pub mod mapper;
pub mod nwc;
pub mod relay;
pub mod runtime;

#[cfg(feature = "native")]
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================
pub use adapter::{NwcConnectionStringHandler, WalletAdapter, WalletCapabilities};
pub use bolt11::{Bolt11Details, Bolt11Parser};
pub use config::{AdapterConfig, PoolConfig};
pub use error::{NwcError, RemoteError, Result};
pub use executor::ProtocolRequestExecutor;
pub use lightning::{
    ConnectionStringHandler, CreateInvoiceRequest, Invoice, InvoiceListener, InvoiceStatus,
    LightningClient, ListenerMode, Network, PayRequest, PayResponse, Payment, PaymentStatus,
};
pub use listener::{NotificationInvoiceListener, PollingInvoiceListener};
pub use mapper::ResponseMapper;
pub use nwc::WalletConnectParams;
pub use relay::{RelayConnectionPool, RelayTransport, TransportFactory, UsageToken};
pub use runtime::{install_signal_handlers, TaskScope};

#[cfg(feature = "native")]
pub use bolt11::LightningInvoiceParser;
#[cfg(feature = "native")]
pub use relay::{WebSocketFactory, WebSocketTransport};
