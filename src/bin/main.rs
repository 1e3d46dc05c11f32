//! nwc CLI - talk to a Nostr Wallet Connect wallet from the shell
//!
//!   nwc info                         → alias, network, advertised commands
//!   nwc balance                      → {"local_msat": ..}
//!   nwc invoice <amount_msat> [memo] → new invoice
//!   nwc pay <bolt11>                 → pay result with payment hash
//!   nwc listen                       → one JSON line per paid invoice
//!
//! The connection string comes from `--uri` or `NWC_URI` (a `.env` file in
//! the working directory is read first). Output is JSON.

use nwc_lightning::logging::init_logging;
use nwc_lightning::{
    install_signal_handlers, AdapterConfig, CreateInvoiceRequest, LightningClient,
    LightningInvoiceParser, PayRequest, PoolConfig, RelayConnectionPool, WalletAdapter,
    WebSocketFactory,
};
use nwc_lightning::lightning::{ListInvoicesQuery, ListPaymentsQuery, Network};
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn main() {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("nwc {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some(command) = opts.command.clone() else {
        print_usage();
        return;
    };

    let result = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))
        .and_then(|rt| rt.block_on(run(&command, &opts)));

    let pretty = opts.pretty || (!opts.json && std::io::stdout().is_terminal());
    match result {
        Ok(Value::Null) => {}
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": e}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode output: {}", e))
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    args: Vec<String>,
    uri: Option<String>,
    network: Option<String>,
    amount_msat: Option<u64>,
    keysend: Option<String>,
    expiry_secs: Option<u64>,
    limit: Option<u64>,
    offset: Option<u64>,
    count: Option<usize>,
    pending: bool,
    settled: bool,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let next = args.get(i + 1).cloned();
            let mut takes_value = true;
            match arg.as_str() {
                "--help" | "-h" => { opts.help = true; takes_value = false; }
                "--version" | "-V" => { opts.version = true; takes_value = false; }
                "--json" => { opts.json = true; takes_value = false; }
                "--pretty" => { opts.pretty = true; takes_value = false; }
                "--pending" => { opts.pending = true; takes_value = false; }
                "--settled" => { opts.settled = true; takes_value = false; }
                "--uri" | "-u" => opts.uri = next,
                "--network" | "-n" => opts.network = next,
                "--amount" | "-a" => opts.amount_msat = next.and_then(|v| v.parse().ok()),
                "--keysend" | "-k" => opts.keysend = next,
                "--expiry" => opts.expiry_secs = next.and_then(|v| v.parse().ok()),
                "--limit" | "-l" => opts.limit = next.and_then(|v| v.parse().ok()),
                "--offset" => opts.offset = next.and_then(|v| v.parse().ok()),
                "--count" | "-c" => opts.count = next.and_then(|v| v.parse().ok()),
                _ if !arg.starts_with('-') => {
                    positional.push(arg.clone());
                    takes_value = false;
                }
                _ => takes_value = false, // Ignore unknown flags
            }
            i += if takes_value { 2 } else { 1 };
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        opts.args = positional;

        // Environment (lower priority than CLI args)
        if opts.uri.is_none() {
            opts.uri = env::var("NWC_URI").ok().filter(|s| !s.is_empty());
        }

        opts
    }
}

fn print_usage() {
    println!(
        r#"nwc - Nostr Wallet Connect client

USAGE:
    nwc <command> [args] [options]

COMMANDS:
    info                          Wallet alias, network and advertised commands
    balance                       Spendable balance
    invoice <amount_msat> [memo]  Create an invoice
    lookup <payment_hash>         Look up an invoice or payment
    invoices                      List invoices
    payments                      List outgoing payments
    pay <bolt11>                  Pay an invoice
    pay --keysend <pubkey> --amount <msat>
                                  Spontaneous payment
    listen                        Print paid invoices as they arrive

OPTIONS:
    --uri, -u <uri>         Connection string (env: NWC_URI)
    --network, -n <net>     Expected network: bitcoin|testnet|signet|regtest (env: NWC_NETWORK)
    --amount, -a <msat>     Amount for pay / keysend
    --expiry <secs>         Invoice expiry
    --limit, -l <n>         Max items for invoices / payments
    --offset <n>            Skip items for invoices / payments
    --pending               invoices: only unpaid
    --settled               payments: only completed
    --count, -c <n>         listen: exit after n invoices

OUTPUT OPTIONS:
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

ENVIRONMENT:
    RUST_LOG, NWC_LOG_FORMAT=pretty|compact|json
    NWC_REQUEST_TIMEOUT_SECS, NWC_BALANCE_TIMEOUT_SECS, NWC_INFO_TIMEOUT_SECS
    NWC_POLL_INTERVAL_MS, NWC_POLL_LIMIT
    NWC_POOL_IDLE_SECS, NWC_POOL_SWEEP_SECS, NWC_CONNECT_TIMEOUT_SECS

EXAMPLES:
    nwc info --uri "nostr+walletconnect://<pubkey>?relay=wss://relay.example&secret=<hex>"
    nwc invoice 21000 "coffee" --expiry 600
    nwc balance --json | jq .local_msat
    nwc listen --count 1
"#
    );
}

struct Session {
    pool: Arc<RelayConnectionPool>,
    wallet: WalletAdapter,
    cancel: CancellationToken,
}

async fn connect(opts: &ParsedArgs) -> Result<Session, String> {
    let uri = opts.uri.as_deref().ok_or("No connection string. Pass --uri or set NWC_URI.")?;

    let mut config = AdapterConfig::from_env()?;
    if let Some(raw) = opts.network.as_deref() {
        config.network = Network::from_name(raw).ok_or_else(|| format!("Unknown network: {}", raw))?;
    }
    let pool = Arc::new(RelayConnectionPool::new(Arc::new(WebSocketFactory), PoolConfig::from_env()?));
    pool.start();

    let cancel = install_signal_handlers();
    let wallet = WalletAdapter::connect(uri, pool.clone(), Arc::new(LightningInvoiceParser), config, &cancel)
        .await
        .map_err(|e| e.to_string())?;
    debug!(wallet = %wallet.params().wallet_pubkey, "session ready");
    Ok(Session { pool, wallet, cancel })
}

async fn run(command: &str, opts: &ParsedArgs) -> Result<Value, String> {
    if !matches!(
        command,
        "info" | "balance" | "invoice" | "lookup" | "invoices" | "payments" | "pay" | "listen"
    ) {
        return Err(format!("Unknown command: {}", command));
    }

    let session = connect(opts).await?;
    let result = match command {
        "info" => cmd_info(&session),
        "balance" => cmd_balance(&session).await,
        "invoice" => cmd_invoice(&session, opts).await,
        "lookup" => cmd_lookup(&session, opts).await,
        "invoices" => cmd_invoices(&session, opts).await,
        "payments" => cmd_payments(&session, opts).await,
        "pay" => cmd_pay(&session, opts).await,
        _ => cmd_listen(&session, opts).await,
    };

    session.wallet.close();
    session.pool.stop().await;
    result
}

fn cmd_info(s: &Session) -> Result<Value, String> {
    let caps = s.wallet.capabilities();
    let mut info = to_json(&s.wallet.remote_info())?;
    info["methods"] = json!(caps.methods);
    info["notifications"] = json!(caps.notifications);
    info["encryption"] = json!(caps.encryption.as_tag());
    info["listener"] = json!(format!("{:?}", s.wallet.listener_mode()).to_lowercase());
    info["relays"] = json!(s.wallet.params().relays.iter().map(|r| r.as_str()).collect::<Vec<_>>());
    Ok(info)
}

async fn cmd_balance(s: &Session) -> Result<Value, String> {
    let balance = s.wallet.get_balance(&s.cancel).await.map_err(|e| e.to_string())?;
    to_json(&balance)
}

async fn cmd_invoice(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let amount = opts
        .args
        .first()
        .and_then(|a| a.parse::<u64>().ok())
        .or(opts.amount_msat)
        .ok_or("Usage: nwc invoice <amount_msat> [memo]")?;

    let mut request = CreateInvoiceRequest::new(amount);
    if opts.args.len() > 1 {
        request = request.with_description(opts.args[1..].join(" "));
    }
    if let Some(secs) = opts.expiry_secs {
        request = request.with_expiry(Duration::from_secs(secs));
    }
    let invoice = s.wallet.create_invoice(request, &s.cancel).await.map_err(|e| e.to_string())?;
    to_json(&invoice)
}

async fn cmd_lookup(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let hash = opts.args.first().ok_or("Usage: nwc lookup <payment_hash>")?;
    if let Some(invoice) = s.wallet.get_invoice(hash, &s.cancel).await.map_err(|e| e.to_string())? {
        return Ok(json!({"invoice": invoice}));
    }
    match s.wallet.get_payment(hash, &s.cancel).await.map_err(|e| e.to_string())? {
        Some(payment) => Ok(json!({"payment": payment})),
        None => Err(format!("Nothing found for {}", hash)),
    }
}

async fn cmd_invoices(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let query = ListInvoicesQuery { pending_only: opts.pending, offset: opts.offset, limit: opts.limit };
    let invoices = s.wallet.list_invoices(query, &s.cancel).await.map_err(|e| e.to_string())?;
    Ok(json!({"invoices": invoices, "count": invoices.len()}))
}

async fn cmd_payments(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let query = ListPaymentsQuery { include_pending: !opts.settled, offset: opts.offset, limit: opts.limit };
    let payments = s.wallet.list_payments(query, &s.cancel).await.map_err(|e| e.to_string())?;
    Ok(json!({"payments": payments, "count": payments.len()}))
}

async fn cmd_pay(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let request = match (opts.args.first(), &opts.keysend, opts.amount_msat) {
        (Some(bolt11), _, amount) => {
            let request = PayRequest::invoice(bolt11.clone());
            match amount {
                Some(msat) => request.with_amount(msat),
                None => request,
            }
        }
        (None, Some(pubkey), Some(amount)) => PayRequest::keysend(pubkey.clone(), amount),
        _ => return Err("Usage: nwc pay <bolt11> | nwc pay --keysend <pubkey> --amount <msat>".into()),
    };
    let response = s.wallet.pay(request, &s.cancel).await.map_err(|e| e.to_string())?;
    to_json(&response)
}

async fn cmd_listen(s: &Session, opts: &ParsedArgs) -> Result<Value, String> {
    let mut listener = s.wallet.listen(&s.cancel).await.map_err(|e| e.to_string())?;
    info!(mode = ?listener.mode(), "waiting for payments (Ctrl+C to stop)");

    let mut received = 0usize;
    let outcome = loop {
        if opts.count.is_some_and(|n| received >= n) {
            break Ok(());
        }
        match listener.wait_invoice(&s.cancel).await {
            Ok(invoice) => {
                received += 1;
                println!("{}", render(&to_json(&invoice)?, false));
            }
            Err(e) if s.cancel.is_cancelled() => {
                debug!("listener interrupted: {}", e);
                break Ok(());
            }
            Err(e) => break Err(e.to_string()),
        }
    };
    listener.dispose().await;
    outcome.map(|_| Value::Null)
}
