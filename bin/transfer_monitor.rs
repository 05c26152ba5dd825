//! # Transfer Monitor CLI
//!
//! Watches a token contract's Transfer stream and prints the reconciled feed
//! as it updates, with an optional periodic balance readout.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin transfer_monitor -- 0xTOKEN --either 0xADDRESS
//! ```
//!
//! Press Ctrl+C to stop gracefully.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ethers::types::Address;
use log::info;
use tokio::signal;

use transfer_monitor_sdk::{
    BalanceCache, ConnectionSupervisor, EthersTransport, EventFilter, EventReconciliationStore,
    MonitorConfig, Settings, TokenMetadataResolver,
};

#[derive(Parser, Debug)]
#[command(name = "transfer_monitor", about = "Live ERC20 transfer feed")]
struct Args {
    /// Token contract address to monitor
    token: String,

    /// Only show transfers sent by this address
    #[arg(long, conflicts_with_all = ["to", "either"])]
    from: Option<String>,

    /// Only show transfers received by this address
    #[arg(long, conflicts_with_all = ["from", "either"])]
    to: Option<String>,

    /// Show transfers where this address is either endpoint
    #[arg(long, conflicts_with_all = ["from", "to"])]
    either: Option<String>,

    /// Cap on retained events
    #[arg(long)]
    max_events: Option<usize>,

    /// Backfill window in blocks
    #[arg(long)]
    block_range: Option<u64>,

    /// Skip the historical backfill
    #[arg(long)]
    no_history: bool,

    /// Poll the connected account's balance of these tokens
    #[arg(long, value_delimiter = ',')]
    balances: Vec<String>,
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw).with_context(|| format!("invalid address: {}", raw))
}

fn build_filter(args: &Args) -> Result<EventFilter> {
    Ok(match (&args.from, &args.to, &args.either) {
        (Some(a), _, _) => EventFilter::From(parse_address(a)?),
        (_, Some(a), _) => EventFilter::To(parse_address(a)?),
        (_, _, Some(a)) => EventFilter::Either(parse_address(a)?),
        _ => EventFilter::All,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::new().unwrap_or_default();
    let contract = parse_address(&args.token)?;
    let filter = build_filter(&args)?;

    let mut config = MonitorConfig::from_settings(contract, filter, &settings);
    if let Some(max) = args.max_events {
        config.max_events = max;
    }
    if let Some(range) = args.block_range {
        config.historical_block_range = range;
    }
    if args.no_history {
        config.include_historical_events = false;
    }

    let transport = Arc::new(EthersTransport::connect(&settings.network.rpc_url).await?);
    let supervisor = ConnectionSupervisor::new(transport.clone(), &settings.network);
    let resolver = Arc::new(TokenMetadataResolver::new(supervisor.transport()));

    let connection = supervisor.connect().await?;
    if connection.wrong_network {
        log::warn!(
            "Connected to chain {:?}, expected {}",
            connection.chain_id,
            settings.network.expected_chain_id
        );
    }

    let store = EventReconciliationStore::new(supervisor.transport(), resolver.clone(), config);
    store.bind_supervisor(&supervisor);

    let balance_tokens: Vec<Address> = args
        .balances
        .iter()
        .map(|raw| parse_address(raw))
        .collect::<Result<_>>()?;
    let balance_cache = BalanceCache::new(supervisor.transport(), resolver, &supervisor);
    balance_cache.bind_supervisor(&supervisor);
    if !balance_tokens.is_empty() && settings.balances.auto_refresh {
        balance_cache.start_auto_refresh(
            balance_tokens,
            Duration::from_secs(settings.balances.refresh_interval_seconds),
        );
    }

    let mut changes = store.subscribe_changes();
    store.start_listening().await;

    info!("Monitoring {:?}; Ctrl+C to stop", contract);
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                if let Some(err) = &snapshot.last_error {
                    log::warn!("feed error: {}", err);
                }
                println!(
                    "-- {} events (listening: {}, connected: {}) --",
                    snapshot.events.len(),
                    snapshot.is_listening,
                    snapshot.connected
                );
                for event in snapshot.events.iter().take(10) {
                    println!(
                        "  block {:>9}  {} {}  {:?} -> {:?}  ({:?}#{})",
                        event.block_number,
                        event.formatted_amount,
                        event.token_symbol,
                        event.from,
                        event.to,
                        event.transaction_hash,
                        event.id.log_index
                    );
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    store.shutdown().await;
    balance_cache.stop_auto_refresh();
    supervisor.disconnect();
    Ok(())
}
