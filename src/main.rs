//! Cross-venue arbitrage engine entry point.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cross_arb::config::Config;
use cross_arb::market::TradingPair;
use cross_arb::metrics;
use cross_arb::utils::shutdown_signal;
use cross_arb::Engine;

/// Cross-venue order-book/OTC arbitrage engine.
#[derive(Parser, Debug)]
#[command(name = "cross-arb")]
#[command(about = "Arbitrage between a primary exchange order book and an OTC counterparty")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine (default).
    Run {
        /// Pairs to start instead of WATCH_PAIRS, as BASE-QUOTE.
        #[arg(long, value_delimiter = ',')]
        pairs: Vec<TradingPair>,

        /// Disable the primary venue; orders are registered but not sent.
        #[arg(long)]
        no_primary: bool,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("cross_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let registry = tracing_subscriber::registry().with(filter);
    if args.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Run { pairs, no_primary }) => cmd_run(pairs, no_primary).await,
        None => cmd_run(Vec::new(), false).await,
    }
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CROSS-VENUE ARB ENGINE - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed"));
    }
    println!("OK");

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Client ID: {}", config.client_id);
    println!("  Primary brokers: {}", config.primary_broker_ids.len());
    println!("  Secondary routing: {}", config.secondary_routing_id);
    for pair in &config.watch_pairs {
        println!("  Pair: {}", pair);
    }
    println!("  Profit threshold: {}", config.profit_threshold());
    println!("  Order lifetime: {}ms (+{}ms grace)", config.order_lifetime_ms, config.expiry_grace_ms);
    println!(
        "  Fishing: {}",
        if config.fishing_enabled { "Enabled" } else { "Disabled" }
    );
    println!(
        "  Venues: primary {}, secondary {}",
        if config.enable_primary { "on" } else { "off" },
        if config.enable_secondary { "on" } else { "off" }
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run the engine until Ctrl+C or SIGTERM.
async fn cmd_run(pairs: Vec<TradingPair>, no_primary: bool) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if !pairs.is_empty() {
        config.watch_pairs = pairs;
    }
    if no_primary {
        config.enable_primary = false;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!(
        threshold = %config.profit_threshold(),
        pairs = config.watch_pairs.len(),
        primary = config.enable_primary,
        secondary = config.enable_secondary,
        "Configuration loaded"
    );

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Metrics exporter listening on {}", addr);
    }

    let pairs = config.watch_pairs.clone();
    let engine = Engine::connect(config)?;
    for pair in pairs {
        engine.start(pair)?;
    }

    shutdown_signal().await;

    let cancelled = engine.stop().await;
    if cancelled > 0 {
        warn!(cancelled, "Open primary orders were cancelled on shutdown");
    }
    info!("Shutdown complete");
    Ok(())
}
