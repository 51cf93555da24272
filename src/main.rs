//! Polymarket up/down window bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_updown::api::{create_router, AppState};
use polymarket_updown::config::Config;
use polymarket_updown::feed::{LiveFeed, PriceFeed};
use polymarket_updown::market::{discover_active_market, http_client, Asset, Interval, PolymarketClient};
use polymarket_updown::metrics;
use polymarket_updown::scheduler::{GammaWindows, MarketJob, Scheduler, SchedulerSettings, StatusBoard};
use polymarket_updown::signing::address_from_private_key;
use polymarket_updown::strategy::StrategySettings;
use polymarket_updown::trading::OrderGateway;
use polymarket_updown::utils::{shutdown_channel, shutdown_signal, wait_for_shutdown};

/// How long shutdown waits for window cleanup before exiting anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

/// Polymarket up/down window bot.
#[derive(Parser, Debug)]
#[command(name = "polymarket-updown")]
#[command(about = "DCA snipe and YES+NO capture bots for Polymarket up/down crypto windows")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading engines (default).
    Run(RunArgs),

    /// Check configuration validity.
    CheckConfig,

    /// Discover the active window for one asset.
    DiscoverMarket {
        /// Asset symbol (btc, eth, sol, xrp).
        #[arg(long, default_value = "btc")]
        asset: String,

        /// Window length (5m, 15m, 1h).
        #[arg(long, default_value = "15m")]
        interval: String,
    },

    /// Print live prices for one window (diagnostic).
    WsTest {
        /// Asset symbol (btc, eth, sol, xrp).
        #[arg(long, default_value = "btc")]
        asset: String,

        /// Window length (5m, 15m, 1h).
        #[arg(long, default_value = "15m")]
        interval: String,

        /// Seconds to listen.
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

/// Overrides for the `run` subcommand. Unset flags keep the environment value.
#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Strategy: dca or yesno.
    #[arg(long)]
    strategy: Option<String>,

    /// Comma-separated assets, or "all".
    #[arg(long)]
    markets: Option<String>,

    /// Window length (5m, 15m, 1h).
    #[arg(long)]
    interval: Option<String>,

    /// HTTP server port for health/status/metrics.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration before logging so .env can set the log level
    let config = Config::load();

    // Initialize logging
    let verbose = args.verbose || config.as_ref().is_ok_and(|c| c.verbose);
    let filter = if verbose {
        EnvFilter::new("polymarket_updown=debug,info")
    } else {
        let level = config.as_ref().map(|c| c.rust_log.as_str()).unwrap_or("info");
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    // Handle subcommands
    match args.command {
        Some(Command::Run(run)) => cmd_run(config, run).await,
        Some(Command::CheckConfig) => cmd_check_config(config),
        Some(Command::DiscoverMarket { asset, interval }) => {
            cmd_discover_market(config, &asset, &interval).await
        }
        Some(Command::WsTest {
            asset,
            interval,
            seconds,
        }) => cmd_ws_test(config, &asset, &interval, seconds).await,
        None => cmd_run(config, RunArgs::default()).await,
    }
}

fn parse_window(asset: &str, interval: &str) -> anyhow::Result<(Asset, Interval)> {
    let asset: Asset = asset
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown asset '{}'", asset))?;
    let interval: Interval = interval
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown interval '{}'", interval))?;
    Ok((asset, interval))
}

/// Check configuration validity.
fn cmd_check_config(config: Result<Config, envy::Error>) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("POLYMARKET UP/DOWN BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match config {
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

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Resolve strategy parameters for every asset
    print!("Resolving strategy parameters... ");
    let assets = config.assets()?;
    let resolved = match StrategySettings::load_all(&config, &assets) {
        Ok(resolved) => {
            println!("OK");
            resolved
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Strategy parameters invalid"));
        }
    };

    // Check private key
    print!("Checking private key... ");
    match config
        .validate_credentials()
        .map_err(anyhow::Error::from)
        .and_then(|()| {
            address_from_private_key(&config.polymarket_private_key).map_err(anyhow::Error::from)
        })
    {
        Ok(addr) => {
            println!("OK");
            println!("  Wallet address: {}", addr);
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Credentials invalid"));
        }
    }

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Signature Type: {} ({})", config.polymarket_signature_type,
        match config.polymarket_signature_type {
            0 => "EOA - Standard wallet",
            1 => "Magic.link - Proxy wallet",
            2 => "Gnosis Safe - Multi-sig",
            _ => "Unknown",
        });
    println!("  Strategy: {}", config.strategy_kind()?);
    println!("  Interval: {}", config.interval()?);
    println!("  Buy Order Type: {}", config.buy_order_type()?);
    println!("  Sell Order Type: {}", config.sell_order_type);
    match config.gtc_timeout_seconds {
        Some(secs) => println!("  GTC Timeout: {}s", secs),
        None => println!("  GTC Timeout: none"),
    }
    println!("  FOK->GTC Fallback: {}", config.fok_gtc_fallback);
    for (asset, settings, poll) in &resolved {
        match settings {
            StrategySettings::Dca(s) => println!(
                "  {}: entry {} | bet ${} | TP {} | SL {:?} | step {:?} | poll {:?}",
                asset, s.entry_price, s.amount_per_bet, s.take_profit, s.stop_loss, s.bet_step, poll
            ),
            StrategySettings::YesNo(s) => println!(
                "  {}: range {}-{} | buy ${} | poll {:?}",
                asset, s.price_range.low, s.price_range.high, s.amount_to_buy, poll
            ),
        }
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Discover the active window for one asset.
async fn cmd_discover_market(
    config: Result<Config, envy::Error>,
    asset: &str,
    interval: &str,
) -> anyhow::Result<()> {
    let config = config?;
    let (asset, interval) = parse_window(asset, interval)?;

    println!("======================================================================");
    println!("POLYMARKET UP/DOWN BOT - MARKET DISCOVERY");
    println!("======================================================================");

    let http = http_client(config.http_timeout_ms)?;

    println!("\nSearching for active {} {} window...\n", asset, interval);

    match discover_active_market(&http, &config.polymarket_gamma_url, asset, interval).await {
        Ok(market) => {
            println!("MARKET FOUND");
            println!("----------------------------------------------------------------------");
            println!("  Slug: {}", market.slug);
            println!("  ID: {}", market.id);
            println!("  UP Token: {}", market.up_token_id);
            println!("  DOWN Token: {}", market.down_token_id);
            println!("  Time Remaining: {}", market.time_remaining_str());
            if let Some(q) = &market.question {
                println!("  Question: {}", q);
            }
            println!("======================================================================");
        }
        Err(e) => {
            println!("NO ACTIVE MARKET FOUND");
            println!("  Error: {}", e);
            println!("\nWindows open every {}. Try again shortly.", interval);
            println!("======================================================================");
        }
    }

    Ok(())
}

/// Print live snapshots for one window.
async fn cmd_ws_test(
    config: Result<Config, envy::Error>,
    asset: &str,
    interval: &str,
    seconds: u64,
) -> anyhow::Result<()> {
    let config = config?;
    let (asset, interval) = parse_window(asset, interval)?;

    println!("======================================================================");
    println!("POLYMARKET UP/DOWN BOT - WEBSOCKET TEST");
    println!("======================================================================");

    let http = http_client(config.http_timeout_ms)?;
    let market = discover_active_market(&http, &config.polymarket_gamma_url, asset, interval)
        .await
        .context("no active window to subscribe to")?;
    println!("Market: {} ({})", market.slug, market.time_remaining_str());

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let live = Arc::new(LiveFeed::new(config.polymarket_ws_url.clone(), config.reconnect_config()));
    live.subscribe(&market.token_ids());
    let handle = live.clone().spawn(shutdown_rx);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for second in 0..seconds {
        ticker.tick().await;
        let up = live.snapshot(&market.up_token_id);
        let down = live.snapshot(&market.down_token_id);
        println!(
            "[{:>3}s] ready={} UP={} DOWN={}",
            second,
            live.ready(),
            up.map(|s| format!("{} (tick {})", s.price, s.tick_size)).unwrap_or_else(|| "-".to_string()),
            down.map(|s| format!("{} (tick {})", s.price, s.tick_size)).unwrap_or_else(|| "-".to_string()),
        );
    }

    let _ = shutdown_tx.send(true);
    let _ = handle.await;

    println!("======================================================================");
    println!("Reconnect attempts: {}", live.reconnect_attempts());
    println!("WEBSOCKET TEST COMPLETED");
    println!("======================================================================");

    Ok(())
}

/// Run the trading engines until SIGINT/SIGTERM.
async fn cmd_run(config: Result<Config, envy::Error>, run: RunArgs) -> anyhow::Result<()> {
    // Load configuration
    info!("Loading configuration...");
    let mut config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Override with CLI args if provided
    if let Some(strategy) = run.strategy {
        config.strategy = strategy;
    }
    if let Some(markets) = run.markets {
        config.markets = markets;
    }
    if let Some(interval) = run.interval {
        config.interval = interval;
    }
    if let Some(port) = run.port {
        config.port = port;
    }

    // Validate configuration; anything inconsistent is fatal here
    if let Err(e) = config.validate().and_then(|()| config.validate_credentials()) {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    let assets = config.assets()?;
    let jobs: Vec<MarketJob> = StrategySettings::load_all(&config, &assets)
        .map_err(|e| {
            error!("Invalid strategy parameters: {}", e);
            e
        })?
        .into_iter()
        .map(|(asset, settings, poll_interval)| MarketJob {
            asset,
            settings,
            poll_interval,
        })
        .collect();
    let scheduler_settings = SchedulerSettings::from_config(&config)?;

    info!("Configuration loaded successfully");
    info!("Strategy: {}", config.strategy_kind()?);
    info!("Markets: {:?} ({})", assets, scheduler_settings.interval);
    info!("Buy order type: {} | sell order type: {}", config.buy_order_type()?, config.sell_order_type);

    // Initialize metrics
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    metrics::init_metrics();

    // Shared shutdown broadcast
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, cleaning up open windows");
        let _ = signal_tx.send(true);
    });

    // Shared price feed
    let client = Arc::new(PolymarketClient::new(&config)?);
    info!("Wallet: {}", client.get_address()?);
    let live = Arc::new(LiveFeed::new(config.polymarket_ws_url.clone(), config.reconnect_config()));
    let feed_handle = live.clone().spawn(shutdown_rx.clone());
    let feed = PriceFeed::new(live.clone(), client.clone());

    let gateway = Arc::new(OrderGateway::new(client.clone(), config.gateway_settings()));
    let windows = Arc::new(GammaWindows::new(client.http().clone(), config.polymarket_gamma_url.clone()));
    let board = Arc::new(StatusBoard::new());

    // Start HTTP server
    let app_state = AppState::new(live.clone(), board.clone()).with_metrics(prometheus);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state);
    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut server_shutdown).await })
            .await
    });

    // Engines
    let scheduler = Arc::new(Scheduler::new(scheduler_settings, feed, gateway, windows, board));
    let mut scheduler_handle = tokio::spawn(scheduler.run(jobs, shutdown_rx.clone()));

    let mut shutdown = shutdown_rx;
    tokio::select! {
        result = &mut scheduler_handle => {
            if let Err(e) = result {
                error!("Scheduler failed: {}", e);
            }
            let _ = shutdown_tx.send(true);
        }
        _ = wait_for_shutdown(&mut shutdown) => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut scheduler_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Scheduler failed during shutdown: {}", e),
                Err(_) => warn!(grace_s = SHUTDOWN_GRACE.as_secs(), "Window cleanup did not finish in time"),
            }
        }
    }

    if let Err(e) = feed_handle.await {
        warn!("Live feed task ended abnormally: {}", e);
    }
    match server_handle.await {
        Ok(Err(e)) => warn!("HTTP server error: {}", e),
        Err(e) => warn!("HTTP server task ended abnormally: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
