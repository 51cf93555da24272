//! Per-market window loop and engine supervision.
//!
//! Each selected market runs on its own task: discover the active window,
//! subscribe its tokens on the shared feed, drive a fresh engine at the poll
//! interval until the window closes, clean up, repeat. A supervisor restarts
//! a market task that panics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{ConfigError, FeedError, MarketError};
use crate::feed::{PriceFeed, PriceSnapshot, TickSize, TickTracker};
use crate::market::{discover_active_market, Asset, Interval, Market};
use crate::metrics;
use crate::strategy::{MarketTick, StrategyKind, StrategySettings, WindowSummary};
use crate::trading::OrderGateway;
use crate::utils::wait_for_shutdown;

/// Delay between discovery attempts when no window is open.
pub const DISCOVERY_RETRY: Duration = Duration::from_secs(15);

/// Where market windows come from.
#[async_trait]
pub trait WindowSource: Send + Sync {
    /// The window currently open (or about to open) for an asset.
    async fn active_window(&self, asset: Asset, interval: Interval) -> Result<Market, MarketError>;
}

/// Window discovery over the Gamma API.
pub struct GammaWindows {
    http: reqwest::Client,
    gamma_url: String,
}

impl GammaWindows {
    pub fn new(http: reqwest::Client, gamma_url: impl Into<String>) -> Self {
        Self {
            http,
            gamma_url: gamma_url.into(),
        }
    }
}

#[async_trait]
impl WindowSource for GammaWindows {
    async fn active_window(&self, asset: Asset, interval: Interval) -> Result<Market, MarketError> {
        discover_active_market(&self.http, &self.gamma_url, asset, interval).await
    }
}

/// Operator-visible state of one market engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Market key, e.g. "btc-15m".
    pub market: String,
    pub strategy: StrategyKind,
    /// Engine state label, or the scheduler phase between windows.
    pub state: String,
    /// Slug of the window being traded.
    pub window_slug: Option<String>,
    /// Unix timestamp the window closes.
    pub window_end: Option<i64>,
    /// Ticks processed in the current window.
    pub ticks: u64,
    pub up_price: Option<Decimal>,
    pub down_price: Option<Decimal>,
    /// Whether the last tick was served by the live feed.
    pub feed_ready: bool,
    /// Times the engine task was restarted after a crash.
    pub restarts: u32,
    /// Result of the last completed window.
    pub last_summary: Option<WindowSummary>,
}

impl EngineStatus {
    fn new(market: String, strategy: StrategyKind) -> Self {
        Self {
            market,
            strategy,
            state: "starting".to_string(),
            window_slug: None,
            window_end: None,
            ticks: 0,
            up_price: None,
            down_price: None,
            feed_ready: false,
            restarts: 0,
            last_summary: None,
        }
    }
}

/// Engine statuses shared with the HTTP API.
#[derive(Debug, Default)]
pub struct StatusBoard {
    engines: DashMap<String, EngineStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market engine.
    pub fn register(&self, market: &str, strategy: StrategyKind) {
        self.engines
            .entry(market.to_string())
            .or_insert_with(|| EngineStatus::new(market.to_string(), strategy));
    }

    /// Apply a change to one market's status. Unknown markets are ignored.
    pub fn update(&self, market: &str, f: impl FnOnce(&mut EngineStatus)) {
        if let Some(mut status) = self.engines.get_mut(market) {
            f(&mut status);
        }
    }

    /// Status of one market.
    pub fn get(&self, market: &str) -> Option<EngineStatus> {
        self.engines.get(market).map(|s| s.clone())
    }

    /// All statuses, sorted by market key.
    pub fn snapshot(&self) -> Vec<EngineStatus> {
        let mut all: Vec<EngineStatus> = self.engines.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.market.cmp(&b.market));
        all
    }
}

/// Timing shared by every market task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Interval,
    /// How long to wait for the live feed before trading on the fallback.
    pub ready_timeout: Duration,
    pub discovery_retry: Duration,
    /// Delay before restarting a crashed market task.
    pub restart_delay: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: config.interval()?,
            ready_timeout: Duration::from_secs(config.wss_ready_timeout),
            discovery_retry: DISCOVERY_RETRY,
            restart_delay: Duration::from_secs(config.engine_restart_delay_s),
        })
    }
}

/// One market to trade.
#[derive(Debug, Clone)]
pub struct MarketJob {
    pub asset: Asset,
    pub settings: StrategySettings,
    pub poll_interval: Duration,
}

impl MarketJob {
    /// Status key, e.g. "btc-15m".
    pub fn key(&self, interval: Interval) -> String {
        format!("{}-{}", self.asset, interval)
    }
}

/// Runs one engine per market.
pub struct Scheduler {
    settings: SchedulerSettings,
    feed: PriceFeed,
    gateway: Arc<OrderGateway>,
    windows: Arc<dyn WindowSource>,
    board: Arc<StatusBoard>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        feed: PriceFeed,
        gateway: Arc<OrderGateway>,
        windows: Arc<dyn WindowSource>,
        board: Arc<StatusBoard>,
    ) -> Self {
        Self {
            settings,
            feed,
            gateway,
            windows,
            board,
        }
    }

    /// Shared status board.
    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Run every market until shutdown.
    pub async fn run(self: Arc<Self>, jobs: Vec<MarketJob>, shutdown: watch::Receiver<bool>) {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                self.board
                    .register(&job.key(self.settings.interval), job.settings.kind());
                let this = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { this.supervise(Arc::new(job), shutdown).await })
            })
            .collect();

        info!(markets = handles.len(), "Scheduler started");

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Market supervisor failed");
            }
        }

        info!("Scheduler stopped");
    }

    /// Restart the market task whenever it panics.
    async fn supervise(self: Arc<Self>, job: Arc<MarketJob>, mut shutdown: watch::Receiver<bool>) {
        let key = job.key(self.settings.interval);
        let mut skip_slug: Option<String> = None;

        loop {
            let this = self.clone();
            let task_job = job.clone();
            let task_shutdown = shutdown.clone();
            let skip = skip_slug.take();
            let handle =
                tokio::spawn(async move { this.run_market(&task_job, task_shutdown, skip).await });

            match handle.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    // The crashed window may hold positions this engine no
                    // longer knows about; never trade it again.
                    skip_slug = self.board.get(&key).and_then(|s| s.window_slug);
                    error!(
                        market = %key,
                        window = ?skip_slug,
                        delay_s = self.settings.restart_delay.as_secs(),
                        "Market engine crashed, restarting"
                    );
                    metrics::inc_engine_restarts(&key);
                    self.board.update(&key, |s| {
                        s.restarts += 1;
                        s.state = "restarting".to_string();
                    });
                }
                Err(e) => {
                    warn!(market = %key, error = %e, "Market task cancelled");
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.restart_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return,
            }
        }
    }

    /// Trade consecutive windows for one market until shutdown.
    async fn run_market(
        &self,
        job: &MarketJob,
        mut shutdown: watch::Receiver<bool>,
        mut last_slug: Option<String>,
    ) {
        loop {
            let Some(market) = self.next_window(job, &mut shutdown, last_slug.as_deref()).await else {
                return;
            };
            self.run_window(job, &market, &mut shutdown).await;
            last_slug = Some(market.slug);

            if *shutdown.borrow() {
                return;
            }
        }
    }

    /// Discover the next untraded window, retrying until one opens.
    #[instrument(skip(self, job, shutdown), fields(asset = %job.asset))]
    async fn next_window(
        &self,
        job: &MarketJob,
        shutdown: &mut watch::Receiver<bool>,
        last_slug: Option<&str>,
    ) -> Option<Market> {
        let key = job.key(self.settings.interval);

        loop {
            if *shutdown.borrow() {
                return None;
            }

            match self.windows.active_window(job.asset, self.settings.interval).await {
                Ok(market) if Some(market.slug.as_str()) == last_slug => {
                    debug!(market = %key, slug = %market.slug, "Window already traded, waiting for the next");
                }
                Ok(market) if market.is_closed() => {
                    debug!(market = %key, slug = %market.slug, "Window already closed");
                }
                Ok(market) => return Some(market),
                Err(e) => {
                    warn!(
                        market = %key,
                        error = %e,
                        retry_s = self.settings.discovery_retry.as_secs(),
                        "No active window"
                    );
                }
            }

            self.board.update(&key, |s| {
                s.state = "discovering".to_string();
                s.window_slug = None;
                s.window_end = None;
            });

            tokio::select! {
                _ = tokio::time::sleep(self.settings.discovery_retry) => {}
                _ = wait_for_shutdown(shutdown) => return None,
            }
        }
    }

    /// Drive one engine through one window, then cancel what it left resting.
    async fn run_window(&self, job: &MarketJob, market: &Market, shutdown: &mut watch::Receiver<bool>) {
        let key = job.key(self.settings.interval);
        info!(
            market = %key,
            window = %market.slug,
            strategy = %job.settings.kind(),
            remaining = %market.time_remaining_str(),
            "Window opened"
        );

        let tokens = market.token_ids();
        self.feed.live().subscribe(&tokens);
        let live = tokio::select! {
            ready = self.feed.wait_ready(&tokens, self.settings.ready_timeout) => ready,
            _ = wait_for_shutdown(shutdown) => return,
        };

        let mut engine = job.settings.build(market);
        let mut up_tick = TickTracker::new(market.up_token_id.clone(), TickSize::default());
        let mut down_tick = TickTracker::new(market.down_token_id.clone(), TickSize::default());

        let label = engine.state_label();
        self.board.update(&key, |s| {
            s.state = label;
            s.window_slug = Some(market.slug.clone());
            s.window_end = Some(market.end_timestamp);
            s.ticks = 0;
            s.up_price = None;
            s.down_price = None;
            s.feed_ready = live;
        });

        let mut ticker = tokio::time::interval(job.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq = 0u64;
        let mut idle_logged = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(shutdown) => {
                    info!(market = %key, window = %market.slug, "Shutdown requested, closing window");
                    break;
                }
            }

            if market.is_closed() {
                info!(market = %key, window = %market.slug, "Window closed");
                break;
            }

            if engine.is_finished() {
                if !idle_logged {
                    info!(market = %key, state = %engine.state_label(), "Engine done for this window");
                    idle_logged = true;
                }
                continue;
            }

            match self.sample(market, &mut up_tick, &mut down_tick, seq + 1).await {
                Ok(tick) => {
                    seq = tick.seq;
                    engine.on_tick(&tick, &self.gateway).await;

                    let label = engine.state_label();
                    let feed_ready = self.feed.ready_for(&tokens);
                    self.board.update(&key, |s| {
                        s.state = label;
                        s.ticks = seq;
                        s.up_price = Some(tick.up.price);
                        s.down_price = Some(tick.down.price);
                        s.feed_ready = feed_ready;
                    });
                }
                Err(e) => {
                    warn!(market = %key, error = %e, "No price this tick, not trading");
                }
            }
        }

        engine.on_window_end(&self.gateway, shutdown).await;

        let summary = engine.summary();
        info!(market = %key, window = %market.slug, ticks = seq, summary = ?summary, "Window complete");
        metrics::inc_windows_completed(&key);

        let label = engine.state_label();
        self.board.update(&key, |s| {
            s.state = label;
            s.last_summary = Some(summary);
        });
    }

    /// Read both sides and pin each to its tracked tick size.
    async fn sample(
        &self,
        market: &Market,
        up_tick: &mut TickTracker,
        down_tick: &mut TickTracker,
        seq: u64,
    ) -> Result<MarketTick, FeedError> {
        let (up, down) = tokio::join!(
            self.feed.current(&market.up_token_id),
            self.feed.current(&market.down_token_id)
        );
        Ok(MarketTick {
            up: track_tick(up?, up_tick),
            down: track_tick(down?, down_tick),
            seq,
        })
    }
}

/// Declared tick sizes win; otherwise the tracker follows boundary crossings.
fn track_tick(mut snapshot: PriceSnapshot, tracker: &mut TickTracker) -> PriceSnapshot {
    if snapshot.tick_declared {
        tracker.declare(snapshot.tick_size);
    } else {
        tracker.observe(snapshot.price);
    }
    snapshot.tick_size = tracker.current();
    snapshot
}
