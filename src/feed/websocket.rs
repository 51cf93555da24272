//! Live market-channel source.
//!
//! One connection per process feeds a shared quote cache. The ingestion task
//! is the only writer; engines read snapshots through [`super::PriceFeed`].
//!
//! Features:
//! - Automatic reconnection with exponential backoff
//! - Keep-alive pings and data-silence staleness detection
//! - Incremental subscription of new tokens without reconnecting

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::tick::TickSize;
use super::types::{lenient_decimal, PriceSnapshot, TokenQuote};
use crate::error::{FeedError, WsError};
use crate::metrics;

/// Price level from a `book` event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WsLevel {
    /// Price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    /// Size.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub size: Option<Decimal>,
}

/// Entry of a `price_change` event.
#[derive(Debug, Clone, Deserialize)]
pub struct WsPriceChange {
    /// Asset ID.
    pub asset_id: Option<String>,
    /// Best bid after the change.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid: Option<Decimal>,
    /// Best ask after the change.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask: Option<Decimal>,
}

/// Market-channel event.
#[derive(Debug, Clone, Deserialize)]
pub struct WsEvent {
    /// Event type.
    pub event_type: Option<String>,
    /// Asset ID (all events except `price_change`).
    pub asset_id: Option<String>,
    /// Bid levels (`book`).
    pub bids: Option<Vec<WsLevel>>,
    /// Ask levels (`book`).
    pub asks: Option<Vec<WsLevel>>,
    /// Per-asset changes (`price_change`).
    pub price_changes: Option<Vec<WsPriceChange>>,
    /// Trade price (`last_trade_price`).
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    /// New tick (`tick_size_change`).
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub new_tick_size: Option<Decimal>,
    /// Best bid (`best_bid_ask`).
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_bid: Option<Decimal>,
    /// Best ask (`best_bid_ask`).
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub best_ask: Option<Decimal>,
}

/// Initial subscription frame.
#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    assets_ids: &'a [String],
}

/// Incremental subscription frame.
#[derive(Debug, Serialize)]
struct AddAssetsMessage<'a> {
    operation: &'static str,
    assets_ids: &'a [String],
}

/// Reconnection configuration for WebSocket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Ping interval in seconds.
    pub ping_interval_s: u64,
    /// Data silence after which the feed is stale.
    pub stale_after: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            ping_interval_s: 10,
            stale_after: Duration::from_secs(15),
        }
    }
}

impl ReconnectConfig {
    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Live quote cache fed by the market WebSocket.
pub struct LiveFeed {
    /// Quote state per asset ID.
    quotes: DashMap<String, TokenQuote>,
    /// Market channel URL.
    ws_url: String,
    /// Reconnection and staleness settings.
    config: ReconnectConfig,
    /// Socket is open.
    connected: AtomicBool,
    /// First `book` arrived on the current connection.
    subscribed: AtomicBool,
    /// Last observed readiness, for transition logging.
    was_ready: AtomicBool,
    /// Reconnection attempt counter.
    reconnect_attempts: AtomicU64,
    /// Time of the last data event.
    last_data: RwLock<Option<Instant>>,
    /// Every asset requested so far; replayed on reconnect.
    assets: Mutex<Vec<String>>,
    /// New assets for the running connection.
    sub_tx: mpsc::UnboundedSender<Vec<String>>,
    sub_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<String>>>>,
}

impl LiveFeed {
    /// Create a live feed for `ws_url` (base URL; `/ws/market` is appended).
    pub fn new(ws_url: impl Into<String>, config: ReconnectConfig) -> Self {
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();
        Self {
            quotes: DashMap::new(),
            ws_url: ws_url.into(),
            config,
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            was_ready: AtomicBool::new(false),
            reconnect_attempts: AtomicU64::new(0),
            last_data: RwLock::new(None),
            assets: Mutex::new(Vec::new()),
            sub_tx,
            sub_rx: Mutex::new(Some(sub_rx)),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get reconnection attempt count.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Time since the last data event, if any arrived.
    pub fn silence(&self) -> Option<Duration> {
        self.last_data
            .read()
            .ok()
            .and_then(|t| *t)
            .map(|last| last.elapsed())
    }

    /// Err(Stale) when the connection has gone quiet for too long.
    pub fn check_fresh(&self) -> Result<(), FeedError> {
        match self.silence() {
            Some(silent) if silent > self.config.stale_after => Err(FeedError::Stale {
                silent_ms: silent.as_millis() as u64,
            }),
            _ => Ok(()),
        }
    }

    /// Connected, subscribed, and not stale.
    pub fn ready(&self) -> bool {
        let ready = self.is_connected()
            && self.subscribed.load(Ordering::SeqCst)
            && self.check_fresh().is_ok();

        let before = self.was_ready.swap(ready, Ordering::SeqCst);
        if before && !ready {
            if let Err(e) = self.check_fresh() {
                warn!(error = %e, "Live feed stale, reads fall back to REST");
                metrics::inc_feed_stale();
            } else {
                warn!("Live feed not ready, reads fall back to REST");
            }
        } else if !before && ready {
            info!("Live feed ready");
        }
        ready
    }

    /// Ready, and every listed token has a live quote.
    pub fn ready_for(&self, token_ids: &[String]) -> bool {
        self.ready() && token_ids.iter().all(|id| self.snapshot(id).is_some())
    }

    /// Snapshot for a token from the live cache.
    pub fn snapshot(&self, token_id: &str) -> Option<PriceSnapshot> {
        self.quotes.get(token_id).and_then(|q| q.snapshot(token_id))
    }

    /// Declared tick size for a token, if the venue has reported one.
    pub fn declared_tick(&self, token_id: &str) -> Option<TickSize> {
        self.quotes.get(token_id).and_then(|q| q.tick_size)
    }

    /// Request updates for additional tokens. Already-known tokens are ignored.
    pub fn subscribe(&self, token_ids: &[String]) {
        let fresh: Vec<String> = match self.assets.lock() {
            Ok(mut assets) => {
                let fresh: Vec<String> = token_ids
                    .iter()
                    .filter(|id| !assets.contains(id))
                    .cloned()
                    .collect();
                assets.extend(fresh.iter().cloned());
                fresh
            }
            Err(e) => {
                error!(error = %e, "Asset list poisoned");
                return;
            }
        };

        if fresh.is_empty() {
            return;
        }
        debug!(count = fresh.len(), "Queueing subscription");
        if self.sub_tx.send(fresh).is_err() {
            debug!("Live feed task not running; tokens will subscribe on connect");
        }
    }

    fn all_assets(&self) -> Vec<String> {
        self.assets.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Spawn the connection loop. Runs until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut sub_rx = match self.sub_rx.lock().ok().and_then(|mut rx| rx.take()) {
            Some(rx) => rx,
            None => {
                error!("Live feed already running");
                return;
            }
        };

        let mut attempt = 0u32;

        loop {
            info!(attempt = attempt, "Attempting WebSocket connection");

            match self.connect_once(&mut sub_rx, &mut shutdown, &mut attempt).await {
                Ok(()) => {
                    info!("Live feed stopped");
                    return;
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    self.subscribed.store(false, Ordering::SeqCst);
                    error!(error = %e, attempt = attempt, "WebSocket connection lost");
                }
            }

            let delay = self.config.next_delay(attempt);
            self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
            metrics::inc_ws_reconnects();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// One connection lifetime. Ok means shutdown was requested.
    async fn connect_once(
        &self,
        sub_rx: &mut mpsc::UnboundedReceiver<Vec<String>>,
        shutdown: &mut watch::Receiver<bool>,
        attempt: &mut u32,
    ) -> Result<(), WsError> {
        let url = format!("{}/ws/market", self.ws_url.trim_end_matches('/'));
        info!(url = %url, "Connecting to market channel");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        *attempt = 0;

        let (mut write, mut read) = ws_stream.split();

        // Queued increments are covered by the full list sent below.
        while sub_rx.try_recv().is_ok() {}

        let assets = self.all_assets();
        let mut initial_sent = false;
        if !assets.is_empty() {
            write.send(Message::Text(subscribe_frame(&assets)?)).await?;
            initial_sent = true;
            info!(count = assets.len(), "Subscribed to assets");
        }

        let mut ping = tokio::time::interval(Duration::from_secs(self.config.ping_interval_s.max(1)));
        ping.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::inc_ws_messages_received();
                        self.ingest(&text);
                        metrics::record_ws_message_latency(start);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(WsError::ConnectionClosed(format!("{:?}", frame)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(WsError::ConnectionClosed("stream ended".to_string())),
                },
                Some(ids) = sub_rx.recv() => {
                    let frame = if initial_sent {
                        add_assets_frame(&ids)?
                    } else {
                        initial_sent = true;
                        subscribe_frame(&ids)?
                    };
                    write.send(Message::Text(frame)).await?;
                    info!(count = ids.len(), "Subscribed to additional assets");
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }
    }

    /// Apply one text frame to the cache. Returns the number of events applied.
    ///
    /// Frames may carry a single event object or an array of them.
    pub fn ingest(&self, text: &str) -> usize {
        let events: Vec<WsEvent> = if text.trim_start().starts_with('[') {
            match serde_json::from_str(text) {
                Ok(events) => events,
                Err(e) => {
                    debug!(error = %e, "Unparseable frame");
                    return 0;
                }
            }
        } else {
            match serde_json::from_str(text) {
                Ok(event) => vec![event],
                Err(e) => {
                    debug!(error = %e, "Unparseable frame");
                    return 0;
                }
            }
        };

        let now = Instant::now();
        let applied = events.iter().filter(|e| self.apply_event(e, now)).count();

        if applied > 0 {
            if let Ok(mut last) = self.last_data.write() {
                *last = Some(now);
            }
        }
        applied
    }

    fn apply_event(&self, event: &WsEvent, now: Instant) -> bool {
        let Some(event_type) = event.event_type.as_deref() else {
            return false;
        };

        match event_type {
            "book" => {
                let Some(asset_id) = &event.asset_id else { return false };
                let best_bid = event
                    .bids
                    .iter()
                    .flatten()
                    .filter(|l| l.size.is_some_and(|s| s > Decimal::ZERO))
                    .filter_map(|l| l.price)
                    .max();
                let best_ask = event
                    .asks
                    .iter()
                    .flatten()
                    .filter(|l| l.size.is_some_and(|s| s > Decimal::ZERO))
                    .filter_map(|l| l.price)
                    .min();
                let mut quote = self.quotes.entry(asset_id.clone()).or_default();
                quote.best_bid = best_bid;
                quote.best_ask = best_ask;
                quote.updated_at = Some(now);
                drop(quote);
                if !self.subscribed.swap(true, Ordering::SeqCst) {
                    info!(asset_id = %asset_id, "First book received");
                }
                true
            }
            "price_change" => {
                let mut applied = false;
                for change in event.price_changes.iter().flatten() {
                    let Some(asset_id) = &change.asset_id else { continue };
                    let mut quote = self.quotes.entry(asset_id.clone()).or_default();
                    if change.best_bid.is_some() {
                        quote.best_bid = change.best_bid;
                    }
                    if change.best_ask.is_some() {
                        quote.best_ask = change.best_ask;
                    }
                    quote.updated_at = Some(now);
                    applied = true;
                }
                applied
            }
            "last_trade_price" => {
                let (Some(asset_id), Some(price)) = (&event.asset_id, event.price) else {
                    return false;
                };
                let mut quote = self.quotes.entry(asset_id.clone()).or_default();
                quote.last_trade = Some(price);
                quote.updated_at = Some(now);
                true
            }
            "tick_size_change" => {
                let (Some(asset_id), Some(raw)) = (&event.asset_id, event.new_tick_size) else {
                    return false;
                };
                let Some(tick) = TickSize::from_decimal(raw) else {
                    warn!(asset_id = %asset_id, tick = %raw, "Unknown tick size");
                    return false;
                };
                let mut quote = self.quotes.entry(asset_id.clone()).or_default();
                if quote.tick_size != Some(tick) {
                    info!(asset_id = %asset_id, tick = %tick, "Tick size changed");
                }
                quote.tick_size = Some(tick);
                quote.updated_at = Some(now);
                true
            }
            "best_bid_ask" => {
                let Some(asset_id) = &event.asset_id else { return false };
                let mut quote = self.quotes.entry(asset_id.clone()).or_default();
                if event.best_bid.is_some() {
                    quote.best_bid = event.best_bid;
                }
                if event.best_ask.is_some() {
                    quote.best_ask = event.best_ask;
                }
                quote.updated_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Mark the socket state directly. Used by tests that drive `ingest`.
    #[doc(hidden)]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            self.subscribed.store(false, Ordering::SeqCst);
        }
    }
}

fn subscribe_frame(assets: &[String]) -> Result<String, WsError> {
    serde_json::to_string(&SubscribeMessage {
        msg_type: "market",
        assets_ids: assets,
    })
    .map_err(|e| WsError::SendFailed(e.to_string()))
}

fn add_assets_frame(assets: &[String]) -> Result<String, WsError> {
    serde_json::to_string(&AddAssetsMessage {
        operation: "subscribe",
        assets_ids: assets,
    })
    .map_err(|e| WsError::SendFailed(e.to_string()))
}
