//! Dual-source price feed.
//!
//! This module handles:
//! - Live quote cache fed by the market WebSocket
//! - REST fallback reads while the live source is not ready
//! - Tick-size detection and price derivation

pub mod tick;
pub mod types;
pub mod websocket;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::metrics;

pub use tick::{TickSize, TickTracker};
pub use types::{PriceSnapshot, PriceSource, TokenQuote};
pub use websocket::{LiveFeed, ReconnectConfig};

/// Pull-based price source used while the live feed is not ready.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    /// Current midpoint for a token.
    async fn midpoint(&self, token_id: &str) -> Result<Decimal, FeedError>;

    /// Venue-reported tick size, if the venue answers.
    async fn tick_size(&self, token_id: &str) -> Result<Option<TickSize>, FeedError>;
}

/// Single read API over the live and fallback sources.
#[derive(Clone)]
pub struct PriceFeed {
    live: Arc<LiveFeed>,
    fallback: Arc<dyn FallbackSource>,
}

impl PriceFeed {
    /// Combine a live feed with a fallback source.
    pub fn new(live: Arc<LiveFeed>, fallback: Arc<dyn FallbackSource>) -> Self {
        Self { live, fallback }
    }

    /// Shared live feed.
    pub fn live(&self) -> &Arc<LiveFeed> {
        &self.live
    }

    /// Whether reads are currently served from the live cache.
    pub fn ready(&self) -> bool {
        self.live.ready()
    }

    /// Whether every listed token is served from the live cache.
    pub fn ready_for(&self, token_ids: &[String]) -> bool {
        self.live.ready_for(token_ids)
    }

    /// Current price for a token.
    ///
    /// Served from the live cache while it is ready. Otherwise the fallback is
    /// queried, and a live update that landed during the round-trip wins over
    /// the fallback answer.
    pub async fn current(&self, token_id: &str) -> Result<PriceSnapshot, FeedError> {
        if self.live.ready() {
            if let Some(snapshot) = self.live.snapshot(token_id) {
                return Ok(snapshot);
            }
        }

        let started = Instant::now();
        metrics::inc_fallback_reads();

        let midpoint = self.fallback.midpoint(token_id).await;

        if let Some(snapshot) = self.live.snapshot(token_id) {
            if snapshot.as_of >= started {
                debug!(token_id = %token_id, "Live update arrived during fallback read");
                return Ok(snapshot);
            }
        }

        let price = midpoint.map_err(|e| {
            warn!(token_id = %token_id, error = %e, "Fallback read failed");
            FeedError::Unavailable {
                token_id: token_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        let reported = match self.live.declared_tick(token_id) {
            Some(tick) => Some(tick),
            None => match self.fallback.tick_size(token_id).await {
                Ok(tick) => tick,
                Err(e) => {
                    debug!(token_id = %token_id, error = %e, "Tick size read failed, inferring");
                    None
                }
            },
        };

        Ok(PriceSnapshot {
            token_id: token_id.to_string(),
            price,
            tick_size: reported.unwrap_or_else(|| TickSize::for_price(price)),
            tick_declared: reported.is_some(),
            as_of: started,
            source: PriceSource::Fallback,
        })
    }

    /// Wait until the live feed has quotes for `token_ids` or `timeout` elapses.
    ///
    /// Returns whether the tokens became ready. Callers proceed either way;
    /// reads simply start out on the fallback.
    pub async fn wait_ready(&self, token_ids: &[String], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.live.ready_for(token_ids) {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(tokens = ?token_ids, timeout_s = timeout.as_secs(), "Live feed not ready in time, using fallback");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFallback {
        mid: Option<Decimal>,
        tick: Option<TickSize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FallbackSource for FixedFallback {
        async fn midpoint(&self, token_id: &str) -> Result<Decimal, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.mid.ok_or_else(|| FeedError::Unavailable {
                token_id: token_id.to_string(),
                reason: "HTTP 503".to_string(),
            })
        }

        async fn tick_size(&self, _token_id: &str) -> Result<Option<TickSize>, FeedError> {
            Ok(self.tick)
        }
    }

    fn feed_with(mid: Option<Decimal>, stale_after: Duration) -> (PriceFeed, Arc<FixedFallback>) {
        let config = ReconnectConfig {
            stale_after,
            ..Default::default()
        };
        let live = Arc::new(LiveFeed::new("wss://example.invalid", config));
        let fallback = Arc::new(FixedFallback {
            mid,
            tick: None,
            calls: AtomicUsize::new(0),
        });
        (PriceFeed::new(live, fallback.clone()), fallback)
    }

    const BOOK: &str = r#"{"event_type":"book","asset_id":"up","bids":[{"price":"0.60","size":"5"}],"asks":[{"price":"0.61","size":"5"}]}"#;

    #[tokio::test]
    async fn ready_feed_serves_live_snapshots() {
        let (feed, fallback) = feed_with(Some(dec!(0.30)), Duration::from_secs(15));
        feed.live().set_connected(true);
        feed.live().ingest(BOOK);

        let snap = feed.current("up").await.unwrap();
        assert_eq!(snap.source, PriceSource::Live);
        assert_eq!(snap.price, dec!(0.605));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn readiness_waits_for_the_requested_tokens() {
        let (feed, _) = feed_with(Some(dec!(0.50)), Duration::from_secs(15));
        feed.live().set_connected(true);
        feed.live().ingest(BOOK);
        assert!(feed.ready());

        let window = vec!["up".to_string(), "down".to_string()];
        assert!(!feed.ready_for(&window));
        assert!(!feed.wait_ready(&window, Duration::from_millis(50)).await);

        feed.live().ingest(
            r#"{"event_type":"book","asset_id":"down","bids":[{"price":"0.39","size":"5"}],"asks":[{"price":"0.40","size":"5"}]}"#,
        );
        assert!(feed.wait_ready(&window, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn not_ready_feed_reads_fallback_and_infers_tick() {
        let (feed, fallback) = feed_with(Some(dec!(0.975)), Duration::from_secs(15));

        let snap = feed.current("up").await.unwrap();
        assert_eq!(snap.source, PriceSource::Fallback);
        assert_eq!(snap.price, dec!(0.975));
        assert_eq!(snap.tick_size, TickSize::Fine);
        assert!(!snap.tick_declared);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_feed_fails_over_until_fresh_update() {
        let (feed, _) = feed_with(Some(dec!(0.50)), Duration::from_millis(30));
        feed.live().set_connected(true);
        feed.live().ingest(BOOK);
        assert_eq!(feed.current("up").await.unwrap().source, PriceSource::Live);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!feed.ready());
        let snap = feed.current("up").await.unwrap();
        assert_eq!(snap.source, PriceSource::Fallback);
        assert_eq!(snap.price, dec!(0.50));

        feed.live().ingest(BOOK);
        assert!(feed.ready());
        assert_eq!(feed.current("up").await.unwrap().source, PriceSource::Live);
    }

    #[tokio::test]
    async fn both_sources_down_is_unavailable() {
        let (feed, _) = feed_with(None, Duration::from_secs(15));
        let err = feed.current("up").await.unwrap_err();
        assert!(matches!(err, FeedError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn wait_ready_times_out_without_live_data() {
        let (feed, _) = feed_with(Some(dec!(0.50)), Duration::from_secs(15));
        assert!(!feed.wait_ready(&["up".to_string()], Duration::from_millis(150)).await);
    }
}
