//! Price feed failover and tick tracking.

use std::sync::Arc;
use std::time::Duration;

use polymarket_updown::error::FeedError;
use polymarket_updown::feed::{LiveFeed, PriceFeed, PriceSource, ReconnectConfig, TickSize, TickTracker};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use crate::support::{venue, DOWN, UP};

fn book(asset: &str, bid: &str, ask: &str) -> String {
    format!(
        r#"{{"event_type":"book","asset_id":"{asset}","bids":[{{"price":"{bid}","size":"10"}}],"asks":[{{"price":"{ask}","size":"10"}}]}}"#
    )
}

fn live(stale_after: Duration) -> Arc<LiveFeed> {
    let config = ReconnectConfig {
        stale_after,
        ..ReconnectConfig::default()
    };
    Arc::new(LiveFeed::new("wss://example.invalid", config))
}

#[tokio::test]
async fn reads_fail_over_between_sources() {
    let venue = venue(dec!(0.52), dec!(0.48));
    let live = live(Duration::from_secs(15));
    let feed = PriceFeed::new(live.clone(), venue.clone());

    let snap = assert_ok!(feed.current(UP).await);
    assert_eq!(snap.source, PriceSource::Fallback);
    assert_eq!(snap.price, dec!(0.52));
    assert!(!snap.tick_declared);

    live.set_connected(true);
    live.ingest(&book(UP, "0.40", "0.41"));
    assert!(feed.ready());

    let snap = feed.current(UP).await.unwrap();
    assert_eq!(snap.source, PriceSource::Live);
    assert_eq!(snap.price, dec!(0.405));

    // A live token with no quote yet still reads from the fallback.
    let snap = feed.current(DOWN).await.unwrap();
    assert_eq!(snap.source, PriceSource::Fallback);

    live.set_connected(false);
    let snap = feed.current(UP).await.unwrap();
    assert_eq!(snap.source, PriceSource::Fallback);
    assert_eq!(snap.price, dec!(0.52));
}

#[tokio::test]
async fn stale_live_feed_falls_back() {
    let venue = venue(dec!(0.52), dec!(0.48));
    let live = live(Duration::from_millis(50));
    let feed = PriceFeed::new(live.clone(), venue.clone());

    live.set_connected(true);
    live.ingest(&book(UP, "0.40", "0.41"));
    assert_eq!(feed.current(UP).await.unwrap().source, PriceSource::Live);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!feed.ready());
    assert!(matches!(live.check_fresh(), Err(FeedError::Stale { .. })));
    assert_eq!(feed.current(UP).await.unwrap().source, PriceSource::Fallback);

    live.ingest(&book(UP, "0.42", "0.43"));
    let snap = feed.current(UP).await.unwrap();
    assert_eq!((snap.source, snap.price), (PriceSource::Live, dec!(0.425)));
}

#[tokio::test]
async fn unavailable_when_both_sources_fail() {
    let venue = venue(dec!(0.52), dec!(0.48));
    let feed = PriceFeed::new(live(Duration::from_secs(15)), venue.clone());
    venue.fail_fallback(true);

    let err = assert_err!(feed.current(UP).await);
    assert!(matches!(err, FeedError::Unavailable { ref token_id, .. } if token_id == UP));
}

#[tokio::test]
async fn declared_tick_reaches_fallback_reads() {
    let venue = venue(dec!(0.52), dec!(0.48));
    let live = live(Duration::from_secs(15));
    let feed = PriceFeed::new(live.clone(), venue.clone());

    live.ingest(&format!(
        r#"{{"event_type":"tick_size_change","asset_id":"{UP}","old_tick_size":"0.01","new_tick_size":"0.001"}}"#
    ));
    let snap = feed.current(UP).await.unwrap();
    assert_eq!(snap.source, PriceSource::Fallback);
    assert_eq!(snap.tick_size, TickSize::Fine);
    assert!(snap.tick_declared);
}

#[test]
fn tick_follows_the_fine_band() {
    let mut tracker = TickTracker::new(UP, TickSize::for_price(dec!(0.05)));
    assert_eq!(tracker.current(), TickSize::Coarse);

    let crossings: Vec<bool> = [dec!(0.05), dec!(0.035), dec!(0.03), dec!(0.05)]
        .into_iter()
        .map(|p| tracker.observe(p))
        .collect();
    assert_eq!(crossings, vec![false, true, false, true]);
    assert_eq!(tracker.current(), TickSize::Coarse);

    assert!(tracker.observe(dec!(0.97)));
    assert_eq!(tracker.current(), TickSize::Fine);
}
