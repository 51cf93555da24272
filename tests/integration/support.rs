//! Shared fixtures.

use std::sync::Arc;
use std::time::Instant;

use polymarket_updown::feed::{PriceSnapshot, PriceSource, TickSize};
use polymarket_updown::market::{Asset, Interval, Market, MockVenue};
use polymarket_updown::strategy::MarketTick;
use polymarket_updown::trading::{GatewaySettings, OrderGateway};
use rust_decimal::Decimal;

pub const UP: &str = "up-token";
pub const DOWN: &str = "down-token";

pub fn market() -> Market {
    Market {
        slug: "btc-updown-15m-1765301400".to_string(),
        id: "42".to_string(),
        asset: Asset::Btc,
        interval: Interval::M15,
        up_token_id: UP.to_string(),
        down_token_id: DOWN.to_string(),
        start_timestamp: 1_765_301_400,
        end_timestamp: 1_765_302_300,
        question: Some("Bitcoin Up or Down?".to_string()),
    }
}

pub fn snapshot(token_id: &str, price: Decimal) -> PriceSnapshot {
    PriceSnapshot {
        token_id: token_id.to_string(),
        price,
        tick_size: TickSize::for_price(price),
        tick_declared: false,
        as_of: Instant::now(),
        source: PriceSource::Live,
    }
}

/// Venue with both sides priced.
pub fn venue(up: Decimal, down: Decimal) -> Arc<MockVenue> {
    let venue = Arc::new(MockVenue::new());
    venue.set_price(UP, up);
    venue.set_price(DOWN, down);
    venue
}

pub fn gateway(venue: &Arc<MockVenue>) -> OrderGateway {
    OrderGateway::new(venue.clone(), GatewaySettings::default())
}

/// Move the venue to the given prices and build the matching tick.
pub fn move_to(venue: &MockVenue, seq: u64, up: Decimal, down: Decimal) -> MarketTick {
    venue.set_price(UP, up);
    venue.set_price(DOWN, down);
    MarketTick {
        up: snapshot(UP, up),
        down: snapshot(DOWN, down),
        seq,
    }
}
