//! Price feed types.

use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};
use strum::Display;

use super::tick::TickSize;

/// Spread at or below which the book midpoint is trusted over the last trade.
pub const TIGHT_SPREAD: Decimal = dec!(0.02);

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PriceSource {
    /// Pushed by the WebSocket market channel.
    Live,
    /// Pulled from the REST midpoint endpoint.
    Fallback,
}

/// Point-in-time price of one outcome token.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    /// Outcome token id.
    pub token_id: String,
    /// Derived price in `[0, 1]`.
    pub price: Decimal,
    /// Tick size active for this token.
    pub tick_size: TickSize,
    /// Whether the venue reported `tick_size` rather than it being inferred.
    pub tick_declared: bool,
    /// When the underlying data was observed.
    pub as_of: Instant,
    /// Which source produced it.
    pub source: PriceSource,
}

/// Top-of-book state for one token, as maintained by the live source.
#[derive(Debug, Clone, Default)]
pub struct TokenQuote {
    /// Best bid.
    pub best_bid: Option<Decimal>,
    /// Best ask.
    pub best_ask: Option<Decimal>,
    /// Last traded price.
    pub last_trade: Option<Decimal>,
    /// Tick size declared by the venue, if any.
    pub tick_size: Option<TickSize>,
    /// Last time any field changed.
    pub updated_at: Option<Instant>,
}

impl TokenQuote {
    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Displayed price.
    ///
    /// Tight books use the bid/ask midpoint; wide books use the last trade,
    /// falling back to the midpoint when nothing has traded yet.
    pub fn price(&self) -> Option<Decimal> {
        let mid = match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(((bid + ask) / Decimal::TWO).round_dp(4)),
            _ => None,
        };

        if let (Some(mid), Some(spread)) = (mid, self.spread()) {
            if spread <= TIGHT_SPREAD {
                return Some(mid);
            }
        }

        self.last_trade.or(mid)
    }

    /// Tick size to quantize against: the declared one, else inferred.
    pub fn effective_tick(&self, price: Decimal) -> TickSize {
        self.tick_size.unwrap_or_else(|| TickSize::for_price(price))
    }

    /// Build a snapshot if a price can be derived.
    pub fn snapshot(&self, token_id: &str) -> Option<PriceSnapshot> {
        let price = self.price()?;
        Some(PriceSnapshot {
            token_id: token_id.to_string(),
            price,
            tick_size: self.effective_tick(price),
            tick_declared: self.tick_size.is_some(),
            as_of: self.updated_at?,
            source: PriceSource::Live,
        })
    }
}

/// Accept a decimal encoded as a JSON string or number; anything else is `None`.
pub(crate) fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_value))
}

pub(crate) fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
