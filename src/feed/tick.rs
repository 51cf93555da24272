//! Tick-size tracking and price alignment.
//!
//! The venue quotes in 0.01 increments in the middle of the book and in
//! 0.001 increments near the extremes (below 0.04 and above 0.96). An order
//! priced at the wrong granularity is rejected outright.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use strum::Display;
use tracing::info;

/// Price below which the fine tick applies.
pub const FINE_BAND_LOW: Decimal = dec!(0.04);
/// Price above which the fine tick applies.
pub const FINE_BAND_HIGH: Decimal = dec!(0.96);

/// Minimum price increment for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, Default)]
pub enum TickSize {
    /// 0.01 increments.
    #[default]
    #[strum(serialize = "0.01")]
    Coarse,
    /// 0.001 increments.
    #[strum(serialize = "0.001")]
    Fine,
}

impl TickSize {
    /// Increment as a decimal.
    pub fn value(&self) -> Decimal {
        match self {
            TickSize::Coarse => dec!(0.01),
            TickSize::Fine => dec!(0.001),
        }
    }

    /// Map a venue-reported increment onto a known tick size.
    pub fn from_decimal(tick: Decimal) -> Option<Self> {
        if tick == dec!(0.01) {
            Some(TickSize::Coarse)
        } else if tick == dec!(0.001) {
            Some(TickSize::Fine)
        } else {
            None
        }
    }

    /// Tick size implied by where a price sits relative to the fine bands.
    pub fn for_price(price: Decimal) -> Self {
        if price < FINE_BAND_LOW || price > FINE_BAND_HIGH {
            TickSize::Fine
        } else {
            TickSize::Coarse
        }
    }

    /// Round down to a multiple of this tick.
    pub fn floor(&self, price: Decimal) -> Decimal {
        let tick = self.value();
        (price / tick).floor() * tick
    }

    /// Round up to a multiple of this tick.
    pub fn ceil(&self, price: Decimal) -> Decimal {
        let tick = self.value();
        (price / tick).ceil() * tick
    }

    /// Clamp into the tradable range `[tick, 1 - tick]`.
    pub fn clamp(&self, price: Decimal) -> Decimal {
        let tick = self.value();
        price.max(tick).min(Decimal::ONE - tick)
    }

    /// Whether a price is an exact multiple of this tick.
    pub fn is_aligned(&self, price: Decimal) -> bool {
        (price / self.value()).fract().is_zero()
    }
}

/// Follows the tick size of one token across boundary crossings.
///
/// The tracker only moves when a price actually crosses into or out of a
/// fine band, or when the venue declares a new tick explicitly.
#[derive(Debug, Clone)]
pub struct TickTracker {
    token_id: String,
    current: TickSize,
}

impl TickTracker {
    /// Start from a known tick size.
    pub fn new(token_id: impl Into<String>, initial: TickSize) -> Self {
        Self {
            token_id: token_id.into(),
            current: initial,
        }
    }

    /// Active tick size.
    pub fn current(&self) -> TickSize {
        self.current
    }

    /// Apply a tick size declared by the venue.
    pub fn declare(&mut self, tick: TickSize) -> bool {
        self.transition(tick, "declared")
    }

    /// Infer the tick size from an observed price. Returns true on a crossing.
    pub fn observe(&mut self, price: Decimal) -> bool {
        self.transition(TickSize::for_price(price), "boundary crossed")
    }

    fn transition(&mut self, next: TickSize, cause: &'static str) -> bool {
        if next == self.current {
            return false;
        }
        info!(
            token_id = %self.token_id,
            from = %self.current,
            to = %next,
            cause,
            "Tick size changed"
        );
        self.current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fine_tick_applies_near_extremes() {
        assert_eq!(TickSize::for_price(dec!(0.039)), TickSize::Fine);
        assert_eq!(TickSize::for_price(dec!(0.04)), TickSize::Coarse);
        assert_eq!(TickSize::for_price(dec!(0.50)), TickSize::Coarse);
        assert_eq!(TickSize::for_price(dec!(0.96)), TickSize::Coarse);
        assert_eq!(TickSize::for_price(dec!(0.961)), TickSize::Fine);
    }

    #[test]
    fn crossing_down_through_lower_band_switches_and_reverts() {
        let mut tracker = TickTracker::new("tok", TickSize::Coarse);

        assert!(!tracker.observe(dec!(0.05)));
        assert!(tracker.observe(dec!(0.035)));
        assert_eq!(tracker.current(), TickSize::Fine);
        assert_eq!(tracker.current().floor(dec!(0.0357)), dec!(0.035));

        // staying inside the band is not a transition
        assert!(!tracker.observe(dec!(0.02)));

        assert!(tracker.observe(dec!(0.05)));
        assert_eq!(tracker.current(), TickSize::Coarse);
        assert_eq!(tracker.current().floor(dec!(0.0557)), dec!(0.05));
    }

    #[test]
    fn crossing_up_through_upper_band_switches_and_reverts() {
        let mut tracker = TickTracker::new("tok", TickSize::Coarse);

        assert!(tracker.observe(dec!(0.965)));
        assert_eq!(tracker.current(), TickSize::Fine);
        assert!(tracker.observe(dec!(0.95)));
        assert_eq!(tracker.current(), TickSize::Coarse);
    }

    #[test]
    fn declared_tick_overrides_inference() {
        let mut tracker = TickTracker::new("tok", TickSize::Coarse);
        assert!(tracker.declare(TickSize::Fine));
        assert!(!tracker.declare(TickSize::Fine));
        assert_eq!(tracker.current(), TickSize::Fine);
    }

    #[test]
    fn floor_ceil_and_clamp() {
        assert_eq!(TickSize::Coarse.floor(dec!(0.619)), dec!(0.61));
        assert_eq!(TickSize::Coarse.ceil(dec!(0.611)), dec!(0.62));
        assert_eq!(TickSize::Coarse.ceil(dec!(0.61)), dec!(0.61));
        assert_eq!(TickSize::Coarse.clamp(dec!(0.995)), dec!(0.99));
        assert_eq!(TickSize::Fine.clamp(dec!(0)), dec!(0.001));
        assert!(TickSize::Fine.is_aligned(dec!(0.035)));
        assert!(!TickSize::Coarse.is_aligned(dec!(0.035)));
    }

    #[test]
    fn venue_reported_ticks_map_to_known_sizes() {
        assert_eq!(TickSize::from_decimal(dec!(0.010)), Some(TickSize::Coarse));
        assert_eq!(TickSize::from_decimal(dec!(0.001)), Some(TickSize::Fine));
        assert_eq!(TickSize::from_decimal(dec!(0.1)), None);
    }
}
