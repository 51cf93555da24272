//! Order types and creation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::feed::TickSize;

/// Smallest share increment accepted by the venue.
pub const SHARE_STEP: Decimal = dec!(0.0001);

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(to_string = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(to_string = "SELL", serialize = "sell")]
    Sell,
}

/// Order type as understood by the venue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill-and-kill: fill what's available, cancel rest.
    #[default]
    #[strum(to_string = "FAK", serialize = "fak")]
    FAK,
    /// Fill-or-kill: must fill entirely or cancel.
    #[strum(to_string = "FOK", serialize = "fok")]
    FOK,
    /// Good-till-cancelled: stays on book until filled or cancelled.
    #[strum(to_string = "GTC", serialize = "gtc")]
    GTC,
}

impl OrderType {
    /// FAK and FOK execute against the book immediately and never rest.
    pub fn is_immediate(&self) -> bool {
        matches!(self, OrderType::FAK | OrderType::FOK)
    }
}

/// A single order decision. Consumed by the gateway exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price, aligned to `tick_size`.
    pub price: Decimal,
    /// Order size in shares.
    pub size: Decimal,
    /// Tick size the price was aligned to.
    pub tick_size: TickSize,
    /// When the decision was made.
    pub created_at: OffsetDateTime,
}

impl OrderRequest {
    /// Buy as many shares as `amount` USDC affords at `price`.
    ///
    /// Returns `None` when the budget cannot buy a single share increment.
    pub fn buy_for_amount(
        token_id: impl Into<String>,
        price: Decimal,
        amount: Decimal,
        tick_size: TickSize,
        order_type: OrderType,
    ) -> Option<Self> {
        let price = align_price(price, tick_size, Side::Buy, order_type);
        let size = buy_size_for_budget(price, amount)?;
        Some(Self {
            token_id: token_id.into(),
            side: Side::Buy,
            order_type,
            price,
            size,
            tick_size,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Sell `shares` at `price`, trimmed so the notional stays on whole cents.
    pub fn sell_shares(
        token_id: impl Into<String>,
        price: Decimal,
        shares: Decimal,
        tick_size: TickSize,
        order_type: OrderType,
    ) -> Option<Self> {
        let price = align_price(price, tick_size, Side::Sell, order_type);
        let size = sell_size(price, shares)?;
        Some(Self {
            token_id: token_id.into(),
            side: Side::Sell,
            order_type,
            price,
            size,
            tick_size,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Same price and size, resting instead of immediate.
    pub fn as_resting(&self) -> Self {
        Self {
            order_type: OrderType::GTC,
            created_at: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }

    /// USDC notional of the order.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(format!("price {} outside (0, 1)", self.price));
        }
        if !self.tick_size.is_aligned(self.price) {
            return Err(format!("price {} not aligned to tick {}", self.price, self.tick_size));
        }
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        Ok(())
    }
}

/// Align a limit price to the tick and clamp it into `[tick, 1 - tick]`.
///
/// Immediate orders round toward marketability (buys up, sells down); resting
/// orders round away from it so they never rest at a worse level than asked.
pub fn align_price(price: Decimal, tick: TickSize, side: Side, order_type: OrderType) -> Decimal {
    let round_up = match (side, order_type.is_immediate()) {
        (Side::Buy, true) | (Side::Sell, false) => true,
        (Side::Sell, true) | (Side::Buy, false) => false,
    };
    let aligned = if round_up { tick.ceil(price) } else { tick.floor(price) };
    tick.clamp(aligned).normalize()
}

fn floor_dp(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
}

/// Share count for a USDC budget.
///
/// The venue wants the maker amount (price x size) on whole cents, so the
/// search walks the budget down one cent at a time until a size divides it
/// exactly. Gives up after two dollars and falls back to the smallest size
/// worth one cent.
pub fn buy_size_for_budget(price: Decimal, budget: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO || budget <= Decimal::ZERO {
        return None;
    }

    let budget_cents = floor_dp(budget * dec!(100), 0);
    let floor_cents = (budget_cents - dec!(200)).max(Decimal::ZERO);

    let mut cents = budget_cents;
    while cents > floor_cents {
        let maker = cents / dec!(100);
        let size = floor_dp(maker / price, 4);
        if size > Decimal::ZERO && floor_dp(price * size, 2) == maker {
            return Some(size.normalize());
        }
        cents -= Decimal::ONE;
    }

    let fallback = floor_dp(dec!(0.01) / price, 4).max(SHARE_STEP);
    Some(fallback.normalize())
}

/// Sellable size for `shares` at `price`, with a notional of at most 2dp.
///
/// Sizes move in lots: the smallest multiple of [`SHARE_STEP`] whose value at
/// `price` lands on a whole cent.
pub fn sell_size(price: Decimal, shares: Decimal) -> Option<Decimal> {
    const CENT_UNITS: u64 = 1_000_000;

    let price_units = (price / SHARE_STEP).trunc().to_u64()?;
    let share_units = (floor_dp(shares, 4) / SHARE_STEP).trunc().to_u64()?;
    if price_units == 0 {
        return None;
    }

    let lot = CENT_UNITS / gcd(price_units, CENT_UNITS);
    let units = share_units - share_units % lot;
    (units > 0).then(|| (Decimal::from(units) * SHARE_STEP).normalize())
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Terminal (or resting) result of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    /// Some or all of the order executed.
    Filled {
        /// Venue order id, when one was assigned.
        order_id: Option<String>,
        /// Shares actually filled.
        size: Decimal,
        /// Average execution price.
        avg_price: Decimal,
        /// Shares requested.
        requested: Decimal,
    },
    /// Venue refused the order.
    Rejected {
        /// Reason reported by the venue.
        reason: String,
    },
    /// Nothing filled and nothing rests.
    Cancelled {
        /// Venue order id, when one was assigned.
        order_id: Option<String>,
    },
    /// Resting on the book.
    Pending {
        /// Venue order id.
        order_id: String,
    },
}

impl OrderOutcome {
    /// Filled shares, zero for anything but a fill.
    pub fn filled_size(&self) -> Decimal {
        match self {
            OrderOutcome::Filled { size, .. } => *size,
            _ => Decimal::ZERO,
        }
    }

    /// Filled less than requested.
    pub fn is_partial(&self) -> bool {
        matches!(self, OrderOutcome::Filled { size, requested, .. } if size < requested)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OrderOutcome::Filled { .. } => "filled",
            OrderOutcome::Rejected { .. } => "rejected",
            OrderOutcome::Cancelled { .. } => "cancelled",
            OrderOutcome::Pending { .. } => "pending",
        }
    }
}

/// Order status from API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum OrderStatus {
    /// Accepted but not yet on the book.
    #[strum(serialize = "pending")]
    Pending,
    /// Order is live on the book.
    #[strum(serialize = "live")]
    Live,
    /// Open on the book.
    #[strum(serialize = "open")]
    Open,
    /// Posted without any match yet.
    #[strum(serialize = "unmatched")]
    Unmatched,
    /// Matched against the book.
    #[strum(serialize = "matched")]
    Matched,
    /// Order is fully filled.
    #[strum(serialize = "filled")]
    Filled,
    /// Order was cancelled.
    #[strum(to_string = "canceled", serialize = "cancelled")]
    Cancelled,
    /// Order was rejected.
    #[strum(serialize = "rejected")]
    Rejected,
    /// Order expired.
    #[strum(serialize = "expired")]
    Expired,
}

impl OrderStatus {
    /// Still resting on the book.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Live | OrderStatus::Open | OrderStatus::Unmatched
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Matched | OrderStatus::Filled)
    }

    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// Order state summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderState {
    /// Order ID.
    pub order_id: String,
    /// Current status.
    pub status: Option<OrderStatus>,
    /// Filled size.
    pub filled_size: Option<Decimal>,
    /// Original size.
    pub original_size: Option<Decimal>,
    /// Limit price.
    pub price: Option<Decimal>,
}

impl OrderState {
    /// Still resting. Unknown status counts as open.
    pub fn is_open(&self) -> bool {
        self.status.map_or(true, |s| s.is_open())
    }

    /// Fully filled, by status or by size.
    pub fn is_filled(&self) -> bool {
        if self.status.is_some_and(|s| s.is_filled()) {
            return true;
        }
        matches!(
            (self.filled_size, self.original_size),
            (Some(filled), Some(original)) if original > Decimal::ZERO && filled >= original
        )
    }

    /// Filled shares, zero when unknown.
    pub fn filled(&self) -> Decimal {
        match (self.filled_size, self.status) {
            (Some(filled), _) => filled,
            (None, Some(s)) if s.is_filled() => self.original_size.unwrap_or_default(),
            _ => Decimal::ZERO,
        }
    }
}
