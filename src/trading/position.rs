//! Position tracking.

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;

use crate::market::Outcome;

/// One confirmed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fill {
    /// Execution price.
    pub price: Decimal,
    /// Shares filled.
    pub size: Decimal,
}

/// Lifecycle of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, Default)]
#[strum(serialize_all = "snake_case")]
pub enum LedgerState {
    /// Nothing bought yet.
    #[default]
    Flat,
    /// Holding shares.
    Open,
    /// Exited.
    Closed,
}

/// Bookkeeping for one side of one window.
///
/// Only confirmed fills are recorded. Aggregates are recomputed from the
/// full fill history on every fill.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionLedger {
    /// Outcome held.
    pub side: Outcome,
    /// Token ID.
    pub token_id: String,
    /// Fill history.
    pub fills: Vec<Fill>,
    /// Exit history.
    pub exits: Vec<Fill>,
    /// Shares bought.
    pub total_size: Decimal,
    /// USDC paid.
    pub total_cost: Decimal,
    /// Average entry price.
    pub avg_price: Decimal,
    /// Lifecycle state.
    pub state: LedgerState,
    /// Realized P&L once closed.
    pub realized_pnl: Option<Decimal>,
}

impl PositionLedger {
    /// Empty ledger for one side.
    pub fn new(side: Outcome, token_id: impl Into<String>) -> Self {
        Self {
            side,
            token_id: token_id.into(),
            ..Default::default()
        }
    }

    /// Record a confirmed fill. Non-positive fills are ignored and return false.
    pub fn record_fill(&mut self, price: Decimal, size: Decimal) -> bool {
        if size <= Decimal::ZERO || price <= Decimal::ZERO || self.state == LedgerState::Closed {
            return false;
        }
        self.fills.push(Fill { price, size });
        self.recompute();
        self.state = LedgerState::Open;
        true
    }

    fn recompute(&mut self) {
        self.total_size = self.fills.iter().map(|f| f.size).sum();
        self.total_cost = self.fills.iter().map(|f| f.price * f.size).sum();
        self.avg_price = if self.total_size.is_zero() {
            Decimal::ZERO
        } else {
            self.total_cost / self.total_size
        };
    }

    /// Whether any shares are held.
    pub fn is_open(&self) -> bool {
        self.state == LedgerState::Open
    }

    /// Shares bought and not yet sold.
    pub fn open_size(&self) -> Decimal {
        let sold: Decimal = self.exits.iter().map(|f| f.size).sum();
        (self.total_size - sold).max(Decimal::ZERO)
    }

    /// Price of the most recent fill.
    pub fn last_fill_price(&self) -> Option<Decimal> {
        self.fills.last().map(|f| f.price)
    }

    /// Unrealized P&L of the open shares at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.avg_price) * self.open_size()
    }

    /// Record a confirmed exit fill. Returns true once nothing is left open.
    pub fn record_exit(&mut self, price: Decimal, size: Decimal) -> bool {
        let size = size.min(self.open_size());
        if size <= Decimal::ZERO || price <= Decimal::ZERO || !self.is_open() {
            return false;
        }
        self.exits.push(Fill { price, size });

        let proceeds: Decimal = self.exits.iter().map(|f| f.price * f.size).sum();
        let sold: Decimal = self.exits.iter().map(|f| f.size).sum();
        self.realized_pnl = Some(proceeds - self.avg_price * sold);

        if self.open_size().is_zero() {
            self.state = LedgerState::Closed;
        }
        !self.is_open()
    }

    /// Close everything still open at `exit_price`. Returns realized P&L.
    pub fn close(&mut self, exit_price: Decimal) -> Decimal {
        self.record_exit(exit_price, self.open_size());
        self.realized_pnl.unwrap_or_default()
    }
}

/// Positions for both outcomes in a market.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketPositions {
    /// UP (YES) position.
    pub up: PositionLedger,
    /// DOWN (NO) position.
    pub down: PositionLedger,
}

impl MarketPositions {
    /// Empty ledgers for both tokens.
    pub fn new(up_token_id: impl Into<String>, down_token_id: impl Into<String>) -> Self {
        Self {
            up: PositionLedger::new(Outcome::Up, up_token_id),
            down: PositionLedger::new(Outcome::Down, down_token_id),
        }
    }

    /// Ledger for one side.
    pub fn side(&self, outcome: Outcome) -> &PositionLedger {
        match outcome {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    /// Mutable ledger for one side.
    pub fn side_mut(&mut self, outcome: Outcome) -> &mut PositionLedger {
        match outcome {
            Outcome::Up => &mut self.up,
            Outcome::Down => &mut self.down,
        }
    }

    /// Check if positions are balanced (equal size on both sides).
    pub fn is_balanced(&self) -> bool {
        self.up.total_size == self.down.total_size
    }

    /// Matched UP/DOWN pairs; each pays exactly 1 at settlement.
    pub fn pairs(&self) -> Decimal {
        self.up.total_size.min(self.down.total_size)
    }

    /// Combined average price of one UP and one DOWN share.
    pub fn combined_price(&self) -> Decimal {
        self.up.avg_price + self.down.avg_price
    }

    /// Get total cost basis.
    pub fn total_cost_basis(&self) -> Decimal {
        self.up.total_cost + self.down.total_cost
    }

    /// Guaranteed profit of the matched pairs.
    pub fn expected_profit(&self) -> Decimal {
        (Decimal::ONE - self.combined_price()) * self.pairs()
    }
}
