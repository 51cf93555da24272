//! DCA snipe.
//!
//! A side arms once its price is seen below the entry price, then buys on
//! the first tick at or above it. The position is protected by a resting
//! take-profit and stop-loss pair; with a bet step configured, every further
//! step up buys again and the pair is re-placed for the new size and average.
//! One side trades per window and a closed position is never re-opened.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{MarketTick, OrderPurpose, Strategy, WindowSummary};
use crate::config::DcaSettings;
use crate::error::TradingError;
use crate::feed::PriceSnapshot;
use crate::market::{Market, Outcome};
use crate::trading::{OrderGateway, OrderOutcome, OrderRequest, OrderState, OrderType, PositionLedger};

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DcaPhase {
    /// No side seen below entry yet.
    Idle,
    /// At least one side may trigger.
    Armed,
    /// Entry rests on the book.
    EntryPending,
    /// Holding shares with brackets.
    PositionOpen,
    /// Done for this window.
    Closed,
}

/// Window result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcaSummary {
    /// Side traded, if any.
    pub side: Option<Outcome>,
    /// Final phase.
    pub phase: DcaPhase,
    /// Confirmed buys.
    pub buys: usize,
    /// Shares bought.
    pub shares: Decimal,
    /// Average entry price.
    pub avg_price: Option<Decimal>,
    /// Realized P&L of the exits.
    pub realized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
struct Bracket {
    order_id: Option<String>,
    price: Option<Decimal>,
}

/// DCA snipe engine for one window.
#[derive(Debug)]
pub struct DcaSnipe {
    settings: DcaSettings,
    market_slug: String,
    phase: DcaPhase,
    armed: [bool; 2],
    side: Option<Outcome>,
    ledger: Option<PositionLedger>,
    pending_entry: Option<(String, Decimal)>,
    pending_dca: Option<(String, Decimal)>,
    last_bet_price: Option<Decimal>,
    take_profit: Bracket,
    stop_loss: Bracket,
    rebracket: bool,
    leftovers: Vec<String>,
    last_price: Decimal,
}

const BRACKETS: [OrderPurpose; 2] = [OrderPurpose::TakeProfit, OrderPurpose::StopLoss];

fn arm_index(side: Outcome) -> usize {
    match side {
        Outcome::Up => 0,
        Outcome::Down => 1,
    }
}

impl DcaSnipe {
    /// Fresh engine for `market`.
    pub fn new(settings: DcaSettings, market: &Market) -> Self {
        Self {
            settings,
            market_slug: market.slug.clone(),
            phase: DcaPhase::Idle,
            armed: [false; 2],
            side: None,
            ledger: None,
            pending_entry: None,
            pending_dca: None,
            last_bet_price: None,
            take_profit: Bracket::default(),
            stop_loss: Bracket::default(),
            rebracket: false,
            leftovers: Vec::new(),
            last_price: Decimal::ZERO,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> DcaPhase {
        self.phase
    }

    /// Whether `side` has been seen below entry.
    pub fn is_armed(&self, side: Outcome) -> bool {
        self.armed[arm_index(side)]
    }

    /// Position ledger, once a side has been entered.
    pub fn ledger(&self) -> Option<&PositionLedger> {
        self.ledger.as_ref()
    }

    /// Resting take-profit and stop-loss order ids.
    pub fn bracket_ids(&self) -> (Option<&str>, Option<&str>) {
        (self.take_profit.order_id.as_deref(), self.stop_loss.order_id.as_deref())
    }

    fn bracket_mut(&mut self, purpose: OrderPurpose) -> &mut Bracket {
        match purpose {
            OrderPurpose::StopLoss => &mut self.stop_loss,
            _ => &mut self.take_profit,
        }
    }

    fn bracket(&self, purpose: OrderPurpose) -> &Bracket {
        match purpose {
            OrderPurpose::StopLoss => &self.stop_loss,
            _ => &self.take_profit,
        }
    }

    fn open_size(&self) -> Decimal {
        self.ledger.as_ref().map(|l| l.open_size()).unwrap_or_default()
    }

    fn record_buy(&mut self, price: Decimal, size: Decimal) -> bool {
        let recorded = self
            .ledger
            .as_mut()
            .is_some_and(|ledger| ledger.record_fill(price, size));
        if recorded {
            self.last_bet_price = Some(price);
            if let Some(ledger) = &self.ledger {
                info!(
                    market = %self.market_slug,
                    side = %ledger.side,
                    price = %price,
                    size = %size,
                    total_size = %ledger.total_size,
                    avg_price = %ledger.avg_price.round_dp(4),
                    "Buy filled"
                );
            }
        }
        recorded
    }

    fn record_sell(&mut self, price: Decimal, size: Decimal) {
        let Some(ledger) = self.ledger.as_mut() else {
            return;
        };
        if ledger.record_exit(price, size) {
            let pnl = ledger.realized_pnl.unwrap_or_default();
            info!(
                market = %self.market_slug,
                side = %ledger.side,
                exit_price = %price,
                avg_price = %ledger.avg_price.round_dp(4),
                realized_pnl = %pnl.round_dp(4),
                "Position closed"
            );
            self.phase = DcaPhase::Closed;
        }
    }

    fn rearm_phase(&self) -> DcaPhase {
        if self.armed.iter().any(|a| *a) {
            DcaPhase::Armed
        } else {
            DcaPhase::Idle
        }
    }

    async fn watch_entry(&mut self, tick: &MarketTick, gateway: &OrderGateway) {
        let sides: Vec<Outcome> = match self.side {
            Some(side) => vec![side],
            None => Outcome::BOTH.to_vec(),
        };

        for side in sides {
            let price = tick.price(side);
            let slot = arm_index(side);

            if price < self.settings.entry_price {
                if !self.armed[slot] {
                    info!(
                        market = %self.market_slug,
                        side = %side,
                        price = %price,
                        entry = %self.settings.entry_price,
                        "Armed"
                    );
                    self.armed[slot] = true;
                }
                self.phase = DcaPhase::Armed;
                continue;
            }

            if self.armed[slot] {
                info!(
                    market = %self.market_slug,
                    side = %side,
                    price = %price,
                    entry = %self.settings.entry_price,
                    "Entry triggered"
                );
                self.enter(side, tick.side(side), gateway).await;
                return;
            }
        }
    }

    async fn enter(&mut self, side: Outcome, snap: &PriceSnapshot, gateway: &OrderGateway) {
        let Some(request) = OrderRequest::buy_for_amount(
            &snap.token_id,
            snap.price,
            self.settings.amount_per_bet,
            snap.tick_size,
            self.settings.buy_order_type,
        ) else {
            warn!(market = %self.market_slug, price = %snap.price, "Bet too small for one share");
            return;
        };

        self.side = Some(side);
        if !self.ledger.as_ref().is_some_and(|l| l.side == side) {
            self.ledger = Some(PositionLedger::new(side, snap.token_id.clone()));
        }

        let outcome = gateway.submit(request.clone()).await;
        self.on_order_outcome(OrderPurpose::Entry(side), &request, &outcome);

        if self.phase == DcaPhase::PositionOpen {
            self.ensure_brackets(snap, gateway).await;
        }
    }

    async fn poll_entry(&mut self, tick: &MarketTick, gateway: &OrderGateway) {
        let (Some(side), Some((order_id, limit))) = (self.side, self.pending_entry.clone()) else {
            self.phase = self.rearm_phase();
            return;
        };

        let state = match gateway.order_state(&order_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(market = %self.market_slug, order_id = %order_id, error = %e, "Entry status unknown");
                return;
            }
        };
        if state.is_open() {
            debug!(order_id = %order_id, "Entry still resting");
            return;
        }

        self.pending_entry = None;
        if self.record_buy(state.price.unwrap_or(limit), state.filled()) {
            self.phase = DcaPhase::PositionOpen;
            self.ensure_brackets(tick.side(side), gateway).await;
        } else {
            info!(market = %self.market_slug, side = %side, order_id = %order_id, "Entry expired unfilled, re-armed");
            self.armed[arm_index(side)] = true;
            self.phase = DcaPhase::Armed;
        }
    }

    async fn manage_position(&mut self, tick: &MarketTick, gateway: &OrderGateway) {
        let Some(side) = self.side else {
            return;
        };
        let snap = tick.side(side);

        if tick.seq % u64::from(self.settings.bracket_check_every.max(1)) == 0 {
            self.poll_brackets(snap, gateway).await;
            if self.phase == DcaPhase::Closed {
                return;
            }
        }

        self.poll_dca(gateway).await;
        self.maybe_average(snap, gateway).await;

        if self.rebracket {
            if !self.cancel_for_replacement(snap, gateway).await {
                return;
            }
            self.rebracket = false;
        }

        self.ensure_brackets(snap, gateway).await;
    }

    async fn maybe_average(&mut self, snap: &PriceSnapshot, gateway: &OrderGateway) {
        let (Some(step), Some(last)) = (self.settings.bet_step, self.last_bet_price) else {
            return;
        };
        if self.pending_dca.is_some() || snap.price < last + step {
            return;
        }

        let Some(request) = OrderRequest::buy_for_amount(
            &snap.token_id,
            snap.price,
            self.settings.amount_per_bet,
            snap.tick_size,
            self.settings.buy_order_type,
        ) else {
            return;
        };

        info!(market = %self.market_slug, price = %snap.price, last_bet = %last, step = %step, "DCA step reached");
        let outcome = gateway.submit(request.clone()).await;
        self.on_order_outcome(OrderPurpose::Dca, &request, &outcome);
    }

    async fn poll_dca(&mut self, gateway: &OrderGateway) {
        let Some((order_id, limit)) = self.pending_dca.clone() else {
            return;
        };
        match gateway.order_state(&order_id).await {
            Ok(state) if state.is_open() => {}
            Ok(state) => {
                self.pending_dca = None;
                if self.record_buy(state.price.unwrap_or(limit), state.filled()) {
                    self.rebracket = true;
                }
            }
            Err(e) => warn!(order_id = %order_id, error = %e, "DCA order status unknown"),
        }
    }

    /// Poll both brackets; a fill closes the position.
    async fn poll_brackets(&mut self, snap: &PriceSnapshot, gateway: &OrderGateway) {
        for purpose in BRACKETS {
            let Some(order_id) = self.bracket(purpose).order_id.clone() else {
                continue;
            };
            match gateway.order_state(&order_id).await {
                Ok(state) if state.is_filled() => {
                    self.bracket_filled(purpose, &state, snap, gateway).await;
                    return;
                }
                Ok(state) if state.is_open() => {}
                Ok(state) => {
                    warn!(
                        market = %self.market_slug,
                        bracket = %purpose,
                        order_id = %order_id,
                        status = ?state.status,
                        "Bracket gone without a fill, re-placing"
                    );
                    *self.bracket_mut(purpose) = Bracket::default();
                }
                Err(e) => warn!(bracket = %purpose, order_id = %order_id, error = %e, "Bracket status unknown"),
            }
        }
    }

    async fn bracket_filled(
        &mut self,
        purpose: OrderPurpose,
        state: &OrderState,
        snap: &PriceSnapshot,
        gateway: &OrderGateway,
    ) {
        let bracket = std::mem::take(self.bracket_mut(purpose));
        let price = state.price.or(bracket.price).unwrap_or(snap.price);
        info!(
            market = %self.market_slug,
            bracket = %purpose,
            order_id = ?bracket.order_id,
            price = %price,
            size = %state.filled(),
            "Bracket filled"
        );

        self.record_sell(price, state.filled());
        self.cancel_brackets_once(gateway).await;

        if self.phase != DcaPhase::Closed {
            self.exit_all(snap, gateway).await;
        }
    }

    /// Cancel both brackets before re-placing them. True once neither rests.
    async fn cancel_for_replacement(&mut self, snap: &PriceSnapshot, gateway: &OrderGateway) -> bool {
        let mut clear = true;
        for purpose in BRACKETS {
            let Some(order_id) = self.bracket(purpose).order_id.clone() else {
                continue;
            };
            let err = match gateway.cancel(&order_id).await {
                Ok(()) => {
                    debug!(bracket = %purpose, order_id = %order_id, "Bracket cancelled for replacement");
                    *self.bracket_mut(purpose) = Bracket::default();
                    continue;
                }
                Err(e) => e,
            };
            match gateway.order_state(&order_id).await {
                Ok(state) if state.is_filled() => {
                    self.bracket_filled(purpose, &state, snap, gateway).await;
                    return false;
                }
                Ok(state) if !state.is_open() => {
                    *self.bracket_mut(purpose) = Bracket::default();
                }
                _ => {
                    warn!(bracket = %purpose, order_id = %order_id, error = %err, "Bracket cancel failed, retrying next tick");
                    clear = false;
                }
            }
        }
        clear
    }

    /// Single cancel attempt for every resting bracket. Failures are kept for window-end cleanup.
    async fn cancel_brackets_once(&mut self, gateway: &OrderGateway) {
        for purpose in BRACKETS {
            let Some(order_id) = std::mem::take(self.bracket_mut(purpose)).order_id else {
                continue;
            };
            if let Err(e) = gateway.cancel(&order_id).await {
                debug!(bracket = %purpose, order_id = %order_id, error = %e, "Sibling cancel deferred");
                self.leftovers.push(order_id);
            }
        }
    }

    /// Shares that can actually be sold: the ledger size capped by the wallet balance.
    async fn sellable_size(&self, token_id: &str, open_size: Decimal, gateway: &OrderGateway) -> Decimal {
        match gateway.token_balance(token_id).await {
            Ok(balance) if balance < open_size => {
                warn!(
                    market = %self.market_slug,
                    ledger = %open_size,
                    balance = %balance,
                    "Wallet holds fewer shares than recorded, selling the balance"
                );
                balance
            }
            Ok(_) => open_size,
            Err(e) => {
                warn!(market = %self.market_slug, error = %e, "Balance unavailable, selling the recorded size");
                open_size
            }
        }
    }

    /// Place any missing bracket. A level the price has already passed exits at market.
    async fn ensure_brackets(&mut self, snap: &PriceSnapshot, gateway: &OrderGateway) {
        for purpose in BRACKETS {
            if self.phase != DcaPhase::PositionOpen {
                return;
            }
            if self.bracket(purpose).order_id.is_some() {
                continue;
            }
            let Some((token_id, avg_price, open_size)) = self
                .ledger
                .as_ref()
                .map(|l| (l.token_id.clone(), l.avg_price, l.open_size()))
            else {
                return;
            };

            let level = match purpose {
                OrderPurpose::TakeProfit => Some(self.settings.take_profit),
                _ => self.settings.stop_loss.stop_price(avg_price, snap.tick_size),
            };
            let Some(level) = level else {
                continue;
            };

            let breached = match purpose {
                OrderPurpose::TakeProfit => snap.price >= level,
                _ => snap.price <= level,
            };
            if breached {
                info!(
                    market = %self.market_slug,
                    bracket = %purpose,
                    level = %level,
                    price = %snap.price,
                    "Price already past bracket level, exiting"
                );
                self.exit_all(snap, gateway).await;
                return;
            }

            let size = self.sellable_size(&token_id, open_size, gateway).await;
            let Some(request) = OrderRequest::sell_shares(token_id, level, size, snap.tick_size, OrderType::GTC)
            else {
                debug!(market = %self.market_slug, bracket = %purpose, size = %size, "Nothing sellable for bracket");
                continue;
            };
            let outcome = gateway.submit(request.clone()).await;
            self.on_order_outcome(purpose, &request, &outcome);

            if self.phase == DcaPhase::Closed {
                self.cancel_brackets_once(gateway).await;
            }
        }
    }

    async fn exit_all(&mut self, snap: &PriceSnapshot, gateway: &OrderGateway) {
        self.cancel_brackets_once(gateway).await;

        let Some((token_id, open_size)) = self.ledger.as_ref().map(|l| (l.token_id.clone(), l.open_size())) else {
            return;
        };
        let size = self.sellable_size(&token_id, open_size, gateway).await;
        let Some(request) = OrderRequest::sell_shares(token_id, snap.price, size, snap.tick_size, OrderType::FAK)
        else {
            warn!(
                market = %self.market_slug,
                shares = %size,
                price = %snap.price,
                "Remainder below one sellable lot, left to settle"
            );
            self.phase = DcaPhase::Closed;
            return;
        };
        let outcome = gateway.submit(request.clone()).await;
        self.on_order_outcome(OrderPurpose::Exit, &request, &outcome);
    }
}

#[async_trait]
impl Strategy for DcaSnipe {
    fn name(&self) -> &'static str {
        "dca"
    }

    fn state_label(&self) -> String {
        match self.side {
            Some(side) => format!("{}({})", self.phase, side),
            None => self.phase.to_string(),
        }
    }

    async fn on_tick(&mut self, tick: &MarketTick, gateway: &OrderGateway) {
        if let Some(side) = self.side {
            self.last_price = tick.price(side);
        }
        match self.phase {
            DcaPhase::Closed => {}
            DcaPhase::Idle | DcaPhase::Armed => self.watch_entry(tick, gateway).await,
            DcaPhase::EntryPending => self.poll_entry(tick, gateway).await,
            DcaPhase::PositionOpen => self.manage_position(tick, gateway).await,
        }
    }

    fn on_order_outcome(&mut self, purpose: OrderPurpose, request: &OrderRequest, outcome: &OrderOutcome) {
        match (purpose, outcome) {
            (OrderPurpose::Entry(_), OrderOutcome::Filled { size, avg_price, .. }) => {
                if self.record_buy(*avg_price, *size) {
                    self.phase = DcaPhase::PositionOpen;
                }
            }
            (OrderPurpose::Entry(_), OrderOutcome::Pending { order_id }) => {
                self.pending_entry = Some((order_id.clone(), request.price));
                self.phase = DcaPhase::EntryPending;
            }
            (OrderPurpose::Entry(side), OrderOutcome::Cancelled { .. }) => {
                debug!(market = %self.market_slug, side = %side, "Entry unfilled, still armed");
                if self.open_size().is_zero() {
                    self.side = None;
                    self.ledger = None;
                }
            }
            (OrderPurpose::Entry(side), OrderOutcome::Rejected { reason }) => {
                warn!(market = %self.market_slug, side = %side, reason = %reason, "Entry rejected, side disarmed");
                self.armed[arm_index(side)] = false;
                if self.open_size().is_zero() {
                    self.side = None;
                    self.ledger = None;
                }
                self.phase = self.rearm_phase();
            }
            (OrderPurpose::Dca, OrderOutcome::Filled { size, avg_price, .. }) => {
                if self.record_buy(*avg_price, *size) {
                    self.rebracket = true;
                }
            }
            (OrderPurpose::Dca, OrderOutcome::Pending { order_id }) => {
                self.pending_dca = Some((order_id.clone(), request.price));
            }
            (OrderPurpose::Dca, OrderOutcome::Rejected { reason }) => {
                warn!(market = %self.market_slug, reason = %reason, "DCA buy rejected, waiting for the next step");
                self.last_bet_price = Some(self.last_price.max(request.price));
            }
            (OrderPurpose::Dca, OrderOutcome::Cancelled { .. }) => {}
            (OrderPurpose::TakeProfit | OrderPurpose::StopLoss, OrderOutcome::Pending { order_id }) => {
                info!(
                    market = %self.market_slug,
                    bracket = %purpose,
                    order_id = %order_id,
                    price = %request.price,
                    size = %request.size,
                    "Bracket placed"
                );
                *self.bracket_mut(purpose) = Bracket {
                    order_id: Some(order_id.clone()),
                    price: Some(request.price),
                };
            }
            (
                OrderPurpose::TakeProfit | OrderPurpose::StopLoss | OrderPurpose::Exit,
                OrderOutcome::Filled { size, avg_price, .. },
            ) => {
                if outcome.is_partial() {
                    let partial = TradingError::PartialFillAmbiguity {
                        requested: request.size,
                        filled: *size,
                    };
                    warn!(market = %self.market_slug, purpose = %purpose, error = %partial, "Exit partially filled");
                }
                self.record_sell(*avg_price, *size);
            }
            (_, OrderOutcome::Rejected { reason }) => {
                warn!(market = %self.market_slug, purpose = %purpose, reason = %reason, "Sell rejected, retrying next tick");
            }
            (_, OrderOutcome::Cancelled { .. }) => {
                warn!(market = %self.market_slug, purpose = %purpose, "Sell unfilled, retrying next tick");
            }
            (OrderPurpose::Exit, OrderOutcome::Pending { order_id }) => {
                self.leftovers.push(order_id.clone());
            }
        }
    }

    async fn on_window_end(&mut self, gateway: &OrderGateway, shutdown: &mut watch::Receiver<bool>) {
        let mut resting: Vec<String> = std::mem::take(&mut self.leftovers);
        resting.extend(self.pending_entry.take().map(|(id, _)| id));
        resting.extend(self.pending_dca.take().map(|(id, _)| id));
        for purpose in BRACKETS {
            resting.extend(std::mem::take(self.bracket_mut(purpose)).order_id);
        }

        if !resting.is_empty() {
            info!(market = %self.market_slug, orders = resting.len(), "Window over, cancelling resting orders");
            let unconfirmed = gateway.cancel_until_confirmed(&resting, shutdown).await;
            if !unconfirmed.is_empty() {
                warn!(market = %self.market_slug, ?unconfirmed, "Orders left unconfirmed at shutdown");
            }
        }

        if self.open_size() > Decimal::ZERO {
            info!(
                market = %self.market_slug,
                shares = %self.open_size(),
                "Window ended with an open position; it settles at resolution"
            );
        }
        self.phase = DcaPhase::Closed;
    }

    fn is_finished(&self) -> bool {
        self.phase == DcaPhase::Closed
    }

    fn summary(&self) -> WindowSummary {
        let ledger = self.ledger.as_ref();
        WindowSummary::Dca(DcaSummary {
            side: ledger.map(|l| l.side),
            phase: self.phase,
            buys: ledger.map(|l| l.fills.len()).unwrap_or_default(),
            shares: ledger.map(|l| l.total_size).unwrap_or_default(),
            avg_price: ledger.filter(|l| !l.fills.is_empty()).map(|l| l.avg_price),
            realized_pnl: ledger.and_then(|l| l.realized_pnl),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::StopLossMode;
    use crate::market::MockVenue;
    use crate::strategy::test_support::{gateway, market, tick};
    use crate::trading::Side;

    fn settings(stop_loss: StopLossMode, bet_step: Option<Decimal>) -> DcaSettings {
        DcaSettings {
            entry_price: dec!(0.60),
            amount_per_bet: dec!(1.0),
            take_profit: dec!(0.80),
            stop_loss,
            bet_step,
            buy_order_type: OrderType::FAK,
            bracket_check_every: 1,
        }
    }

    fn venue() -> Arc<MockVenue> {
        let venue = Arc::new(MockVenue::new());
        venue.set_price("down", dec!(0.40));
        venue
    }

    async fn step(engine: &mut DcaSnipe, venue: &MockVenue, gw: &OrderGateway, seq: u64, up: Decimal) {
        venue.set_price("up", up);
        engine.on_tick(&tick(seq, up, dec!(1) - up), gw).await;
    }

    fn buys(venue: &MockVenue) -> usize {
        venue.submissions().iter().filter(|r| r.side == Side::Buy).count()
    }

    #[tokio::test]
    async fn never_buys_without_arming() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        // DOWN sits at 0.35-0.30 and arms, but never reaches entry.
        step(&mut engine, &venue, &gw, 1, dec!(0.65)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.70)).await;
        assert_eq!(buys(&venue), 0);
        assert!(!engine.is_armed(Outcome::Up));

        step(&mut engine, &venue, &gw, 3, dec!(0.59)).await;
        assert!(engine.is_armed(Outcome::Up));
        assert_eq!(engine.phase(), DcaPhase::Armed);

        step(&mut engine, &venue, &gw, 4, dec!(0.61)).await;
        assert_eq!(buys(&venue), 1);
        assert_eq!(engine.phase(), DcaPhase::PositionOpen);
    }

    #[tokio::test]
    async fn stop_loss_fill_closes_with_loss() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        for (seq, price) in [(1, dec!(0.58)), (2, dec!(0.59)), (3, dec!(0.61))] {
            step(&mut engine, &venue, &gw, seq, price).await;
        }

        let ledger = engine.ledger().unwrap();
        assert_eq!(ledger.avg_price, dec!(0.61));
        assert_eq!(ledger.total_size, dec!(1));

        let open = venue.open_orders();
        let prices: Vec<Decimal> = open.iter().map(|(_, r)| r.price).collect();
        assert_eq!(prices, vec![dec!(0.8), dec!(0.58)]);
        assert!(open.iter().all(|(_, r)| r.side == Side::Sell && r.order_type == OrderType::GTC));

        step(&mut engine, &venue, &gw, 4, dec!(0.58)).await;
        assert_eq!(engine.phase(), DcaPhase::Closed);
        assert_eq!(engine.ledger().unwrap().realized_pnl, Some(dec!(-0.03)));
        assert!(venue.open_orders().is_empty());
        assert_eq!(venue.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn closed_window_never_rearms() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        for (seq, price) in [(1, dec!(0.59)), (2, dec!(0.61)), (3, dec!(0.81))] {
            step(&mut engine, &venue, &gw, seq, price).await;
        }
        assert!(engine.is_finished());
        assert!(engine.ledger().unwrap().realized_pnl.unwrap() > Decimal::ZERO);

        for (seq, price) in [(4, dec!(0.55)), (5, dec!(0.65))] {
            step(&mut engine, &venue, &gw, seq, price).await;
        }
        assert_eq!(buys(&venue), 1);
    }

    #[tokio::test]
    async fn rejected_entry_disarms_the_side() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::BreakEven, None), &market());

        step(&mut engine, &venue, &gw, 1, dec!(0.59)).await;
        venue.reject_next("not enough balance / allowance");
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        assert!(!engine.is_armed(Outcome::Up));
        assert!(engine.ledger().is_none());

        step(&mut engine, &venue, &gw, 3, dec!(0.62)).await;
        assert_eq!(buys(&venue), 1);

        step(&mut engine, &venue, &gw, 4, dec!(0.59)).await;
        step(&mut engine, &venue, &gw, 5, dec!(0.61)).await;
        assert_eq!(buys(&venue), 2);
        assert_eq!(engine.phase(), DcaPhase::PositionOpen);
    }

    #[tokio::test]
    async fn unfilled_entry_leaves_the_other_side_free() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        venue.set_price("up", dec!(0.59));
        venue.set_price("down", dec!(0.59));
        engine.on_tick(&tick(1, dec!(0.59), dec!(0.59)), &gw).await;

        // UP triggers but the book has already moved away.
        venue.set_price("up", dec!(0.65));
        engine.on_tick(&tick(2, dec!(0.61), dec!(0.59)), &gw).await;
        assert!(engine.ledger().is_none());
        assert_eq!(engine.phase(), DcaPhase::Armed);

        venue.set_price("up", dec!(0.59));
        venue.set_price("down", dec!(0.61));
        engine.on_tick(&tick(3, dec!(0.59), dec!(0.61)), &gw).await;

        let ledger = engine.ledger().unwrap();
        assert_eq!((ledger.side, ledger.token_id.as_str()), (Outcome::Down, "down"));
        assert_eq!(ledger.total_size, dec!(1));
        assert_eq!(engine.state_label(), "position_open(down)");

        let brackets: Vec<String> = venue.open_orders().into_iter().map(|(_, r)| r.token_id).collect();
        assert_eq!(brackets, ["down", "down"]);
    }

    #[tokio::test]
    async fn break_even_stop_follows_the_average() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::BreakEven, Some(dec!(0.05))), &market());

        step(&mut engine, &venue, &gw, 1, dec!(0.55)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        let stop_prices: Vec<Decimal> = venue
            .open_orders()
            .iter()
            .map(|(_, r)| r.price)
            .filter(|p| *p < dec!(0.8))
            .collect();
        assert_eq!(stop_prices, vec![dec!(0.6)]);

        // Not a full step yet.
        step(&mut engine, &venue, &gw, 3, dec!(0.65)).await;
        assert_eq!(buys(&venue), 1);

        step(&mut engine, &venue, &gw, 4, dec!(0.66)).await;
        assert_eq!(buys(&venue), 2);

        let ledger = engine.ledger().unwrap();
        assert_eq!(ledger.total_size, dec!(2.5));
        assert_eq!(ledger.avg_price, dec!(0.64));

        assert_eq!(venue.cancelled().len(), 2);
        let open = venue.open_orders();
        let prices: Vec<Decimal> = open.iter().map(|(_, r)| r.price).collect();
        assert_eq!(prices, vec![dec!(0.8), dec!(0.63)]);
    }

    #[tokio::test]
    async fn offset_stop_is_replaced_after_each_average() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Offset(dec!(0.04)), Some(dec!(0.05))), &market());

        step(&mut engine, &venue, &gw, 1, dec!(0.55)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        let open: Vec<(Decimal, Decimal)> = venue.open_orders().iter().map(|(_, r)| (r.price, r.size)).collect();
        assert_eq!(open, vec![(dec!(0.8), dec!(1)), (dec!(0.57), dec!(1))]);

        step(&mut engine, &venue, &gw, 3, dec!(0.66)).await;
        assert_eq!(buys(&venue), 2);
        assert_eq!(engine.ledger().unwrap().avg_price, dec!(0.64));
        assert_eq!(venue.cancelled().len(), 2);
        let open: Vec<(Decimal, Decimal)> = venue.open_orders().iter().map(|(_, r)| (r.price, r.size)).collect();
        assert_eq!(open, vec![(dec!(0.8), dec!(2.5)), (dec!(0.6), dec!(2.5))]);

        step(&mut engine, &venue, &gw, 4, dec!(0.60)).await;
        assert_eq!(engine.phase(), DcaPhase::Closed);
        assert_eq!(engine.ledger().unwrap().realized_pnl, Some(dec!(-0.10)));
        assert!(venue.open_orders().is_empty());
    }

    #[tokio::test]
    async fn brackets_never_sell_more_than_the_wallet_holds() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        venue.set_balance("up", dec!(0.5));
        step(&mut engine, &venue, &gw, 1, dec!(0.59)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        assert_eq!(engine.ledger().unwrap().open_size(), dec!(1));
        let sizes: Vec<Decimal> = venue.open_orders().iter().map(|(_, r)| r.size).collect();
        assert_eq!(sizes, vec![dec!(0.5), dec!(0.5)]);

        // The stop sells the whole balance; nothing is left to exit.
        venue.set_balance("up", dec!(0));
        step(&mut engine, &venue, &gw, 3, dec!(0.58)).await;
        assert_eq!(engine.phase(), DcaPhase::Closed);
        assert_eq!(engine.ledger().unwrap().realized_pnl, Some(dec!(-0.015)));
        assert!(venue.submissions().iter().all(|r| r.order_type != OrderType::FAK || r.side == Side::Buy));
        assert!(venue.open_orders().is_empty());
    }

    #[tokio::test]
    async fn missing_stop_past_its_level_exits_at_market() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());

        step(&mut engine, &venue, &gw, 1, dec!(0.59)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        let (_, stop) = engine.bracket_ids();
        let stop = stop.unwrap().to_string();

        // The stop disappears from the book without filling.
        gw.cancel(&stop).await.unwrap();
        step(&mut engine, &venue, &gw, 3, dec!(0.57)).await;

        assert_eq!(engine.phase(), DcaPhase::Closed);
        assert_eq!(engine.ledger().unwrap().realized_pnl, Some(dec!(-0.04)));
        let last = venue.submissions().pop().unwrap();
        assert_eq!((last.side, last.order_type), (Side::Sell, OrderType::FAK));
        assert!(venue.open_orders().is_empty());
    }

    #[tokio::test]
    async fn pending_entry_returns_to_armed_when_unfilled() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut dca = settings(StopLossMode::Fixed(dec!(0.58)), None);
        dca.buy_order_type = OrderType::GTC;
        let mut engine = DcaSnipe::new(dca, &market());

        step(&mut engine, &venue, &gw, 1, dec!(0.59)).await;
        // The snapshot says 0.61 but the book has moved up to 0.62.
        venue.set_price("up", dec!(0.62));
        engine.on_tick(&tick(2, dec!(0.61), dec!(0.39)), &gw).await;
        assert_eq!(engine.phase(), DcaPhase::EntryPending);

        let (id, _) = venue.open_orders().pop().unwrap();
        gw.cancel(&id).await.unwrap();
        step(&mut engine, &venue, &gw, 3, dec!(0.62)).await;
        assert_eq!(engine.phase(), DcaPhase::Armed);
        assert!(engine.is_armed(Outcome::Up));
    }

    #[tokio::test]
    async fn window_end_cancels_brackets() {
        let venue = venue();
        let gw = gateway(&venue);
        let mut engine = DcaSnipe::new(settings(StopLossMode::Fixed(dec!(0.58)), None), &market());
        step(&mut engine, &venue, &gw, 1, dec!(0.59)).await;
        step(&mut engine, &venue, &gw, 2, dec!(0.61)).await;
        assert_eq!(venue.open_orders().len(), 2);

        let (_tx, mut shutdown) = watch::channel(false);
        engine.on_window_end(&gw, &mut shutdown).await;

        assert!(venue.open_orders().is_empty());
        assert!(engine.is_finished());
        let WindowSummary::Dca(summary) = engine.summary() else {
            panic!("expected a DCA summary");
        };
        assert_eq!(summary.side, Some(Outcome::Up));
        assert_eq!(summary.buys, 1);
        assert_eq!(summary.realized_pnl, None);
    }
}
