//! YES+NO capture.
//!
//! Each side is bought once per window when its price lies inside the
//! configured band. Holding one UP and one DOWN share pays exactly 1 at
//! resolution, so a combined price under 1 is locked-in profit. Nothing is
//! sold; the engine only waits for the window to end.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{MarketTick, OrderPurpose, Strategy, WindowSummary};
use crate::config::ArbSettings;
use crate::market::{Market, Outcome};
use crate::trading::{MarketPositions, OrderGateway, OrderOutcome, OrderRequest};

/// Per-side buy state.
#[derive(Debug, Clone, Default)]
struct SideSlot {
    /// One-shot used.
    bought: bool,
    /// Rejected inside the band; cleared when the price leaves it.
    blocked: bool,
    /// Resting buy and its limit.
    pending: Option<(String, Decimal)>,
}

/// Window result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbSummary {
    /// UP average fill price.
    pub up_price: Option<Decimal>,
    /// UP shares.
    pub up_shares: Decimal,
    /// DOWN average fill price.
    pub down_price: Option<Decimal>,
    /// DOWN shares.
    pub down_shares: Decimal,
    /// UP + DOWN price, when both filled.
    pub combined_price: Option<Decimal>,
    /// 1 - combined.
    pub profit_per_share: Option<Decimal>,
    /// Profit per share times matched pairs.
    pub guaranteed_profit: Decimal,
}

/// YES+NO capture engine for one window.
#[derive(Debug)]
pub struct YesNoArbitrage {
    settings: ArbSettings,
    market_slug: String,
    positions: MarketPositions,
    up: SideSlot,
    down: SideSlot,
}

impl YesNoArbitrage {
    /// Fresh engine for `market`.
    pub fn new(settings: ArbSettings, market: &Market) -> Self {
        Self {
            settings,
            market_slug: market.slug.clone(),
            positions: MarketPositions::new(&market.up_token_id, &market.down_token_id),
            up: SideSlot::default(),
            down: SideSlot::default(),
        }
    }

    /// Both ledgers.
    pub fn positions(&self) -> &MarketPositions {
        &self.positions
    }

    /// Whether a side has used its one buy.
    pub fn is_bought(&self, side: Outcome) -> bool {
        self.slot(side).bought
    }

    fn slot(&self, side: Outcome) -> &SideSlot {
        match side {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    fn slot_mut(&mut self, side: Outcome) -> &mut SideSlot {
        match side {
            Outcome::Up => &mut self.up,
            Outcome::Down => &mut self.down,
        }
    }

    fn record_buy(&mut self, side: Outcome, price: Decimal, size: Decimal) {
        if self.positions.side_mut(side).record_fill(price, size) {
            info!(market = %self.market_slug, side = %side, price = %price, size = %size, "Side filled");
        }
    }

    async fn poll_pending(&mut self, side: Outcome, gateway: &OrderGateway) {
        let Some((order_id, limit)) = self.slot(side).pending.clone() else {
            return;
        };
        match gateway.order_state(&order_id).await {
            Ok(state) if state.is_open() => {}
            Ok(state) => {
                self.slot_mut(side).pending = None;
                self.record_buy(side, state.price.unwrap_or(limit), state.filled());
            }
            Err(e) => warn!(market = %self.market_slug, order_id = %order_id, error = %e, "Pending buy status unknown"),
        }
    }
}

#[async_trait]
impl Strategy for YesNoArbitrage {
    fn name(&self) -> &'static str {
        "yesno"
    }

    fn state_label(&self) -> String {
        match (self.up.bought, self.down.bought) {
            (false, false) => "idle".to_string(),
            (true, true) => "both_filled".to_string(),
            _ => "partially_filled".to_string(),
        }
    }

    async fn on_tick(&mut self, tick: &MarketTick, gateway: &OrderGateway) {
        for side in Outcome::BOTH {
            if self.slot(side).bought {
                self.poll_pending(side, gateway).await;
                continue;
            }

            let snap = tick.side(side);
            if !self.settings.price_range.contains(snap.price) {
                self.slot_mut(side).blocked = false;
                continue;
            }
            if self.slot(side).blocked {
                continue;
            }

            let Some(request) = OrderRequest::buy_for_amount(
                &snap.token_id,
                snap.price,
                self.settings.amount_to_buy,
                snap.tick_size,
                self.settings.buy_order_type,
            ) else {
                continue;
            };

            info!(
                market = %self.market_slug,
                side = %side,
                price = %snap.price,
                range = %self.settings.price_range,
                "Price in range, buying"
            );
            let outcome = gateway.submit(request.clone()).await;
            self.on_order_outcome(OrderPurpose::Entry(side), &request, &outcome);
        }
    }

    fn on_order_outcome(&mut self, purpose: OrderPurpose, request: &OrderRequest, outcome: &OrderOutcome) {
        let OrderPurpose::Entry(side) = purpose else {
            return;
        };
        match outcome {
            OrderOutcome::Filled { size, avg_price, .. } => {
                self.slot_mut(side).bought = true;
                self.record_buy(side, *avg_price, *size);
            }
            OrderOutcome::Pending { order_id } => {
                let slot = self.slot_mut(side);
                slot.bought = true;
                slot.pending = Some((order_id.clone(), request.price));
            }
            OrderOutcome::Cancelled { .. } => {
                debug!(market = %self.market_slug, side = %side, "Buy unfilled, will retry");
            }
            OrderOutcome::Rejected { reason } => {
                warn!(market = %self.market_slug, side = %side, reason = %reason, "Buy rejected, waiting for price to re-enter range");
                self.slot_mut(side).blocked = true;
            }
        }
    }

    async fn on_window_end(&mut self, gateway: &OrderGateway, shutdown: &mut watch::Receiver<bool>) {
        let resting: Vec<String> = Outcome::BOTH
            .iter()
            .filter_map(|side| self.slot_mut(*side).pending.take().map(|(id, _)| id))
            .collect();
        if !resting.is_empty() {
            let unconfirmed = gateway.cancel_until_confirmed(&resting, shutdown).await;
            if !unconfirmed.is_empty() {
                warn!(market = %self.market_slug, ?unconfirmed, "Orders left unconfirmed at shutdown");
            }
        }

        let WindowSummary::YesNo(summary) = self.summary() else {
            return;
        };
        info!(
            market = %self.market_slug,
            up_price = ?summary.up_price,
            up_shares = %summary.up_shares,
            down_price = ?summary.down_price,
            down_shares = %summary.down_shares,
            combined = ?summary.combined_price,
            profit_per_share = ?summary.profit_per_share,
            guaranteed_profit = %summary.guaranteed_profit,
            "Window summary"
        );
    }

    fn is_finished(&self) -> bool {
        self.up.bought && self.down.bought && self.up.pending.is_none() && self.down.pending.is_none()
    }

    fn summary(&self) -> WindowSummary {
        let filled = |side: Outcome| {
            let ledger = self.positions.side(side);
            (!ledger.fills.is_empty()).then_some(ledger.avg_price)
        };
        let up_price = filled(Outcome::Up);
        let down_price = filled(Outcome::Down);
        let combined_price = up_price.zip(down_price).map(|(u, d)| u + d);
        let profit_per_share = combined_price.map(|c| Decimal::ONE - c);

        WindowSummary::YesNo(ArbSummary {
            up_price,
            up_shares: self.positions.up.total_size,
            down_price,
            down_shares: self.positions.down.total_size,
            combined_price,
            profit_per_share,
            guaranteed_profit: profit_per_share
                .map(|p| p * self.positions.pairs())
                .unwrap_or_default(),
        })
    }
}
