//! Per-window trading engines.
//!
//! Both strategies share one tick-driven contract: the scheduler hands each
//! engine a [`MarketTick`] per poll interval, the engine decides and submits
//! through the [`OrderGateway`], and every outcome flows back through
//! [`Strategy::on_order_outcome`] before the next tick.

pub mod arbitrage;
pub mod dca;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::watch;

use crate::config::{ArbSettings, Config, DcaSettings, StrategyParams};
use crate::error::ConfigError;
use crate::feed::PriceSnapshot;
use crate::market::{Asset, Market, Outcome};
use crate::trading::{OrderGateway, OrderOutcome, OrderRequest};

pub use arbitrage::{ArbSummary, YesNoArbitrage};
pub use dca::{DcaPhase, DcaSnipe, DcaSummary};

/// Which engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum StrategyKind {
    /// Armed entry with take-profit/stop-loss brackets and optional DCA.
    #[strum(serialize = "dca")]
    Dca,
    /// Buy each side once inside a price band.
    #[strum(to_string = "yesno", serialize = "yes_no", serialize = "arb")]
    YesNo,
}

/// Resolved per-asset settings for the selected strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StrategySettings {
    /// DCA snipe.
    Dca(DcaSettings),
    /// YES+NO capture.
    YesNo(ArbSettings),
}

impl StrategySettings {
    /// Resolve settings for one asset. Any inconsistency is fatal.
    pub fn resolve(
        kind: StrategyKind,
        params: &StrategyParams,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        Ok(match kind {
            StrategyKind::Dca => StrategySettings::Dca(params.resolve_dca(config)?),
            StrategyKind::YesNo => StrategySettings::YesNo(params.resolve_arb(config)?),
        })
    }

    /// Load and resolve settings for every asset.
    pub fn load_all(
        config: &Config,
        assets: &[Asset],
    ) -> Result<Vec<(Asset, StrategySettings, std::time::Duration)>, ConfigError> {
        let kind = config.strategy_kind()?;
        assets
            .iter()
            .map(|asset| {
                let params = StrategyParams::load(*asset)?;
                let settings = Self::resolve(kind, &params, config)?;
                Ok((*asset, settings, params.poll_interval()?))
            })
            .collect()
    }

    /// Strategy kind of these settings.
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategySettings::Dca(_) => StrategyKind::Dca,
            StrategySettings::YesNo(_) => StrategyKind::YesNo,
        }
    }

    /// Fresh engine for one window.
    pub fn build(&self, market: &Market) -> Box<dyn Strategy> {
        match self {
            StrategySettings::Dca(settings) => Box::new(DcaSnipe::new(settings.clone(), market)),
            StrategySettings::YesNo(settings) => {
                Box::new(YesNoArbitrage::new(settings.clone(), market))
            }
        }
    }
}

/// Prices of both sides of a market at one poll.
#[derive(Debug, Clone)]
pub struct MarketTick {
    /// UP token snapshot.
    pub up: PriceSnapshot,
    /// DOWN token snapshot.
    pub down: PriceSnapshot,
    /// Tick number within the window, starting at 1.
    pub seq: u64,
}

impl MarketTick {
    /// Snapshot for one side.
    pub fn side(&self, outcome: Outcome) -> &PriceSnapshot {
        match outcome {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    /// Price for one side.
    pub fn price(&self, outcome: Outcome) -> Decimal {
        self.side(outcome).price
    }
}

/// Why an order was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderPurpose {
    /// Opening buy on a side.
    Entry(Outcome),
    /// Additional averaging buy.
    Dca,
    /// Take-profit bracket.
    TakeProfit,
    /// Stop-loss bracket.
    StopLoss,
    /// Immediate exit of the whole position.
    Exit,
}

impl std::fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderPurpose::Entry(side) => write!(f, "entry-{}", side),
            OrderPurpose::Dca => write!(f, "dca"),
            OrderPurpose::TakeProfit => write!(f, "take-profit"),
            OrderPurpose::StopLoss => write!(f, "stop-loss"),
            OrderPurpose::Exit => write!(f, "exit"),
        }
    }
}

/// What an engine reports when its window closes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum WindowSummary {
    /// DCA snipe result.
    Dca(DcaSummary),
    /// YES+NO capture result.
    YesNo(ArbSummary),
}

/// A per-window trading engine.
///
/// Ticks for one engine never overlap; the scheduler awaits each call
/// before issuing the next.
#[async_trait]
pub trait Strategy: Send {
    /// Strategy name for logs and status.
    fn name(&self) -> &'static str;

    /// Short state label for the status endpoint.
    fn state_label(&self) -> String;

    /// Process one price observation.
    async fn on_tick(&mut self, tick: &MarketTick, gateway: &OrderGateway);

    /// Apply the outcome of an order this engine submitted.
    fn on_order_outcome(&mut self, purpose: OrderPurpose, request: &OrderRequest, outcome: &OrderOutcome);

    /// Cancel everything still resting. Retries until confirmed or shutdown.
    async fn on_window_end(&mut self, gateway: &OrderGateway, shutdown: &mut watch::Receiver<bool>);

    /// Nothing left to do this window.
    fn is_finished(&self) -> bool;

    /// Result of the window so far.
    fn summary(&self) -> WindowSummary;
}
