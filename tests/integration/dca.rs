//! Full DCA snipe windows against the in-memory venue.

use polymarket_updown::config::{DcaSettings, StopLossMode};
use polymarket_updown::market::Outcome;
use polymarket_updown::strategy::{DcaPhase, DcaSummary, StrategySettings, WindowSummary};
use polymarket_updown::trading::{OrderType, Side};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use crate::support::{gateway, market, move_to, venue};

fn settings(stop_loss: StopLossMode, bet_step: Option<Decimal>) -> StrategySettings {
    StrategySettings::Dca(DcaSettings {
        entry_price: dec!(0.60),
        amount_per_bet: dec!(1.0),
        take_profit: dec!(0.80),
        stop_loss,
        bet_step,
        buy_order_type: OrderType::FAK,
        bracket_check_every: 1,
    })
}

fn dca_summary(summary: WindowSummary) -> DcaSummary {
    match summary {
        WindowSummary::Dca(summary) => summary,
        other => panic!("expected a DCA summary, got {:?}", other),
    }
}

#[tokio::test]
async fn stop_loss_window() {
    let venue = venue(dec!(0.62), dec!(0.38));
    let gw = gateway(&venue);
    let mut engine = settings(StopLossMode::Fixed(dec!(0.58)), None).build(&market());

    for (seq, up) in [(1, dec!(0.58)), (2, dec!(0.59)), (3, dec!(0.61))] {
        engine.on_tick(&move_to(&venue, seq, up, Decimal::ONE - up), &gw).await;
    }
    assert_eq!(engine.state_label(), "position_open(up)");

    let placed: Vec<(Side, OrderType, Decimal, Decimal)> = venue
        .submissions()
        .iter()
        .map(|r| (r.side, r.order_type, r.price, r.size))
        .collect();
    assert_eq!(
        placed,
        vec![
            (Side::Buy, OrderType::FAK, dec!(0.61), dec!(1)),
            (Side::Sell, OrderType::GTC, dec!(0.8), dec!(1)),
            (Side::Sell, OrderType::GTC, dec!(0.58), dec!(1)),
        ]
    );
    let take_profit_id = venue.open_orders()[0].0.clone();

    engine.on_tick(&move_to(&venue, 4, dec!(0.58), dec!(0.42)), &gw).await;
    assert!(engine.is_finished());
    assert_eq!(venue.cancelled(), vec![take_profit_id]);
    assert!(venue.open_orders().is_empty());

    // Later dips and recoveries never re-enter.
    for (seq, up) in [(5, dec!(0.50)), (6, dec!(0.65))] {
        engine.on_tick(&move_to(&venue, seq, up, Decimal::ONE - up), &gw).await;
    }
    assert_eq!(venue.submissions().len(), 3);

    let (_tx, mut shutdown) = watch::channel(false);
    engine.on_window_end(&gw, &mut shutdown).await;

    let summary = dca_summary(engine.summary());
    assert_eq!(summary.side, Some(Outcome::Up));
    assert_eq!(summary.phase, DcaPhase::Closed);
    assert_eq!(summary.buys, 1);
    assert_eq!(summary.realized_pnl, Some(dec!(-0.03)));
}

#[tokio::test]
async fn take_profit_after_averaging_up() {
    let venue = venue(dec!(0.55), dec!(0.45));
    let gw = gateway(&venue);
    let mut engine = settings(StopLossMode::BreakEven, Some(dec!(0.05))).build(&market());

    engine.on_tick(&move_to(&venue, 1, dec!(0.55), dec!(0.45)), &gw).await;
    assert_eq!(engine.state_label(), "armed");

    engine.on_tick(&move_to(&venue, 2, dec!(0.61), dec!(0.39)), &gw).await;
    engine.on_tick(&move_to(&venue, 3, dec!(0.66), dec!(0.34)), &gw).await;

    let buys: Vec<(Decimal, Decimal)> = venue
        .submissions()
        .iter()
        .filter(|r| r.side == Side::Buy)
        .map(|r| (r.price, r.size))
        .collect();
    assert_eq!(buys, vec![(dec!(0.61), dec!(1)), (dec!(0.66), dec!(1.5))]);

    // Brackets follow the new size and average.
    let resting: Vec<(Decimal, Decimal)> = venue
        .open_orders()
        .iter()
        .map(|(_, r)| (r.price, r.size))
        .collect();
    assert_eq!(resting, vec![(dec!(0.8), dec!(2.5)), (dec!(0.63), dec!(2))]);
    assert_eq!(venue.cancelled().len(), 2);

    engine.on_tick(&move_to(&venue, 4, dec!(0.80), dec!(0.20)), &gw).await;
    assert!(engine.is_finished());
    assert_eq!(venue.cancelled().len(), 3);
    assert!(venue.open_orders().is_empty());

    let summary = dca_summary(engine.summary());
    assert_eq!(summary.buys, 2);
    assert_eq!(summary.shares, dec!(2.5));
    assert_eq!(summary.avg_price, Some(dec!(0.64)));
    assert_eq!(summary.realized_pnl, Some(dec!(0.40)));
}

#[tokio::test]
async fn no_trade_without_a_dip_below_entry() {
    let venue = venue(dec!(0.52), dec!(0.48));
    let gw = gateway(&venue);
    let mut engine = StrategySettings::Dca(DcaSettings {
        entry_price: dec!(0.40),
        amount_per_bet: dec!(1.0),
        take_profit: dec!(0.90),
        stop_loss: StopLossMode::Disabled,
        bet_step: None,
        buy_order_type: OrderType::FAK,
        bracket_check_every: 1,
    })
    .build(&market());

    for (seq, up) in (1..).zip([dec!(0.52), dec!(0.58), dec!(0.45), dec!(0.42), dec!(0.55)]) {
        engine.on_tick(&move_to(&venue, seq, up, Decimal::ONE - up), &gw).await;
    }

    assert!(venue.submissions().is_empty());
    assert_eq!(engine.state_label(), "idle");

    let (_tx, mut shutdown) = watch::channel(false);
    engine.on_window_end(&gw, &mut shutdown).await;
    let summary = dca_summary(engine.summary());
    assert_eq!(summary.side, None);
    assert_eq!(summary.buys, 0);
}

#[tokio::test]
async fn stop_remainder_below_one_lot_is_left_to_settle() {
    let venue = venue(dec!(0.55), dec!(0.45));
    let gw = gateway(&venue);
    let mut engine = settings(StopLossMode::BreakEven, Some(dec!(0.05))).build(&market());

    for (seq, up) in [(1, dec!(0.55)), (2, dec!(0.61)), (3, dec!(0.66))] {
        engine.on_tick(&move_to(&venue, seq, up, Decimal::ONE - up), &gw).await;
    }

    // The stop covers 2 of 2.5 shares; half a share at 0.63 is below one
    // whole-cent lot and stays to settle.
    engine.on_tick(&move_to(&venue, 4, dec!(0.63), dec!(0.37)), &gw).await;
    assert!(engine.is_finished());

    let last = venue.submissions().pop().unwrap();
    assert_eq!((last.side, last.order_type, last.size), (Side::Sell, OrderType::GTC, dec!(2)));
    assert!(venue.open_orders().is_empty());

    let summary = dca_summary(engine.summary());
    assert_eq!(summary.realized_pnl, Some(dec!(-0.02)));
}

#[tokio::test]
async fn partial_entry_fill_sizes_the_brackets() {
    let venue = venue(dec!(0.55), dec!(0.45));
    let gw = gateway(&venue);
    let mut engine = settings(StopLossMode::Fixed(dec!(0.58)), None).build(&market());

    engine.on_tick(&move_to(&venue, 1, dec!(0.55), dec!(0.45)), &gw).await;
    venue.set_fill_ratio(dec!(0.5));
    engine.on_tick(&move_to(&venue, 2, dec!(0.61), dec!(0.39)), &gw).await;

    let resting: Vec<(Decimal, Decimal)> = venue
        .open_orders()
        .iter()
        .map(|(_, r)| (r.price, r.size))
        .collect();
    assert_eq!(resting, vec![(dec!(0.8), dec!(0.5)), (dec!(0.58), dec!(0.5))]);

    let summary = dca_summary(engine.summary());
    assert_eq!(summary.shares, dec!(0.5));
    assert_eq!(summary.phase, DcaPhase::PositionOpen);
}
