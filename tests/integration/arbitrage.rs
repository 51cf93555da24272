//! Full YES+NO capture windows against the in-memory venue.

use polymarket_updown::config::ArbSettings;
use polymarket_updown::strategy::{ArbSummary, StrategySettings, WindowSummary};
use polymarket_updown::trading::{OrderType, Side};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use crate::support::{gateway, market, move_to, venue, DOWN, UP};

fn settings(range: &str) -> StrategySettings {
    StrategySettings::YesNo(ArbSettings {
        price_range: range.parse().unwrap(),
        amount_to_buy: dec!(1.0),
        buy_order_type: OrderType::FAK,
    })
}

fn arb_summary(summary: WindowSummary) -> ArbSummary {
    match summary {
        WindowSummary::YesNo(summary) => summary,
        other => panic!("expected a YES+NO summary, got {:?}", other),
    }
}

#[tokio::test]
async fn both_sides_captured_under_a_dollar() {
    let venue = venue(dec!(0.50), dec!(0.55));
    let gw = gateway(&venue);
    let mut engine = settings("0.40-0.45").build(&market());

    let path = [
        (dec!(0.50), dec!(0.55)),
        (dec!(0.44), dec!(0.55)),
        (dec!(0.43), dec!(0.56)),
        (dec!(0.44), dec!(0.425)),
        (dec!(0.41), dec!(0.42)),
        (dec!(0.40), dec!(0.40)),
    ];
    let mut labels = Vec::new();
    for (seq, (up, down)) in (1..).zip(path) {
        engine.on_tick(&move_to(&venue, seq, up, down), &gw).await;
        labels.push(engine.state_label());
    }

    assert_eq!(
        labels,
        ["idle", "partially_filled", "partially_filled", "both_filled", "both_filled", "both_filled"]
    );

    let buys: Vec<(String, Side, Decimal, Decimal)> = venue
        .submissions()
        .into_iter()
        .map(|r| (r.token_id, r.side, r.price, r.size))
        .collect();
    // The DOWN limit aligns up to the coarse tick; the fill lands at the market.
    assert_eq!(
        buys,
        vec![
            (UP.to_string(), Side::Buy, dec!(0.44), dec!(2.25)),
            (DOWN.to_string(), Side::Buy, dec!(0.43), dec!(2)),
        ]
    );

    let (_tx, mut shutdown) = watch::channel(false);
    engine.on_window_end(&gw, &mut shutdown).await;

    let summary = arb_summary(engine.summary());
    assert_eq!(summary.combined_price, Some(dec!(0.865)));
    assert_eq!(summary.profit_per_share, Some(dec!(0.135)));
    assert_eq!(summary.up_shares, dec!(2.25));
    assert_eq!(summary.down_shares, dec!(2));
    assert_eq!(summary.guaranteed_profit, dec!(0.27));
}

#[tokio::test]
async fn one_sided_window_reports_no_guarantee() {
    let venue = venue(dec!(0.50), dec!(0.50));
    let gw = gateway(&venue);
    let mut engine = settings("0.40-0.45").build(&market());

    for (seq, (up, down)) in (1..).zip([
        (dec!(0.52), dec!(0.48)),
        (dec!(0.45), dec!(0.55)),
        (dec!(0.30), dec!(0.70)),
    ]) {
        engine.on_tick(&move_to(&venue, seq, up, down), &gw).await;
    }
    assert!(!engine.is_finished());

    let (_tx, mut shutdown) = watch::channel(false);
    engine.on_window_end(&gw, &mut shutdown).await;

    let summary = arb_summary(engine.summary());
    assert_eq!(summary.up_price, Some(dec!(0.45)));
    assert_eq!(summary.down_price, None);
    assert_eq!(summary.combined_price, None);
    assert_eq!(summary.guaranteed_profit, Decimal::ZERO);
    assert_eq!(venue.submissions().len(), 1);
}
