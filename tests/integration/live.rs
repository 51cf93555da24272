//! Tests against the real Polymarket endpoints.
//!
//! The network tests are ignored by default. The address test also needs a
//! real POLYMARKET_PRIVATE_KEY in the environment or `.env`.

use polymarket_updown::config::Config;
use polymarket_updown::feed::FallbackSource;
use polymarket_updown::market::{discover_active_market, http_client, Asset, Interval, PolymarketClient};
use polymarket_updown::signing;
use rust_decimal::Decimal;

const TEST_KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn public_config() -> Config {
    Config::from_pairs(vec![("POLYMARKET_PRIVATE_KEY".to_string(), TEST_KEY.to_string())]).unwrap()
}

/// Get a config with real credentials from the environment.
fn credentialed_config() -> Option<Config> {
    let config = Config::load().ok()?;
    config.validate_credentials().ok()?;
    if config.polymarket_private_key.starts_with("0x1234") {
        return None;
    }
    Some(config)
}

#[test]
fn signing_utilities_work_offline() {
    let address = signing::address_from_private_key(TEST_KEY).unwrap();
    assert!(address.starts_with("0x"));
    assert_eq!(address.len(), 42);
    assert_eq!(signing::signature_type_code(2), 2);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn discovers_the_active_btc_window() {
    let config = public_config();
    let http = http_client(config.http_timeout_ms).unwrap();

    let market = discover_active_market(&http, &config.polymarket_gamma_url, Asset::Btc, Interval::M15)
        .await
        .unwrap();

    println!("Active window: {} ({} left)", market.slug, market.time_remaining_str());
    assert!(market.slug.starts_with("btc-updown-15m-"));
    assert!(!market.is_closed());
    assert_ne!(market.up_token_id, market.down_token_id);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn fallback_midpoints_for_both_sides() {
    let config = public_config();
    let http = http_client(config.http_timeout_ms).unwrap();
    let market = discover_active_market(&http, &config.polymarket_gamma_url, Asset::Btc, Interval::M15)
        .await
        .unwrap();

    let client = PolymarketClient::with_http(http, &config);
    for token_id in market.token_ids() {
        let mid = client.midpoint(&token_id).await.unwrap();
        println!("{}: mid {}", token_id, mid);
        assert!(mid > Decimal::ZERO && mid < Decimal::ONE);
    }
}

#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn maker_address_from_environment() {
    let Some(config) = credentialed_config() else {
        println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
        return;
    };

    let client = PolymarketClient::new(&config).unwrap();
    let address = client.get_address().unwrap();
    println!("Wallet address: {}", address);
    assert!(address.starts_with("0x"));
}
