//! Application configuration loaded from environment variables.
//!
//! Global settings come from unprefixed variables. Strategy parameters are
//! per asset (`BTC_ENTRY_PRICE`, `ETH_TAKE_PROFIT`, ...), resolved once at
//! startup into typed settings.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::feed::{ReconnectConfig, TickSize};
use crate::market::{Asset, Interval};
use crate::strategy::StrategyKind;
use crate::trading::{GatewaySettings, OrderType};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Polymarket Credentials ===
    /// Wallet private key (hex, starts with 0x). Required for trading only.
    #[serde(default)]
    pub polymarket_private_key: String,

    /// Signature type: 0=EOA, 1=Magic.link, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// Proxy wallet address (required for Magic.link).
    #[serde(default)]
    pub polymarket_funder: Option<String>,

    // === Endpoints ===
    /// WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub polymarket_ws_url: String,

    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// Gamma API base URL.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    // === Selection ===
    /// Strategy to run: dca or yesno.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Comma-separated assets, or "all".
    #[serde(default = "default_markets")]
    pub markets: String,

    /// Window interval: 5m, 15m, 1h.
    #[serde(default = "default_interval")]
    pub interval: String,

    // === Order Execution ===
    /// Order type for buys: FAK, FOK, or GTC.
    #[serde(default = "default_buy_order_type")]
    pub buy_order_type: String,

    /// Order type for bracket sells. Must be GTC.
    #[serde(default = "default_sell_order_type")]
    pub sell_order_type: String,

    /// Auto-cancel deadline for resting orders; unset rests indefinitely.
    #[serde(default, deserialize_with = "nullable")]
    pub gtc_timeout_seconds: Option<u64>,

    /// Resubmit a liquidity-starved FOK as GTC.
    #[serde(default = "default_true")]
    pub fok_gtc_fallback: bool,

    /// Delay between window-end cancel attempts.
    #[serde(default = "default_cancel_retry_delay_ms")]
    pub cancel_retry_delay_ms: u64,

    /// Poll bracket status every N engine ticks.
    #[serde(default = "default_bracket_check_every_ticks")]
    pub bracket_check_every_ticks: u32,

    // === Price Feed ===
    /// Seconds to wait for the live feed before trading on fallback reads.
    #[serde(default = "default_wss_ready_timeout")]
    pub wss_ready_timeout: u64,

    /// Seconds of live silence after which the feed is stale.
    #[serde(default = "default_feed_stale_after_seconds")]
    pub feed_stale_after_seconds: u64,

    /// Maximum reconnect backoff.
    #[serde(default = "default_ws_reconnect_max_delay_s")]
    pub ws_reconnect_max_delay_s: u64,

    /// Keep-alive ping interval.
    #[serde(default = "default_ws_ping_interval_s")]
    pub ws_ping_interval_s: u64,

    // === Runtime ===
    /// Delay before restarting a crashed market task.
    #[serde(default = "default_engine_restart_delay_s")]
    pub engine_restart_delay_s: u64,

    /// REST request timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// HTTP server port for health/status endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".to_string()
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_strategy() -> String {
    "dca".to_string()
}

fn default_markets() -> String {
    "btc".to_string()
}

fn default_interval() -> String {
    "15m".to_string()
}

fn default_buy_order_type() -> String {
    "FAK".to_string()
}

fn default_sell_order_type() -> String {
    "GTC".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cancel_retry_delay_ms() -> u64 {
    1000
}

fn default_bracket_check_every_ticks() -> u32 {
    6
}

fn default_wss_ready_timeout() -> u64 {
    10
}

fn default_feed_stale_after_seconds() -> u64 {
    15
}

fn default_ws_reconnect_max_delay_s() -> u64 {
    30
}

fn default_ws_ping_interval_s() -> u64 {
    10
}

fn default_engine_restart_delay_s() -> u64 {
    10
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Optional value where `null`, `none` and the empty string mean unset.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Load from explicit key/value pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }

    /// Check everything the engines rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy_kind()?;
        self.assets()?;
        self.interval()?;
        self.buy_order_type()?;

        let sell = parse_order_type("SELL_ORDER_TYPE", &self.sell_order_type)?;
        if sell != OrderType::GTC {
            return Err(ConfigError::invalid(format!(
                "SELL_ORDER_TYPE must be GTC for bracket orders, got {}",
                sell
            )));
        }

        if self.bracket_check_every_ticks == 0 {
            return Err(ConfigError::invalid("BRACKET_CHECK_EVERY_TICKS must be at least 1"));
        }
        if self.feed_stale_after_seconds == 0 {
            return Err(ConfigError::invalid("FEED_STALE_AFTER_SECONDS must be at least 1"));
        }
        Ok(())
    }

    /// Credentials needed to sign orders.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.polymarket_private_key.is_empty() {
            return Err(ConfigError::invalid("POLYMARKET_PRIVATE_KEY is required"));
        }
        if !self.polymarket_private_key.starts_with("0x") {
            return Err(ConfigError::invalid("POLYMARKET_PRIVATE_KEY must start with 0x"));
        }
        if self.is_magic_link() && self.polymarket_funder.is_none() {
            return Err(ConfigError::invalid(
                "POLYMARKET_FUNDER is required for signature type 1",
            ));
        }
        Ok(())
    }

    /// Selected strategy.
    pub fn strategy_kind(&self) -> Result<StrategyKind, ConfigError> {
        StrategyKind::from_str(self.strategy.trim())
            .map_err(|_| ConfigError::invalid(format!("unknown STRATEGY '{}'", self.strategy)))
    }

    /// Selected assets, deduplicated in the order given.
    pub fn assets(&self) -> Result<Vec<Asset>, ConfigError> {
        let raw = self.markets.trim();
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Asset::ALL.to_vec());
        }

        let mut assets = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let asset = Asset::from_str(part)
                .map_err(|_| ConfigError::invalid(format!("unknown market '{}'", part)))?;
            if !assets.contains(&asset) {
                assets.push(asset);
            }
        }
        if assets.is_empty() {
            return Err(ConfigError::invalid("MARKETS selects no assets"));
        }
        Ok(assets)
    }

    /// Selected window interval.
    pub fn interval(&self) -> Result<Interval, ConfigError> {
        Interval::from_str(self.interval.trim())
            .map_err(|_| ConfigError::invalid(format!("unknown INTERVAL '{}'", self.interval)))
    }

    /// Order type for entry and DCA buys.
    pub fn buy_order_type(&self) -> Result<OrderType, ConfigError> {
        parse_order_type("BUY_ORDER_TYPE", &self.buy_order_type)
    }

    /// Gateway retry and timeout policy.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            fok_gtc_fallback: self.fok_gtc_fallback,
            gtc_timeout: self.gtc_timeout_seconds.map(Duration::from_secs),
            cancel_retry_delay: Duration::from_millis(self.cancel_retry_delay_ms),
        }
    }

    /// Live feed reconnect and staleness policy.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_delay_s: self.ws_reconnect_max_delay_s,
            ping_interval_s: self.ws_ping_interval_s,
            stale_after: Duration::from_secs(self.feed_stale_after_seconds),
            ..ReconnectConfig::default()
        }
    }

    /// Check if using Magic.link (signature_type == 1).
    pub fn is_magic_link(&self) -> bool {
        self.polymarket_signature_type == 1
    }
}

fn parse_order_type(key: &str, raw: &str) -> Result<OrderType, ConfigError> {
    OrderType::from_str(raw.trim())
        .map_err(|_| ConfigError::invalid(format!("{} must be FAK, FOK or GTC, got '{}'", key, raw)))
}

/// Inclusive price band for the YES+NO strategy, written `low-high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceRange {
    /// Lower bound.
    pub low: Decimal,
    /// Upper bound.
    pub high: Decimal,
}

impl PriceRange {
    /// Whether `price` lies within `[low, high]`.
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }
}

impl FromStr for PriceRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::invalid(format!("PRICE_RANGE '{}' must look like 0.40-0.45", s));

        let (low, high) = s.trim().split_once('-').ok_or_else(malformed)?;
        let low: Decimal = low.trim().parse().map_err(|_| malformed())?;
        let high: Decimal = high.trim().parse().map_err(|_| malformed())?;

        if low <= Decimal::ZERO || high >= Decimal::ONE {
            return Err(ConfigError::invalid(format!("PRICE_RANGE '{}' must lie within (0, 1)", s)));
        }
        if low > high {
            return Err(ConfigError::invalid(format!("PRICE_RANGE '{}' has low above high", s)));
        }
        Ok(Self { low, high })
    }
}

impl std::fmt::Display for PriceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

/// How the stop-loss bracket is priced. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopLossMode {
    /// No stop-loss bracket.
    Disabled,
    /// Constant stop price.
    Fixed(Decimal),
    /// Average entry minus a constant.
    Offset(Decimal),
    /// Average entry minus one tick.
    BreakEven,
}

impl StopLossMode {
    /// Stop price for the current average entry.
    pub fn stop_price(&self, avg_price: Decimal, tick: TickSize) -> Option<Decimal> {
        match self {
            StopLossMode::Disabled => None,
            StopLossMode::Fixed(price) => Some(*price),
            StopLossMode::Offset(offset) => Some(avg_price - offset),
            StopLossMode::BreakEven => Some(avg_price - tick.value()),
        }
    }

    /// Whether the stop moves when the average entry changes.
    pub fn follows_average(&self) -> bool {
        matches!(self, StopLossMode::Offset(_) | StopLossMode::BreakEven)
    }
}

impl std::fmt::Display for StopLossMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopLossMode::Disabled => write!(f, "disabled"),
            StopLossMode::Fixed(p) => write!(f, "fixed@{}", p),
            StopLossMode::Offset(d) => write!(f, "avg-{}", d),
            StopLossMode::BreakEven => write!(f, "break-even"),
        }
    }
}

/// Raw per-asset parameters, e.g. `BTC_ENTRY_PRICE`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyParams {
    /// Entry trigger price (DCA).
    #[serde(default, deserialize_with = "nullable")]
    pub entry_price: Option<Decimal>,
    /// USDC per entry or DCA buy.
    #[serde(default, deserialize_with = "nullable")]
    pub amount_per_bet: Option<Decimal>,
    /// Take-profit price.
    #[serde(default, deserialize_with = "nullable")]
    pub take_profit: Option<Decimal>,
    /// Fixed stop-loss price.
    #[serde(default, deserialize_with = "nullable")]
    pub stop_loss: Option<Decimal>,
    /// Stop-loss distance below the average entry.
    #[serde(default, deserialize_with = "nullable")]
    pub stop_loss_offset: Option<Decimal>,
    /// Set false to run without a stop-loss bracket.
    #[serde(default, deserialize_with = "nullable")]
    pub use_stop_loss: Option<bool>,
    /// Price rise that triggers another buy.
    #[serde(default, deserialize_with = "nullable")]
    pub bet_step: Option<Decimal>,
    /// Seconds between engine ticks.
    #[serde(default, deserialize_with = "nullable")]
    pub poll_interval: Option<Decimal>,
    /// Band for the YES+NO strategy.
    #[serde(default, deserialize_with = "nullable")]
    pub price_range: Option<String>,
    /// USDC per side for the YES+NO strategy.
    #[serde(default, deserialize_with = "nullable")]
    pub amount_to_buy: Option<Decimal>,
}

/// Resolved DCA snipe settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcaSettings {
    /// Entry trigger price.
    pub entry_price: Decimal,
    /// USDC per buy.
    pub amount_per_bet: Decimal,
    /// Take-profit price.
    pub take_profit: Decimal,
    /// Stop-loss pricing.
    pub stop_loss: StopLossMode,
    /// Price rise per additional buy.
    pub bet_step: Option<Decimal>,
    /// Order type for entry and DCA buys.
    pub buy_order_type: OrderType,
    /// Poll brackets every N ticks.
    pub bracket_check_every: u32,
}

/// Resolved YES+NO capture settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbSettings {
    /// Buy band.
    pub price_range: PriceRange,
    /// USDC per side.
    pub amount_to_buy: Decimal,
    /// Order type for buys.
    pub buy_order_type: OrderType,
}

const DEFAULT_ENTRY_PRICE: Decimal = dec!(0.70);
const DEFAULT_AMOUNT: Decimal = dec!(1.0);
const DEFAULT_TAKE_PROFIT: Decimal = dec!(0.95);
const DEFAULT_POLL_INTERVAL: Decimal = dec!(0.5);
const DEFAULT_PRICE_RANGE: &str = "0.40-0.45";

impl StrategyParams {
    /// Load `<ASSET>_*` parameters from the environment.
    pub fn load(asset: Asset) -> Result<Self, ConfigError> {
        envy::prefixed(asset.env_prefix())
            .from_env()
            .map_err(|e| ConfigError::Load {
                prefix: asset.env_prefix().to_string(),
                reason: e.to_string(),
            })
    }

    /// Load `<ASSET>_*` parameters from explicit pairs.
    pub fn from_pairs<I>(asset: Asset, pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(asset.env_prefix())
            .from_iter(pairs)
            .map_err(|e| ConfigError::Load {
                prefix: asset.env_prefix().to_string(),
                reason: e.to_string(),
            })
    }

    /// Engine tick interval.
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        let secs = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let millis = (secs * dec!(1000))
            .trunc()
            .to_u64()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| ConfigError::invalid(format!("POLL_INTERVAL {} must be positive", secs)))?;
        Ok(Duration::from_millis(millis))
    }

    /// Stop-loss mode. Fixed and offset together are ambiguous and refused.
    pub fn stop_loss_mode(&self) -> Result<StopLossMode, ConfigError> {
        if self.use_stop_loss == Some(false) {
            return Ok(StopLossMode::Disabled);
        }
        match (self.stop_loss, self.stop_loss_offset) {
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "STOP_LOSS and STOP_LOSS_OFFSET are mutually exclusive",
            )),
            (Some(price), None) => {
                check_probability("STOP_LOSS", price)?;
                Ok(StopLossMode::Fixed(price))
            }
            (None, Some(offset)) => {
                if offset <= Decimal::ZERO || offset >= Decimal::ONE {
                    return Err(ConfigError::invalid(format!(
                        "STOP_LOSS_OFFSET {} must lie within (0, 1)",
                        offset
                    )));
                }
                Ok(StopLossMode::Offset(offset))
            }
            (None, None) => Ok(StopLossMode::BreakEven),
        }
    }

    /// Resolve DCA snipe settings.
    pub fn resolve_dca(&self, config: &Config) -> Result<DcaSettings, ConfigError> {
        let entry_price = self.entry_price.unwrap_or(DEFAULT_ENTRY_PRICE);
        let take_profit = self.take_profit.unwrap_or(DEFAULT_TAKE_PROFIT);
        let amount_per_bet = self.amount_per_bet.unwrap_or(DEFAULT_AMOUNT);

        check_probability("ENTRY_PRICE", entry_price)?;
        check_probability("TAKE_PROFIT", take_profit)?;
        if take_profit <= entry_price {
            return Err(ConfigError::invalid(format!(
                "TAKE_PROFIT {} must be above ENTRY_PRICE {}",
                take_profit, entry_price
            )));
        }
        check_positive("AMOUNT_PER_BET", amount_per_bet)?;

        let stop_loss = self.stop_loss_mode()?;
        if let StopLossMode::Fixed(price) = stop_loss {
            if price >= entry_price {
                return Err(ConfigError::invalid(format!(
                    "STOP_LOSS {} must be below ENTRY_PRICE {}",
                    price, entry_price
                )));
            }
        }

        if let Some(step) = self.bet_step {
            check_positive("BET_STEP", step)?;
        }

        Ok(DcaSettings {
            entry_price,
            amount_per_bet,
            take_profit,
            stop_loss,
            bet_step: self.bet_step,
            buy_order_type: config.buy_order_type()?,
            bracket_check_every: config.bracket_check_every_ticks.max(1),
        })
    }

    /// Resolve YES+NO capture settings.
    pub fn resolve_arb(&self, config: &Config) -> Result<ArbSettings, ConfigError> {
        let price_range: PriceRange = self
            .price_range
            .as_deref()
            .unwrap_or(DEFAULT_PRICE_RANGE)
            .parse()?;
        let amount_to_buy = self.amount_to_buy.unwrap_or(DEFAULT_AMOUNT);
        check_positive("AMOUNT_TO_BUY", amount_to_buy)?;

        Ok(ArbSettings {
            price_range,
            amount_to_buy,
            buy_order_type: config.buy_order_type()?,
        })
    }
}

fn check_probability(key: &str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        return Err(ConfigError::invalid(format!("{} {} must lie within (0, 1)", key, value)));
    }
    Ok(())
}

fn check_positive(key: &str, value: Decimal) -> Result<(), ConfigError> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::invalid(format!("{} {} must be positive", key, value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config(items: &[(&str, &str)]) -> Config {
        Config::from_pairs(pairs(items)).unwrap()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = config(&[]);
        assert_eq!(config.buy_order_type().unwrap(), OrderType::FAK);
        assert_eq!(config.gtc_timeout_seconds, None);
        assert!(config.fok_gtc_fallback);
        assert_eq!(config.wss_ready_timeout, 10);
        assert_eq!(config.strategy_kind().unwrap(), StrategyKind::Dca);
        assert_eq!(config.assets().unwrap(), vec![Asset::Btc]);
        assert_eq!(config.interval().unwrap(), Interval::M15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn gtc_timeout_accepts_null() {
        assert_eq!(config(&[("GTC_TIMEOUT_SECONDS", "null")]).gtc_timeout_seconds, None);
        assert_eq!(config(&[("GTC_TIMEOUT_SECONDS", "")]).gtc_timeout_seconds, None);
        assert_eq!(config(&[("GTC_TIMEOUT_SECONDS", "30")]).gtc_timeout_seconds, Some(30));
        assert_eq!(
            config(&[("GTC_TIMEOUT_SECONDS", "30")]).gateway_settings().gtc_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn immediate_sell_type_is_invalid() {
        let err = config(&[("SELL_ORDER_TYPE", "FAK")]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(config(&[("BUY_ORDER_TYPE", "LIMIT")]).validate().is_err());
    }

    #[test]
    fn markets_parse_lists_and_all() {
        let config = config(&[("MARKETS", "eth, btc,eth")]);
        assert_eq!(config.assets().unwrap(), vec![Asset::Eth, Asset::Btc]);
        let all = Config::from_pairs(pairs(&[("MARKETS", "all")])).unwrap();
        assert_eq!(all.assets().unwrap().len(), 4);
        assert!(Config::from_pairs(pairs(&[("MARKETS", "doge")])).unwrap().assets().is_err());
    }

    #[test]
    fn credentials_are_checked_separately() {
        assert!(config(&[]).validate_credentials().is_err());
        assert!(config(&[("POLYMARKET_PRIVATE_KEY", "abc")]).validate_credentials().is_err());
        assert!(config(&[("POLYMARKET_PRIVATE_KEY", "0xabc")]).validate_credentials().is_ok());
    }

    #[test]
    fn price_range_parses_and_rejects_garbage() {
        let range: PriceRange = "0.40-0.45".parse().unwrap();
        assert_eq!(range, PriceRange { low: dec!(0.40), high: dec!(0.45) });
        assert!(range.contains(dec!(0.40)));
        assert!(range.contains(dec!(0.45)));
        assert!(!range.contains(dec!(0.451)));

        assert!("0.45-0.40".parse::<PriceRange>().is_err());
        assert!("0.40".parse::<PriceRange>().is_err());
        assert!("0-0.5".parse::<PriceRange>().is_err());
        assert!("abc-0.5".parse::<PriceRange>().is_err());
    }

    #[test]
    fn stop_loss_mode_precedence() {
        let both = StrategyParams::from_pairs(
            Asset::Btc,
            pairs(&[("BTC_STOP_LOSS", "0.5"), ("BTC_STOP_LOSS_OFFSET", "0.05")]),
        )
        .unwrap();
        assert!(matches!(both.stop_loss_mode(), Err(ConfigError::Invalid(_))));

        let fixed = StrategyParams::from_pairs(Asset::Btc, pairs(&[("BTC_STOP_LOSS", "0.58")])).unwrap();
        assert_eq!(fixed.stop_loss_mode().unwrap(), StopLossMode::Fixed(dec!(0.58)));

        let offset = StrategyParams::from_pairs(
            Asset::Btc,
            pairs(&[("BTC_STOP_LOSS", "null"), ("BTC_STOP_LOSS_OFFSET", "0.05")]),
        )
        .unwrap();
        assert_eq!(offset.stop_loss_mode().unwrap(), StopLossMode::Offset(dec!(0.05)));

        let none = StrategyParams::from_pairs(Asset::Btc, pairs(&[])).unwrap();
        assert_eq!(none.stop_loss_mode().unwrap(), StopLossMode::BreakEven);

        let disabled = StrategyParams::from_pairs(
            Asset::Btc,
            pairs(&[("BTC_USE_STOP_LOSS", "false"), ("BTC_STOP_LOSS", "0.5")]),
        )
        .unwrap();
        assert_eq!(disabled.stop_loss_mode().unwrap(), StopLossMode::Disabled);
    }

    #[test]
    fn break_even_stop_is_one_tick_below_average() {
        let mode = StopLossMode::BreakEven;
        assert_eq!(mode.stop_price(dec!(0.61), TickSize::Coarse), Some(dec!(0.60)));
        assert_eq!(mode.stop_price(dec!(0.97), TickSize::Fine), Some(dec!(0.969)));
        assert!(mode.follows_average());
        assert!(!StopLossMode::Fixed(dec!(0.5)).follows_average());
    }

    #[test]
    fn dca_settings_resolve_with_prefix() {
        let cfg = config(&[]);
        let params = StrategyParams::from_pairs(
            Asset::Eth,
            pairs(&[
                ("ETH_ENTRY_PRICE", "0.60"),
                ("ETH_TAKE_PROFIT", "0.80"),
                ("ETH_STOP_LOSS", "0.58"),
                ("ETH_BET_STEP", "null"),
                ("BTC_ENTRY_PRICE", "0.10"),
            ]),
        )
        .unwrap();

        let settings = params.resolve_dca(&cfg).unwrap();
        assert_eq!(
            settings,
            DcaSettings {
                entry_price: dec!(0.60),
                amount_per_bet: dec!(1.0),
                take_profit: dec!(0.80),
                stop_loss: StopLossMode::Fixed(dec!(0.58)),
                bet_step: None,
                buy_order_type: OrderType::FAK,
                bracket_check_every: 6,
            }
        );
        assert_eq!(params.poll_interval().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn dca_settings_reject_inverted_prices() {
        let cfg = config(&[]);
        let params = StrategyParams::from_pairs(
            Asset::Btc,
            pairs(&[("BTC_ENTRY_PRICE", "0.80"), ("BTC_TAKE_PROFIT", "0.70")]),
        )
        .unwrap();
        assert!(params.resolve_dca(&cfg).is_err());

        let zero = StrategyParams::from_pairs(Asset::Btc, pairs(&[("BTC_AMOUNT_PER_BET", "0")])).unwrap();
        assert!(zero.resolve_dca(&cfg).is_err());
    }

    #[test]
    fn arb_settings_reject_malformed_range() {
        let cfg = config(&[]);
        let params =
            StrategyParams::from_pairs(Asset::Sol, pairs(&[("SOL_PRICE_RANGE", "0.45-0.40")])).unwrap();
        assert!(matches!(params.resolve_arb(&cfg), Err(ConfigError::Invalid(_))));

        let ok = StrategyParams::from_pairs(Asset::Sol, pairs(&[])).unwrap();
        assert_eq!(ok.resolve_arb(&cfg).unwrap().price_range.to_string(), "0.40-0.45");
    }
}
