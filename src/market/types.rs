//! Market-related types for up/down crypto windows.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Underlying asset of an up/down market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Asset {
    /// Bitcoin.
    Btc,
    /// Ether.
    Eth,
    /// Solana.
    Sol,
    /// XRP.
    Xrp,
}

impl Asset {
    /// Every supported asset.
    pub const ALL: [Asset; 4] = [Asset::Btc, Asset::Eth, Asset::Sol, Asset::Xrp];

    /// Prefix of this asset's strategy parameters.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC_",
            Asset::Eth => "ETH_",
            Asset::Sol => "SOL_",
            Asset::Xrp => "XRP_",
        }
    }
}

/// Window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Interval {
    /// Five minutes.
    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    M5,
    /// Fifteen minutes.
    #[strum(serialize = "15m")]
    #[serde(rename = "15m")]
    M15,
    /// One hour.
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    H1,
}

impl Interval {
    /// Window length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::H1 => 3600,
        }
    }

    /// Start of the window containing `unix_ts`.
    pub fn window_start(&self, unix_ts: i64) -> i64 {
        unix_ts.div_euclid(self.seconds()) * self.seconds()
    }
}

/// Side of an up/down market.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Price goes up (YES token).
    #[strum(to_string = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// Price goes down (NO token).
    #[strum(to_string = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Outcome {
    /// Both outcomes, UP first.
    pub const BOTH: [Outcome; 2] = [Outcome::Up, Outcome::Down];

    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }

    /// Map a venue outcome label. "up" and "yes" are UP; anything else is DOWN.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("up") || label.eq_ignore_ascii_case("yes") {
            Outcome::Up
        } else {
            Outcome::Down
        }
    }
}

/// One market window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Market {
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// Unique market identifier.
    pub id: String,
    /// Underlying asset.
    pub asset: Asset,
    /// Window length.
    pub interval: Interval,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Unix timestamp when the window opened.
    pub start_timestamp: i64,
    /// Unix timestamp when the window closes.
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl Market {
    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Both token IDs, UP first.
    pub fn token_ids(&self) -> Vec<String> {
        vec![self.up_token_id.clone(), self.down_token_id.clone()]
    }

    /// Check if the market is closed.
    pub fn is_closed(&self) -> bool {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        now >= self.end_timestamp
    }

    /// Get remaining time until market closes.
    pub fn time_remaining(&self) -> Option<std::time::Duration> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let remaining = self.end_timestamp - now;
        if remaining <= 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(remaining as u64))
        }
    }

    /// Format remaining time as "Xm Ys" string.
    pub fn time_remaining_str(&self) -> String {
        match self.time_remaining() {
            Some(duration) => {
                let secs = duration.as_secs();
                format!("{}m {}s", secs / 60, secs % 60)
            }
            None => "CLOSED".to_string(),
        }
    }
}

/// Market record from the Gamma API.
///
/// `clobTokenIds` and `outcomes` arrive as JSON-encoded strings.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Market ID.
    pub id: Option<String>,
    /// Market slug.
    pub slug: Option<String>,
    /// Market question.
    pub question: Option<String>,
    /// Accepting orders.
    pub active: Option<bool>,
    /// Resolved or halted.
    pub closed: Option<bool>,
    /// CLOB token IDs, JSON-encoded.
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    /// Outcome labels, JSON-encoded.
    pub outcomes: Option<String>,
    /// End date (RFC 3339).
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}
