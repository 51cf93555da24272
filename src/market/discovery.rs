//! Market discovery for up/down windows.
//!
//! Window slugs are computable: `{asset}-updown-{interval}-{start_ts}`. The
//! current and next windows are looked up on the Gamma API and the first one
//! that is active and not closed wins.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::types::{Asset, GammaMarket, Interval, Market, Outcome};
use crate::error::MarketError;

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(btc|eth|sol|xrp)-updown-(5m|15m|1h)-(\d+)$").expect("valid regex")
});

/// Slug of the window starting at `start_ts`.
pub fn window_slug(asset: Asset, interval: Interval, start_ts: i64) -> String {
    format!("{}-updown-{}-{}", asset, interval, start_ts)
}

/// Split a window slug into its asset, interval and start timestamp.
pub fn parse_slug(slug: &str) -> Option<(Asset, Interval, i64)> {
    let captures = SLUG_PATTERN.captures(slug)?;
    let asset = Asset::from_str(captures.get(1)?.as_str()).ok()?;
    let interval = Interval::from_str(captures.get(2)?.as_str()).ok()?;
    let ts = captures.get(3)?.as_str().parse().ok()?;
    Some((asset, interval, ts))
}

/// Get the next market slug based on current slug.
pub fn next_slug(slug: &str) -> Result<String, MarketError> {
    let (asset, interval, ts) = parse_slug(slug)
        .ok_or_else(|| MarketError::ParseError(format!("Slug not in expected format: {}", slug)))?;
    Ok(window_slug(asset, interval, ts + interval.seconds()))
}

/// Candidate slugs for the window containing `now` and the one after it.
pub fn candidate_slugs(asset: Asset, interval: Interval, now: i64) -> Vec<String> {
    let start = interval.window_start(now);
    vec![
        window_slug(asset, interval, start),
        window_slug(asset, interval, start + interval.seconds()),
    ]
}

/// Find the active window for an asset.
#[instrument(skip(client, gamma_url))]
pub async fn discover_active_market(
    client: &reqwest::Client,
    gamma_url: &str,
    asset: Asset,
    interval: Interval,
) -> Result<Market, MarketError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();

    for slug in candidate_slugs(asset, interval, now) {
        debug!(slug = %slug, "Checking computed slug");

        match fetch_market_from_slug(client, gamma_url, &slug).await {
            Ok(market) if market.end_timestamp > now => {
                info!(slug = %market.slug, remaining = %market.time_remaining_str(), "Found active market");
                return Ok(market);
            }
            Ok(_) => debug!(slug = %slug, "Market exists but has ended"),
            Err(e) => debug!(slug = %slug, error = %e, "Slug not usable"),
        }
    }

    Err(MarketError::NoActiveMarketFound {
        asset: asset.to_string(),
        interval: interval.to_string(),
    })
}

/// Fetch a window by slug from the Gamma API.
#[instrument(skip(client, gamma_url))]
pub async fn fetch_market_from_slug(
    client: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> Result<Market, MarketError> {
    let url = format!("{}/markets", gamma_url.trim_end_matches('/'));

    let response = client.get(&url).query(&[("slug", slug)]).send().await?;

    if !response.status().is_success() {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let markets: Vec<GammaMarket> = response.json().await.map_err(|e| {
        MarketError::ParseError(format!("Failed to parse Gamma API response: {}", e))
    })?;

    let record = markets
        .into_iter()
        .find(|m| m.slug.as_deref() == Some(slug))
        .ok_or_else(|| MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: "slug not listed".to_string(),
        })?;

    market_from_gamma(slug, record)
}

/// Build a [`Market`] from a Gamma record. Inactive or closed records are refused.
pub fn market_from_gamma(slug: &str, record: GammaMarket) -> Result<Market, MarketError> {
    let (asset, interval, start_timestamp) = parse_slug(slug)
        .ok_or_else(|| MarketError::ParseError(format!("Slug not in expected format: {}", slug)))?;

    if record.active != Some(true) || record.closed == Some(true) {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: "market is not accepting orders".to_string(),
        });
    }

    let token_ids: Vec<String> = decode_list(record.clob_token_ids.as_deref(), "clobTokenIds")?;
    if token_ids.len() != 2 {
        return Err(MarketError::ParseError(format!(
            "Expected 2 token IDs, got {}",
            token_ids.len()
        )));
    }

    let outcomes: Vec<String> = match record.outcomes.as_deref() {
        Some(raw) => decode_list(Some(raw), "outcomes")?,
        None => vec!["Up".to_string(), "Down".to_string()],
    };

    let (up_token_id, down_token_id) = match outcomes.first().map(|o| Outcome::from_label(o)) {
        Some(Outcome::Down) => (token_ids[1].clone(), token_ids[0].clone()),
        _ => (token_ids[0].clone(), token_ids[1].clone()),
    };

    let end_timestamp = record
        .end_date
        .as_deref()
        .and_then(|d| OffsetDateTime::parse(d, &Rfc3339).ok())
        .map(|d| d.unix_timestamp())
        .unwrap_or(start_timestamp + interval.seconds());

    Ok(Market {
        slug: slug.to_string(),
        id: record.id.unwrap_or_default(),
        asset,
        interval,
        up_token_id,
        down_token_id,
        start_timestamp,
        end_timestamp,
        question: record.question,
    })
}

fn decode_list(raw: Option<&str>, field: &str) -> Result<Vec<String>, MarketError> {
    let raw = raw.ok_or_else(|| MarketError::ParseError(format!("No {}", field)))?;
    serde_json::from_str(raw).map_err(|e| MarketError::ParseError(format!("Bad {}: {}", field, e)))
}
