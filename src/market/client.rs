//! Polymarket API client wrapper.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{FeedError, MarketError, TradingError};
use crate::feed::types::lenient_decimal;
use crate::feed::{FallbackSource, TickSize};
use crate::signing;

/// Polymarket CLOB API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Wallet private key.
    private_key: String,
    /// Signature type (0=EOA, 1=Magic.link, 2=Gnosis).
    signature_type: u8,
    /// Funder address (for Magic.link).
    funder: Option<String>,
}

/// `/midpoint` response.
#[derive(Debug, Clone, Deserialize)]
struct MidpointResponse {
    #[serde(default, deserialize_with = "lenient_decimal")]
    mid: Option<Decimal>,
}

/// `/tick-size` response.
#[derive(Debug, Clone, Deserialize)]
struct TickSizeResponse {
    #[serde(default, deserialize_with = "lenient_decimal")]
    minimum_tick_size: Option<Decimal>,
}

/// Build the shared HTTP client.
pub fn http_client(timeout_ms: u64) -> Result<reqwest::Client, MarketError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .connect_timeout(Duration::from_millis(timeout_ms.min(2000)))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;
    Ok(http)
}

impl PolymarketClient {
    /// Create a new Polymarket client from config.
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        Ok(Self::with_http(http_client(config.http_timeout_ms)?, config))
    }

    /// Create a client reusing an existing HTTP client.
    pub fn with_http(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            private_key: config.polymarket_private_key.clone(),
            signature_type: config.polymarket_signature_type,
            funder: config.polymarket_funder.clone(),
        }
    }

    /// Get the HTTP client reference.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Get the private key (for direct signing operations).
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// Get the signature type.
    pub fn signature_type(&self) -> u8 {
        self.signature_type
    }

    /// Address that holds the funds: the funder for proxy wallets, else the signer.
    pub fn maker_address(&self) -> Result<String, TradingError> {
        match &self.funder {
            Some(funder) => Ok(funder.clone()),
            None => self.get_address(),
        }
    }

    /// Get the wallet address derived from the private key.
    pub fn get_address(&self) -> Result<String, TradingError> {
        signing::address_from_private_key(&self.private_key)
    }

    /// Get the CLOB base URL.
    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        token_id: &str,
    ) -> Result<T, FeedError> {
        let unavailable = |reason: String| FeedError::Unavailable {
            token_id: token_id.to_string(),
            reason,
        };

        let url = format!("{}/{}", self.clob_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| unavailable(format!("Failed to parse {}: {}", path, e)))
    }
}

#[async_trait]
impl FallbackSource for PolymarketClient {
    #[instrument(skip(self))]
    async fn midpoint(&self, token_id: &str) -> Result<Decimal, FeedError> {
        let body: MidpointResponse = self.get_json("midpoint", token_id).await?;
        let mid = body.mid.ok_or_else(|| FeedError::Unavailable {
            token_id: token_id.to_string(),
            reason: "midpoint missing".to_string(),
        })?;
        debug!(mid = %mid, "Fallback midpoint");
        Ok(mid)
    }

    #[instrument(skip(self))]
    async fn tick_size(&self, token_id: &str) -> Result<Option<TickSize>, FeedError> {
        let body: TickSizeResponse = self.get_json("tick-size", token_id).await?;
        Ok(body.minimum_tick_size.and_then(TickSize::from_decimal))
    }
}
