//! Venue boundary and the CLOB implementation.

use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::order::{OrderRequest, OrderState, OrderStatus, Side};
use crate::error::TradingError;
use crate::feed::types::decimal_from_value;
use crate::market::PolymarketClient;
use crate::metrics;
use crate::signing;

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VenueAck {
    /// Order id assigned by the venue.
    pub order_id: Option<String>,
    /// Status reported with the acknowledgement.
    pub status: Option<OrderStatus>,
    /// Shares matched immediately.
    pub filled_size: Decimal,
    /// Average matched price, when known.
    pub avg_price: Option<Decimal>,
}

/// Order operations against a trading venue.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Post one order.
    ///
    /// Returns `InsufficientLiquidity` when an all-or-nothing order cannot fill
    /// and `OrderRejected` for venue-level refusals.
    async fn post_order(&self, request: &OrderRequest) -> Result<VenueAck, TradingError>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError>;

    /// Current state of an order.
    async fn order_state(&self, order_id: &str) -> Result<OrderState, TradingError>;

    /// Shares of `token_id` held by the trading wallet, rounded down to the share step.
    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError>;
}

/// Order submission request body.
#[derive(Debug, Clone, Serialize)]
struct SignedOrder {
    token_id: String,
    side: String,
    price: String,
    size: String,
    fee_rate_bps: String,
    nonce: String,
    expiration: String,
    taker: String,
    maker: String,
    signer: String,
    signature_type: u8,
    signature: String,
    order_type: String,
}

/// Order submission result.
#[derive(Debug, Clone, Deserialize)]
struct SubmitResult {
    #[serde(alias = "orderID", alias = "orderId", alias = "order_id", alias = "id")]
    order_id: Option<String>,
    #[serde(alias = "errorMsg", alias = "error")]
    error_msg: Option<String>,
    success: Option<bool>,
    status: Option<String>,
    #[serde(rename = "takingAmount")]
    taking_amount: Option<serde_json::Value>,
    #[serde(rename = "makingAmount")]
    making_amount: Option<serde_json::Value>,
}

/// Cancel result.
#[derive(Debug, Clone, Default, Deserialize)]
struct CancelResult {
    #[serde(default)]
    canceled: Vec<String>,
    #[serde(default)]
    not_canceled: serde_json::Map<String, serde_json::Value>,
}

/// Map a venue error message onto the trading taxonomy.
pub fn classify_rejection(message: &str, request: &OrderRequest) -> TradingError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("fully filled or killed")
        || lower.contains("no orders found to match")
        || lower.contains("no match")
    {
        TradingError::InsufficientLiquidity {
            size: request.size,
            price: request.price,
        }
    } else {
        TradingError::OrderRejected {
            reason: message.to_string(),
        }
    }
}

/// Shares and average price matched by a fill response.
///
/// Buys receive shares (`takingAmount`) for USDC (`makingAmount`); sells the
/// reverse. A missing share amount is estimated from the USDC leg, rounded
/// down.
pub fn matched_amounts(
    request: &OrderRequest,
    taking: Option<Decimal>,
    making: Option<Decimal>,
) -> (Decimal, Option<Decimal>) {
    let (shares, usdc) = match request.side {
        Side::Buy => (taking, making),
        Side::Sell => (making, taking),
    };
    let usdc = usdc.filter(|u| *u > Decimal::ZERO);

    let shares = match shares.filter(|s| *s > Decimal::ZERO) {
        Some(shares) => shares,
        None => match usdc {
            Some(usdc) if request.price > Decimal::ZERO => {
                (usdc / request.price).round_dp_with_strategy(4, RoundingStrategy::ToZero)
            }
            _ => Decimal::ZERO,
        },
    };

    let avg_price = match usdc {
        Some(usdc) if shares > Decimal::ZERO => Some((usdc / shares).round_dp(6)),
        _ => None,
    };
    (shares, avg_price)
}

impl PolymarketClient {
    async fn auth_headers(&self) -> Result<Vec<(String, String)>, TradingError> {
        signing::generate_auth_headers(self.private_key(), self.signature_type()).await
    }

    async fn sign_order(&self, request: &OrderRequest) -> Result<SignedOrder, TradingError> {
        let signer_address = self.get_address()?;
        let maker = self.maker_address()?;

        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        let expiration = "0".to_string();

        let order_message = format!(
            "{}:{}:{}:{}:{}:{}",
            request.token_id, request.side, request.price, request.size, nonce, expiration
        );
        let signature_bytes = signing::sign_message(self.private_key(), order_message.as_bytes()).await?;

        Ok(SignedOrder {
            token_id: request.token_id.clone(),
            side: request.side.to_string(),
            price: request.price.to_string(),
            size: request.size.to_string(),
            fee_rate_bps: "0".to_string(),
            nonce,
            expiration,
            taker: "0x0000000000000000000000000000000000000000".to_string(),
            maker,
            signer: signer_address,
            signature_type: signing::signature_type_code(self.signature_type()),
            signature: format!("0x{}", hex::encode(&signature_bytes)),
            order_type: request.order_type.to_string(),
        })
    }
}

#[async_trait]
impl OrderVenue for PolymarketClient {
    #[instrument(skip(self, request), fields(token = %request.token_id, side = %request.side, order_type = %request.order_type))]
    async fn post_order(&self, request: &OrderRequest) -> Result<VenueAck, TradingError> {
        request.validate().map_err(TradingError::InvalidParams)?;

        debug!(price = %request.price, size = %request.size, "Submitting order");

        let started = Instant::now();
        let auth_headers = self.auth_headers().await?;
        let signed = self.sign_order(request).await?;

        let url = format!("{}/order", self.clob_url());
        let mut http_request = self.http().post(&url).json(&signed);
        for (key, value) in auth_headers {
            http_request = http_request.header(&key, &value);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| TradingError::SubmissionFailed(format!("HTTP request failed: {}", e)))?;
        metrics::record_order_latency(started);

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let result: Option<SubmitResult> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            return Err(match result.and_then(|r| r.error_msg).filter(|m| !m.is_empty()) {
                Some(msg) if status.is_client_error() => classify_rejection(&msg, request),
                _ => TradingError::SubmissionFailed(format!("HTTP {} - {}", status, body)),
            });
        }

        let result = result.ok_or_else(|| {
            TradingError::SubmissionFailed(format!("Failed to parse response: {}", body))
        })?;

        if let Some(msg) = result.error_msg.as_deref().filter(|m| !m.is_empty()) {
            if result.success != Some(true) {
                return Err(classify_rejection(msg, request));
            }
        }

        let order_status = result.status.as_deref().and_then(|s| s.parse::<OrderStatus>().ok());
        let (mut filled_size, mut avg_price) = matched_amounts(
            request,
            result.taking_amount.as_ref().and_then(decimal_from_value),
            result.making_amount.as_ref().and_then(decimal_from_value),
        );

        if filled_size.is_zero() && order_status.is_some_and(|s| s.is_filled()) {
            if let Some(id) = result.order_id.as_deref() {
                match self.order_state(id).await {
                    Ok(state) => {
                        filled_size = state.filled();
                        avg_price = state.price;
                    }
                    Err(e) => warn!(order_id = %id, error = %e, "Matched order without amounts"),
                }
            }
        }

        info!(
            order_id = ?result.order_id,
            status = ?order_status,
            filled = %filled_size,
            price = %request.price,
            size = %request.size,
            "Order accepted"
        );

        Ok(VenueAck {
            order_id: result.order_id,
            status: order_status,
            filled_size,
            avg_price,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        let cancel_failed = |reason: String| TradingError::CancelFailed {
            order_id: order_id.to_string(),
            reason,
        };

        let auth_headers = self.auth_headers().await?;
        let url = format!("{}/order", self.clob_url());

        let mut request = self
            .http()
            .delete(&url)
            .json(&serde_json::json!({ "orderID": order_id }));
        for (key, value) in &auth_headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            error!(order_id = %order_id, error = %e, "Failed to cancel order");
            cancel_failed(e.to_string())
        })?;

        if !response.status().is_success() {
            error!(order_id = %order_id, status = %response.status(), "Failed to cancel order");
            return Err(cancel_failed(format!("HTTP {}", response.status())));
        }

        let result: CancelResult = response.json().await.unwrap_or_default();
        if let Some(reason) = result.not_canceled.get(order_id) {
            return Err(cancel_failed(reason.to_string()));
        }

        debug!(order_id = %order_id, confirmed = result.canceled.iter().any(|id| id == order_id), "Order cancelled");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn order_state(&self, order_id: &str) -> Result<OrderState, TradingError> {
        let status_failed = |reason: String| TradingError::StatusFailed {
            order_id: order_id.to_string(),
            reason,
        };

        let auth_headers = self.auth_headers().await?;
        let url = format!("{}/data/order/{}", self.clob_url(), order_id);

        let mut request = self.http().get(&url);
        for (key, value) in &auth_headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| status_failed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_failed(format!("HTTP {}", response.status())));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| status_failed(format!("Failed to parse response: {}", e)))?;

        Ok(parse_order_state(order_id, &json))
    }

    #[instrument(skip(self))]
    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        let balance_failed = |reason: String| TradingError::BalanceFailed {
            token_id: token_id.to_string(),
            reason,
        };

        let owner = self.maker_address()?;
        let auth_headers = self.auth_headers().await?;
        let url = format!("{}/data/positions", self.clob_url());

        let mut request = self
            .http()
            .get(&url)
            .query(&[("user", owner.as_str()), ("token_id", token_id)]);
        for (key, value) in &auth_headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| balance_failed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(balance_failed(format!("HTTP {}", response.status())));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| balance_failed(format!("Failed to parse response: {}", e)))?;

        let balance = parse_position_balance(token_id, &json)
            .ok_or_else(|| balance_failed("no size or balance field".to_string()))?;
        debug!(balance = %balance, "Token balance");
        Ok(balance)
    }
}

/// Read the held size from a positions payload: a list of positions or a single record.
pub fn parse_position_balance(token_id: &str, json: &serde_json::Value) -> Option<Decimal> {
    let record = match json {
        serde_json::Value::Array(positions) => positions
            .iter()
            .find(|p| {
                ["asset", "token_id", "tokenId", "asset_id"]
                    .iter()
                    .filter_map(|key| p.get(*key).and_then(|v| v.as_str()))
                    .any(|id| id == token_id)
            })
            .or_else(|| positions.first())?,
        other => other,
    };
    parse_decimal_field(record, &["size", "balance"])
        .map(|size| size.max(Decimal::ZERO).round_dp_with_strategy(4, RoundingStrategy::ToZero))
}

/// Parse an order record, tolerating the field spellings the venue uses.
pub fn parse_order_state(order_id: &str, json: &serde_json::Value) -> OrderState {
    let status = json
        .get("status")
        .or_else(|| json.get("orderStatus"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<OrderStatus>().ok());

    OrderState {
        order_id: order_id.to_string(),
        status,
        filled_size: parse_decimal_field(json, &["size_matched", "sizeMatched", "filled", "filledSize"]),
        original_size: parse_decimal_field(json, &["original_size", "originalSize", "size"]),
        price: parse_decimal_field(json, &["price"]),
    }
}

/// Parse a decimal field from JSON, trying multiple field names.
fn parse_decimal_field(json: &serde_json::Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .filter_map(|key| json.get(*key))
        .find_map(decimal_from_value)
}
