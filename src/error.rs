//! Unified error types for the up/down trading bots.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Env(#[from] envy::Error),

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Market-related error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Price feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Values are present but inconsistent or out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A per-asset parameter block failed to load.
    #[error("failed to load {prefix}* parameters: {reason}")]
    Load {
        /// Environment prefix, e.g. "BTC_".
        prefix: String,
        /// Reason reported by the loader.
        reason: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Price feed errors. Recovered locally; never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Live source has been silent longer than the staleness threshold.
    #[error("live feed stale: no data for {silent_ms}ms")]
    Stale {
        /// Milliseconds since the last data message.
        silent_ms: u64,
    },

    /// Neither the live nor the fallback source produced a price.
    #[error("no price available for {token_id}: {reason}")]
    Unavailable {
        /// Token that could not be priced.
        token_id: String,
        /// Last error observed.
        reason: String,
    },
}

/// Market discovery and management errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// No active market could be found for the asset/interval.
    #[error("no active {asset} {interval} market found")]
    NoActiveMarketFound {
        /// Asset symbol.
        asset: String,
        /// Window interval.
        interval: String,
    },

    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Trading and order execution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradingError {
    /// Order could not reach the venue (transport or protocol failure).
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Order rejected by the exchange (bad price, balance, allowance).
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// FOK could not be filled in full against resting liquidity.
    #[error("insufficient liquidity to fill {size} @ {price}")]
    InsufficientLiquidity {
        /// Requested size.
        size: Decimal,
        /// Limit price.
        price: Decimal,
    },

    /// Immediate order filled less than requested.
    #[error("partial fill: requested {requested}, filled {filled}")]
    PartialFillAmbiguity {
        /// Requested size.
        requested: Decimal,
        /// Actually filled size.
        filled: Decimal,
    },

    /// Failed to cancel order.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// Order ID that failed to cancel.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to get order status.
    #[error("failed to get order status for {order_id}: {reason}")]
    StatusFailed {
        /// Order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to read a token balance.
    #[error("failed to read balance of {token_id}: {reason}")]
    BalanceFailed {
        /// Token whose balance was requested.
        token_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed by the server.
    #[error("websocket connection closed: {0}")]
    ConnectionClosed(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
