//! Polymarket up/down window trading bots.
//!
//! Two strategies trade the short binary windows Polymarket lists for crypto
//! assets (`btc-updown-15m-<ts>` and friends). At window close exactly one
//! side settles at $1.00.
//!
//! # Strategies
//!
//! **DCA snipe** waits for a side to trade below the entry price, buys on the
//! first cross back above it, then protects the position with resting
//! take-profit and stop-loss sells. Optional DCA buys average down.
//!
//! **YES+NO capture** buys each side once while it trades inside a price
//! band. When both fill, the pair costs less than the $1.00 payout:
//!
//! ```text
//! UP bought at:    $0.44
//! DOWN bought at:  $0.425
//! ─────────────────────
//! Total:           $0.865 < $1.00
//! Profit:          $0.135 per pair at resolution
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`feed`]: Live WebSocket prices with REST fallback
//! - [`market`]: Window discovery, Polymarket client, mock venue
//! - [`trading`]: Orders, quantization, gateway, position ledger
//! - [`strategy`]: DCA snipe and YES+NO capture engines
//! - [`scheduler`]: Per-market window loop and supervision
//! - [`signing`]: Wallet signing
//! - [`metrics`]: Prometheus metrics
//! - [`api`]: HTTP API for health/status/metrics
//! - [`utils`]: Shutdown plumbing

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod market;
pub mod metrics;
pub mod scheduler;
pub mod signing;
pub mod strategy;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
