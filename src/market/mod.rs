//! Market module for up/down crypto windows.
//!
//! This module handles:
//! - Market types and data structures
//! - Market discovery (finding the active window)
//! - Polymarket CLOB client
//! - In-memory venue for tests

pub mod client;
pub mod discovery;
pub mod mock;
pub mod types;

pub use client::{http_client, PolymarketClient};
pub use discovery::{discover_active_market, fetch_market_from_slug};
pub use mock::MockVenue;
pub use types::{Asset, Interval, Market, Outcome};
