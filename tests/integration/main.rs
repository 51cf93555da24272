//! Integration tests for the up/down window bots.
//!
//! Scenario tests drive the engines against the in-memory venue and run by
//! default. Tests that talk to Polymarket are ignored; run them with:
//! cargo test --test integration -- --ignored

mod arbitrage;
mod dca;
mod feed;
mod live;
mod support;
