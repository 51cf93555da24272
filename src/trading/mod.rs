//! Trading module for order management and execution.
//!
//! This module handles:
//! - Order types, price alignment and sizing
//! - Venue submission and per-type gateway policy
//! - Position ledgers

pub mod gateway;
pub mod order;
pub mod position;
pub mod venue;

pub use gateway::{GatewaySettings, OrderGateway};
pub use order::{OrderOutcome, OrderRequest, OrderState, OrderStatus, OrderType, Side};
pub use position::{Fill, LedgerState, MarketPositions, PositionLedger};
pub use venue::{OrderVenue, VenueAck};
