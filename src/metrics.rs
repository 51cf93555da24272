//! Prometheus metrics for the feed, the order gateway and the scheduler.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::trading::OrderType;

// === Metric Name Constants ===

/// Order round-trip latency metric name.
pub const METRIC_ORDER_LATENCY: &str = "order_latency_ms";
/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "signing_latency_ms";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Order outcomes counter metric name.
pub const METRIC_ORDER_OUTCOMES: &str = "order_outcomes_total";
/// FOK to GTC fallbacks counter metric name.
pub const METRIC_FOK_GTC_FALLBACKS: &str = "fok_gtc_fallbacks_total";
/// GTC auto-cancels counter metric name.
pub const METRIC_GTC_AUTO_CANCELS: &str = "gtc_auto_cancels_total";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Feed stale transitions counter metric name.
pub const METRIC_FEED_STALE: &str = "feed_stale_total";
/// Fallback price reads counter metric name.
pub const METRIC_FALLBACK_READS: &str = "fallback_reads_total";
/// Engine restarts counter metric name.
pub const METRIC_ENGINE_RESTARTS: &str = "engine_restarts_total";
/// Completed windows counter metric name.
pub const METRIC_WINDOWS_COMPLETED: &str = "windows_completed_total";

/// Register metric descriptions. Call once at startup.
pub fn init_metrics() {
    describe_histogram!(METRIC_ORDER_LATENCY, "Order submission round trip in milliseconds");
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "WebSocket message processing latency in milliseconds"
    );
    describe_histogram!(METRIC_SIGNING_LATENCY, "Signing latency in milliseconds");

    describe_counter!(METRIC_ORDERS_SUBMITTED, "Orders submitted, by order type");
    describe_counter!(METRIC_ORDER_OUTCOMES, "Order outcomes, by outcome");
    describe_counter!(METRIC_FOK_GTC_FALLBACKS, "FOK orders resubmitted as GTC");
    describe_counter!(METRIC_GTC_AUTO_CANCELS, "GTC orders cancelled at their deadline");
    describe_counter!(METRIC_WS_MESSAGES_RECEIVED, "WebSocket messages received");
    describe_counter!(METRIC_WS_RECONNECTS, "WebSocket reconnections");
    describe_counter!(METRIC_FEED_STALE, "Times the live feed went stale");
    describe_counter!(METRIC_FALLBACK_READS, "Prices served by the REST fallback");
    describe_counter!(METRIC_ENGINE_RESTARTS, "Market engines restarted after a crash");
    describe_counter!(METRIC_WINDOWS_COMPLETED, "Market windows run to completion");

    debug!("Metrics initialized");
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record order submission latency.
pub fn record_order_latency(start: Instant) {
    histogram!(METRIC_ORDER_LATENCY).record(elapsed_ms(start));
}

/// Record WebSocket message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(elapsed_ms(start));
}

/// Record signing latency.
pub fn record_signing_latency(start: Instant) {
    histogram!(METRIC_SIGNING_LATENCY).record(elapsed_ms(start));
}

pub fn inc_orders_submitted(order_type: OrderType) {
    counter!(METRIC_ORDERS_SUBMITTED, "order_type" => order_type.to_string()).increment(1);
}

pub fn inc_order_outcome(outcome: &str) {
    counter!(METRIC_ORDER_OUTCOMES, "outcome" => outcome.to_string()).increment(1);
}

pub fn inc_fok_gtc_fallbacks() {
    counter!(METRIC_FOK_GTC_FALLBACKS).increment(1);
}

pub fn inc_gtc_auto_cancels() {
    counter!(METRIC_GTC_AUTO_CANCELS).increment(1);
}

pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

pub fn inc_feed_stale() {
    counter!(METRIC_FEED_STALE).increment(1);
}

pub fn inc_fallback_reads() {
    counter!(METRIC_FALLBACK_READS).increment(1);
}

pub fn inc_engine_restarts(market: &str) {
    counter!(METRIC_ENGINE_RESTARTS, "market" => market.to_string()).increment(1);
}

pub fn inc_windows_completed(market: &str) {
    counter!(METRIC_WINDOWS_COMPLETED, "market" => market.to_string()).increment(1);
}
