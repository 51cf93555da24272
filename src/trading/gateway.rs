//! Order gateway: per-type submission policy over an [`OrderVenue`].
//!
//! - FAK fills what it can now; the rest is gone. Never pending.
//! - FOK fills in full or not at all. A liquidity miss may be resubmitted
//!   as a resting GTC at the same price and size.
//! - GTC rests. With a timeout configured, a deadline task cancels it if it
//!   is still open when the deadline passes.
//!
//! Venue rejections are never retried here.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::order::{OrderOutcome, OrderRequest, OrderState, OrderType};
use super::venue::{OrderVenue, VenueAck};
use crate::error::TradingError;
use crate::metrics;
use crate::utils::wait_for_shutdown;

/// Retry and timeout policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Resubmit a liquidity-starved FOK as GTC.
    pub fok_gtc_fallback: bool,
    /// Auto-cancel deadline for resting orders.
    pub gtc_timeout: Option<Duration>,
    /// Delay between cancel attempts during cleanup.
    pub cancel_retry_delay: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            fok_gtc_fallback: true,
            gtc_timeout: None,
            cancel_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Submits orders and applies the per-type policy.
pub struct OrderGateway {
    venue: Arc<dyn OrderVenue>,
    settings: GatewaySettings,
    deadlines: Arc<DashMap<String, JoinHandle<()>>>,
}

impl OrderGateway {
    /// Create a gateway over a venue.
    pub fn new(venue: Arc<dyn OrderVenue>, settings: GatewaySettings) -> Self {
        Self {
            venue,
            settings,
            deadlines: Arc::new(DashMap::new()),
        }
    }

    /// Active policy.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Submit an order and report its outcome.
    pub async fn submit(&self, request: OrderRequest) -> OrderOutcome {
        metrics::inc_orders_submitted(request.order_type);

        let outcome = match request.order_type {
            OrderType::FAK => self.submit_fak(&request).await,
            OrderType::FOK => self.submit_fok(&request).await,
            OrderType::GTC => self.submit_gtc(&request).await,
        };

        metrics::inc_order_outcome(outcome.label());
        match &outcome {
            OrderOutcome::Rejected { reason } => warn!(
                token_id = %request.token_id,
                side = %request.side,
                order_type = %request.order_type,
                price = %request.price,
                size = %request.size,
                reason = %reason,
                "Order rejected"
            ),
            other => info!(
                token_id = %request.token_id,
                side = %request.side,
                order_type = %request.order_type,
                price = %request.price,
                size = %request.size,
                outcome = other.label(),
                filled = %other.filled_size(),
                "Order outcome"
            ),
        }
        outcome
    }

    async fn submit_fak(&self, request: &OrderRequest) -> OrderOutcome {
        match self.venue.post_order(request).await {
            Ok(ack) => {
                if ack.filled_size.is_zero() {
                    return OrderOutcome::Cancelled { order_id: ack.order_id };
                }
                if ack.filled_size < request.size {
                    let partial = TradingError::PartialFillAmbiguity {
                        requested: request.size,
                        filled: ack.filled_size,
                    };
                    warn!(token_id = %request.token_id, error = %partial, "Remainder cancelled");
                }
                filled(request, ack)
            }
            Err(TradingError::InsufficientLiquidity { .. }) => OrderOutcome::Cancelled { order_id: None },
            Err(e) => rejected(e),
        }
    }

    async fn submit_fok(&self, request: &OrderRequest) -> OrderOutcome {
        match self.venue.post_order(request).await {
            Ok(ack) if ack.filled_size.is_zero() => {
                OrderOutcome::Cancelled { order_id: ack.order_id }
            }
            Ok(ack) => filled(request, ack),
            Err(TradingError::InsufficientLiquidity { size, price }) if self.settings.fok_gtc_fallback => {
                info!(
                    token_id = %request.token_id,
                    size = %size,
                    price = %price,
                    "FOK found no liquidity, resting as GTC"
                );
                metrics::inc_fok_gtc_fallbacks();
                self.submit_gtc(&request.as_resting()).await
            }
            Err(TradingError::InsufficientLiquidity { .. }) => OrderOutcome::Cancelled { order_id: None },
            Err(e) => rejected(e),
        }
    }

    async fn submit_gtc(&self, request: &OrderRequest) -> OrderOutcome {
        let ack = match self.venue.post_order(request).await {
            Ok(ack) => ack,
            Err(e) => return rejected(e),
        };

        let Some(order_id) = ack.order_id.clone() else {
            if ack.filled_size > Decimal::ZERO {
                return filled(request, ack);
            }
            return rejected(TradingError::SubmissionFailed("No order ID in response".to_string()));
        };

        let matched = ack.status.is_some_and(|s| s.is_filled()) && ack.filled_size > Decimal::ZERO;
        if matched || ack.filled_size >= request.size {
            return filled(request, ack);
        }

        if let Some(timeout) = self.settings.gtc_timeout {
            self.schedule_deadline(order_id.clone(), timeout);
        }
        OrderOutcome::Pending { order_id }
    }

    fn schedule_deadline(&self, order_id: String, timeout: Duration) {
        let venue = Arc::clone(&self.venue);
        let deadlines = Arc::clone(&self.deadlines);
        let id = order_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(venue.as_ref(), &id, timeout).await;
            deadlines.remove(&id);
        });
        if let Some(previous) = self.deadlines.insert(order_id.clone(), handle) {
            previous.abort();
        }
        // A deadline that already ran could not remove an entry inserted after it.
        self.deadlines.remove_if(&order_id, |_, handle| handle.is_finished());
    }

    /// Resting orders that still have a deadline pending.
    pub fn pending_deadlines(&self) -> usize {
        self.deadlines.len()
    }

    /// Cancel a resting order and drop its deadline.
    pub async fn cancel(&self, order_id: &str) -> Result<(), TradingError> {
        if let Some((_, handle)) = self.deadlines.remove(order_id) {
            handle.abort();
        }
        self.venue.cancel_order(order_id).await?;
        metrics::inc_order_outcome("cancelled");
        Ok(())
    }

    /// Current state of an order.
    pub async fn order_state(&self, order_id: &str) -> Result<OrderState, TradingError> {
        self.venue.order_state(order_id).await
    }

    /// Shares of a token held by the wallet.
    pub async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        self.venue.token_balance(token_id).await
    }

    /// Cancel every order, retrying until each is confirmed or shutdown fires.
    ///
    /// Returns the ids that could not be confirmed.
    pub async fn cancel_until_confirmed(
        &self,
        order_ids: &[String],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Vec<String> {
        let mut remaining: Vec<String> = order_ids.to_vec();
        let mut attempt = 0u32;

        while !remaining.is_empty() {
            let mut failed = Vec::new();
            for id in remaining {
                match self.cancel(&id).await {
                    Ok(()) => info!(order_id = %id, "Cancel confirmed"),
                    Err(e) => match self.venue.order_state(&id).await {
                        Ok(state) if !state.is_open() => {
                            debug!(order_id = %id, "Order already settled");
                        }
                        _ => {
                            warn!(order_id = %id, attempt, error = %e, "Cancel not confirmed, retrying");
                            failed.push(id);
                        }
                    },
                }
            }
            remaining = failed;
            if remaining.is_empty() {
                break;
            }

            attempt += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.settings.cancel_retry_delay) => {}
                _ = wait_for_shutdown(shutdown) => {
                    warn!(unconfirmed = remaining.len(), "Shutdown before cancels confirmed");
                    return remaining;
                }
            }
        }
        Vec::new()
    }
}

impl Drop for OrderGateway {
    fn drop(&mut self) {
        for entry in self.deadlines.iter() {
            entry.value().abort();
        }
    }
}

/// Cancel a resting order whose deadline passed, unless it already settled.
async fn expire(venue: &dyn OrderVenue, order_id: &str, timeout: Duration) {
    match venue.order_state(order_id).await {
        Ok(state) if !state.is_open() => {
            debug!(order_id = %order_id, "Resting order settled before deadline");
            return;
        }
        Ok(_) => {}
        Err(e) => debug!(order_id = %order_id, error = %e, "Status unknown at deadline, cancelling"),
    }
    match venue.cancel_order(order_id).await {
        Ok(()) => {
            info!(order_id = %order_id, timeout_s = timeout.as_secs(), "Resting order auto-cancelled");
            metrics::inc_gtc_auto_cancels();
        }
        Err(e) => warn!(order_id = %order_id, error = %e, "Auto-cancel failed"),
    }
}

fn filled(request: &OrderRequest, ack: VenueAck) -> OrderOutcome {
    OrderOutcome::Filled {
        order_id: ack.order_id,
        size: ack.filled_size,
        avg_price: ack.avg_price.unwrap_or(request.price),
        requested: request.size,
    }
}

fn rejected(error: TradingError) -> OrderOutcome {
    OrderOutcome::Rejected {
        reason: error.to_string(),
    }
}
