//! In-memory venue for tests and local runs.
//!
//! Holds one market price per token. Immediate orders match against that
//! price; resting orders wait for the price to reach their limit. Failures
//! can be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::error::{FeedError, TradingError};
use crate::feed::{FallbackSource, TickSize};
use crate::trading::{OrderRequest, OrderState, OrderStatus, OrderType, OrderVenue, Side, VenueAck};

/// Which way the market has to move for a resting order to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    AtOrAbove(Decimal),
    AtOrBelow(Decimal),
}

impl Trigger {
    fn hit(&self, market: Decimal) -> bool {
        match self {
            Trigger::AtOrAbove(limit) => market >= *limit,
            Trigger::AtOrBelow(limit) => market <= *limit,
        }
    }
}

#[derive(Debug, Clone)]
struct MockOrder {
    request: OrderRequest,
    status: OrderStatus,
    filled: Decimal,
    trigger: Option<Trigger>,
}

/// In-memory order venue and fallback price source.
#[derive(Debug, Default)]
pub struct MockVenue {
    prices: Mutex<HashMap<String, Decimal>>,
    orders: Mutex<HashMap<String, MockOrder>>,
    submissions: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
    rejections: Mutex<VecDeque<String>>,
    fill_ratio: Mutex<Option<Decimal>>,
    balances: Mutex<HashMap<String, Decimal>>,
    fok_no_liquidity: AtomicBool,
    fallback_down: AtomicBool,
    cancel_failures: AtomicU32,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockVenue {
    /// Create an empty venue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the market price of a token and fill any resting order it reaches.
    pub fn set_price(&self, token_id: &str, price: Decimal) {
        lock(&self.prices).insert(token_id.to_string(), price);

        let mut orders = lock(&self.orders);
        for (id, order) in orders.iter_mut() {
            if order.request.token_id != token_id || !order.status.is_open() {
                continue;
            }
            if order.trigger.is_some_and(|t| t.hit(price)) {
                debug!(order_id = %id, price = %price, "Mock resting order filled");
                order.status = OrderStatus::Matched;
                order.filled = order.request.size;
            }
        }
    }

    /// Market price of a token.
    pub fn price(&self, token_id: &str) -> Option<Decimal> {
        lock(&self.prices).get(token_id).copied()
    }

    /// Reject the next submission with `reason`.
    pub fn reject_next(&self, reason: &str) {
        lock(&self.rejections).push_back(reason.to_string());
    }

    /// Fill only this share of each FAK order.
    pub fn set_fill_ratio(&self, ratio: Decimal) {
        *lock(&self.fill_ratio) = Some(ratio);
    }

    /// Model a thin book: every FOK misses for lack of liquidity and a
    /// marketable GTC rests until the next price update reaches it.
    pub fn fail_fok_liquidity(&self, fail: bool) {
        self.fok_no_liquidity.store(fail, Ordering::SeqCst);
    }

    /// Pin the wallet balance of a token, overriding the balance derived from fills.
    pub fn set_balance(&self, token_id: &str, shares: Decimal) {
        lock(&self.balances).insert(token_id.to_string(), shares);
    }

    /// Fail the next `count` cancel requests.
    pub fn fail_cancels(&self, count: u32) {
        self.cancel_failures.store(count, Ordering::SeqCst);
    }

    /// Make fallback price reads fail.
    pub fn fail_fallback(&self, fail: bool) {
        self.fallback_down.store(fail, Ordering::SeqCst);
    }

    /// Every order posted, in order.
    pub fn submissions(&self) -> Vec<OrderRequest> {
        lock(&self.submissions).clone()
    }

    /// Ids of orders cancelled, in order.
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    /// Orders still resting, sorted by id.
    pub fn open_orders(&self) -> Vec<(String, OrderRequest)> {
        let mut open: Vec<(String, OrderRequest)> = lock(&self.orders)
            .iter()
            .filter(|(_, o)| o.status.is_open())
            .map(|(id, o)| (id.clone(), o.request.clone()))
            .collect();
        open.sort_by_key(|(id, _)| id.trim_start_matches("mock-").parse::<u64>().unwrap_or(0));
        open
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, id: &str, request: &OrderRequest, status: OrderStatus, filled: Decimal, trigger: Option<Trigger>) {
        lock(&self.orders).insert(
            id.to_string(),
            MockOrder {
                request: request.clone(),
                status,
                filled,
                trigger,
            },
        );
    }
}

#[async_trait]
impl OrderVenue for MockVenue {
    async fn post_order(&self, request: &OrderRequest) -> Result<VenueAck, TradingError> {
        lock(&self.submissions).push(request.clone());
        request.validate().map_err(TradingError::InvalidParams)?;

        if let Some(reason) = lock(&self.rejections).pop_front() {
            return Err(TradingError::OrderRejected { reason });
        }

        let market = self.price(&request.token_id).ok_or_else(|| {
            TradingError::SubmissionFailed(format!("no market for {}", request.token_id))
        })?;

        let marketable = match request.side {
            Side::Buy => market <= request.price,
            Side::Sell => market >= request.price,
        };
        let id = self.next_order_id();

        match request.order_type {
            OrderType::FOK => {
                if !marketable || self.fok_no_liquidity.load(Ordering::SeqCst) {
                    return Err(TradingError::InsufficientLiquidity {
                        size: request.size,
                        price: request.price,
                    });
                }
                self.insert(&id, request, OrderStatus::Matched, request.size, None);
                Ok(VenueAck {
                    order_id: Some(id),
                    status: Some(OrderStatus::Matched),
                    filled_size: request.size,
                    avg_price: Some(market),
                })
            }
            OrderType::FAK => {
                if !marketable {
                    self.insert(&id, request, OrderStatus::Cancelled, Decimal::ZERO, None);
                    return Ok(VenueAck {
                        order_id: Some(id),
                        status: Some(OrderStatus::Unmatched),
                        filled_size: Decimal::ZERO,
                        avg_price: None,
                    });
                }
                let ratio = lock(&self.fill_ratio).unwrap_or(Decimal::ONE);
                let filled = (request.size * ratio).round_dp_with_strategy(4, RoundingStrategy::ToZero);
                self.insert(&id, request, OrderStatus::Matched, filled, None);
                Ok(VenueAck {
                    order_id: Some(id),
                    status: Some(OrderStatus::Matched),
                    filled_size: filled,
                    avg_price: Some(market),
                })
            }
            OrderType::GTC => {
                let thin = self.fok_no_liquidity.load(Ordering::SeqCst);
                let fills_now = market == request.price || (request.side == Side::Buy && marketable);
                if thin && marketable {
                    let trigger = match request.side {
                        Side::Buy => Trigger::AtOrBelow(request.price),
                        Side::Sell => Trigger::AtOrAbove(request.price),
                    };
                    self.insert(&id, request, OrderStatus::Live, Decimal::ZERO, Some(trigger));
                    return Ok(VenueAck {
                        order_id: Some(id),
                        status: Some(OrderStatus::Live),
                        filled_size: Decimal::ZERO,
                        avg_price: None,
                    });
                }
                if fills_now {
                    self.insert(&id, request, OrderStatus::Matched, request.size, None);
                    return Ok(VenueAck {
                        order_id: Some(id),
                        status: Some(OrderStatus::Matched),
                        filled_size: request.size,
                        avg_price: Some(request.price),
                    });
                }
                let trigger = if market < request.price {
                    Trigger::AtOrAbove(request.price)
                } else {
                    Trigger::AtOrBelow(request.price)
                };
                self.insert(&id, request, OrderStatus::Live, Decimal::ZERO, Some(trigger));
                Ok(VenueAck {
                    order_id: Some(id),
                    status: Some(OrderStatus::Live),
                    filled_size: Decimal::ZERO,
                    avg_price: None,
                })
            }
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        let failed = |reason: &str| TradingError::CancelFailed {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        };

        let pending = self.cancel_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.cancel_failures.store(pending - 1, Ordering::SeqCst);
            return Err(failed("injected failure"));
        }

        let mut orders = lock(&self.orders);
        let order = orders.get_mut(order_id).ok_or_else(|| failed("unknown order"))?;
        if !order.status.is_open() {
            return Err(failed("order is not open"));
        }
        order.status = OrderStatus::Cancelled;
        drop(orders);

        lock(&self.cancelled).push(order_id.to_string());
        Ok(())
    }

    async fn order_state(&self, order_id: &str) -> Result<OrderState, TradingError> {
        let orders = lock(&self.orders);
        let order = orders.get(order_id).ok_or_else(|| TradingError::StatusFailed {
            order_id: order_id.to_string(),
            reason: "unknown order".to_string(),
        })?;
        Ok(OrderState {
            order_id: order_id.to_string(),
            status: Some(order.status),
            filled_size: Some(order.filled),
            original_size: Some(order.request.size),
            price: Some(order.request.price),
        })
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        if let Some(pinned) = lock(&self.balances).get(token_id) {
            return Ok(*pinned);
        }
        let held = lock(&self.orders)
            .values()
            .filter(|o| o.request.token_id == token_id)
            .fold(Decimal::ZERO, |held, o| match o.request.side {
                Side::Buy => held + o.filled,
                Side::Sell => held - o.filled,
            });
        Ok(held.max(Decimal::ZERO))
    }
}

#[async_trait]
impl FallbackSource for MockVenue {
    async fn midpoint(&self, token_id: &str) -> Result<Decimal, FeedError> {
        let unavailable = |reason: &str| FeedError::Unavailable {
            token_id: token_id.to_string(),
            reason: reason.to_string(),
        };
        if self.fallback_down.load(Ordering::SeqCst) {
            return Err(unavailable("HTTP 503"));
        }
        self.price(token_id).ok_or_else(|| unavailable("no market"))
    }

    async fn tick_size(&self, _token_id: &str) -> Result<Option<TickSize>, FeedError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sell(price: Decimal) -> OrderRequest {
        OrderRequest::sell_shares("up", price, dec!(1), TickSize::Coarse, OrderType::GTC).unwrap()
    }

    #[tokio::test]
    async fn resting_sells_fill_when_price_reaches_them() {
        let venue = MockVenue::new();
        venue.set_price("up", dec!(0.61));

        let tp = venue.post_order(&sell(dec!(0.80))).await.unwrap().order_id.unwrap();
        let sl = venue.post_order(&sell(dec!(0.58))).await.unwrap().order_id.unwrap();
        assert_eq!(venue.open_orders().len(), 2);

        venue.set_price("up", dec!(0.58));
        assert!(venue.order_state(&sl).await.unwrap().is_filled());
        assert!(venue.order_state(&tp).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn cancel_of_filled_order_fails() {
        let venue = MockVenue::new();
        venue.set_price("up", dec!(0.61));
        let tp = venue.post_order(&sell(dec!(0.80))).await.unwrap().order_id.unwrap();
        venue.set_price("up", dec!(0.81));
        assert!(venue.cancel_order(&tp).await.is_err());
        assert!(venue.cancelled().is_empty());
    }

    #[tokio::test]
    async fn balance_follows_fills_unless_pinned() {
        let venue = MockVenue::new();
        venue.set_price("up", dec!(0.61));
        let buy = OrderRequest::buy_for_amount("up", dec!(0.61), dec!(1), TickSize::Coarse, OrderType::FAK).unwrap();
        venue.post_order(&buy).await.unwrap();
        venue.post_order(&sell(dec!(0.80))).await.unwrap();
        assert_eq!(venue.token_balance("up").await.unwrap(), dec!(1));

        venue.set_price("up", dec!(0.80));
        assert_eq!(venue.token_balance("up").await.unwrap(), dec!(0));

        venue.set_balance("up", dec!(0.5));
        assert_eq!(venue.token_balance("up").await.unwrap(), dec!(0.5));
    }

    #[tokio::test]
    async fn fallback_serves_market_price() {
        let venue = MockVenue::new();
        venue.set_price("up", dec!(0.44));
        assert_eq!(venue.midpoint("up").await.unwrap(), dec!(0.44));
        venue.fail_fallback(true);
        assert!(venue.midpoint("up").await.is_err());
    }
}
