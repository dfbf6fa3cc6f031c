use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::api::{ExchangeClient, MarketOrder, OrderAck};
use crate::error::ExchangeError;
use crate::execution::position_manager::Position;
use crate::notify::{format_order_retry, notify_detached, Notifier};

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Sends market orders for live positions
#[derive(Clone)]
pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    retry: RetryPolicy,
    notifier: Option<Arc<dyn Notifier>>,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            retry,
            notifier: None,
        }
    }

    /// Report every retried attempt to `notifier` as well as the log
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Submit an order, retrying transient failures up to `max_attempts` times
    ///
    /// Rejections are returned after the first attempt. Otherwise the error
    /// of the final attempt is returned once attempts run out.
    pub async fn submit(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.exchange.place_market_order(order).await {
                Ok(ack) => {
                    if attempt > 1 {
                        tracing::info!(
                            "✓ {} {} {} filled after {} attempts",
                            order.side,
                            order.quantity,
                            order.symbol,
                            attempt
                        );
                    }
                    return Ok(ack);
                }
                Err(e) if attempt < attempts && e.is_transient() => {
                    tracing::warn!(
                        "Order attempt {}/{} for {} failed: {}. Retrying in {:?}...",
                        attempt,
                        attempts,
                        order.symbol,
                        e,
                        self.retry.delay
                    );
                    if let Some(notifier) = &self.notifier {
                        notify_detached(
                            Arc::clone(notifier),
                            format_order_retry(order, attempt, attempts, &e.to_string()),
                        );
                    }
                    sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Order for {} failed after {} attempt(s): {}",
                        order.symbol,
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    pub async fn open(&self, position: &Position) -> Result<OrderAck, ExchangeError> {
        self.submit(&MarketOrder::entry(position)).await
    }

    pub async fn close(&self, position: &Position) -> Result<OrderAck, ExchangeError> {
        self.submit(&MarketOrder::exit(position)).await
    }
}
