pub mod binance;
pub mod stream;
pub mod tickers;

pub use binance::{sign_request, BinanceFuturesClient};
pub use stream::KlineStream;
pub use tickers::{backfill, fetch_liquid_tickers, select_liquid_tickers, TickerFilter};

use crate::error::ExchangeError;
use crate::execution::position_manager::Position;
use crate::models::Candle;
use async_trait::async_trait;
use serde::Deserialize;

/// 24h rolling statistics for one symbol
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub last_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub high_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub low_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub quote_volume: f64,
}

/// Binance sends decimals as JSON strings
fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(f64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    /// "BUY" or "SELL"
    pub side: &'static str,
    pub quantity: f64,
    pub reduce_only: bool,
}

impl MarketOrder {
    /// Order that opens `position` on the exchange
    pub fn entry(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side.entry_order_side(),
            quantity: position.quantity,
            reduce_only: false,
        }
    }

    /// Order that flattens `position`
    pub fn exit(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side.exit_order_side(),
            quantity: position.quantity,
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    pub status: String,
}

/// The exchange operations the agent depends on
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most recent `limit` candles, oldest first
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn fetch_tickers(&self) -> Result<Vec<Ticker24h>, ExchangeError>;

    /// Signed market order (authenticated)
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError>;
}
