use crate::api::{ExchangeClient, Ticker24h};
use crate::config::Settings;
use crate::models::Candle;

pub const FALLBACK_SYMBOL: &str = "BTCUSDT";

/// Liquidity screen for tradable symbols
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerFilter {
    pub top_n: usize,
    pub min_price: f64,
    pub min_volume: f64,
    pub max_spread_percent: f64,
}

impl TickerFilter {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_n: settings.top_n_tickers,
            min_price: settings.min_price,
            min_volume: settings.min_volume,
            max_spread_percent: settings.max_spread_percent,
        }
    }

    fn accepts(&self, ticker: &Ticker24h) -> bool {
        if !ticker.symbol.contains("USDT") {
            return false;
        }
        let spread_percent = if ticker.last_price > 0.0 {
            (ticker.high_price - ticker.low_price) / ticker.last_price * 100.0
        } else {
            100.0
        };
        ticker.last_price >= self.min_price
            && ticker.quote_volume >= self.min_volume
            && spread_percent <= self.max_spread_percent
    }
}

impl Default for TickerFilter {
    fn default() -> Self {
        Self {
            top_n: 10,
            min_price: 0.1,
            min_volume: 1_000_000.0,
            max_spread_percent: 5.0,
        }
    }
}

/// Most liquid USDT symbols by quote volume, falling back to BTCUSDT
pub fn select_liquid_tickers(tickers: &[Ticker24h], filter: &TickerFilter) -> Vec<String> {
    let mut liquid: Vec<&Ticker24h> = tickers.iter().filter(|t| filter.accepts(t)).collect();
    liquid.sort_by(|a, b| b.quote_volume.total_cmp(&a.quote_volume));

    let symbols: Vec<String> = liquid
        .into_iter()
        .take(filter.top_n)
        .map(|t| t.symbol.clone())
        .collect();

    if symbols.is_empty() {
        tracing::warn!("No ticker passed the liquidity filter, using {}", FALLBACK_SYMBOL);
        return vec![FALLBACK_SYMBOL.to_string()];
    }
    symbols
}

/// Fetch tickers and screen them; exchange failures yield the fallback
pub async fn fetch_liquid_tickers(
    exchange: &dyn ExchangeClient,
    filter: &TickerFilter,
) -> Vec<String> {
    match exchange.fetch_tickers().await {
        Ok(tickers) => select_liquid_tickers(&tickers, filter),
        Err(e) => {
            tracing::warn!("Failed to fetch tickers: {}", e);
            vec![FALLBACK_SYMBOL.to_string()]
        }
    }
}

/// Historical candles for `symbol`, empty if the exchange call fails
pub async fn backfill(
    exchange: &dyn ExchangeClient,
    symbol: &str,
    interval: &str,
    limit: usize,
) -> Vec<Candle> {
    match exchange.fetch_klines(symbol, interval, limit).await {
        Ok(candles) => {
            tracing::debug!("Backfilled {} candles for {}", candles.len(), symbol);
            candles
        }
        Err(e) => {
            tracing::warn!("❌ Failed to backfill {}: {}", symbol, e);
            Vec::new()
        }
    }
}
