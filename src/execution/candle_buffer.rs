use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

pub const DEFAULT_MAX_CANDLES: usize = 500;

/// What an upsert did to the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Appended,
    Replaced,
}

#[derive(Debug, Error, PartialEq)]
pub enum CandleRejected {
    #[error("candle has non-finite or negative fields")]
    Invalid,

    #[error("candle at {candle} is older than latest bar {latest}")]
    OutOfOrder {
        candle: chrono::DateTime<chrono::Utc>,
        latest: chrono::DateTime<chrono::Utc>,
    },
}

/// Thread-safe in-memory cache of candle data
///
/// Maintains a rolling window of candles for each symbol. Every write is one
/// critical section, so readers see either the old or the new bar.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<String, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per symbol
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles: max_candles.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or refresh a candle for a symbol
    ///
    /// A candle with the timestamp of an existing bar replaces it in place.
    /// A newer timestamp appends, evicting the oldest bar past the bound.
    pub fn upsert(&self, symbol: &str, candle: Candle) -> Result<Upsert, CandleRejected> {
        if !candle.is_valid() {
            return Err(CandleRejected::Invalid);
        }

        let mut data = self.write();
        let series = data.entry(symbol.to_string()).or_default();

        if let Some(latest) = series.back().map(|c| c.timestamp) {
            if candle.timestamp < latest {
                // Refresh of an older bar that is still cached
                if let Some(existing) = series
                    .iter_mut()
                    .rev()
                    .find(|c| c.timestamp == candle.timestamp)
                {
                    *existing = candle;
                    return Ok(Upsert::Replaced);
                }
                return Err(CandleRejected::OutOfOrder {
                    candle: candle.timestamp,
                    latest,
                });
            }
        }

        if let Some(last) = series.back_mut() {
            if last.timestamp == candle.timestamp {
                *last = candle;
                return Ok(Upsert::Replaced);
            }
        }

        series.push_back(candle);

        // Remove oldest if exceeds max
        while series.len() > self.max_candles {
            series.pop_front();
        }

        Ok(Upsert::Appended)
    }

    /// Replace the whole series for a symbol (historical backfill)
    ///
    /// Invalid candles are dropped, the rest sorted and deduplicated by
    /// timestamp (the later duplicate wins) and trimmed to the bound.
    pub fn replace_series(&self, symbol: &str, mut candles: Vec<Candle>) -> usize {
        candles.retain(Candle::is_valid);
        candles.sort_by_key(|c| c.timestamp);

        let mut series: VecDeque<Candle> = VecDeque::with_capacity(candles.len());
        for candle in candles {
            match series.back_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => series.push_back(candle),
            }
        }
        while series.len() > self.max_candles {
            series.pop_front();
        }

        let count = series.len();
        self.write().insert(symbol.to_string(), series);
        count
    }

    /// Get all candles for a symbol (empty if unknown)
    pub fn get_candles(&self, symbol: &str) -> Vec<Candle> {
        self.read()
            .get(symbol)
            .map(|deque| deque.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the N most recent candles for a symbol
    pub fn get_recent_candles(&self, symbol: &str, n: usize) -> Vec<Candle> {
        self.read()
            .get(symbol)
            .map(|deque| deque.iter().skip(deque.len().saturating_sub(n)).cloned().collect())
            .unwrap_or_default()
    }

    /// Close of the latest bar
    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        self.read()
            .get(symbol)
            .and_then(|deque| deque.back())
            .map(|c| c.close)
    }

    /// Get count of candles for a symbol
    pub fn candle_count(&self, symbol: &str) -> usize {
        self.read().get(symbol).map(|d| d.len()).unwrap_or(0)
    }

    /// Get all tracked symbols
    pub fn symbols(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANDLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn create_test_candle(minute: i64, price: f64) -> Candle {
        Candle {
            timestamp: at(minute),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = CandleBuffer::new(100);
        assert_eq!(buffer.max_candles(), 100);
        assert!(buffer.symbols().is_empty());
        assert!(buffer.get_candles("BTCUSDT").is_empty());
    }

    #[test]
    fn test_upsert_appends_new_timestamps() {
        let buffer = CandleBuffer::new(100);

        assert_eq!(buffer.upsert("BTCUSDT", create_test_candle(0, 100.0)), Ok(Upsert::Appended));
        assert_eq!(buffer.upsert("BTCUSDT", create_test_candle(5, 101.0)), Ok(Upsert::Appended));

        let candles = buffer.get_candles("BTCUSDT");
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 100.0);
        assert_eq!(candles[1].close, 101.0);
    }

    #[test]
    fn test_upsert_replaces_current_bar() {
        let buffer = CandleBuffer::new(100);

        buffer.upsert("BTCUSDT", create_test_candle(0, 100.0)).unwrap();
        buffer.upsert("BTCUSDT", create_test_candle(5, 101.0)).unwrap();
        let outcome = buffer.upsert("BTCUSDT", create_test_candle(5, 102.5)).unwrap();

        assert_eq!(outcome, Upsert::Replaced);
        let candles = buffer.get_candles("BTCUSDT");
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 102.5);
    }

    #[test]
    fn test_upsert_rejects_out_of_order_and_invalid() {
        let buffer = CandleBuffer::new(100);
        buffer.upsert("BTCUSDT", create_test_candle(10, 100.0)).unwrap();

        let result = buffer.upsert("BTCUSDT", create_test_candle(5, 99.0));
        assert!(matches!(result, Err(CandleRejected::OutOfOrder { .. })));

        let mut bad = create_test_candle(15, 100.0);
        bad.volume = -1.0;
        assert_eq!(buffer.upsert("BTCUSDT", bad), Err(CandleRejected::Invalid));
        assert_eq!(buffer.candle_count("BTCUSDT"), 1);
    }

    #[test]
    fn test_max_candles_limit() {
        let buffer = CandleBuffer::new(5);

        // Add 10 candles
        for i in 0..10 {
            buffer
                .upsert("BTCUSDT", create_test_candle(i * 5, 100.0 + i as f64))
                .unwrap();
        }

        let candles = buffer.get_candles("BTCUSDT");
        assert_eq!(candles.len(), 5); // Should only keep last 5

        // Should have prices 105-109
        assert_eq!(candles[0].close, 105.0);
        assert_eq!(candles[4].close, 109.0);
    }

    #[test]
    fn test_multiple_symbols() {
        let buffer = CandleBuffer::new(100);

        buffer.upsert("BTCUSDT", create_test_candle(0, 100.0)).unwrap();
        buffer.upsert("ETHUSDT", create_test_candle(0, 200.0)).unwrap();
        buffer.upsert("BNBUSDT", create_test_candle(0, 300.0)).unwrap();

        let symbols = buffer.symbols();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains(&"BTCUSDT".to_string()));
        assert_eq!(buffer.last_close("ETHUSDT"), Some(200.0));
        assert_eq!(buffer.last_close("XRPUSDT"), None);
    }

    #[test]
    fn test_get_recent_candles() {
        let buffer = CandleBuffer::new(100);

        for i in 0..10 {
            buffer
                .upsert("BTCUSDT", create_test_candle(i * 5, 100.0 + i as f64))
                .unwrap();
        }

        let recent = buffer.get_recent_candles("BTCUSDT", 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].close, 107.0); // Last 3: 107, 108, 109
        assert_eq!(recent[2].close, 109.0);
    }

    #[test]
    fn test_replace_series_sorts_dedups_and_bounds() {
        let buffer = CandleBuffer::new(3);
        let candles = vec![
            create_test_candle(10, 102.0),
            create_test_candle(0, 100.0),
            create_test_candle(5, 101.0),
            create_test_candle(15, 103.0),
            create_test_candle(15, 103.5),
        ];

        assert_eq!(buffer.replace_series("BTCUSDT", candles), 3);
        let closes: Vec<f64> = buffer.get_candles("BTCUSDT").iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![101.0, 102.0, 103.5]);
    }

    #[test]
    fn test_thread_safety() {
        use std::thread;

        let buffer = CandleBuffer::new(100);
        let buffer_clone = buffer.clone();

        let handle = thread::spawn(move || {
            for i in 0..50 {
                buffer_clone
                    .upsert("ETHUSDT", create_test_candle(i, 100.0 + i as f64))
                    .unwrap();
            }
        });

        for i in 0..150 {
            buffer
                .upsert("BTCUSDT", create_test_candle(i, 100.0 + i as f64))
                .unwrap();
        }

        handle.join().unwrap();

        // Should have 100 candles (max limit)
        assert_eq!(buffer.candle_count("BTCUSDT"), 100);
        assert_eq!(buffer.candle_count("ETHUSDT"), 50);
    }
}
