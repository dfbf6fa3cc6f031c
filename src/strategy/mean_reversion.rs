use crate::indicators::{bollinger_bands, rsi_series, trend_average};
use crate::models::{Candle, Signal};
use crate::strategy::{closes, Strategy};
use serde::{Deserialize, Serialize};

/// Bollinger band + RSI mean reversion strategy
///
/// Entry conditions:
/// - BUY: previous close above the lower band, current close below it, RSI oversold
/// - SELL: previous close below the upper band, current close above it, RSI overbought
///
/// Both closes are compared against the band of the current bar.
/// With `trend_filter` enabled, BUY only fires above the EMA-200 trend average
/// and SELL only below it.
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    params: BollingerRsiParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerRsiParams {
    /// Bollinger window length
    pub bol_period: usize,

    /// Band width in standard deviations
    pub bol_dev: f64,

    /// RSI period for calculation
    pub rsi_period: usize,

    pub rsi_oversold: f64,
    pub rsi_overbought: f64,

    /// Only trade in the direction of the EMA-200 trend
    pub trend_filter: bool,
}

impl Default for BollingerRsiParams {
    fn default() -> Self {
        Self {
            bol_period: 40,
            bol_dev: 2.0,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            trend_filter: false,
        }
    }
}

impl MeanReversionStrategy {
    pub fn new(params: BollingerRsiParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BollingerRsiParams {
        &self.params
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new(BollingerRsiParams::default())
    }
}

impl Strategy for MeanReversionStrategy {
    fn signal_series(&self, candles: &[Candle]) -> Vec<Option<Signal>> {
        let prices = closes(candles);
        let mut out = vec![None; prices.len()];
        if prices.len() < 3 {
            return out;
        }

        let bands = bollinger_bands(&prices, self.params.bol_period, self.params.bol_dev);
        let rsi = rsi_series(&prices, self.params.rsi_period);
        let trend = if self.params.trend_filter {
            Some(trend_average(&prices))
        } else {
            None
        };

        for i in 2..prices.len() {
            let (Some(lower), Some(upper), Some(rsi)) = (bands.lower[i], bands.upper[i], rsi[i])
            else {
                continue;
            };

            let previous = prices[i - 1];
            let current = prices[i];

            let buy = previous > lower && current < lower && rsi < self.params.rsi_oversold;
            let sell = previous < upper && current > upper && rsi > self.params.rsi_overbought;

            let (buy, sell) = match &trend {
                Some(ema) => (buy && current > ema[i], sell && current < ema[i]),
                None => (buy, sell),
            };

            if buy {
                out[i] = Some(Signal::Buy);
            } else if sell {
                out[i] = Some(Signal::Sell);
            }
        }

        out
    }

    fn name(&self) -> &str {
        "Bollinger RSI"
    }

    fn min_candles_required(&self) -> usize {
        self.params
            .bol_period
            .max(self.params.rsi_period + 1)
            .max(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn create_test_candles(prices: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * prices.len() as i64);
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1000.0,
            })
            .collect()
    }

    fn small_params() -> BollingerRsiParams {
        BollingerRsiParams {
            bol_period: 5,
            bol_dev: 1.0,
            rsi_period: 3,
            ..BollingerRsiParams::default()
        }
    }

    #[test]
    fn test_no_signal_with_insufficient_history() {
        let strategy = MeanReversionStrategy::default();
        let candles = create_test_candles(&[100.0, 99.0]);
        assert_eq!(strategy.generate_signal(&candles), None);
    }

    #[test]
    fn test_no_signal_in_flat_market() {
        let strategy = MeanReversionStrategy::default();
        let candles = create_test_candles(&[100.0; 60]);
        assert_eq!(strategy.generate_signal(&candles), None);
    }

    #[test]
    fn test_buy_on_break_below_lower_band() {
        let strategy = MeanReversionStrategy::new(small_params());
        // Gentle decline keeps RSI low, then a sharp drop pierces the lower band
        let candles = create_test_candles(&[100.0, 100.0, 100.0, 99.8, 99.6, 99.5, 95.0]);

        assert_eq!(strategy.generate_signal(&candles), Some(Signal::Buy));
    }

    #[test]
    fn test_sell_on_break_above_upper_band() {
        let strategy = MeanReversionStrategy::new(small_params());
        let candles = create_test_candles(&[100.0, 100.0, 100.0, 100.2, 100.4, 100.5, 105.0]);

        assert_eq!(strategy.generate_signal(&candles), Some(Signal::Sell));
    }

    #[test]
    fn test_trend_filter_blocks_counter_trend_buy() {
        let params = BollingerRsiParams {
            trend_filter: true,
            ..small_params()
        };
        let strategy = MeanReversionStrategy::new(params);
        // Price ends below the trend average, so a BUY is counter-trend
        let candles = create_test_candles(&[100.0, 100.0, 100.0, 99.8, 99.6, 99.5, 95.0]);

        assert_eq!(strategy.generate_signal(&candles), None);
    }
}
