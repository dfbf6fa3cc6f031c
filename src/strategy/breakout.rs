use crate::indicators::{rolling_max_prior, rolling_min_prior};
use crate::models::{Candle, Signal};
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};

/// Channel breakout strategy
///
/// BUY when the close exceeds the highest high of the previous `period` bars,
/// SELL when it falls below the lowest low. Needs `period + 2` bars.
#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    params: BreakoutParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutParams {
    pub period: usize,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self { period: 20 }
    }
}

impl BreakoutStrategy {
    pub fn new(params: BreakoutParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BreakoutParams {
        &self.params
    }
}

impl Default for BreakoutStrategy {
    fn default() -> Self {
        Self::new(BreakoutParams::default())
    }
}

impl Strategy for BreakoutStrategy {
    fn signal_series(&self, candles: &[Candle]) -> Vec<Option<Signal>> {
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let highest = rolling_max_prior(&highs, self.params.period);
        let lowest = rolling_min_prior(&lows, self.params.period);

        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                // Same warm-up as the live check: a full window plus one spare bar
                if i + 1 < self.min_candles_required() {
                    return None;
                }
                match (highest[i], lowest[i]) {
                    (Some(high), _) if candle.close > high => Some(Signal::Buy),
                    (_, Some(low)) if candle.close < low => Some(Signal::Sell),
                    _ => None,
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "Breakout"
    }

    fn min_candles_required(&self) -> usize {
        self.params.period + 2
    }
}
