use crate::models::{Candle, Signal};
use crate::strategy::{
    BollingerRsiParams, BreakoutParams, BreakoutStrategy, MeanReversionStrategy, Strategy,
};
use std::fmt;

/// Which sub-strategy produced the decisive signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    MeanReversion,
    Breakout,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::MeanReversion => write!(f, "BBRSI"),
            SignalSource::Breakout => write!(f, "Breakout"),
        }
    }
}

/// Outcome of one signal evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalReport {
    pub mean_reversion: Option<Signal>,
    pub breakout: Option<Signal>,
}

impl SignalReport {
    /// Decisive signal: breakout overrides mean reversion when both fire
    pub fn signal(&self) -> Option<Signal> {
        self.breakout.or(self.mean_reversion)
    }

    pub fn source(&self) -> Option<SignalSource> {
        if self.breakout.is_some() {
            Some(SignalSource::Breakout)
        } else if self.mean_reversion.is_some() {
            Some(SignalSource::MeanReversion)
        } else {
            None
        }
    }
}

/// Combines the mean reversion and breakout strategies
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    mean_reversion: MeanReversionStrategy,
    breakout: BreakoutStrategy,
}

impl SignalGenerator {
    pub fn new(mean_reversion: BollingerRsiParams, breakout: BreakoutParams) -> Self {
        Self {
            mean_reversion: MeanReversionStrategy::new(mean_reversion),
            breakout: BreakoutStrategy::new(breakout),
        }
    }

    /// Evaluate both sub-strategies on the latest bar
    ///
    /// Insufficient history yields an empty report, never an error.
    pub fn evaluate(&self, candles: &[Candle]) -> SignalReport {
        let report = SignalReport {
            mean_reversion: self.mean_reversion.generate_signal(candles),
            breakout: self.breakout.generate_signal(candles),
        };

        tracing::debug!(
            "Signal check: bars={}, bbrsi={:?}, breakout={:?}",
            candles.len(),
            report.mean_reversion,
            report.breakout
        );

        report
    }

    /// Fewest bars for which any sub-strategy can fire
    pub fn min_history(&self) -> usize {
        self.mean_reversion
            .min_candles_required()
            .min(self.breakout.min_candles_required())
    }

    pub fn mean_reversion_params(&self) -> &BollingerRsiParams {
        self.mean_reversion.params()
    }

    pub fn breakout_params(&self) -> &BreakoutParams {
        self.breakout.params()
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new(BollingerRsiParams::default(), BreakoutParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles_from(closes: &[f64], spread: f64) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close + spread,
                low: close - spread,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_breakout_overrides_mean_reversion() {
        let report = SignalReport {
            mean_reversion: Some(Signal::Sell),
            breakout: Some(Signal::Buy),
        };
        assert_eq!(report.signal(), Some(Signal::Buy));
        assert_eq!(report.source(), Some(SignalSource::Breakout));
    }

    #[test]
    fn test_mean_reversion_used_when_breakout_silent() {
        let report = SignalReport {
            mean_reversion: Some(Signal::Sell),
            breakout: None,
        };
        assert_eq!(report.signal(), Some(Signal::Sell));
        assert_eq!(report.source(), Some(SignalSource::MeanReversion));
    }

    #[test]
    fn test_no_signal_on_short_history() {
        let generator = SignalGenerator::default();
        let candles = candles_from(&[100.0, 101.0], 0.0);

        let report = generator.evaluate(&candles);
        assert_eq!(report, SignalReport::default());
        assert_eq!(report.signal(), None);
    }

    #[test]
    fn test_breakout_fires_regardless_of_rsi_and_bands() {
        let generator = SignalGenerator::default();
        // 23 flat bars then a close above the prior 20-bar high
        let mut closes = vec![100.0; 23];
        closes.push(100.9);
        let mut candles = candles_from(&closes, 0.5);
        candles.last_mut().unwrap().high = 100.9;

        let report = generator.evaluate(&candles);
        assert_eq!(report.breakout, Some(Signal::Buy));
        assert_eq!(report.signal(), Some(Signal::Buy));
    }

    #[test]
    fn test_min_history_is_smallest_requirement() {
        let generator = SignalGenerator::default();
        // breakout: 22, bbrsi: 40
        assert_eq!(generator.min_history(), 22);
    }
}
