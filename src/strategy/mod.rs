// Trading strategy module
pub mod breakout;
pub mod mean_reversion;
pub mod signals;

pub use breakout::{BreakoutParams, BreakoutStrategy};
pub use mean_reversion::{BollingerRsiParams, MeanReversionStrategy};
pub use signals::{SignalGenerator, SignalReport, SignalSource};

use crate::models::{Candle, Signal};

/// Base trait for all trading strategies
///
/// Strategies are immutable: parameters are fixed at construction and every
/// evaluation is a pure function of the candles passed in.
pub trait Strategy: Send + Sync {
    /// Signal for every bar of the series (`None` = no signal)
    fn signal_series(&self, candles: &[Candle]) -> Vec<Option<Signal>>;

    /// Signal for the latest bar
    fn generate_signal(&self, candles: &[Candle]) -> Option<Signal> {
        if candles.len() < self.min_candles_required() {
            return None;
        }
        self.signal_series(candles).last().copied().flatten()
    }

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// Close prices of a candle series
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
