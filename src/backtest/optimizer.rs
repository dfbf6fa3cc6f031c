use std::collections::HashMap;

use crate::backtest::runner::BacktestRunner;
use crate::models::Candle;
use crate::strategy::{
    BollingerRsiParams, BreakoutParams, BreakoutStrategy, MeanReversionStrategy, SignalGenerator,
    Strategy,
};

/// Fewer candles than this and the grid search is skipped
pub const MIN_OPTIMIZE_CANDLES: usize = 150;

/// How many symbols get a trade loop when ranking yields nothing
pub const FALLBACK_SYMBOLS: usize = 5;

/// Best parameter set found by a grid search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optimized<P> {
    pub params: P,
    pub final_equity: f64,
}

/// Symbol score plus the parameters it should trade with
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSymbol {
    pub symbol: String,
    pub mean_reversion: BollingerRsiParams,
    pub breakout: BreakoutParams,
    /// Sum of both strategies' final equity
    pub score: f64,
}

impl RankedSymbol {
    pub fn generator(&self) -> SignalGenerator {
        SignalGenerator::new(self.mean_reversion, self.breakout)
    }
}

/// bol_period 20..=40 step 5, bol_dev 1..=3, rsi_period 12..=18 step 2
///
/// Thresholds and the trend filter are taken from `base`.
pub fn bollinger_rsi_grid(base: &BollingerRsiParams) -> Vec<BollingerRsiParams> {
    let mut grid = Vec::new();
    for bol_period in (20..=40).step_by(5) {
        for bol_dev in 1..=3 {
            for rsi_period in (12..=18).step_by(2) {
                grid.push(BollingerRsiParams {
                    bol_period,
                    bol_dev: bol_dev as f64,
                    rsi_period,
                    ..*base
                });
            }
        }
    }
    grid
}

/// Breakout period 10..=30 step 5
pub fn breakout_grid() -> Vec<BreakoutParams> {
    (10..=30)
        .step_by(5)
        .map(|period| BreakoutParams { period })
        .collect()
}

fn grid_search<P: Copy>(
    runner: &BacktestRunner,
    candles: &[Candle],
    grid: Vec<P>,
    build: impl Fn(P) -> Box<dyn Strategy>,
) -> Option<Optimized<P>> {
    if candles.len() < MIN_OPTIMIZE_CANDLES {
        return None;
    }

    let mut best: Option<Optimized<P>> = None;
    for params in grid {
        let strategy = build(params);
        // A failed run only disqualifies this parameter set
        let Ok(metrics) = runner.run(candles, strategy.as_ref()) else {
            continue;
        };
        if best
            .as_ref()
            .map_or(true, |b| metrics.final_equity > b.final_equity)
        {
            best = Some(Optimized {
                params,
                final_equity: metrics.final_equity,
            });
        }
    }
    best
}

/// Grid search the mean reversion parameters by final equity
pub fn optimize_bollinger_rsi(
    runner: &BacktestRunner,
    candles: &[Candle],
    base: &BollingerRsiParams,
) -> Option<Optimized<BollingerRsiParams>> {
    grid_search(runner, candles, bollinger_rsi_grid(base), |params| {
        Box::new(MeanReversionStrategy::new(params))
    })
}

/// Grid search the breakout period by final equity
pub fn optimize_breakout(
    runner: &BacktestRunner,
    candles: &[Candle],
) -> Option<Optimized<BreakoutParams>> {
    grid_search(runner, candles, breakout_grid(), |params| {
        Box::new(BreakoutStrategy::new(params))
    })
}

/// Score every symbol with both optimized strategies and keep the best `top`
///
/// Symbols without candles are skipped. Short histories keep `defaults`
/// and are scored with them. With no results at all, the first
/// [`FALLBACK_SYMBOLS`] symbols are returned with `defaults` and a zero score.
pub fn rank_symbols(
    runner: &BacktestRunner,
    history: &HashMap<String, Vec<Candle>>,
    symbols: &[String],
    defaults: &SignalGenerator,
    top: usize,
) -> Vec<RankedSymbol> {
    let mut results = Vec::new();

    for symbol in symbols {
        let Some(candles) = history.get(symbol).filter(|c| !c.is_empty()) else {
            tracing::warn!("No candles for {}, skipping optimization", symbol);
            continue;
        };

        let mean_reversion = optimize_bollinger_rsi(runner, candles, defaults.mean_reversion_params())
            .map_or(*defaults.mean_reversion_params(), |o| o.params);
        let breakout = optimize_breakout(runner, candles)
            .map_or(*defaults.breakout_params(), |o| o.params);

        let mut score = 0.0;
        match runner.run(candles, &MeanReversionStrategy::new(mean_reversion)) {
            Ok(metrics) => {
                tracing::info!("{} BBRSI equity: {:.2}", symbol, metrics.final_equity);
                score += metrics.final_equity;
            }
            Err(e) => tracing::warn!("❌ BBRSI backtest for {} failed: {}", symbol, e),
        }
        match runner.run(candles, &BreakoutStrategy::new(breakout)) {
            Ok(metrics) => {
                tracing::info!("{} Breakout equity: {:.2}", symbol, metrics.final_equity);
                score += metrics.final_equity;
            }
            Err(e) => tracing::warn!("❌ Breakout backtest for {} failed: {}", symbol, e),
        }

        results.push(RankedSymbol {
            symbol: symbol.clone(),
            mean_reversion,
            breakout,
            score,
        });
    }

    if results.is_empty() {
        tracing::warn!(
            "No optimization results, trading the first {} symbols",
            FALLBACK_SYMBOLS
        );
        return symbols
            .iter()
            .take(FALLBACK_SYMBOLS)
            .map(|symbol| RankedSymbol {
                symbol: symbol.clone(),
                mean_reversion: *defaults.mean_reversion_params(),
                breakout: *defaults.breakout_params(),
                score: 0.0,
            })
            .collect();
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top);

    let summary: Vec<String> = results
        .iter()
        .map(|r| format!("{}={:.2}", r.symbol, r.score))
        .collect();
    tracing::info!("🏆 Top symbols: {}", summary.join(", "));

    results
}
