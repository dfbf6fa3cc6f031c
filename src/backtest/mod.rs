pub mod metrics;
pub mod optimizer;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, TradeRecord};
pub use optimizer::{
    optimize_bollinger_rsi, optimize_breakout, rank_symbols, Optimized, RankedSymbol,
};
pub use runner::{BacktestConfig, BacktestRunner};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
