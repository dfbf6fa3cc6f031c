// Technical indicators module
// Bollinger bands, RSI, trend EMA and prior-window extremums

pub mod bollinger;
pub mod extremum;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{bollinger_bands, BollingerBands};
pub use extremum::{rolling_max_prior, rolling_min_prior};
pub use moving_average::{ema_series, trend_average, TREND_SPAN};
pub use rsi::rsi_series;
