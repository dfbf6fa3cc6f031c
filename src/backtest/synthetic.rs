use crate::models::Candle;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop around the base price
    Sideways,
    /// Unit-step random walk with wide intrabar ranges
    RandomWalk,
    /// Quiet range followed by a sustained move up
    Breakout,
}

/// Generates reproducible price data for backtests and optimizer runs
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
    start: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            base_volume: 1_000_000.0,
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    pub fn with_base_price(mut self, price: f64) -> Self {
        self.base_price = price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_candles` bars spaced `interval_minutes` apart
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let base = self.base_price;
        // +-2% per day spread over the bars of one day
        let daily_drift = 0.02 / (24.0 * 60.0 / interval_minutes as f64);

        let mut price = base;
        let mut candles = Vec::with_capacity(num_candles);

        for i in 0..num_candles {
            let timestamp = self.start + Duration::minutes(i as i64 * interval_minutes);

            let (next, spread) = match scenario {
                MarketScenario::Uptrend => {
                    let noise = price * self.rng.gen_range(-0.001..0.001);
                    (price + price * daily_drift + noise, 0.002)
                }
                MarketScenario::Downtrend => {
                    let noise = price * self.rng.gen_range(-0.001..0.001);
                    (price - price * daily_drift + noise, 0.002)
                }
                MarketScenario::Sideways => {
                    let reversion = (base - price) * 0.1;
                    let noise = price * self.rng.gen_range(-0.01..0.01);
                    (price + reversion + noise, 0.002)
                }
                MarketScenario::RandomWalk => {
                    let step = self.rng.gen_range(-1.0..1.0);
                    ((price + step).max(base * 0.1), 0.02)
                }
                MarketScenario::Breakout => {
                    if i < num_candles / 2 {
                        let noise = base * self.rng.gen_range(-0.002..0.002);
                        (base + noise, 0.002)
                    } else {
                        let push = price * self.rng.gen_range(0.001..0.004);
                        (price + push, 0.002)
                    }
                }
            };

            price = next;
            candles.push(self.create_candle(price, timestamp, spread));
        }

        candles
    }

    /// OHLC around `close`, with high/low within `spread` of it
    fn create_candle(&mut self, close: f64, timestamp: DateTime<Utc>, spread: f64) -> Candle {
        let high = close * (1.0 + self.rng.gen_range(0.0..spread));
        let low = close * (1.0 - self.rng.gen_range(0.0..spread));

        let open_raw = close * (1.0 + self.rng.gen_range(-spread..spread));
        let open = open_raw.clamp(low, high);

        // Vary volume +-30%
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}
