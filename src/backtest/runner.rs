use crate::backtest::metrics::{BacktestMetrics, TradeRecord};
use crate::config::Settings;
use crate::models::{Candle, Side};
use crate::strategy::Strategy;
use crate::Result;
use chrono::{DateTime, Utc};

/// Account model for a replay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub initial_cash: f64,
    pub risk_fraction: f64,
    pub leverage: f64,
    /// Charged on the notional of every fill
    pub commission: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: 500.0,
            risk_fraction: 0.2,
            leverage: 5.0,
            commission: 0.005,
        }
    }
}

impl BacktestConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            initial_cash: settings.initial_cash,
            risk_fraction: settings.risk_fraction,
            leverage: settings.leverage,
            ..Self::default()
        }
    }
}

struct OpenTrade {
    side: Side,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    entry_commission: f64,
}

impl OpenTrade {
    fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        }
    }
}

/// Replays one strategy bar by bar
///
/// The strategy is always in the market once it first fires: an opposite
/// signal closes the open trade and reverses, a repeated signal is ignored.
/// Fills happen at the signal bar's close, and a trade still open at the
/// end is settled at the last close.
pub struct BacktestRunner {
    config: BacktestConfig,
}

impl BacktestRunner {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, candles: &[Candle], strategy: &dyn Strategy) -> Result<BacktestMetrics> {
        let needed = strategy.min_candles_required();
        if candles.len() < needed {
            return Err(format!(
                "Not enough candles for backtest. Need {}, got {}",
                needed,
                candles.len()
            )
            .into());
        }

        let signals = strategy.signal_series(candles);
        let mut cash = self.config.initial_cash;
        let mut open: Option<OpenTrade> = None;
        let mut trade_log = Vec::new();
        let mut equity_curve = Vec::with_capacity(candles.len());

        for (candle, signal) in candles.iter().zip(signals) {
            if let Some(signal) = signal {
                let side = signal.side();
                let same_side = open.as_ref().is_some_and(|t| t.side == side);

                if !same_side {
                    if let Some(trade) = open.take() {
                        cash += self.settle(trade, candle, &mut trade_log);
                    }
                    open = self.enter(side, candle, cash);
                    if let Some(trade) = &open {
                        cash -= trade.entry_commission;
                    }
                }
            }

            let unrealized = open.as_ref().map_or(0.0, |t| t.pnl_at(candle.close));
            equity_curve.push(cash + unrealized);
        }

        if let (Some(trade), Some(last)) = (open.take(), candles.last()) {
            cash += self.settle(trade, last, &mut trade_log);
            if let Some(final_point) = equity_curve.last_mut() {
                *final_point = cash;
            }
        }

        let metrics =
            BacktestMetrics::from_trades(trade_log, self.config.initial_cash, cash, &equity_curve);

        tracing::debug!(
            "Backtest {}: {} trades, final equity {:.2} ({:+.2}%)",
            strategy.name(),
            metrics.trades,
            metrics.final_equity,
            metrics.return_pct
        );

        Ok(metrics)
    }

    /// Run backtest and print report
    pub fn run_and_report(
        &self,
        candles: &[Candle],
        strategy: &dyn Strategy,
        scenario_name: &str,
    ) -> Result<BacktestMetrics> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Strategy: {}", strategy.name());
        println!("   Candles: {}", candles.len());
        println!("   Initial Equity: ${:.2}", self.config.initial_cash);

        let metrics = self.run(candles, strategy)?;
        metrics.print_report();

        Ok(metrics)
    }

    fn enter(&self, side: Side, candle: &Candle, equity: f64) -> Option<OpenTrade> {
        let price = candle.close;
        if price <= 0.0 || equity <= 0.0 {
            return None;
        }
        let quantity = equity * self.config.risk_fraction * self.config.leverage / price;
        Some(OpenTrade {
            side,
            entry_time: candle.timestamp,
            entry_price: price,
            quantity,
            entry_commission: quantity * price * self.config.commission,
        })
    }

    /// Close `trade` at the candle's close; returns the cash delta
    fn settle(&self, trade: OpenTrade, candle: &Candle, log: &mut Vec<TradeRecord>) -> f64 {
        let exit_price = candle.close;
        let gross_pnl = trade.pnl_at(exit_price);
        let exit_commission = trade.quantity * exit_price * self.config.commission;
        let commission = trade.entry_commission + exit_commission;

        log.push(TradeRecord {
            side: trade.side,
            entry_time: trade.entry_time,
            exit_time: candle.timestamp,
            entry_price: trade.entry_price,
            exit_price,
            quantity: trade.quantity,
            gross_pnl,
            commission,
            net_pnl: gross_pnl - commission,
        });

        gross_pnl - exit_commission
    }
}

impl Default for BacktestRunner {
    fn default() -> Self {
        Self::new(BacktestConfig::default())
    }
}
