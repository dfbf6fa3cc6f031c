use crate::models::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a single round trip for analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Price PnL before commission
    pub gross_pnl: f64,
    /// Entry plus exit commission
    pub commission: f64,
    pub net_pnl: f64,
}

impl TradeRecord {
    pub fn pnl_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity;
        if notional > 0.0 {
            self.net_pnl / notional * 100.0
        } else {
            0.0
        }
    }
}

/// Backtest performance summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub return_pct: f64,

    // Trade Statistics
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub profit_factor: f64, // Total wins / Total losses

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub total_commission: f64,

    pub trade_log: Vec<TradeRecord>,
}

impl BacktestMetrics {
    /// Summarize closed trades and the bar-by-bar equity curve
    pub fn from_trades(
        trade_log: Vec<TradeRecord>,
        initial_equity: f64,
        final_equity: f64,
        equity_curve: &[f64],
    ) -> Self {
        let trades = trade_log.len();
        let wins = trade_log.iter().filter(|t| t.net_pnl > 0.0).count();
        let losses = trades - wins;

        let win_rate = if trades > 0 {
            wins as f64 / trades as f64 * 100.0
        } else {
            0.0
        };

        let total_wins: f64 = trade_log
            .iter()
            .filter(|t| t.net_pnl > 0.0)
            .map(|t| t.net_pnl)
            .sum();
        let total_losses: f64 = trade_log
            .iter()
            .filter(|t| t.net_pnl <= 0.0)
            .map(|t| t.net_pnl.abs())
            .sum();

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(equity_curve);
        let return_pct = (final_equity - initial_equity) / initial_equity * 100.0;

        Self {
            initial_equity,
            final_equity,
            return_pct,
            trades,
            wins,
            losses,
            win_rate,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            total_commission: trade_log.iter().map(|t| t.commission).sum(),
            trade_log,
        }
    }

    /// Largest peak-to-trough fall of the equity curve
    fn calculate_drawdown(equity_curve: &[f64]) -> (f64, f64) {
        let mut peak = f64::MIN;
        let mut max_dd = 0.0;
        let mut max_dd_pct = 0.0;

        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_dd {
                max_dd = drawdown;
                max_dd_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };
            }
        }

        (max_dd, max_dd_pct)
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n📊 BACKTEST REPORT");
        println!("  Initial Equity:        ${:.2}", self.initial_equity);
        println!(
            "  Final Equity:          ${:.2} ({:+.2}%)",
            self.final_equity, self.return_pct
        );
        println!("  Commission Paid:       ${:.2}", self.total_commission);

        println!("\n📈 TRADE STATISTICS");
        println!("  Total Trades:          {}", self.trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.wins, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losses);
        if self.trades > 0 {
            println!("  Profit Factor:         {:.2}", self.profit_factor);
        }

        println!("\n⚠️  RISK");
        println!(
            "  Max Drawdown:          ${:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
    }
}
