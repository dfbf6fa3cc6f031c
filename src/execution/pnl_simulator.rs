use crate::execution::position_manager::{ExitReason, Position};
use crate::models::Side;

/// Exit the replay hit before the end of the path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedExit {
    pub reason: ExitReason,
    pub price: f64,
    /// Index into the price path of the bar that triggered the exit
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationOutcome {
    pub pnl: f64,
    pub exit: Option<SimulatedExit>,
}

/// Replay a price path against a position's exit rules
///
/// Works on a copy of the trailing state; the position itself is never
/// touched. Per price: update the favorable extreme, arm the trail once
/// price moves `trail_activation` past entry, then check take-profit,
/// stop-loss and the armed trailing stop in that order. TP and SL exit at
/// their own levels, the trail at the observed price. Without an exit the
/// PnL is marked at the last price of the path.
pub fn simulate(position: &Position, path: &[f64], trail_activation: f64) -> SimulationOutcome {
    let trail = position.trailing_percent / 100.0;
    let entry = position.entry_price;

    let mut extreme = entry;
    let mut armed = false;

    for (index, &price) in path.iter().enumerate() {
        let exit = match position.side {
            Side::Long => {
                extreme = extreme.max(price);
                if !armed && price >= entry * (1.0 + trail_activation) {
                    armed = true;
                }

                if price >= position.take_profit {
                    Some((ExitReason::TakeProfit, position.take_profit))
                } else if price <= position.stop_loss {
                    Some((ExitReason::StopLoss, position.stop_loss))
                } else if armed
                    && price < extreme * (1.0 - trail)
                    && position.pnl_at(price) > 0.0
                {
                    Some((ExitReason::TrailingStop, price))
                } else {
                    None
                }
            }
            Side::Short => {
                extreme = extreme.min(price);
                if !armed && price <= entry * (1.0 - trail_activation) {
                    armed = true;
                }

                if price <= position.take_profit {
                    Some((ExitReason::TakeProfit, position.take_profit))
                } else if price >= position.stop_loss {
                    Some((ExitReason::StopLoss, position.stop_loss))
                } else if armed
                    && price > extreme * (1.0 + trail)
                    && position.pnl_at(price) > 0.0
                {
                    Some((ExitReason::TrailingStop, price))
                } else {
                    None
                }
            }
        };

        if let Some((reason, exit_price)) = exit {
            return SimulationOutcome {
                pnl: position.pnl_at(exit_price),
                exit: Some(SimulatedExit {
                    reason,
                    price: exit_price,
                    index,
                }),
            };
        }
    }

    SimulationOutcome {
        pnl: path.last().map(|&p| position.pnl_at(p)).unwrap_or(0.0),
        exit: None,
    }
}
