// Candle cache, position bookkeeping and the per-symbol trade loops
pub mod candle_buffer;
pub mod executor;
pub mod pnl_simulator;
pub mod position_manager;
pub mod scheduler;

pub use candle_buffer::{CandleBuffer, CandleRejected};
pub use executor::{OrderExecutor, RetryPolicy};
pub use position_manager::{
    ClosedTrade, ExitDecision, ExitOutcome, ExitReason, Position, PositionConfig, PositionManager,
    PositionStatus,
};
pub use scheduler::{run_tick, SymbolPlan, TickOutcome, TradeContext, TradeScheduler};
