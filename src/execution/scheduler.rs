use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::control::TradingSwitch;
use crate::execution::candle_buffer::CandleBuffer;
use crate::execution::executor::OrderExecutor;
use crate::execution::position_manager::{
    ClosedTrade, ExitDecision, ExitOutcome, Position, PositionManager,
};
use crate::models::Signal;
use crate::notify::{format_signal, notify_detached, Notifier};
use crate::strategy::SignalGenerator;

/// Shared collaborators for every symbol loop
pub struct TradeContext {
    pub candles: CandleBuffer,
    pub positions: Arc<PositionManager>,
    /// `None` in simulation mode: positions are tracked but never sent
    pub executor: Option<OrderExecutor>,
    pub notifier: Arc<dyn Notifier>,
    /// Report signals without opening positions
    pub signals_only: bool,
    /// Paused: no new entries, open positions are still managed
    pub switch: TradingSwitch,
}

/// One traded symbol and the signal parameters chosen for it
#[derive(Debug, Clone)]
pub struct SymbolPlan {
    pub symbol: String,
    pub generator: SignalGenerator,
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Waiting { have: usize, need: usize },
    NoSignal,
    SignalOnly(Signal),
    /// Signal fired while trading was paused
    Paused(Signal),
    Opened(Position),
    /// Signal fired but no position could be sized
    Skipped,
    Held,
    Ratcheted { stop_loss: f64 },
    Closed(ClosedTrade),
}

/// Runs one fixed-interval trade loop per symbol
pub struct TradeScheduler {
    context: Arc<TradeContext>,
    interval: Duration,
}

impl TradeScheduler {
    pub fn new(context: TradeContext, interval: Duration) -> Self {
        Self {
            context: Arc::new(context),
            interval,
        }
    }

    pub fn context(&self) -> &Arc<TradeContext> {
        &self.context
    }

    /// Spawn a loop for every plan
    ///
    /// The loops never finish on their own; dropping the set aborts them.
    pub fn spawn(&self, plans: Vec<SymbolPlan>) -> JoinSet<()> {
        let mut loops = JoinSet::new();
        for plan in plans {
            loops.spawn(symbol_loop(
                Arc::clone(&self.context),
                Arc::new(plan),
                self.interval,
            ));
        }
        loops
    }
}

async fn symbol_loop(context: Arc<TradeContext>, plan: Arc<SymbolPlan>, period: Duration) {
    tracing::info!("💹 Trade loop for {} starting", plan.symbol);

    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // A failing or panicking tick only loses this tick
        let tick = {
            let context = Arc::clone(&context);
            let plan = Arc::clone(&plan);
            tokio::spawn(async move { run_tick(&context, &plan).await })
        };

        match tick.await {
            Ok(Ok(outcome)) => tracing::debug!("{} tick: {:?}", plan.symbol, outcome),
            Ok(Err(e)) => tracing::error!("❌ Trade tick for {} failed: {:#}", plan.symbol, e),
            Err(e) if e.is_panic() => {
                tracing::error!("❌ Trade tick for {} panicked", plan.symbol)
            }
            Err(e) => tracing::warn!("Trade tick for {} cancelled: {}", plan.symbol, e),
        }
    }
}

/// Evaluate one symbol once: manage the open position, or look for an entry
pub async fn run_tick(context: &TradeContext, plan: &SymbolPlan) -> anyhow::Result<TickOutcome> {
    let symbol = plan.symbol.as_str();
    let candles = context.candles.get_candles(symbol);
    let need = plan.generator.min_history();

    let last_close = match candles.last() {
        Some(last) if candles.len() >= need => last.close,
        _ => {
            tracing::info!("{}: collecting data ({}/{} candles)", symbol, candles.len(), need);
            return Ok(TickOutcome::Waiting {
                have: candles.len(),
                need,
            });
        }
    };

    let report = plan.generator.evaluate(&candles);
    let signal = report.signal();

    if context.positions.has_open_position(symbol) {
        return manage_position(context, symbol, last_close, signal).await;
    }

    let (Some(signal), Some(source)) = (signal, report.source()) else {
        return Ok(TickOutcome::NoSignal);
    };

    tracing::info!("⚡ Signal for {}: {} ({}) @ {}", symbol, signal, source, last_close);
    notify_detached(
        Arc::clone(&context.notifier),
        format_signal(symbol, signal, source, last_close),
    );

    if context.signals_only {
        return Ok(TickOutcome::SignalOnly(signal));
    }
    if context.switch.is_paused() {
        tracing::info!("⏸ Trading paused, not opening {}", symbol);
        return Ok(TickOutcome::Paused(signal));
    }

    let reason = format!("Signal {} ({})", signal, source);
    let side = signal.side();

    let opened = match &context.executor {
        None => context.positions.open(symbol, side, &reason)?,
        Some(executor) => match context.positions.plan_open(symbol, side)? {
            Some(position) => {
                let ack = executor
                    .open(&position)
                    .await
                    .with_context(|| format!("entry order for {} failed", symbol))?;
                tracing::info!("Entry order {} for {} {}", ack.order_id, symbol, ack.status);
                Some(context.positions.commit_open(position, &reason)?)
            }
            None => None,
        },
    };

    Ok(match opened {
        Some(position) => {
            tracing::info!(
                "📈 Opened {} {} qty={} entry={} tp={:.6} sl={:.6}",
                position.side,
                symbol,
                position.quantity,
                position.entry_price,
                position.take_profit,
                position.stop_loss
            );
            TickOutcome::Opened(position)
        }
        None => TickOutcome::Skipped,
    })
}

async fn manage_position(
    context: &TradeContext,
    symbol: &str,
    last_close: f64,
    signal: Option<Signal>,
) -> anyhow::Result<TickOutcome> {
    let Some(executor) = &context.executor else {
        let outcome = context.positions.evaluate_exit(symbol, last_close, signal)?;
        return Ok(match outcome {
            ExitOutcome::Hold => TickOutcome::Held,
            ExitOutcome::Ratcheted { stop_loss } => TickOutcome::Ratcheted { stop_loss },
            ExitOutcome::Closed(trade) => closed(trade),
        });
    };

    match context.positions.check_exit(symbol, last_close, signal)? {
        ExitDecision::Hold => Ok(TickOutcome::Held),
        ExitDecision::Ratcheted { stop_loss } => Ok(TickOutcome::Ratcheted { stop_loss }),
        ExitDecision::Exit { reason, price } => {
            let position = context
                .positions
                .get_position(symbol)
                .with_context(|| format!("position for {} vanished before exit", symbol))?;
            executor
                .close(&position)
                .await
                .with_context(|| format!("exit order for {} failed", symbol))?;
            let trade = context.positions.close(symbol, price, reason)?;
            Ok(closed(trade))
        }
    }
}

fn closed(trade: ClosedTrade) -> TickOutcome {
    tracing::info!(
        "📉 Closed {} {} @ {} ({}) pnl={:.4} equity={:.4}",
        trade.position.side,
        trade.position.symbol,
        trade.exit_price,
        trade.exit_reason,
        trade.pnl,
        trade.total_equity
    );
    TickOutcome::Closed(trade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ExchangeClient, MarketOrder, OrderAck, Ticker24h};
    use crate::error::ExchangeError;
    use crate::execution::executor::RetryPolicy;
    use crate::execution::position_manager::{ExitReason, PositionConfig};
    use crate::ledger::{LedgerAction, MemoryLedger, TradeLedger};
    use crate::models::{Candle, Side};
    use crate::notify::ConsoleNotifier;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;

    fn bar(i: i64, close: f64, spread: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + ChronoDuration::minutes(5 * i),
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            volume: 1000.0,
        }
    }

    /// 23 quiet bars then a close above the channel
    fn load_breakout(candles: &CandleBuffer, symbol: &str) {
        for i in 0..23 {
            candles.upsert(symbol, bar(i, 100.0, 0.5)).unwrap();
        }
        candles.upsert(symbol, bar(23, 101.0, 0.0)).unwrap();
    }

    struct RecordingExchange {
        fail: bool,
        orders: Mutex<Vec<MarketOrder>>,
    }

    #[async_trait]
    impl ExchangeClient for RecordingExchange {
        async fn fetch_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<Candle>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn fetch_tickers(&self) -> Result<Vec<Ticker24h>, ExchangeError> {
            Ok(Vec::new())
        }

        async fn place_market_order(
            &self,
            order: &MarketOrder,
        ) -> Result<OrderAck, ExchangeError> {
            self.orders.lock().unwrap().push(order.clone());
            if self.fail {
                return Err(ExchangeError::Api {
                    code: -2019,
                    msg: "Margin is insufficient.".to_string(),
                });
            }
            Ok(OrderAck {
                order_id: 1,
                status: "FILLED".to_string(),
            })
        }
    }

    fn context(
        executor: Option<OrderExecutor>,
        signals_only: bool,
    ) -> (TradeContext, MemoryLedger) {
        let candles = CandleBuffer::new(500);
        let memory = MemoryLedger::new();
        let positions = Arc::new(PositionManager::new(
            PositionConfig::default(),
            candles.clone(),
            TradeLedger::new(Box::new(memory.clone())),
        ));
        (
            TradeContext {
                candles,
                positions,
                executor,
                notifier: Arc::new(ConsoleNotifier),
                signals_only,
                switch: TradingSwitch::default(),
            },
            memory,
        )
    }

    fn plan(symbol: &str) -> SymbolPlan {
        SymbolPlan {
            symbol: symbol.to_string(),
            generator: SignalGenerator::default(),
        }
    }

    #[tokio::test]
    async fn test_waits_for_history() {
        let (ctx, _) = context(None, false);
        ctx.candles.upsert("BTCUSDT", bar(0, 100.0, 0.5)).unwrap();

        let outcome = run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        assert_eq!(outcome, TickOutcome::Waiting { have: 1, need: 22 });
    }

    #[tokio::test]
    async fn test_simulation_opens_then_manages_position() {
        let (ctx, memory) = context(None, false);
        load_breakout(&ctx.candles, "BTCUSDT");

        let outcome = run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        let position = match outcome {
            TickOutcome::Opened(p) => p,
            other => panic!("expected open, got {:?}", other),
        };
        assert_eq!(position.side, Side::Long);
        assert_eq!(position.entry_price, 101.0);

        // Next tick manages the position instead of opening another
        let outcome = run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Ratcheted { .. }));
        assert_eq!(memory.entries().len(), 1);

        // Price collapses through the ratcheted stop
        ctx.candles.upsert("BTCUSDT", bar(24, 100.2, 0.0)).unwrap();
        match run_tick(&ctx, &plan("BTCUSDT")).await.unwrap() {
            TickOutcome::Closed(trade) => assert_eq!(trade.exit_reason, ExitReason::StopLoss),
            other => panic!("expected close, got {:?}", other),
        }

        let actions: Vec<LedgerAction> = memory.entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![LedgerAction::Open, LedgerAction::Close]);
    }

    #[tokio::test]
    async fn test_signals_only_never_opens() {
        let (ctx, memory) = context(None, true);
        load_breakout(&ctx.candles, "BTCUSDT");

        let outcome = run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        assert_eq!(outcome, TickOutcome::SignalOnly(Signal::Buy));
        assert!(!ctx.positions.has_open_position("BTCUSDT"));
        assert!(memory.entries().is_empty());
    }

    #[tokio::test]
    async fn test_live_mode_sends_orders() {
        let exchange = Arc::new(RecordingExchange {
            fail: false,
            orders: Mutex::new(Vec::new()),
        });
        let executor = OrderExecutor::new(exchange.clone(), RetryPolicy::default());
        let (ctx, _) = context(Some(executor), false);
        load_breakout(&ctx.candles, "BTCUSDT");

        assert!(matches!(
            run_tick(&ctx, &plan("BTCUSDT")).await.unwrap(),
            TickOutcome::Opened(_)
        ));
        ctx.candles.upsert("BTCUSDT", bar(24, 102.5, 0.0)).unwrap();
        assert!(matches!(
            run_tick(&ctx, &plan("BTCUSDT")).await.unwrap(),
            TickOutcome::Closed(_)
        ));

        let orders = exchange.orders.lock().unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, "BUY");
        assert_eq!(orders[1].side, "SELL");
        assert!(orders[1].reduce_only);
    }

    #[tokio::test]
    async fn test_failed_entry_order_leaves_no_position() {
        let exchange = Arc::new(RecordingExchange {
            fail: true,
            orders: Mutex::new(Vec::new()),
        });
        let executor = OrderExecutor::new(
            exchange.clone(),
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::from_millis(1),
            },
        );
        let (ctx, memory) = context(Some(executor), false);
        load_breakout(&ctx.candles, "BTCUSDT");

        assert!(run_tick(&ctx, &plan("BTCUSDT")).await.is_err());
        assert!(!ctx.positions.has_open_position("BTCUSDT"));
        assert!(memory.entries().is_empty());
        // A margin rejection is final
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paused_tick_never_opens() {
        let (ctx, memory) = context(None, false);
        ctx.switch.pause();
        load_breakout(&ctx.candles, "BTCUSDT");

        let outcome = run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        assert_eq!(outcome, TickOutcome::Paused(Signal::Buy));
        assert!(!ctx.positions.has_open_position("BTCUSDT"));
        assert!(memory.entries().is_empty());

        ctx.switch.resume();
        assert!(matches!(
            run_tick(&ctx, &plan("BTCUSDT")).await.unwrap(),
            TickOutcome::Opened(_)
        ));
    }

    #[tokio::test]
    async fn test_paused_tick_still_closes_on_take_profit() {
        let (ctx, memory) = context(None, false);
        load_breakout(&ctx.candles, "BTCUSDT");
        run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        ctx.switch.pause();

        ctx.candles.upsert("BTCUSDT", bar(24, 102.5, 0.0)).unwrap();
        match run_tick(&ctx, &plan("BTCUSDT")).await.unwrap() {
            TickOutcome::Closed(trade) => assert_eq!(trade.exit_reason, ExitReason::TakeProfit),
            other => panic!("expected close, got {:?}", other),
        }
        let actions: Vec<LedgerAction> = memory.entries().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![LedgerAction::Open, LedgerAction::Close]);
    }

    #[tokio::test]
    async fn test_paused_tick_still_closes_on_stop_loss() {
        let (ctx, _) = context(None, false);
        load_breakout(&ctx.candles, "BTCUSDT");
        run_tick(&ctx, &plan("BTCUSDT")).await.unwrap();
        ctx.switch.pause();

        // 2% under the 101 entry
        ctx.candles.upsert("BTCUSDT", bar(24, 98.9, 0.0)).unwrap();
        match run_tick(&ctx, &plan("BTCUSDT")).await.unwrap() {
            TickOutcome::Closed(trade) => assert_eq!(trade.exit_reason, ExitReason::StopLoss),
            other => panic!("expected close, got {:?}", other),
        }
        assert!(!ctx.positions.has_open_position("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_spawned_loops_trade_each_symbol() {
        let (ctx, _) = context(None, false);
        load_breakout(&ctx.candles, "BTCUSDT");
        load_breakout(&ctx.candles, "ETHUSDT");

        let scheduler = TradeScheduler::new(ctx, Duration::from_millis(10));
        let mut loops = scheduler.spawn(vec![plan("BTCUSDT"), plan("ETHUSDT"), plan("XRPUSDT")]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        loops.abort_all();

        let positions = scheduler.context().positions.open_positions();
        let symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }
}
