use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use perpbot::api::{
    backfill, fetch_liquid_tickers, BinanceFuturesClient, ExchangeClient, KlineStream,
    TickerFilter,
};
use perpbot::backtest::{
    optimize_bollinger_rsi, optimize_breakout, rank_symbols, BacktestConfig, BacktestRunner,
};
use perpbot::config::Settings;
use perpbot::control::{
    run_command_polling, run_equity_sampler, ControlPanel, EquityHistory, TradingSwitch,
};
use perpbot::execution::{
    CandleBuffer, OrderExecutor, PositionManager, SymbolPlan, TradeContext, TradeScheduler,
};
use perpbot::ledger::{JsonlLedger, LedgerEntry, LedgerSink, TradeLedger};
use perpbot::notify::{self, notify_detached, run_notification_service, Notifier, TelegramNotifier};
use perpbot::strategy::{BreakoutStrategy, MeanReversionStrategy, SignalGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "perpbot", version, about = "Binance USDT-M futures signal and trading agent")]
struct Cli {
    /// Settings file (default: config.toml, optional)
    #[arg(long)]
    config: Option<String>,

    /// Paper trade: track positions without sending orders
    #[arg(long)]
    simulation: bool,

    /// Report signals without opening positions
    #[arg(long)]
    signals_only: bool,

    /// Trade these symbols instead of screening tickers (comma separated)
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the most recent ledger entries
    Ledger {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print balance, open positions and equity statistics from the ledger
    Status,
    /// Optimize and backtest both strategies on one symbol's history
    Backtest {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if cli.simulation {
        settings.use_simulation_mode = true;
    }
    if cli.signals_only {
        settings.signals_only = true;
    }

    match cli.command {
        Some(Command::Ledger { limit }) => print_ledger(&settings, limit),
        Some(Command::Status) => print_status(&settings),
        Some(Command::Backtest { symbol, limit }) => run_backtest(&settings, &symbol, limit).await,
        None => {
            if !settings.use_simulation_mode && !settings.has_exchange_credentials() {
                bail!("live trading needs API_KEY and API_SECRET (or run with --simulation)");
            }
            supervise(settings, cli.symbols).await
        }
    }
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("perpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run the pipeline until Ctrl+C, restarting it after a crash
async fn supervise(settings: Settings, pinned: Vec<String>) -> anyhow::Result<()> {
    tracing::info!("🚀 perpbot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Timeframe: {}", settings.timeframe);
    tracing::info!("  Check interval: {}s", settings.check_interval_seconds);
    tracing::info!("  Initial cash: ${:.2}", settings.initial_cash);
    tracing::info!("  Leverage: {}x, risk fraction {}", settings.leverage, settings.risk_fraction);
    tracing::info!(
        "  Mode: {}{}",
        if settings.use_simulation_mode { "simulation" } else { "LIVE" },
        if settings.signals_only { " (signals only)" } else { "" }
    );
    tracing::info!("\nPress Ctrl+C to stop...\n");

    let (shared, events) = Shared::build(&settings)?;
    let mut background = JoinSet::new();
    background.spawn(run_notification_service(Arc::clone(&shared.notifier), events));
    background.spawn(run_equity_sampler(
        Arc::clone(&shared.panel),
        settings.check_interval(),
    ));
    if let Some(telegram) = TelegramNotifier::new(&settings.telegram) {
        background.spawn(run_command_polling(
            Arc::new(telegram),
            Arc::clone(&shared.panel),
            Duration::from_secs(5),
        ));
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            result = run_pipeline(&settings, &pinned, &shared) => {
                match result {
                    Ok(()) => tracing::warn!("Pipeline exited"),
                    Err(e) => tracing::error!("❌ Pipeline crashed: {:#}", e),
                }
            }
        }

        tracing::info!(
            "🔁 Restarting in {}s...",
            settings.restart_delay().as_secs()
        );
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = tokio::time::sleep(settings.restart_delay()) => {}
        }
    }

    background.abort_all();
    tracing::info!(
        "👋 perpbot stopped. Balance {:.2}, {} open position(s)",
        shared.panel.balance(),
        shared.positions.open_positions().len()
    );
    Ok(())
}

/// Collaborators built once per process, so they outlive pipeline restarts
struct Shared {
    candles: CandleBuffer,
    positions: Arc<PositionManager>,
    notifier: Arc<dyn Notifier>,
    switch: TradingSwitch,
    panel: Arc<ControlPanel>,
}

impl Shared {
    /// Restore the position book from the ledger
    ///
    /// Also returns the receiving end of the book's ledger events.
    fn build(settings: &Settings) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<LedgerEntry>)> {
        let candles = CandleBuffer::new(settings.history_limit);
        let ledger = TradeLedger::new(Box::new(JsonlLedger::new(&settings.ledger_path)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let positions = Arc::new(
            PositionManager::restore(settings.position_config(), candles.clone(), ledger)
                .with_context(|| {
                    format!("failed to replay ledger {}", settings.ledger_path.display())
                })?
                .with_events(events_tx),
        );

        let entries = positions
            .recent_entries(EQUITY_HISTORY_CAPACITY)
            .context("failed to read ledger history")?;
        let history = Arc::new(EquityHistory::from_entries(&entries, EQUITY_HISTORY_CAPACITY));
        let switch = TradingSwitch::default();
        let panel = Arc::new(ControlPanel::new(
            switch.clone(),
            Arc::clone(&positions),
            history,
        ));

        let shared = Self {
            candles,
            positions,
            notifier: notify::from_settings(&settings.telegram),
            switch,
            panel,
        };
        Ok((shared, events_rx))
    }
}

const EQUITY_HISTORY_CAPACITY: usize = 1000;

/// Screen, backfill, stream, rank, then trade until a task dies
///
/// Every spawned task lives in a `JoinSet`, so returning (or being dropped
/// by the supervisor) aborts all of them.
async fn run_pipeline(settings: &Settings, pinned: &[String], shared: &Shared) -> anyhow::Result<()> {
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceFuturesClient::new(&settings.exchange)?);
    let notifier = Arc::clone(&shared.notifier);

    // Universe
    let mut universe = if pinned.is_empty() {
        tracing::info!("🔍 Screening liquid tickers...");
        fetch_liquid_tickers(exchange.as_ref(), &TickerFilter::from_settings(settings)).await
    } else {
        pinned.to_vec()
    };
    // Restored positions keep being managed even if they dropped out of the screen
    let held: Vec<String> = shared
        .positions
        .open_positions()
        .into_iter()
        .map(|p| p.symbol)
        .collect();
    for symbol in &held {
        if !universe.contains(symbol) {
            universe.push(symbol.clone());
        }
    }
    tracing::info!("📋 Universe: {}", universe.join(", "));

    // Backfill
    let candles = shared.candles.clone();
    let mut history = HashMap::new();
    for symbol in &universe {
        let series = backfill(
            exchange.as_ref(),
            symbol,
            &settings.timeframe,
            settings.history_limit,
        )
        .await;
        let stored = candles.replace_series(symbol, series);
        tracing::info!("  {} candles cached for {}", stored, symbol);
        history.insert(symbol.clone(), candles.get_candles(symbol));
    }

    let mut services = JoinSet::new();
    let stream = KlineStream::new(&settings.exchange.ws_url, &settings.timeframe, candles.clone());
    services.spawn(stream.run(universe.clone()));

    // Ranking
    let defaults = SignalGenerator::new(settings.mean_reversion, settings.breakout);
    let mut plans: Vec<SymbolPlan> = if settings.optimize {
        tracing::info!("🧪 Optimizing strategy parameters for {} symbols...", universe.len());
        let runner = BacktestRunner::new(BacktestConfig::from_settings(settings));
        let top = settings.top_symbols;
        let symbols = universe.clone();
        let base = defaults.clone();
        let ranked = tokio::task::spawn_blocking(move || {
            rank_symbols(&runner, &history, &symbols, &base, top)
        })
        .await
        .context("optimizer task failed")?;
        ranked
            .iter()
            .map(|r| SymbolPlan {
                symbol: r.symbol.clone(),
                generator: r.generator(),
            })
            .collect()
    } else {
        universe
            .iter()
            .take(settings.top_symbols)
            .map(|symbol| SymbolPlan {
                symbol: symbol.clone(),
                generator: defaults.clone(),
            })
            .collect()
    };

    for symbol in held {
        if !plans.iter().any(|p| p.symbol == symbol) {
            tracing::info!("{} has an open position, adding a trade loop to manage it", symbol);
            plans.push(SymbolPlan {
                symbol,
                generator: defaults.clone(),
            });
        }
    }

    let executor = if settings.use_simulation_mode {
        None
    } else {
        Some(
            OrderExecutor::new(Arc::clone(&exchange), settings.retry_policy())
                .with_notifier(Arc::clone(&notifier)),
        )
    };

    let traded: Vec<String> = plans.iter().map(|p| p.symbol.clone()).collect();
    tracing::info!("🔄 Spawning trade loops for {}", traded.join(", "));
    notify_detached(
        Arc::clone(&notifier),
        notify::escape_markdown(&format!("🚀 perpbot trading {}", traded.join(", "))),
    );

    let scheduler = TradeScheduler::new(
        TradeContext {
            candles,
            positions: Arc::clone(&shared.positions),
            executor,
            notifier,
            signals_only: settings.signals_only,
            switch: shared.switch.clone(),
        },
        settings.check_interval(),
    );
    let mut loops = scheduler.spawn(plans);

    tokio::select! {
        Some(result) = loops.join_next() => {
            bail!("trade loop exited: {:?}", result);
        }
        Some(result) = services.join_next() => {
            bail!("background service exited: {:?}", result);
        }
        else => bail!("nothing to trade"),
    }
}

fn print_status(settings: &Settings) -> anyhow::Result<()> {
    let ledger = TradeLedger::new(Box::new(JsonlLedger::new(&settings.ledger_path)));
    let positions = PositionManager::restore(
        settings.position_config(),
        CandleBuffer::new(1),
        ledger,
    )?;
    let entries = positions.recent_entries(EQUITY_HISTORY_CAPACITY)?;
    let history = EquityHistory::from_entries(&entries, EQUITY_HISTORY_CAPACITY);

    println!(
        "Balance: {:.2} (initial {:.2}, realized {:+.4})",
        settings.initial_cash + positions.realized_pnl(),
        settings.initial_cash,
        positions.realized_pnl()
    );
    let open = positions.open_positions();
    println!("Open positions: {}", open.len());
    for p in open {
        println!(
            "  {} {:<12} qty={} entry={} tp={:.4} sl={:.4} since {}",
            p.side,
            p.symbol,
            p.quantity,
            p.entry_price,
            p.take_profit,
            p.stop_loss,
            p.opened_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    match history.stats() {
        Some(stats) => println!(
            "Equity over {} ledger entries: {:.2} -> {:.2} ({:+.2}%), min {:.2}, max {:.2}, max drawdown {:.2}%",
            stats.samples,
            stats.first,
            stats.last,
            stats.change_pct,
            stats.min,
            stats.max,
            stats.max_drawdown_pct
        ),
        None => println!("No ledger entries in {}", settings.ledger_path.display()),
    }
    Ok(())
}

fn print_ledger(settings: &Settings, limit: usize) -> anyhow::Result<()> {
    let ledger = JsonlLedger::new(&settings.ledger_path);
    let entries = ledger.recent(limit)?;
    if entries.is_empty() {
        println!("No ledger entries in {}", ledger.path().display());
        return Ok(());
    }

    for e in entries {
        println!(
            "{} {:?} {} {:<12} price={:.4} qty={:.4} pnl={:+.4} equity={:.2} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.action,
            e.side,
            e.symbol,
            e.price,
            e.quantity,
            e.pnl,
            e.total_equity,
            e.reason
        );
    }
    Ok(())
}

async fn run_backtest(settings: &Settings, symbol: &str, limit: usize) -> anyhow::Result<()> {
    let exchange = BinanceFuturesClient::new(&settings.exchange)?;
    let candles = exchange
        .fetch_klines(symbol, &settings.timeframe, limit)
        .await
        .with_context(|| format!("failed to fetch klines for {}", symbol))?;

    let runner = BacktestRunner::new(BacktestConfig::from_settings(settings));

    let mean_reversion = optimize_bollinger_rsi(&runner, &candles, &settings.mean_reversion)
        .map_or(settings.mean_reversion, |o| o.params);
    let breakout = optimize_breakout(&runner, &candles).map_or(settings.breakout, |o| o.params);
    println!("Best BBRSI params: {:?}", mean_reversion);
    println!("Best Breakout params: {:?}", breakout);

    runner
        .run_and_report(
            &candles,
            &MeanReversionStrategy::new(mean_reversion),
            &format!("{} BBRSI", symbol),
        )
        .map_err(|e| anyhow!(e))?;
    runner
        .run_and_report(
            &candles,
            &BreakoutStrategy::new(breakout),
            &format!("{} Breakout", symbol),
        )
        .map_err(|e| anyhow!(e))?;
    Ok(())
}
