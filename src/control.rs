// Runtime controls reachable from the Telegram chat
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::execution::PositionManager;
use crate::ledger::LedgerEntry;
use crate::notify::{escape_markdown, format_balance, format_equity_stats, Notifier, TelegramNotifier};

/// Shared pause flag
///
/// While paused, trade loops open nothing but keep managing exits.
#[derive(Debug, Clone, Default)]
pub struct TradingSwitch {
    paused: Arc<AtomicBool>,
}

impl TradingSwitch {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Flip the flag; returns whether trading is now paused
    pub fn toggle(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityStats {
    pub samples: usize,
    pub first: f64,
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub change_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Bounded record of total equity over time, oldest dropped first
#[derive(Debug)]
pub struct EquityHistory {
    capacity: usize,
    points: Mutex<VecDeque<EquityPoint>>,
}

impl EquityHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: Mutex::new(VecDeque::new()),
        }
    }

    /// Seed from recorded ledger entries, oldest first
    pub fn from_entries(entries: &[LedgerEntry], capacity: usize) -> Self {
        let history = Self::new(capacity);
        for entry in entries {
            history.record_at(entry.timestamp, entry.total_equity);
        }
        history
    }

    pub fn record(&self, equity: f64) {
        self.record_at(Utc::now(), equity);
    }

    pub fn record_at(&self, timestamp: DateTime<Utc>, equity: f64) {
        if !equity.is_finite() {
            return;
        }
        let mut points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        if points.len() == self.capacity {
            points.pop_front();
        }
        points.push_back(EquityPoint { timestamp, equity });
    }

    pub fn points(&self) -> Vec<EquityPoint> {
        let points = self.points.lock().unwrap_or_else(|e| e.into_inner());
        points.iter().copied().collect()
    }

    pub fn stats(&self) -> Option<EquityStats> {
        let points = self.points();
        let first = points.first()?.equity;
        let last = points.last()?.equity;

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown_pct: f64 = 0.0;
        for point in &points {
            min = min.min(point.equity);
            max = max.max(point.equity);
            peak = peak.max(point.equity);
            if peak > 0.0 {
                max_drawdown_pct = max_drawdown_pct.max((peak - point.equity) / peak * 100.0);
            }
        }

        let change_pct = if first != 0.0 {
            (last - first) / first * 100.0
        } else {
            0.0
        };

        Some(EquityStats {
            samples: points.len(),
            first,
            last,
            min,
            max,
            change_pct,
            max_drawdown_pct,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Toggle,
    Balance,
    Stats,
    Help,
}

impl ControlCommand {
    /// Parse a chat command such as `/pause` or `/balance@perpbot`
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
        match name.as_str() {
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "toggle" => Some(Self::Toggle),
            "balance" | "positions" => Some(Self::Balance),
            "stats" => Some(Self::Stats),
            "start" | "help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Answers control commands against the live position book
pub struct ControlPanel {
    switch: TradingSwitch,
    positions: Arc<PositionManager>,
    history: Arc<EquityHistory>,
}

impl ControlPanel {
    pub fn new(
        switch: TradingSwitch,
        positions: Arc<PositionManager>,
        history: Arc<EquityHistory>,
    ) -> Self {
        Self {
            switch,
            positions,
            history,
        }
    }

    pub fn switch(&self) -> &TradingSwitch {
        &self.switch
    }

    /// Initial cash plus realized PnL
    pub fn balance(&self) -> f64 {
        self.positions.config().initial_cash + self.positions.realized_pnl()
    }

    /// Record the current total equity
    pub fn sample_equity(&self) {
        self.history.record(self.positions.total_equity());
    }

    pub fn balance_report(&self) -> String {
        format_balance(
            self.switch.is_paused(),
            self.balance(),
            self.positions.total_equity(),
            &self.positions.open_positions(),
        )
    }

    pub fn stats_report(&self) -> String {
        format_equity_stats(self.history.stats().as_ref())
    }

    /// Apply `command` and return the MarkdownV2 reply
    pub fn handle(&self, command: ControlCommand) -> String {
        match command {
            ControlCommand::Pause => {
                self.switch.pause();
                tracing::info!("⏸ Trading paused");
                escape_markdown("⏸ Trading paused. Open positions are still managed.")
            }
            ControlCommand::Resume => {
                self.switch.resume();
                tracing::info!("▶️ Trading resumed");
                escape_markdown("▶️ Trading resumed.")
            }
            ControlCommand::Toggle => {
                let paused = self.switch.toggle();
                tracing::info!("Trading {}", if paused { "paused" } else { "resumed" });
                self.handle_state(paused)
            }
            ControlCommand::Balance => self.balance_report(),
            ControlCommand::Stats => self.stats_report(),
            ControlCommand::Help => escape_markdown(
                "Commands: /pause, /resume, /toggle, /balance, /stats",
            ),
        }
    }

    fn handle_state(&self, paused: bool) -> String {
        let state = if paused { "⏸ Paused" } else { "▶️ Trading" };
        escape_markdown(&format!("Current state: {}", state))
    }
}

/// Record total equity every `period` until aborted
pub async fn run_equity_sampler(panel: Arc<ControlPanel>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        panel.sample_equity();
    }
}

/// Poll the bot for commands from the configured chat and answer them
///
/// Messages from other chats are ignored. Polling errors back off for
/// `retry_delay`.
pub async fn run_command_polling(
    telegram: Arc<TelegramNotifier>,
    panel: Arc<ControlPanel>,
    retry_delay: Duration,
) {
    tracing::info!("🎛 Telegram control panel listening");
    let mut offset = 0;

    loop {
        let messages = match telegram.fetch_messages(offset).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Telegram polling failed: {}", e);
                sleep(retry_delay).await;
                continue;
            }
        };

        for message in messages {
            offset = offset.max(message.update_id + 1);
            if message.chat_id.to_string() != telegram.chat_id() {
                tracing::warn!("Ignoring command from unknown chat {}", message.chat_id);
                continue;
            }
            let Some(command) = ControlCommand::parse(&message.text) else {
                continue;
            };

            tracing::debug!("Control command {:?}", command);
            let reply = panel.handle(command);
            if let Err(e) = telegram.send(&reply).await {
                tracing::warn!("Failed to answer {:?}: {}", command, e);
            }
        }
    }
}
