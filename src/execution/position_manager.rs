use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::error::{LedgerError, PositionError};
use crate::execution::candle_buffer::CandleBuffer;
use crate::execution::pnl_simulator;
use crate::ledger::{LedgerAction, LedgerEntry, TradeLedger};
use crate::models::{Side, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    ReverseSignal,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::StopLoss => write!(f, "SL"),
            ExitReason::TrailingStop => write!(f, "Trailing"),
            ExitReason::ReverseSignal => write!(f, "Reverse signal"),
        }
    }
}

/// Sizing and exit parameters for new positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionConfig {
    pub initial_cash: f64,
    pub leverage: f64,
    /// Fraction of equity committed as margin per trade
    pub risk_fraction: f64,
    pub quantity_step: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Trailing distance in percent
    pub trailing_percent: f64,
    /// Favorable move before the simulated trail arms
    pub trail_activation: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            initial_cash: 500.0,
            leverage: 5.0,
            risk_fraction: 0.2,
            quantity_step: 0.001,
            take_profit_pct: 0.01,
            stop_loss_pct: 0.02,
            trailing_percent: 0.5,
            trail_activation: 0.002,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub trailing_percent: f64,
    pub trailing_active: bool,
    pub status: PositionStatus,
    /// Open time of the bar the position was entered on
    pub opened_at: DateTime<Utc>,
}

/// Take-profit and stop-loss levels for a fresh entry at `price`
fn entry_levels(side: Side, price: f64, config: &PositionConfig) -> (f64, f64) {
    match side {
        Side::Long => (
            price * (1.0 + config.take_profit_pct),
            price * (1.0 - config.stop_loss_pct),
        ),
        Side::Short => (
            price * (1.0 - config.take_profit_pct),
            price * (1.0 + config.stop_loss_pct),
        ),
    }
}

impl Position {
    fn from_open_entry(entry: &LedgerEntry, config: &PositionConfig) -> Self {
        let (take_profit, stop_loss) = entry_levels(entry.side, entry.price, config);
        Self {
            id: Uuid::new_v4(),
            symbol: entry.symbol.clone(),
            side: entry.side,
            quantity: entry.quantity,
            entry_price: entry.price,
            take_profit: entry.take_profit.unwrap_or(take_profit),
            stop_loss: entry.stop_loss.unwrap_or(stop_loss),
            trailing_percent: config.trailing_percent,
            trailing_active: false,
            status: PositionStatus::Open,
            opened_at: entry.timestamp,
        }
    }

    /// PnL if the position were closed at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// Pull the stop toward `price`; returns the new stop if it moved
    ///
    /// The stop only ever moves in the position's favor.
    fn ratchet(&mut self, price: f64) -> Option<f64> {
        let trail = self.trailing_percent / 100.0;
        let candidate = match self.side {
            Side::Long => price * (1.0 - trail),
            Side::Short => price * (1.0 + trail),
        };
        let tighter = match self.side {
            Side::Long => candidate > self.stop_loss,
            Side::Short => candidate < self.stop_loss,
        };
        if !tighter {
            return None;
        }
        self.stop_loss = candidate;
        self.trailing_active = true;
        Some(candidate)
    }

    fn exit_reason(&self, price: f64, signal: Option<Signal>) -> Option<ExitReason> {
        let (hit_target, hit_stop) = match self.side {
            Side::Long => (price >= self.take_profit, price <= self.stop_loss),
            Side::Short => (price <= self.take_profit, price >= self.stop_loss),
        };

        if hit_target {
            Some(ExitReason::TakeProfit)
        } else if hit_stop {
            Some(ExitReason::StopLoss)
        } else if signal == Some(self.side.reversing_signal()) {
            Some(ExitReason::ReverseSignal)
        } else {
            None
        }
    }
}

/// What an exit check decided, before any close is carried out
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitDecision {
    Hold,
    Ratcheted { stop_loss: f64 },
    Exit { reason: ExitReason, price: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl: f64,
    pub total_equity: f64,
}

/// Result of `evaluate_exit`: exactly one of these happened
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    Hold,
    Ratcheted { stop_loss: f64 },
    Closed(ClosedTrade),
}

struct Book {
    positions: HashMap<String, Position>,
    realized_pnl: f64,
    ledger: TradeLedger,
}

/// Owns every open position and the ledger they are recorded in
///
/// All mutations go through one lock, so at most one position exists per
/// symbol and a transition is logged before it becomes visible.
pub struct PositionManager {
    config: PositionConfig,
    candles: CandleBuffer,
    book: Mutex<Book>,
    events: Option<UnboundedSender<LedgerEntry>>,
}

impl PositionManager {
    pub fn new(config: PositionConfig, candles: CandleBuffer, ledger: TradeLedger) -> Self {
        Self {
            config,
            candles,
            book: Mutex::new(Book {
                positions: HashMap::new(),
                realized_pnl: 0.0,
                ledger,
            }),
            events: None,
        }
    }

    /// Build a manager whose book continues from `ledger`'s history
    ///
    /// Unmatched OPENs come back as open positions at their recorded
    /// levels, so a stop ratcheted before the restart starts over from the
    /// initial stop. Realized PnL is the sum of every recorded CLOSE.
    pub fn restore(
        config: PositionConfig,
        candles: CandleBuffer,
        mut ledger: TradeLedger,
    ) -> Result<Self, LedgerError> {
        let replay = ledger.replay()?;
        let manager = Self::new(config, candles, ledger);
        {
            let mut book = manager.book();
            book.realized_pnl = replay.realized_pnl;
            for (symbol, entry) in replay.open {
                let position = Position::from_open_entry(&entry, &config);
                tracing::info!(
                    "♻️ Restored {} {} qty={} entry={} tp={:.6} sl={:.6}",
                    position.side,
                    symbol,
                    position.quantity,
                    position.entry_price,
                    position.take_profit,
                    position.stop_loss
                );
                book.positions.insert(symbol, position);
            }
            if !book.positions.is_empty() || book.realized_pnl != 0.0 {
                tracing::info!(
                    "Ledger replayed: {} open position(s), realized PnL {:.4}",
                    book.positions.len(),
                    book.realized_pnl
                );
            }
        }
        Ok(manager)
    }

    /// Forward every recorded ledger entry to `events` (used for notifications)
    pub fn with_events(mut self, events: UnboundedSender<LedgerEntry>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, entry: LedgerEntry) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening anymore
            let _ = events.send(entry);
        }
    }

    /// Open a position on the latest cached close
    ///
    /// Returns `Ok(None)` when there is no price or the sized quantity
    /// rounds to zero.
    pub fn open(
        &self,
        symbol: &str,
        side: Side,
        reason: &str,
    ) -> Result<Option<Position>, PositionError> {
        let mut book = self.book();
        match self.plan_locked(&book, symbol, side)? {
            Some(position) => self.commit_locked(&mut book, position, reason).map(Some),
            None => Ok(None),
        }
    }

    /// Size a position without storing it
    ///
    /// Used when an exchange order must be confirmed before the position
    /// is committed with [`PositionManager::commit_open`].
    pub fn plan_open(&self, symbol: &str, side: Side) -> Result<Option<Position>, PositionError> {
        let book = self.book();
        self.plan_locked(&book, symbol, side)
    }

    pub fn commit_open(&self, position: Position, reason: &str) -> Result<Position, PositionError> {
        let mut book = self.book();
        self.commit_locked(&mut book, position, reason)
    }

    fn plan_locked(
        &self,
        book: &Book,
        symbol: &str,
        side: Side,
    ) -> Result<Option<Position>, PositionError> {
        if book.positions.contains_key(symbol) {
            return Err(PositionError::AlreadyOpen(symbol.to_string()));
        }

        let Some(bar) = self.candles.get_recent_candles(symbol, 1).pop() else {
            tracing::warn!("No price available for {}, skipping open", symbol);
            return Ok(None);
        };
        let price = bar.close;
        if price <= 0.0 {
            return Ok(None);
        }

        let equity = self.config.initial_cash + book.realized_pnl;
        let notional = equity * self.config.risk_fraction * self.config.leverage;
        let quantity = quantize_down(notional / price, self.config.quantity_step);
        if quantity <= 0.0 {
            tracing::warn!(
                "Sized quantity for {} rounds to zero (equity {:.2}, price {})",
                symbol,
                equity,
                price
            );
            return Ok(None);
        }

        let (take_profit, stop_loss) = entry_levels(side, price, &self.config);

        Ok(Some(Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price: price,
            take_profit,
            stop_loss,
            trailing_percent: self.config.trailing_percent,
            trailing_active: false,
            status: PositionStatus::Open,
            opened_at: bar.timestamp,
        }))
    }

    fn commit_locked(
        &self,
        book: &mut Book,
        position: Position,
        reason: &str,
    ) -> Result<Position, PositionError> {
        if book.positions.contains_key(&position.symbol) {
            return Err(PositionError::AlreadyOpen(position.symbol));
        }

        let entry = LedgerEntry {
            timestamp: Utc::now(),
            action: LedgerAction::Open,
            symbol: position.symbol.clone(),
            side: position.side,
            price: position.entry_price,
            quantity: position.quantity,
            pnl: 0.0,
            total_equity: self.equity_locked(book, None),
            reason: reason.to_string(),
            exit_reason: None,
            take_profit: Some(position.take_profit),
            stop_loss: Some(position.stop_loss),
        };
        if book.ledger.record_open(&entry)? {
            self.emit(entry);
        }

        book.positions
            .insert(position.symbol.clone(), position.clone());
        Ok(position)
    }

    /// Ratchet the trailing stop and decide whether to exit, without closing
    pub fn check_exit(
        &self,
        symbol: &str,
        last_price: f64,
        signal: Option<Signal>,
    ) -> Result<ExitDecision, PositionError> {
        let mut book = self.book();
        Self::check_locked(&mut book, symbol, last_price, signal)
    }

    fn check_locked(
        book: &mut Book,
        symbol: &str,
        last_price: f64,
        signal: Option<Signal>,
    ) -> Result<ExitDecision, PositionError> {
        let position = book
            .positions
            .get_mut(symbol)
            .ok_or_else(|| PositionError::NoOpenPosition(symbol.to_string()))?;

        let ratcheted = position.ratchet(last_price);
        if let Some(stop_loss) = ratcheted {
            tracing::debug!("Trailing stop for {} moved to {:.6}", symbol, stop_loss);
        }

        if let Some(reason) = position.exit_reason(last_price, signal) {
            return Ok(ExitDecision::Exit {
                reason,
                price: last_price,
            });
        }

        Ok(match ratcheted {
            Some(stop_loss) => ExitDecision::Ratcheted { stop_loss },
            None => ExitDecision::Hold,
        })
    }

    /// Ratchet, then close on take-profit, stop-loss or a reversing signal
    pub fn evaluate_exit(
        &self,
        symbol: &str,
        last_price: f64,
        signal: Option<Signal>,
    ) -> Result<ExitOutcome, PositionError> {
        let mut book = self.book();
        match Self::check_locked(&mut book, symbol, last_price, signal)? {
            ExitDecision::Hold => Ok(ExitOutcome::Hold),
            ExitDecision::Ratcheted { stop_loss } => Ok(ExitOutcome::Ratcheted { stop_loss }),
            ExitDecision::Exit { reason, price } => self
                .close_locked(&mut book, symbol, price, reason)
                .map(ExitOutcome::Closed),
        }
    }

    /// Close the open position for `symbol` at `exit_price`
    ///
    /// The position is only removed once the CLOSE is in the ledger.
    pub fn close(
        &self,
        symbol: &str,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Result<ClosedTrade, PositionError> {
        let mut book = self.book();
        self.close_locked(&mut book, symbol, exit_price, exit_reason)
    }

    fn close_locked(
        &self,
        book: &mut Book,
        symbol: &str,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Result<ClosedTrade, PositionError> {
        let mut position = book
            .positions
            .get(symbol)
            .cloned()
            .ok_or_else(|| PositionError::NoOpenPosition(symbol.to_string()))?;

        let pnl = position.pnl_at(exit_price);
        let realized = book.realized_pnl + pnl;
        let total_equity =
            self.config.initial_cash + realized + self.unrealized_locked(book, Some(symbol));

        let entry = LedgerEntry {
            timestamp: Utc::now(),
            action: LedgerAction::Close,
            symbol: symbol.to_string(),
            side: position.side,
            price: exit_price,
            quantity: position.quantity,
            pnl,
            total_equity,
            reason: exit_reason.to_string(),
            exit_reason: Some(exit_reason.to_string()),
            take_profit: Some(position.take_profit),
            stop_loss: Some(position.stop_loss),
        };
        book.ledger.record_close(&entry, position.entry_price)?;
        self.emit(entry);

        book.positions.remove(symbol);
        book.realized_pnl = realized;
        position.status = PositionStatus::Closed;

        Ok(ClosedTrade {
            position,
            exit_price,
            exit_reason,
            pnl,
            total_equity,
        })
    }

    /// Simulated PnL of one position over the closes since its entry bar
    fn simulated_pnl(&self, position: &Position) -> f64 {
        let path: Vec<f64> = self
            .candles
            .get_candles(&position.symbol)
            .iter()
            .filter(|c| c.timestamp >= position.opened_at)
            .map(|c| c.close)
            .collect();
        pnl_simulator::simulate(position, &path, self.config.trail_activation).pnl
    }

    fn unrealized_locked(&self, book: &Book, exclude: Option<&str>) -> f64 {
        book.positions
            .values()
            .filter(|p| Some(p.symbol.as_str()) != exclude)
            .map(|p| self.simulated_pnl(p))
            .sum()
    }

    fn equity_locked(&self, book: &Book, exclude: Option<&str>) -> f64 {
        self.config.initial_cash + book.realized_pnl + self.unrealized_locked(book, exclude)
    }

    /// Initial cash plus realized PnL plus simulated unrealized PnL
    pub fn total_equity(&self) -> f64 {
        let book = self.book();
        self.equity_locked(&book, None)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.book().realized_pnl
    }

    pub fn unrealized_pnl(&self, symbol: &str) -> Option<f64> {
        let book = self.book();
        book.positions.get(symbol).map(|p| self.simulated_pnl(p))
    }

    pub fn get_position(&self, symbol: &str) -> Option<Position> {
        self.book().positions.get(symbol).cloned()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.book().positions.contains_key(symbol)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.book().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn recent_entries(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.book().ledger.recent(limit)
    }
}

/// Round `value` down to a multiple of `step`
pub fn quantize_down(value: f64, step: f64) -> f64 {
    let (Some(value), Some(step)) = (Decimal::from_f64(value), Decimal::from_f64(step)) else {
        return 0.0;
    };
    if step <= Decimal::ZERO || value <= Decimal::ZERO {
        return 0.0;
    }
    ((value / step).floor() * step).to_f64().unwrap_or(0.0)
}
