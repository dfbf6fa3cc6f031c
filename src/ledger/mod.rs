// Append-only trade ledger
pub mod jsonl;

pub use jsonl::JsonlLedger;

use crate::error::LedgerError;
use crate::models::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerAction {
    Open,
    Close,
}

/// One position state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LedgerAction,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub total_equity: f64,
    pub reason: String,
    pub exit_reason: Option<String>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Durable destination for ledger entries
pub trait LedgerSink: Send {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// The most recent `limit` entries, oldest first
    fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// In-memory sink; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LedgerSink for MemoryLedger {
    fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

type OpenKey = (String, Side, u64);

/// Book state reconstructed from a ledger's history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerReplay {
    /// The unmatched OPEN of each symbol
    pub open: BTreeMap<String, LedgerEntry>,
    /// Sum of the PnL of every CLOSE
    pub realized_pnl: f64,
    /// Every entry, oldest first
    pub history: Vec<LedgerEntry>,
}

/// Ledger recorder with OPEN deduplication
///
/// An OPEN for a `(symbol, side, entry price)` already on the books is
/// skipped. The key is released when the matching CLOSE is recorded.
pub struct TradeLedger {
    sink: Box<dyn LedgerSink>,
    open_keys: HashSet<OpenKey>,
}

impl TradeLedger {
    pub fn new(sink: Box<dyn LedgerSink>) -> Self {
        Self {
            sink,
            open_keys: HashSet::new(),
        }
    }

    fn key(symbol: &str, side: Side, entry_price: f64) -> OpenKey {
        (symbol.to_string(), side, entry_price.to_bits())
    }

    /// Record an OPEN; returns `false` if it was a duplicate and skipped
    pub fn record_open(&mut self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let key = Self::key(&entry.symbol, entry.side, entry.price);
        if self.open_keys.contains(&key) {
            tracing::debug!(
                "Skipping duplicate OPEN for {} {} @ {}",
                entry.symbol,
                entry.side,
                entry.price
            );
            return Ok(false);
        }

        self.sink.append(entry)?;
        self.open_keys.insert(key);
        log_entry(entry);
        Ok(true)
    }

    /// Record a CLOSE for a position that was opened at `entry_price`
    pub fn record_close(&mut self, entry: &LedgerEntry, entry_price: f64) -> Result<(), LedgerError> {
        self.sink.append(entry)?;
        self.open_keys
            .remove(&Self::key(&entry.symbol, entry.side, entry_price));
        log_entry(entry);
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.sink.recent(limit)
    }

    /// Rebuild open positions and realized PnL from the sink's history
    ///
    /// The OPEN dedup keys are seeded from the unmatched OPENs, so an
    /// identical OPEN recorded later is still skipped.
    pub fn replay(&mut self) -> Result<LedgerReplay, LedgerError> {
        let history = self.sink.recent(usize::MAX)?;
        let mut replay = LedgerReplay::default();

        for entry in &history {
            match entry.action {
                LedgerAction::Open => {
                    if let Some(previous) = replay.open.insert(entry.symbol.clone(), entry.clone()) {
                        tracing::warn!(
                            "Ledger has two OPENs for {} without a CLOSE, keeping the later one (earlier @ {})",
                            entry.symbol,
                            previous.price
                        );
                    }
                }
                LedgerAction::Close => {
                    if replay.open.remove(&entry.symbol).is_none() {
                        tracing::warn!("Ledger CLOSE for {} has no matching OPEN", entry.symbol);
                    }
                    replay.realized_pnl += entry.pnl;
                }
            }
        }

        self.open_keys = replay
            .open
            .values()
            .map(|e| Self::key(&e.symbol, e.side, e.price))
            .collect();
        replay.history = history;
        Ok(replay)
    }
}

fn log_entry(entry: &LedgerEntry) {
    let action = match entry.action {
        LedgerAction::Open => "OPEN",
        LedgerAction::Close => "CLOSE",
    };
    tracing::info!(
        "📒 {} {} {} @ {:.4} QTY={:.4} PnL={:.4} TotalEquity={:.4}",
        action,
        entry.side,
        entry.symbol,
        entry.price,
        entry.quantity,
        entry.pnl,
        entry.total_equity
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_entry(action: LedgerAction, price: f64) -> LedgerEntry {
        LedgerEntry {
            timestamp: Utc::now(),
            action,
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            price,
            quantity: 0.5,
            pnl: 0.0,
            total_equity: 500.0,
            reason: "test".to_string(),
            exit_reason: None,
            take_profit: Some(101.0),
            stop_loss: Some(98.0),
        }
    }

    #[test]
    fn test_duplicate_open_recorded_once() {
        let memory = MemoryLedger::new();
        let mut ledger = TradeLedger::new(Box::new(memory.clone()));
        let entry = sample_entry(LedgerAction::Open, 100.0);

        assert!(ledger.record_open(&entry).unwrap());
        assert!(!ledger.record_open(&entry).unwrap());

        assert_eq!(memory.entries().len(), 1);
    }

    #[test]
    fn test_close_releases_dedup_key() {
        let memory = MemoryLedger::new();
        let mut ledger = TradeLedger::new(Box::new(memory.clone()));
        let open = sample_entry(LedgerAction::Open, 100.0);
        let close = sample_entry(LedgerAction::Close, 101.0);

        ledger.record_open(&open).unwrap();
        ledger.record_close(&close, 100.0).unwrap();
        assert!(ledger.record_open(&open).unwrap());

        let actions: Vec<LedgerAction> = memory.entries().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![LedgerAction::Open, LedgerAction::Close, LedgerAction::Open]
        );
    }

    #[test]
    fn test_replay_rebuilds_open_book() {
        let mut memory = MemoryLedger::new();
        let mut eth_open = sample_entry(LedgerAction::Open, 2000.0);
        eth_open.symbol = "ETHUSDT".to_string();
        let mut btc_close = sample_entry(LedgerAction::Close, 101.0);
        btc_close.pnl = 0.5;

        memory.append(&sample_entry(LedgerAction::Open, 100.0)).unwrap();
        memory.append(&btc_close).unwrap();
        memory.append(&eth_open).unwrap();
        memory.append(&sample_entry(LedgerAction::Open, 102.0)).unwrap();

        let mut ledger = TradeLedger::new(Box::new(memory.clone()));
        let replay = ledger.replay().unwrap();

        assert_eq!(replay.realized_pnl, 0.5);
        assert_eq!(replay.history.len(), 4);
        let open: Vec<(&str, f64)> = replay
            .open
            .values()
            .map(|e| (e.symbol.as_str(), e.price))
            .collect();
        assert_eq!(open, vec![("BTCUSDT", 102.0), ("ETHUSDT", 2000.0)]);

        // Seeded dedup keys still skip the identical OPEN
        assert!(!ledger.record_open(&sample_entry(LedgerAction::Open, 102.0)).unwrap());
        assert_eq!(memory.entries().len(), 4);
    }

    #[test]
    fn test_replay_of_empty_ledger() {
        let mut ledger = TradeLedger::new(Box::new(MemoryLedger::new()));
        assert_eq!(ledger.replay().unwrap(), LedgerReplay::default());
    }

    #[test]
    fn test_entry_serializes_with_ledger_field_names() {
        let entry = sample_entry(LedgerAction::Open, 100.0);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["action"], "OPEN");
        assert_eq!(json["side"], "LONG");
        assert_eq!(json["totalEquity"], 500.0);
        assert_eq!(json["takeProfit"], 101.0);
        assert!(json["exitReason"].is_null());
    }

    #[test]
    fn test_memory_recent_returns_tail() {
        let mut memory = MemoryLedger::new();
        for i in 0..5 {
            memory
                .append(&sample_entry(LedgerAction::Open, 100.0 + i as f64))
                .unwrap();
        }
        let recent = memory.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].price, 103.0);
        assert_eq!(recent[1].price, 104.0);
    }
}
