// Fire-and-forget trade notifications
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::api::MarketOrder;
use crate::config::TelegramSettings;
use crate::control::EquityStats;
use crate::error::NotifyError;
use crate::execution::Position;
use crate::ledger::{LedgerAction, LedgerEntry};
use crate::models::{Side, Signal};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Long-poll window for `getUpdates`, kept below the client timeout
const UPDATES_POLL_SECONDS: u64 = 5;

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    chat: UpdateChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateChat {
    id: i64,
}

/// A text message received by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub text: String,
}

/// Telegram Bot API client: `sendMessage` out, `getUpdates` in
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// `None` when the token or chat id is missing
    pub fn new(settings: &TelegramSettings) -> Option<Self> {
        Self::with_base_url(settings, TELEGRAM_API_BASE)
    }

    pub fn with_base_url(settings: &TelegramSettings, base_url: &str) -> Option<Self> {
        if settings.token.is_empty() || settings.chat_id.is_empty() {
            return None;
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            chat_id: settings.chat_id.clone(),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Text messages with `update_id >= offset`, waiting briefly for new ones
    ///
    /// Updates without text are skipped but still advance the offset when
    /// a later message is acknowledged.
    pub async fn fetch_messages(&self, offset: i64) -> Result<Vec<IncomingMessage>, NotifyError> {
        let url = format!("{}/bot{}/getUpdates", self.base_url, self.token);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", UPDATES_POLL_SECONDS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: UpdatesResponse = response.json().await?;
        if !status.is_success() || !body.ok {
            return Err(NotifyError::Api(format!(
                "{}: {}",
                status,
                body.description.unwrap_or_default()
            )));
        }

        Ok(body
            .result
            .into_iter()
            .filter_map(|update| {
                let message = update.message?;
                Some(IncomingMessage {
                    update_id: update.update_id,
                    chat_id: message.chat.id,
                    text: message.text?,
                })
            })
            .collect())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

/// Logs messages instead of delivering them
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!("[notify] {}", text);
        Ok(())
    }
}

/// Telegram when configured, console otherwise
pub fn from_settings(settings: &TelegramSettings) -> Arc<dyn Notifier> {
    match TelegramNotifier::new(settings) {
        Some(telegram) => Arc::new(telegram),
        None => {
            tracing::warn!("Telegram is not configured, notifications go to the log");
            Arc::new(ConsoleNotifier)
        }
    }
}

/// Send without waiting; delivery failures are logged and dropped
pub fn notify_detached(notifier: Arc<dyn Notifier>, text: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&text).await {
            tracing::warn!("Notification failed: {}", e);
        }
    });
}

/// Forward ledger entries to `notifier` until the sender side is dropped
pub async fn run_notification_service(
    notifier: Arc<dyn Notifier>,
    mut entries: UnboundedReceiver<LedgerEntry>,
) {
    while let Some(entry) = entries.recv().await {
        notify_detached(Arc::clone(&notifier), format_entry(&entry));
    }
    tracing::debug!("Ledger event channel closed, notification service stopping");
}

/// Escape Telegram MarkdownV2 control characters
pub fn escape_markdown(text: &str) -> String {
    const SPECIAL: &str = r"_*[]()~`>#+-=|{}.!\";
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn format_entry(entry: &LedgerEntry) -> String {
    let (action, icon) = match entry.action {
        LedgerAction::Open => ("OPEN", "📌"),
        LedgerAction::Close => ("CLOSE", "✅"),
    };
    let side = match entry.side {
        Side::Long => "🟢 LONG",
        Side::Short => "🔴 SHORT",
    };

    let mut text = format!(
        "{} *{}* {} *{}*\n💰 Price: `{:.4}`\n📊 Qty: `{:.4}`\n💵 PnL: `{:.4}`\n💹 Total Equity: `{:.4}`\n📝 Reason: {}",
        icon,
        action,
        side,
        escape_markdown(&entry.symbol),
        entry.price,
        entry.quantity,
        entry.pnl,
        entry.total_equity,
        escape_markdown(&entry.reason)
    );
    if let Some(tp) = entry.take_profit {
        text.push_str(&format!("\n🎯 TP: `{:.4}`", tp));
    }
    if let Some(sl) = entry.stop_loss {
        text.push_str(&format!("\n🛑 SL: `{:.4}`", sl));
    }
    if let Some(exit_reason) = &entry.exit_reason {
        text.push_str(&format!("\n⚡ Exit Reason: {}", escape_markdown(exit_reason)));
    }
    text
}

pub fn format_signal(symbol: &str, signal: Signal, source: impl fmt::Display, price: f64) -> String {
    format!(
        "⚡ Signal for *{}*: {} \\({}\\) at `{}`",
        escape_markdown(symbol),
        signal,
        escape_markdown(&source.to_string()),
        price
    )
}

pub fn format_order_retry(order: &MarketOrder, attempt: u32, attempts: u32, error: &str) -> String {
    format!(
        "⚠️ {} `{}` *{}* failed \\(attempt {}/{}\\), retrying\n{}",
        order.side,
        order.quantity,
        escape_markdown(&order.symbol),
        attempt,
        attempts,
        escape_markdown(error)
    )
}

/// Balance and open positions, as shown by the `/balance` command
pub fn format_balance(paused: bool, balance: f64, equity: f64, positions: &[Position]) -> String {
    let state = if paused { "⏸ Paused" } else { "▶️ Trading" };
    let mut text = format!(
        "{}\n💳 Balance: `{:.2}`\n💹 Total Equity: `{:.2}`\n📌 Open positions:",
        state, balance, equity
    );
    if positions.is_empty() {
        text.push_str("\nnone");
    }
    for p in positions {
        text.push_str(&format!(
            "\n\\- *{}* {} qty `{}` entry `{}` TP `{:.4}` SL `{:.4}`",
            escape_markdown(&p.symbol),
            p.side,
            p.quantity,
            p.entry_price,
            p.take_profit,
            p.stop_loss
        ));
    }
    text
}

pub fn format_equity_stats(stats: Option<&EquityStats>) -> String {
    let Some(stats) = stats else {
        return "📊 No equity samples yet".to_string();
    };
    format!(
        "📊 Equity over {} samples\n▫️ First: `{:.2}`\n▫️ Last: `{:.2}`\n▫️ Min / Max: `{:.2}` / `{:.2}`\n▫️ Change: `{:+.2}%`\n▫️ Max drawdown: `{:.2}%`",
        stats.samples,
        stats.first,
        stats.last,
        stats.min,
        stats.max,
        stats.change_pct,
        stats.max_drawdown_pct
    )
}
