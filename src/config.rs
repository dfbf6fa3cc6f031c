use crate::error::ConfigError;
use crate::execution::executor::RetryPolicy;
use crate::execution::position_manager::PositionConfig;
use crate::strategy::{BollingerRsiParams, BreakoutParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings
///
/// Loaded from an optional `config.toml`, then `PERPBOT_*` environment
/// variables (`__` separates nested sections). Secrets are read from the
/// plain `API_KEY`, `API_SECRET`, `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`
/// variables so they can live in `.env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Candle interval, e.g. "5m"
    pub timeframe: String,
    pub check_interval_seconds: u64,
    /// How many liquid tickers to consider before ranking
    pub top_n_tickers: usize,
    /// How many ranked symbols get a trade loop
    pub top_symbols: usize,
    pub min_price: f64,
    pub min_volume: f64,
    pub max_spread_percent: f64,
    pub leverage: f64,
    pub risk_fraction: f64,
    pub initial_cash: f64,
    /// Paper trading: positions are tracked but no exchange orders are sent
    pub use_simulation_mode: bool,
    /// Only report signals, never open positions
    pub signals_only: bool,
    pub history_limit: usize,
    pub quantity_step: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// Trailing distance in percent (0.5 = 0.5%)
    pub trailing_percent: f64,
    /// Favorable move (fraction) before the simulated trailing stop arms
    pub trail_activation: f64,
    pub ledger_path: PathBuf,
    pub order_retry_attempts: u32,
    pub order_retry_delay_ms: u64,
    pub restart_delay_seconds: u64,
    /// Run the parameter grid search before trading
    pub optimize: bool,
    pub mean_reversion: BollingerRsiParams,
    pub breakout: BreakoutParams,
    pub exchange: ExchangeSettings,
    pub telegram: TelegramSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub rest_url: String,
    pub ws_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    #[serde(skip_serializing)]
    pub token: String,
    pub chat_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeframe: "5m".to_string(),
            check_interval_seconds: 60,
            top_n_tickers: 10,
            top_symbols: 5,
            min_price: 0.1,
            min_volume: 1_000_000.0,
            max_spread_percent: 5.0,
            leverage: 5.0,
            risk_fraction: 0.2,
            initial_cash: 500.0,
            use_simulation_mode: true,
            signals_only: false,
            history_limit: 500,
            quantity_step: 0.001,
            take_profit_pct: 0.01,
            stop_loss_pct: 0.02,
            trailing_percent: 0.5,
            trail_activation: 0.002,
            ledger_path: PathBuf::from("positions_log.json"),
            order_retry_attempts: 3,
            order_retry_delay_ms: 2000,
            restart_delay_seconds: 10,
            optimize: true,
            mean_reversion: BollingerRsiParams::default(),
            breakout: BreakoutParams::default(),
            exchange: ExchangeSettings::default(),
            telegram: TelegramSettings::default(),
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5000,
            requests_per_minute: 600,
        }
    }
}

impl Settings {
    /// Load settings from `path` (defaults to `config.toml`, optional) and the environment
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or("config.toml");
        let builder = config::Config::builder()
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("PERPBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = builder.try_deserialize()?;
        settings.apply_secrets_from_env();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_secrets_from_env(&mut self) {
        if let Ok(key) = std::env::var("API_KEY") {
            self.exchange.api_key = key;
        }
        if let Ok(secret) = std::env::var("API_SECRET") {
            self.exchange.api_secret = secret;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.token = token;
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }
    }

    /// Reject settings that would break position invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.check_interval_seconds > 0, "check_interval_seconds must be > 0"),
            (self.leverage > 0.0, "leverage must be > 0"),
            (
                self.risk_fraction > 0.0 && self.risk_fraction <= 1.0,
                "risk_fraction must be in (0, 1]",
            ),
            (self.initial_cash > 0.0, "initial_cash must be > 0"),
            (self.history_limit > 0, "history_limit must be > 0"),
            (self.quantity_step > 0.0, "quantity_step must be > 0"),
            (self.take_profit_pct > 0.0, "take_profit_pct must be > 0"),
            (
                self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0,
                "stop_loss_pct must be in (0, 1)",
            ),
            (
                self.trailing_percent > 0.0 && self.trailing_percent < 100.0,
                "trailing_percent must be in (0, 100)",
            ),
            (self.order_retry_attempts > 0, "order_retry_attempts must be > 0"),
            (self.breakout.period > 0, "breakout.period must be > 0"),
            (self.mean_reversion.bol_period > 1, "mean_reversion.bol_period must be > 1"),
            (self.mean_reversion.rsi_period > 0, "mean_reversion.rsi_period must be > 0"),
        ];

        for (ok, message) in checks {
            if !ok {
                return Err(ConfigError::Invalid(message.to_string()));
            }
        }
        Ok(())
    }

    pub fn position_config(&self) -> PositionConfig {
        PositionConfig {
            initial_cash: self.initial_cash,
            leverage: self.leverage,
            risk_fraction: self.risk_fraction,
            quantity_step: self.quantity_step,
            take_profit_pct: self.take_profit_pct,
            stop_loss_pct: self.stop_loss_pct,
            trailing_percent: self.trailing_percent,
            trail_activation: self.trail_activation,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.order_retry_attempts,
            delay: Duration::from_millis(self.order_retry_delay_ms),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_seconds)
    }

    pub fn has_exchange_credentials(&self) -> bool {
        !self.exchange.api_key.is_empty() && !self.exchange.api_secret.is_empty()
    }
}
