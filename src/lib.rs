// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod control;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod strategy;

// Re-export commonly used types
pub use config::Settings;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
