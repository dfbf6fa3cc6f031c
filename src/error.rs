use thiserror::Error;

/// Failures of the exchange REST client
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange rejected request ({code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("missing API credentials")]
    MissingCredentials,

    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl ExchangeError {
    /// Whether retrying the same request can succeed
    ///
    /// Timeouts, dropped connections, HTTP 429/5xx and the exchange's own
    /// overload codes qualify. Rejections, decoding and credential
    /// problems do not.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ExchangeError::Api { code, .. } => {
                matches!(code, 429 | 500..=599 | -1001 | -1003 | -1007)
            }
            ExchangeError::Decode(_)
            | ExchangeError::MissingCredentials
            | ExchangeError::Signing(_) => false,
        }
    }
}

/// Failures writing or reading the trade ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failed position operations. None of these leave partial state behind.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("already have open position for {0}")]
    AlreadyOpen(String),

    #[error("no open position for {0}")]
    NoOpenPosition(String),

    #[error("failed to record transition: {0}")]
    Ledger(#[from] LedgerError),
}

/// Failures delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification api error: {0}")]
    Api(String),
}

/// Failures loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64) -> ExchangeError {
        ExchangeError::Api {
            code,
            msg: "test".to_string(),
        }
    }

    #[test]
    fn test_overload_and_server_errors_are_transient() {
        for code in [-1001, -1003, -1007, 429, 500, 503] {
            assert!(api(code).is_transient(), "code {}", code);
        }
    }

    #[test]
    fn test_rejections_are_not_transient() {
        // Margin is insufficient, invalid quantity, bad request
        for code in [-2019, -1111, 400] {
            assert!(!api(code).is_transient(), "code {}", code);
        }
        assert!(!ExchangeError::MissingCredentials.is_transient());
        assert!(!ExchangeError::Signing("bad key".to_string()).is_transient());
        assert!(!ExchangeError::Decode("eof".to_string()).is_transient());
    }
}
