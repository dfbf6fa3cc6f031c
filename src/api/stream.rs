use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::execution::candle_buffer::{CandleBuffer, CandleRejected};
use crate::models::Candle;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct StreamWrapper {
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

/// Parse a kline event, bare or wrapped in a combined-stream envelope
///
/// In-progress bars are accepted: the cache refreshes the current bar in
/// place until the next one opens.
pub fn parse_kline_message(text: &str) -> Option<(String, Candle)> {
    let event = serde_json::from_str::<StreamWrapper>(text)
        .map(|w| w.data)
        .or_else(|_| serde_json::from_str::<KlineEvent>(text))
        .ok()?;
    if event.event_type != "kline" {
        return None;
    }

    let k = event.kline;
    let timestamp: DateTime<Utc> = Utc.timestamp_millis_opt(k.open_time).single()?;
    let candle = Candle {
        timestamp,
        open: k.open.parse().ok()?,
        high: k.high.parse().ok()?,
        low: k.low.parse().ok()?,
        close: k.close.parse().ok()?,
        volume: k.volume.parse().ok()?,
    };

    Some((event.symbol, candle))
}

/// Apply one raw stream message to the cache; returns whether it was stored
pub fn apply_message(candles: &CandleBuffer, text: &str) -> bool {
    let Some((symbol, candle)) = parse_kline_message(text) else {
        tracing::warn!("Dropping malformed kline message: {:.120}", text);
        return false;
    };

    match candles.upsert(&symbol, candle) {
        Ok(_) => true,
        Err(CandleRejected::OutOfOrder { candle, latest }) => {
            tracing::debug!(
                "Dropping stale {} bar {} (latest {})",
                symbol,
                candle,
                latest
            );
            false
        }
        Err(e) => {
            tracing::warn!("Dropping {} bar: {}", symbol, e);
            false
        }
    }
}

/// Combined kline websocket feeding the candle cache
pub struct KlineStream {
    ws_url: String,
    interval: String,
    candles: CandleBuffer,
}

impl KlineStream {
    pub fn new(ws_url: &str, interval: &str, candles: CandleBuffer) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            interval: interval.to_string(),
            candles,
        }
    }

    pub fn stream_url(&self, symbols: &[String]) -> String {
        let streams = symbols
            .iter()
            .map(|s| format!("{}@kline_{}", s.to_lowercase(), self.interval))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/stream?streams={}", self.ws_url, streams)
    }

    /// Feed the cache from the stream, reconnecting forever
    pub async fn run(self, symbols: Vec<String>) {
        let url = self.stream_url(&symbols);
        loop {
            tracing::info!("Connecting kline stream for {} symbols...", symbols.len());
            match connect_async(url.as_str()).await {
                Ok((mut ws, _)) => {
                    tracing::info!("✅ Kline stream connected");
                    while let Some(msg) = ws.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                apply_message(&self.candles, &text);
                            }
                            Ok(Message::Close(frame)) => {
                                tracing::info!("Kline stream closed: {:?}", frame);
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!("Kline stream error: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Kline stream connection failed"),
            }
            tracing::warn!(
                "Kline stream disconnected. Reconnecting in {}s...",
                RECONNECT_DELAY.as_secs()
            );
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPED: &str = r#"{
        "stream": "btcusdt@kline_5m",
        "data": {
            "e": "kline", "E": 1704067260000, "s": "BTCUSDT",
            "k": {"t": 1704067200000, "T": 1704067499999, "s": "BTCUSDT", "i": "5m",
                  "o": "100.0", "c": "100.7", "h": "101.0", "l": "99.8", "v": "12.5", "x": false}
        }
    }"#;

    #[test]
    fn test_parse_wrapped_message() {
        let (symbol, candle) = parse_kline_message(WRAPPED).unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(candle.timestamp.timestamp_millis(), 1704067200000);
        assert_eq!(candle.close, 100.7);
        assert_eq!(candle.high, 101.0);
        assert_eq!(candle.volume, 12.5);
    }

    #[test]
    fn test_parse_bare_event() {
        let bare = r#"{"e":"kline","s":"ETHUSDT","k":{"t":1704067200000,"o":"1","c":"2","h":"3","l":"0.5","v":"10"}}"#;
        let (symbol, candle) = parse_kline_message(bare).unwrap();
        assert_eq!(symbol, "ETHUSDT");
        assert_eq!(candle.open, 1.0);
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        let candles = CandleBuffer::new(10);
        assert!(!apply_message(&candles, "not json"));
        assert!(!apply_message(&candles, r#"{"e":"kline","s":"X","k":{"t":1,"o":"abc","c":"1","h":"1","l":"1","v":"1"}}"#));
        assert!(!apply_message(&candles, r#"{"e":"aggTrade","s":"X","k":{"t":1,"o":"1","c":"1","h":"1","l":"1","v":"1"}}"#));
        assert!(candles.symbols().is_empty());
    }

    #[test]
    fn test_updates_refresh_current_bar() {
        let candles = CandleBuffer::new(10);
        assert!(apply_message(&candles, WRAPPED));
        assert!(apply_message(&candles, &WRAPPED.replace("\"100.7\"", "\"100.9\"")));

        assert_eq!(candles.candle_count("BTCUSDT"), 1);
        assert_eq!(candles.last_close("BTCUSDT"), Some(100.9));
    }

    #[test]
    fn test_stream_url() {
        let stream = KlineStream::new("wss://fstream.binance.com/", "5m", CandleBuffer::new(10));
        let url = stream.stream_url(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=btcusdt@kline_5m/ethusdt@kline_5m"
        );
    }
}
