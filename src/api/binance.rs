use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ExchangeClient, MarketOrder, OrderAck, Ticker24h};
use crate::config::ExchangeSettings;
use crate::error::ExchangeError;
use crate::models::Candle;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the query string, hex encoded, as Binance expects
pub fn sign_request(secret: &str, query_string: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(query_string.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: i64,
    msg: String,
}

// open time, o, h, l, c, v, close time, quote volume, trades, taker base, taker quote, ignore
#[derive(Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

impl RawKline {
    fn into_candle(self) -> Result<Candle, ExchangeError> {
        let timestamp = Utc
            .timestamp_millis_opt(self.0)
            .single()
            .ok_or_else(|| ExchangeError::Decode(format!("invalid open time {}", self.0)))?;

        Ok(Candle {
            timestamp,
            open: parse_decimal(&self.1)?,
            high: parse_decimal(&self.2)?,
            low: parse_decimal(&self.3)?,
            close: parse_decimal(&self.4)?,
            volume: parse_decimal(&self.5)?,
        })
    }
}

fn parse_decimal(raw: &str) -> Result<f64, ExchangeError> {
    raw.parse::<f64>()
        .map_err(|e| ExchangeError::Decode(format!("bad number {:?}: {}", raw, e)))
}

/// USDⓈ-M futures REST client
///
/// Cloneable; clones share the HTTP pool and the rate limiter.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BinanceFuturesClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            recv_window_ms: settings.recv_window_ms,
            rate_limiter,
        })
    }

    fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str::<T>(&text)
                .map_err(|e| ExchangeError::Decode(e.to_string()));
        }

        match serde_json::from_str::<ApiErrorResponse>(&text) {
            Ok(err) => Err(ExchangeError::Api {
                code: err.code,
                msg: err.msg,
            }),
            Err(_) => Err(ExchangeError::Api {
                code: i64::from(status.as_u16()),
                msg: text,
            }),
        }
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        if !self.has_credentials() {
            return Err(ExchangeError::MissingCredentials);
        }
        self.rate_limiter.until_ready().await;

        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_request(&self.api_secret, &query_string)?;

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let raw: Vec<RawKline> = self
            .get_public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        raw.into_iter().map(RawKline::into_candle).collect()
    }

    async fn fetch_tickers(&self) -> Result<Vec<Ticker24h>, ExchangeError> {
        self.get_public("/fapi/v1/ticker/24hr", &[]).await
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck, ExchangeError> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", order.quantity.to_string()),
        ];
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        tracing::info!(
            "📤 Market order: {} {} {} (reduceOnly={})",
            order.side,
            order.quantity,
            order.symbol,
            order.reduce_only
        );
        self.post_signed("/fapi/v1/order", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn settings(url: &str, key: &str, secret: &str) -> ExchangeSettings {
        ExchangeSettings {
            rest_url: url.to_string(),
            api_key: key.to_string(),
            api_secret: secret.to_string(),
            ..ExchangeSettings::default()
        }
    }

    #[test]
    fn test_sign_request_matches_reference_signature() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_request(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[tokio::test]
    async fn test_fetch_klines_parses_rows() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"[
            [1704067200000,"100.0","101.5","99.5","101.0","1234.5",1704067499999,"124000.0",42,"600.0","60000.0","0"],
            [1704067500000,"101.0","102.0","100.5","101.8","987.0",1704067799999,"99000.0",37,"500.0","50000.0","0"]
        ]"#;
        let mock = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "5m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = BinanceFuturesClient::new(&settings(&server.url(), "", "")).unwrap();
        let candles = client.fetch_klines("BTCUSDT", "5m", 2).await.unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp.timestamp_millis(), 1704067200000);
        assert_eq!(candles[0].high, 101.5);
        assert_eq!(candles[1].close, 101.8);
        assert_eq!(candles[1].volume, 987.0);
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceFuturesClient::new(&settings(&server.url(), "", "")).unwrap();
        let result = client.fetch_klines("NOPE", "5m", 10).await;

        match result {
            Err(ExchangeError::Api { code, msg }) => {
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_tickers() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/fapi/v1/ticker/24hr")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"symbol":"ETHUSDT","lastPrice":"2000","highPrice":"2050","lowPrice":"1980","quoteVolume":"5000000"}]"#,
            )
            .create_async()
            .await;

        let client = BinanceFuturesClient::new(&settings(&server.url(), "", "")).unwrap();
        let tickers = client.fetch_tickers().await.unwrap();

        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "ETHUSDT");
        assert_eq!(tickers[0].quote_volume, 5_000_000.0);
    }

    #[tokio::test]
    async fn test_market_order_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fapi/v1/order")
            .match_header("X-MBX-APIKEY", "key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("type".into(), "MARKET".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":77,"status":"NEW","symbol":"BTCUSDT"}"#)
            .create_async()
            .await;

        let client = BinanceFuturesClient::new(&settings(&server.url(), "key", "secret")).unwrap();
        let order = MarketOrder {
            symbol: "BTCUSDT".to_string(),
            side: "SELL",
            quantity: 0.25,
            reduce_only: true,
        };
        let ack = client.place_market_order(&order).await.unwrap();

        mock.assert_async().await;
        assert_eq!(ack.order_id, 77);
        assert_eq!(ack.status, "NEW");
    }

    #[tokio::test]
    async fn test_order_without_credentials_is_rejected_locally() {
        let client =
            BinanceFuturesClient::new(&settings("http://127.0.0.1:9", "", "")).unwrap();
        let order = MarketOrder {
            symbol: "BTCUSDT".to_string(),
            side: "BUY",
            quantity: 1.0,
            reduce_only: false,
        };

        let result = client.place_market_order(&order).await;
        assert!(matches!(result, Err(ExchangeError::MissingCredentials)));
    }
}
