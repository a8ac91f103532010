use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExecutionError;
use crate::execution::exchange::{AccountBalances, Exchange};
use crate::execution::portfolio::ExchangePosition;
use crate::models::{
    Candle, Order, OrderAmount, OrderIntent, OrderPrice, OrderStatus, Side, Timeframe,
};

const API_PREFIX: &str = "/api/v1";
const REQUEST_TIMEOUT_SECS: u64 = 10;

type GatewayRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    client_order_id: &'a str,
    symbol: &'a str,
    side: Side,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

impl<'a> From<&'a OrderIntent> for OrderRequest<'a> {
    fn from(intent: &'a OrderIntent) -> Self {
        let (quote_amount, quantity) = match intent.amount {
            OrderAmount::Quote(notional) => (Some(notional), None),
            OrderAmount::Base(quantity) => (None, Some(quantity)),
        };
        let (order_type, price) = match intent.price {
            OrderPrice::Market => ("market", None),
            OrderPrice::Limit(price) => ("limit", Some(price)),
        };

        Self {
            client_order_id: &intent.client_order_id,
            symbol: &intent.symbol,
            side: intent.side,
            order_type,
            quote_amount,
            quantity,
            price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    client_order_id: String,
    symbol: String,
    side: Side,
    status: String,
    #[serde(default)]
    quote_amount: Option<f64>,
    #[serde(default)]
    quantity: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    filled_quantity: f64,
    #[serde(default)]
    avg_fill_price: Option<f64>,
    #[serde(default)]
    fee: f64,
    /// Milliseconds since epoch
    #[serde(default)]
    updated_at: Option<i64>,
}

impl OrderResponse {
    fn into_order(self) -> Order {
        let amount = match (self.quote_amount, self.quantity) {
            (Some(notional), _) => OrderAmount::Quote(notional),
            (None, quantity) => OrderAmount::Base(quantity.unwrap_or(self.filled_quantity)),
        };

        Order {
            id: self.order_id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            side: self.side,
            amount,
            price: self.price.map(OrderPrice::Limit).unwrap_or(OrderPrice::Market),
            status: parse_order_status(&self.status),
            filled_quantity: self.filled_quantity,
            avg_fill_price: self.avg_fill_price.unwrap_or(0.0),
            fee: self.fee,
            updated_at: self
                .updated_at
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: f64,
    #[serde(default)]
    positions: Vec<ExchangePosition>,
}

/// [open_time_ms, open, high, low, close, volume]
type CandleRow = (i64, f64, f64, f64, f64, f64);

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub fn parse_order_status(status: &str) -> OrderStatus {
    match status.to_ascii_lowercase().as_str() {
        "filled" => OrderStatus::Filled,
        "partially_filled" | "partial" => OrderStatus::PartiallyFilled,
        "cancelled" | "canceled" | "expired" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}

/// Maps a non-success gateway response onto the execution error taxonomy
fn classify_error(status: StatusCode, body: &str) -> ExecutionError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ExecutionError::Transient(format!("{}: {}", status, body));
    }

    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (code, message) = parsed
        .map(|e| (e.code, e.message))
        .unwrap_or_else(|| (String::new(), body.to_string()));

    match code.as_str() {
        "INSUFFICIENT_FUNDS" => ExecutionError::InsufficientFunds(message),
        "INVALID_SYMBOL" => ExecutionError::InvalidSymbol(message),
        _ => ExecutionError::Rejected(format!("{} {}: {}", status, code, message)),
    }
}

fn transport_error(e: reqwest::Error) -> ExecutionError {
    ExecutionError::Transient(format!("request failed: {}", e))
}

/// Client for a REST order gateway
///
/// Cloneable; clones share the HTTP connection pool and the rate limiter.
#[derive(Clone)]
pub struct RestExchangeClient {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<GatewayRateLimiter>,
}

impl RestExchangeClient {
    pub fn new(base_url: &str, api_key: &str, requests_per_second: u32) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota =
            Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    /// Rate-limited send; `Ok(None)` on 404
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ExecutionError> {
        self.rate_limiter.until_ready().await;

        let response = request
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Gateway returned {}: {}", status, body);
            return Err(classify_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ExecutionError::Transient(format!("malformed response: {}", e)))
    }

    async fn send_required<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, ExecutionError> {
        self.send(request)
            .await?
            .ok_or_else(|| ExecutionError::Rejected(format!("{} not found", what)))
    }
}

#[async_trait]
impl Exchange for RestExchangeClient {
    fn name(&self) -> &str {
        "rest-gateway"
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExecutionError> {
        let request = self
            .client
            .post(self.url("/orders"))
            .json(&OrderRequest::from(intent));
        let response: OrderResponse = self.send_required(request, "order endpoint").await?;
        Ok(response.into_order())
    }

    async fn get_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Option<Order>, ExecutionError> {
        let request = self
            .client
            .get(self.url(&format!("/orders/{}", client_order_id)))
            .query(&[("symbol", symbol)]);
        let response: Option<OrderResponse> = self.send(request).await?;
        Ok(response.map(OrderResponse::into_order))
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<Order, ExecutionError> {
        let request = self
            .client
            .delete(self.url(&format!("/orders/{}", client_order_id)))
            .query(&[("symbol", symbol)]);
        let response: OrderResponse = self
            .send_required(request, &format!("order {}", client_order_id))
            .await?;
        Ok(response.into_order())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExecutionError> {
        let request = self
            .client
            .get(self.url("/orders"))
            .query(&[("symbol", symbol), ("status", "open")]);
        let response: Vec<OrderResponse> = self.send(request).await?.unwrap_or_default();
        Ok(response.into_iter().map(OrderResponse::into_order).collect())
    }

    async fn balances(&self) -> Result<AccountBalances, ExecutionError> {
        let request = self.client.get(self.url("/account"));
        let response: AccountResponse = self.send_required(request, "account").await?;
        Ok(AccountBalances {
            cash: response.cash,
            positions: response.positions,
        })
    }

    async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExecutionError> {
        let limit = limit.to_string();
        let request = self.client.get(self.url("/candles")).query(&[
            ("symbol", symbol),
            ("interval", timeframe.as_str()),
            ("limit", limit.as_str()),
        ]);
        let rows: Vec<CandleRow> = self
            .send(request)
            .await?
            .ok_or_else(|| ExecutionError::InvalidSymbol(symbol.to_string()))?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .filter_map(|(ms, open, high, low, close, volume)| {
                let open_time: DateTime<Utc> = Utc.timestamp_millis_opt(ms).single()?;
                Some(Candle {
                    open_time,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            })
            .collect();
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SYMBOL: &str = "BTC/USDT";

    fn client(url: &str) -> RestExchangeClient {
        RestExchangeClient::new(url, "test-key", 100).unwrap()
    }

    #[test]
    fn test_parse_order_status() {
        assert_eq!(parse_order_status("FILLED"), OrderStatus::Filled);
        assert_eq!(parse_order_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(parse_order_status("partially_filled"), OrderStatus::PartiallyFilled);
        assert_eq!(parse_order_status("new"), OrderStatus::Pending);
    }

    #[test]
    fn test_classify_error() {
        assert!(classify_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(classify_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(matches!(
            classify_error(
                StatusCode::BAD_REQUEST,
                r#"{"code":"INSUFFICIENT_FUNDS","message":"balance too low"}"#
            ),
            ExecutionError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::BAD_REQUEST, r#"{"code":"INVALID_SYMBOL"}"#),
            ExecutionError::InvalidSymbol(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, "nope"),
            ExecutionError::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_place_order_sends_key_and_parses_fill() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/orders")
            .match_header("x-api-key", "test-key")
            .match_body(Matcher::PartialJsonString(
                r#"{"symbol":"BTC/USDT","side":"buy","type":"market","quote_amount":500.0}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"order_id":"42","client_order_id":"abc","symbol":"BTC/USDT","side":"buy",
                    "status":"filled","quote_amount":500.0,"filled_quantity":0.01,
                    "avg_fill_price":49950.0,"fee":0.5,"updated_at":1704067200000}"#,
            )
            .create_async()
            .await;

        let intent = OrderIntent::market(SYMBOL, Side::Buy, OrderAmount::Quote(500.0));
        let order = client(&server.url()).place_order(&intent).await.unwrap();

        mock.assert_async().await;
        assert_eq!(order.id, "42");
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.amount, OrderAmount::Quote(500.0));
        assert_eq!(order.filled_quantity, 0.01);
        assert_eq!(order.updated_at.timestamp(), 1_704_067_200);
    }

    #[tokio::test]
    async fn test_get_unknown_order_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/orders/missing")
            .match_query(Matcher::UrlEncoded("symbol".into(), SYMBOL.into()))
            .with_status(404)
            .create_async()
            .await;

        let order = client(&server.url())
            .get_order(SYMBOL, "missing")
            .await
            .unwrap();
        assert!(order.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/account")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = client(&server.url()).balances().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_balances_and_candles() {
        let mut server = mockito::Server::new_async().await;
        let _account = server
            .mock("GET", "/api/v1/account")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "cash": 1234.5,
                    "positions": [
                        {"symbol": "BTC/USDT", "quantity": 0.5, "entry_price": 40000.0}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _candles = server
            .mock("GET", "/api/v1/candles")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("interval".into(), "1h".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!([
                    [1704070800000_i64, 101.0, 103.0, 100.0, 102.0, 5.0],
                    [1704067200000_i64, 100.0, 102.0, 99.0, 101.0, 4.0]
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = client(&server.url());
        let balances = client.balances().await.unwrap();
        assert_eq!(balances.cash, 1234.5);
        assert_eq!(balances.positions[0].quantity, 0.5);

        let candles = client
            .recent_candles(SYMBOL, Timeframe::H1, 2)
            .await
            .unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[1].close, 102.0);
    }
}
