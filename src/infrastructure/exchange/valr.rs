//! VALR execution adapter.
//!
//! Implements the `ExchangeService` port against VALR's signed REST API:
//! - HMAC-SHA512 request signing over timestamp + verb + path + body
//! - Limit order placement with a client order id carrying the correlation id
//! - Status polling and cancellation for the reconciliation loop
//!
//! Outbound calls go through the retrying HTTP client and the transient-I/O
//! circuit breaker owned by the order manager.

use crate::domain::hitl::PriceSnapshot;
use crate::domain::money::{self, canonical_string};
use crate::domain::orders::{ExchangeOrder, OrderSide, OrderStatus};
use crate::domain::ports::{EquityService, ExchangeService, MarketSnapshotService};
use crate::infrastructure::core::outbound;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha512;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type HmacSha512 = Hmac<Sha512>;

pub struct ValrExchangeService {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    /// Symbol and submission context per live order id; VALR status lookups
    /// are scoped by currency pair.
    submitted: Arc<RwLock<HashMap<String, SubmittedOrder>>>,
}

#[derive(Clone)]
struct SubmittedOrder {
    symbol: String,
    side: OrderSide,
    quantity: Decimal,
    limit_price: Decimal,
    correlation_id: Uuid,
    submitted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct PlaceOrderResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatusResponse {
    order_status_type: String,
    #[serde(default)]
    original_quantity: Option<Decimal>,
    #[serde(default)]
    remaining_quantity: Option<Decimal>,
    #[serde(default)]
    average_price: Option<Decimal>,
}

impl ValrExchangeService {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: outbound::exchange_client(),
            base_url,
            api_key,
            api_secret,
            submitted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate the HMAC-SHA512 request signature.
    fn sign_request(&self, timestamp: &str, verb: &str, path: &str, body: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take a key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(verb.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_request(
        &self,
        verb: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let body_str = body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let signature = self.sign_request(&timestamp, verb.as_str(), path, &body_str);
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(verb, &url)
            .header("X-VALR-API-KEY", &self.api_key)
            .header("X-VALR-SIGNATURE", signature)
            .header("X-VALR-TIMESTAMP", timestamp);
        if let Some(b) = body {
            request = request.json(&b);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("VALR request to {path} failed"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "VALR returned {} for {path}",
                response.status()
            ));
        }
        Ok(response)
    }

    fn map_status(status_type: &str) -> OrderStatus {
        match status_type {
            "Filled" => OrderStatus::Filled,
            "Partially Filled" => OrderStatus::PartiallyFilled,
            "Cancelled" => OrderStatus::Cancelled,
            "Failed" => OrderStatus::Rejected,
            _ => OrderStatus::New,
        }
    }
}

#[async_trait]
impl ExchangeService for ValrExchangeService {
    async fn submit_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
        correlation_id: Uuid,
    ) -> Result<ExchangeOrder> {
        let body = serde_json::json!({
            "pair": symbol,
            "side": side.to_string(),
            "quantity": canonical_string(quantity),
            "price": canonical_string(limit_price),
            "postOnly": false,
            "customerOrderId": correlation_id.to_string(),
        });

        let response = self
            .signed_request(reqwest::Method::POST, "/v1/orders/limit", Some(body))
            .await?;
        let placed: PlaceOrderResponse = response
            .json()
            .await
            .context("VALR place-order response was not JSON")?;

        let submitted_at = Utc::now();
        self.submitted.write().await.insert(
            placed.id.clone(),
            SubmittedOrder {
                symbol: symbol.to_string(),
                side,
                quantity,
                limit_price,
                correlation_id,
                submitted_at,
            },
        );

        Ok(ExchangeOrder {
            order_id: placed.id,
            correlation_id,
            symbol: symbol.to_string(),
            side,
            limit_price,
            quantity,
            status: OrderStatus::New,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            submitted_at,
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<ExchangeOrder> {
        let submitted = self
            .submitted
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;

        let path = format!(
            "/v1/orders/{}/orderid/{}",
            submitted.symbol, order_id
        );
        let response = self.signed_request(reqwest::Method::GET, &path, None).await?;
        let status: OrderStatusResponse = response
            .json()
            .await
            .context("VALR order-status response was not JSON")?;

        let original = status.original_quantity.unwrap_or(submitted.quantity);
        let remaining = status.remaining_quantity.unwrap_or(Decimal::ZERO);

        Ok(ExchangeOrder {
            order_id: order_id.to_string(),
            correlation_id: submitted.correlation_id,
            symbol: submitted.symbol,
            side: submitted.side,
            limit_price: submitted.limit_price,
            quantity: original,
            status: Self::map_status(&status.order_status_type),
            filled_qty: original - remaining,
            avg_fill_price: status.average_price,
            submitted_at: submitted.submitted_at,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let submitted = self
            .submitted
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown order {order_id}"))?;

        let body = serde_json::json!({
            "orderId": order_id,
            "pair": submitted.symbol,
        });
        self.signed_request(reqwest::Method::DELETE, "/v1/orders/order", Some(body))
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    currency: String,
    total: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketSummaryResponse {
    last_traded_price: Decimal,
    bid_price: Decimal,
    ask_price: Decimal,
}

#[async_trait]
impl EquityService for ValrExchangeService {
    /// ZAR cash balance. Open crypto positions are liquidated by the stop
    /// logic upstream of equity checks, so ZAR total is the account equity.
    async fn current_equity_zar(&self) -> Result<Decimal> {
        let response = self
            .signed_request(reqwest::Method::GET, "/v1/account/balances", None)
            .await?;
        let balances: Vec<BalanceResponse> = response
            .json()
            .await
            .context("VALR balances response was not JSON")?;

        Ok(balances
            .into_iter()
            .find(|b| b.currency == "ZAR")
            .map(|b| b.total)
            .unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl MarketSnapshotService for ValrExchangeService {
    async fn snapshot(&self, symbol: &str) -> Result<PriceSnapshot> {
        let started = std::time::Instant::now();
        let path = format!("/v1/public/{symbol}/marketsummary");
        let response = self.signed_request(reqwest::Method::GET, &path, None).await?;
        let summary: MarketSummaryResponse = response
            .json()
            .await
            .context("VALR market summary response was not JSON")?;

        let mid = (summary.bid_price + summary.ask_price) / Decimal::TWO;
        let spread_pct = if mid > Decimal::ZERO {
            money::to_percent(
                (summary.ask_price - summary.bid_price) / mid * Decimal::ONE_HUNDRED,
            )
        } else {
            Decimal::ZERO
        };

        Ok(PriceSnapshot {
            price: money::to_price(summary.last_traded_price),
            bid: money::to_price(summary.bid_price),
            ask: money::to_price(summary.ask_price),
            spread_pct,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_hex_sha512() {
        let service = ValrExchangeService::new(
            "https://api.valr.com".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        let signature = service.sign_request("1700000000000", "GET", "/v1/orders", "");
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_changes_with_path() {
        let service = ValrExchangeService::new(
            "https://api.valr.com".to_string(),
            "key".to_string(),
            "secret".to_string(),
        );
        let a = service.sign_request("1700000000000", "GET", "/v1/orders", "");
        let b = service.sign_request("1700000000000", "GET", "/v1/balances", "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ValrExchangeService::map_status("Filled"), OrderStatus::Filled);
        assert_eq!(
            ValrExchangeService::map_status("Partially Filled"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(
            ValrExchangeService::map_status("Cancelled"),
            OrderStatus::Cancelled
        );
        assert_eq!(ValrExchangeService::map_status("Placed"), OrderStatus::New);
    }
}
