//! LN Markets REST API Client
//!
//! Signed HTTP access to the futures account. Every request carries the
//! `LNM-ACCESS-*` headers computed over timestamp, method, path and params.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client, Method, Url,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;

use super::{AccountBalance, ExchangeClient, PositionFilter, TradeRequest, TradeResponse};
use crate::types::ExchangeCredentials;

type HmacSha256 = Hmac<Sha256>;

/// base64(HMAC-SHA256(secret, timestamp + METHOD + path + params))
pub(crate) fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    params: &str,
) -> Result<String> {
    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, params);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("Failed to initialize HMAC for LN Markets signature")?;
    mac.update(message.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// REST client for one LN Markets account
pub struct LnMarketsClient {
    client: Client,
    base_url: String,
    credentials: ExchangeCredentials,
}

impl LnMarketsClient {
    pub fn new(base_url: &str, credentials: ExchangeCredentials, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create LN Markets HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn auth_headers(&self, method: &Method, url: &Url, params: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = sign(
            &self.credentials.secret_key,
            &timestamp,
            method.as_str(),
            url.path(),
            params,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "LNM-ACCESS-KEY",
            HeaderValue::from_str(&self.credentials.api_key)
                .context("Invalid LNM-ACCESS-KEY header value")?,
        );
        headers.insert(
            "LNM-ACCESS-SIGNATURE",
            HeaderValue::from_str(&signature).context("Invalid LNM-ACCESS-SIGNATURE header value")?,
        );
        headers.insert(
            "LNM-ACCESS-PASSPHRASE",
            HeaderValue::from_str(&self.credentials.passphrase)
                .context("Invalid LNM-ACCESS-PASSPHRASE header value")?,
        );
        headers.insert(
            "LNM-ACCESS-TIMESTAMP",
            HeaderValue::from_str(&timestamp).context("Invalid LNM-ACCESS-TIMESTAMP header value")?,
        );
        Ok(headers)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let endpoint = format!("{}{}", self.base_url, path);
        let url = if query.is_empty() {
            Url::parse(&endpoint)
        } else {
            Url::parse_with_params(&endpoint, query)
        }
        .with_context(|| format!("Invalid LN Markets URL {}", endpoint))?;
        let params = url.query().unwrap_or_default().to_string();

        let headers = self.auth_headers(&Method::GET, &url, &params)?;
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("Failed GET {}", path))?;

        Self::decode(response, "GET", path).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let endpoint = format!("{}{}", self.base_url, path);
        let url =
            Url::parse(&endpoint).with_context(|| format!("Invalid LN Markets URL {}", endpoint))?;
        let payload = serde_json::to_string(body).context("Failed to encode request body")?;

        let mut headers = self.auth_headers(&Method::POST, &url, &payload)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(payload)
            .send()
            .await
            .with_context(|| format!("Failed POST {}", path))?;

        Self::decode(response, "POST", path).await
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        method: &str,
        path: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} {} response", method, path))?;

        if status.as_u16() >= 400 {
            bail!("LN Markets API error: {} - {}", status, body);
        }

        // Acknowledgement endpoints may answer with an empty body
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body)
            .with_context(|| format!("Failed to parse {} {} response", method, path))
    }

    /// Fetch one trade by id
    pub async fn trade(&self, trade_id: &str) -> Result<TradeResponse> {
        self.get(&format!("/futures/trade/{}", trade_id), &[]).await
    }
}

#[async_trait]
impl ExchangeClient for LnMarketsClient {
    async fn create_order(&self, request: &TradeRequest) -> Result<TradeResponse> {
        let response: TradeResponse = self.post("/futures/trade", request).await?;
        tracing::info!(
            order_id = %response.id,
            side = %request.side,
            price = request.price,
            amount = request.amount,
            "LN Markets order created"
        );
        Ok(response)
    }

    async fn update_take_profit(&self, order_id: &str, price: f64) -> Result<()> {
        let _: serde_json::Value = self
            .post("/futures/take-profit", &json!({ "id": order_id, "price": price }))
            .await?;
        Ok(())
    }

    async fn update_stop_loss(&self, order_id: &str, price: f64) -> Result<()> {
        let _: serde_json::Value = self
            .post("/futures/stop-loss", &json!({ "id": order_id, "price": price }))
            .await?;
        Ok(())
    }

    async fn close_order(&self, order_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post("/futures/close", &json!({ "id": order_id }))
            .await?;
        Ok(())
    }

    async fn balance(&self) -> Result<AccountBalance> {
        self.get("/user", &[]).await
    }

    async fn positions(&self, filter: PositionFilter) -> Result<Vec<TradeResponse>> {
        self.get("/futures", &[("type", filter.as_str())]).await
    }
}
