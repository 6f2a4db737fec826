use std::time::Duration;

use chrono::Utc;
use esim_common::Secret;
use log::*;
use reqwest::Method;
use serde::Deserialize;

use crate::{
    db_types::EsimStatus,
    provider::{
        envelope::{ProviderEnvelope, SlotOrder},
        generate_nonce,
        parse_provider_time,
        sign_request,
        EsimUsage,
        ProviderClient,
        ProviderCreateOrder,
        ProviderEsim,
        ProviderError,
        ProviderOrder,
        ProviderOrderAck,
        ProviderOrderStatus,
    },
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub api_secret: Secret<String>,
}

/// HTTP client for the eSIM provider's agent API. Every request is signed; see [`sign_request`].
#[derive(Clone)]
pub struct EsimProviderClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for EsimProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EsimProviderClient({})", self.config.base_url)
    }
}

//-------------------------------------- Wire formats --------------------------------------------------------------
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderData {
    #[serde(default)]
    order_id: i64,
    #[serde(default)]
    order_number: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    order_number: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    order_items: Vec<serde_json::Value>,
    #[serde(default)]
    esims: Vec<EsimData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EsimData {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    iccid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    activation_code: String,
    #[serde(default)]
    qr_code: String,
    #[serde(default)]
    lpa: String,
    #[serde(default)]
    direct_apple_url: String,
    #[serde(default)]
    activated_at: String,
    #[serde(default)]
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct UsageData {
    esim: UsageEsim,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageEsim {
    #[serde(default)]
    iccid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    activation_time: String,
    #[serde(default)]
    expire_time: String,
    #[serde(default)]
    data_used: i64,
    #[serde(default)]
    data_total: i64,
    #[serde(default)]
    data_remaining: i64,
    #[serde(default)]
    usage_percentage: serde_json::Value,
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<EsimData> for ProviderEsim {
    fn from(e: EsimData) -> Self {
        Self {
            provider_esim_id: (e.id > 0).then(|| e.id.to_string()),
            activated_at: parse_provider_time(&e.activated_at),
            expires_at: parse_provider_time(&e.expires_at),
            iccid: e.iccid.trim().to_string(),
            status: non_empty(e.status),
            activation_code: non_empty(e.activation_code),
            qr_code: non_empty(e.qr_code),
            lpa: non_empty(e.lpa),
            apple_url: non_empty(e.direct_apple_url),
        }
    }
}

fn parse_percentage(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or_default(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

pub(crate) fn decode_create_order(body: &str) -> Result<ProviderOrderAck, ProviderError> {
    let envelope = ProviderEnvelope::parse(body)?.ensure_success()?;
    let (data, _): (CreateOrderData, _) = envelope.decode(SlotOrder::MessageFirst)?;
    if data.order_number.trim().is_empty() {
        return Err(ProviderError::Decode("create order response has no orderNumber".into()));
    }
    Ok(ProviderOrderAck {
        provider_order_id: data.order_id,
        order_number: data.order_number,
        status: ProviderOrderStatus::from(data.status.as_str()),
    })
}

pub(crate) fn decode_order(body: &str) -> Result<ProviderOrder, ProviderError> {
    let envelope = ProviderEnvelope::parse(body)?.ensure_success()?;
    let (data, raw): (OrderData, _) = envelope.decode(SlotOrder::DataFirst)?;
    Ok(ProviderOrder {
        provider_order_id: data.id,
        order_number: data.order_number,
        status: ProviderOrderStatus::from(data.status.as_str()),
        order_items: data.order_items,
        esims: data.esims.into_iter().map(ProviderEsim::from).collect(),
        raw,
    })
}

pub(crate) fn decode_usage(body: &str) -> Result<EsimUsage, ProviderError> {
    let envelope = ProviderEnvelope::parse(body)?.ensure_success()?;
    let (data, _): (UsageData, _) = envelope.decode(SlotOrder::DataFirst)?;
    let esim = data.esim;
    Ok(EsimUsage {
        iccid: non_empty(esim.iccid),
        status: esim.status.parse::<EsimStatus>().ok(),
        data_used: esim.data_used,
        data_total: esim.data_total,
        data_remaining: esim.data_remaining,
        usage_percent: parse_percentage(&esim.usage_percentage),
        activation_time: parse_provider_time(&esim.activation_time),
        expire_time: parse_provider_time(&esim.expire_time),
    })
}

impl EsimProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::Configuration("provider base URL is not set".into()));
        }
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let config = ProviderConfig { base_url: config.base_url.trim_end_matches('/').to_string(), ..config };
        Ok(Self { config, client })
    }

    /// Sends a signed request and returns the raw response body. Non-2xx responses that still carry an envelope are
    /// passed through so the caller sees the provider's own error message.
    async fn send(&self, method: Method, path: &str, body: Option<String>) -> Result<String, ProviderError> {
        let body = body.unwrap_or_default();
        let timestamp = Utc::now().timestamp_millis();
        let nonce = generate_nonce();
        let signature =
            sign_request(self.config.api_secret.reveal(), method.as_str(), path, &body, timestamp, &nonce)?;
        let url = format!("{}{path}", self.config.base_url);
        trace!("🛰️ {method} {url}");
        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("x-api-key", self.config.api_key.reveal().as_str())
            .header("x-timestamp", timestamp.to_string())
            .header("x-nonce", nonce)
            .header("x-signature", signature)
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }
        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() && serde_json::from_str::<ProviderEnvelope>(&text).is_err() {
            warn!("🛰️ {method} {path} failed with HTTP {status}");
            return Err(ProviderError::Http { status: status.as_u16(), body: text });
        }
        Ok(text)
    }
}

impl ProviderClient for EsimProviderClient {
    async fn create_order(&self, order: &ProviderCreateOrder) -> Result<ProviderOrderAck, ProviderError> {
        let body = serde_json::to_string(order).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let text = self.send(Method::POST, "/api/v1/orders", Some(body)).await?;
        let ack = decode_create_order(&text)?;
        debug!("🛰️ Provider accepted order {} with status {}", ack.order_number, ack.status);
        Ok(ack)
    }

    async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, ProviderError> {
        let path = format!("/api/v1/orders/{provider_order_id}");
        let text = self.send(Method::GET, &path, None).await?;
        decode_order(&text)
    }

    async fn get_esim_usage(&self, provider_esim_id: &str) -> Result<EsimUsage, ProviderError> {
        let path = format!("/api/v1/esims/{provider_esim_id}/usage");
        let text = self.send(Method::GET, &path, None).await?;
        decode_usage(&text)
    }
}
