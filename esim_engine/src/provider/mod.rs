//! Client side of the upstream eSIM provider.
//!
//! The provider issues the actual SIM profiles. The engine needs three calls: create an order, poll an order, and
//! read card usage. Everything the provider returns is decoded into the typed structures below at the edge, so the
//! order state machine never touches raw JSON except to snapshot it.
mod client;
mod envelope;
mod signing;

use std::fmt::Display;

use chrono::{DateTime, NaiveDateTime, Utc};
pub use client::{EsimProviderClient, ProviderConfig};
pub use envelope::{Payload, ProviderEnvelope};
use serde::{Deserialize, Serialize};
pub use signing::{generate_nonce, sign_request, NONCE_LENGTH};
use thiserror::Error;

use crate::{db_types::EsimStatus, traits::ErrorKind};

#[allow(async_fn_in_trait)]
pub trait ProviderClient {
    async fn create_order(&self, order: &ProviderCreateOrder) -> Result<ProviderOrderAck, ProviderError>;

    /// Fetches an order by the provider's order number.
    async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, ProviderError>;

    /// Fetches usage for one issued eSIM, by the provider's eSIM id.
    async fn get_esim_usage(&self, provider_esim_id: &str) -> Result<EsimUsage, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCreateOrder {
    /// The provider's product id. Sent as a JSON number when it is numeric.
    #[serde(serialize_with = "numeric_if_possible")]
    pub product_id: String,
    pub quantity: i64,
    pub customer_email: String,
}

fn numeric_if_possible<S: serde::Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    match value.parse::<i64>() {
        Ok(n) => serializer.serialize_i64(n),
        Err(_) => serializer.serialize_str(value),
    }
}

/// The provider's acknowledgement of a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrderAck {
    pub provider_order_id: i64,
    pub order_number: String,
    pub status: ProviderOrderStatus,
}

//--------------------------------------  ProviderOrderStatus  -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOrderStatus {
    Pending,
    Paid,
    Processing,
    Completed,
    Cancelled,
    Failed,
    Unknown(String),
}

impl From<&str> for ProviderOrderStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "PAID" => Self::Paid,
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            "FAILED" => Self::Failed,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl Display for ProviderOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Paid => write!(f, "PAID"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

//--------------------------------------     ProviderOrder     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOrder {
    pub provider_order_id: i64,
    pub order_number: String,
    pub status: ProviderOrderStatus,
    pub order_items: Vec<serde_json::Value>,
    pub esims: Vec<ProviderEsim>,
    /// The complete payload, kept for the order detail snapshot
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderEsim {
    pub provider_esim_id: Option<String>,
    pub iccid: String,
    pub status: Option<String>,
    pub activation_code: Option<String>,
    pub qr_code: Option<String>,
    pub lpa: Option<String>,
    pub apple_url: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

//--------------------------------------       EsimUsage       -------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct EsimUsage {
    pub iccid: Option<String>,
    pub status: Option<EsimStatus>,
    pub data_used: i64,
    pub data_total: i64,
    pub data_remaining: i64,
    pub usage_percent: f64,
    pub activation_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
}

/// Parses the provider's timestamps, which come as RFC 3339 or as `YYYY-MM-DD HH:MM:SS` in UTC. Blank means absent.
pub fn parse_provider_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|t| t.and_utc()))
        .ok()
}

//--------------------------------------     ProviderError     -------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider transport error: {0}")]
    Transport(String),
    #[error("Provider call timed out")]
    Timeout,
    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Provider rejected the request ({code}): {message}")]
    Api { code: i64, message: String },
    #[error("Could not decode provider response: {0}")]
    Decode(String),
    #[error("Provider client is misconfigured: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Http { .. } | Self::Api { .. } => ErrorKind::Transient,
            Self::Decode(_) | Self::Configuration(_) => ErrorKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}
