use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use esim_common::Secret;
use log::*;
use serde::Deserialize;

use crate::{
    chain::{ChainError, ChainObserver, ChainTransfer, TransferStatus},
    db_types::Amount,
};

pub const DEFAULT_TRON_API_URL: &str = "https://api.trongrid.io";
const TRANSACTION_PAGE_SIZE: usize = 50;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`ChainObserver`] backed by a TronGrid-compatible REST endpoint.
#[derive(Clone)]
pub struct TronGridObserver {
    base_url: String,
    api_key: Secret<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for TronGridObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TronGridObserver({})", self.base_url)
    }
}

impl TronGridObserver {
    pub fn new(base_url: &str, api_key: Secret<String>) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), api_key, client })
    }
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    data: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    #[serde(rename = "txID")]
    tx_id: String,
    #[serde(default)]
    block_number: i64,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    amount: serde_json::Value,
    #[serde(default)]
    confirmations: i64,
    #[serde(default)]
    status: String,
}

fn map_status(status: &str) -> TransferStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUCCESS" => TransferStatus::Confirmed,
        "FAILED" => TransferStatus::Failed,
        _ => TransferStatus::Pending,
    }
}

fn parse_amount(value: &serde_json::Value) -> Option<Amount> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64().and_then(|f| Amount::from_f64(f).ok()),
        _ => None,
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Converts raw observer records into typed transfers into `address`. Records with unreadable amounts are dropped.
fn incoming_transfers(raw: Vec<RawTransaction>, address: &str, min_amount: Amount) -> Vec<ChainTransfer> {
    raw.into_iter()
        .filter(|tx| tx.to == address)
        .filter_map(|tx| {
            let Some(amount) = parse_amount(&tx.amount) else {
                warn!("⛓️ Ignoring transfer {} with unreadable amount {}", tx.tx_id, tx.amount);
                return None;
            };
            Some(ChainTransfer {
                tx_hash: tx.tx_id,
                from: tx.from,
                to: tx.to,
                amount,
                confirmations: tx.confirmations,
                block_height: tx.block_number,
                timestamp: millis_to_datetime(tx.timestamp),
                status: map_status(&tx.status),
            })
        })
        .filter(|t| t.amount >= min_amount)
        .collect()
}

impl ChainObserver for TronGridObserver {
    async fn get_incoming(&self, address: &str, min_amount: Amount) -> Result<Vec<ChainTransfer>, ChainError> {
        let url = format!("{}/v1/accounts/{address}/transactions", self.base_url);
        let mut req = self.client.get(&url).query(&[("limit", TRANSACTION_PAGE_SIZE)]);
        if !self.api_key.is_empty() {
            req = req.header("TRON-PRO-API-KEY", self.api_key.reveal().as_str());
        }
        trace!("⛓️ Fetching transactions for {address}");
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Http { status: status.as_u16(), body });
        }
        let body = response.text().await?;
        let parsed: TransactionsResponse =
            serde_json::from_str(&body).map_err(|e| ChainError::Decode(e.to_string()))?;
        let transfers = incoming_transfers(parsed.data, address, min_amount);
        debug!("⛓️ {} incoming transfers found for {address}", transfers.len());
        Ok(transfers)
    }
}
