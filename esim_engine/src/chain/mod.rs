//! Read-only view of the stablecoin chain.
//!
//! The engine never signs or broadcasts anything. It only asks the observer for recent incoming transfers to the
//! shared deposit address and matches them against open recharge orders.
mod tron;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use tron::{TronGridObserver, DEFAULT_TRON_API_URL};

use crate::{db_types::Amount, helpers::Cancelled, traits::ErrorKind};

/// Two amounts match if they differ by less than 10⁻⁴, the resolution of the reconciliation tag.
pub const AMOUNT_MATCH_TOLERANCE: Amount = Amount::from_units(10_000);

pub fn amount_match(observed: Amount, expected: Amount) -> bool {
    (observed - expected).abs() < AMOUNT_MATCH_TOLERANCE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One transfer as reported by the observer. Amounts are parsed at the edge, so the engine only sees [`Amount`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransfer {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub confirmations: i64,
    pub block_height: i64,
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
}

#[allow(async_fn_in_trait)]
pub trait ChainObserver {
    /// Recent transfers into `address`. Transfers below `min_amount` may be omitted. Confirmation counts are
    /// best-effort observer state.
    async fn get_incoming(&self, address: &str, min_amount: Amount) -> Result<Vec<ChainTransfer>, ChainError>;
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Chain observer transport error: {0}")]
    Transport(String),
    #[error("Chain observer returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Could not decode chain observer response: {0}")]
    Decode(String),
    #[error("Chain query timed out")]
    Timeout,
    #[error("Chain query cancelled")]
    Cancelled,
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        }
    }

    /// Errors worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Http { status: 429 | 500..=599, .. })
    }
}

impl From<Cancelled> for ChainError {
    fn from(_: Cancelled) -> Self {
        ChainError::Cancelled
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChainError::Timeout
        } else if e.is_decode() {
            ChainError::Decode(e.to_string())
        } else {
            ChainError::Transport(e.to_string())
        }
    }
}
