use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    chain::ChainError,
    db_types::{Amount, NewRechargeOrder, RechargeOrder, RechargeStatus, WalletHistory},
    traits::{data_objects::ErrorKind, is_unique_violation, WalletError},
};

/// Storage contract for recharge (deposit) orders.
#[allow(async_fn_in_trait)]
pub trait RechargeManagement {
    /// True if a PENDING recharge order already uses `exact_amount` as its reconciliation tag.
    async fn exact_amount_in_use(&self, exact_amount: Amount) -> Result<bool, RechargeError>;

    /// Inserts a new PENDING order. A clash on the exact amount surfaces as [`RechargeError::ExactAmountTaken`] and a
    /// clash on the order number as [`RechargeError::DuplicateOrderNo`].
    async fn insert_recharge_order(&self, order: NewRechargeOrder) -> Result<RechargeOrder, RechargeError>;

    async fn fetch_recharge_order(&self, order_no: &str) -> Result<Option<RechargeOrder>, RechargeError>;

    async fn fetch_pending_recharge_orders(&self) -> Result<Vec<RechargeOrder>, RechargeError>;

    async fn fetch_recharge_orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RechargeOrder>, i64), RechargeError>;

    /// Expires the order if it is still PENDING and `expires_at <= now`. Returns the expired order, or `None` if
    /// nothing changed.
    async fn expire_recharge_order(
        &self,
        order_no: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RechargeOrder>, RechargeError>;

    /// Expires every PENDING order with `expires_at <= now` and returns them.
    async fn expire_recharge_orders(&self, now: DateTime<Utc>) -> Result<Vec<RechargeOrder>, RechargeError>;

    /// Atomically confirms a pending order against an on-chain transfer and credits the owner's wallet.
    ///
    /// Within one transaction:
    /// * the order row is locked, and must still be PENDING, otherwise [`RechargeError::AlreadyProcessed`];
    /// * no other order may already hold `tx_hash`, otherwise [`RechargeError::TxHashReused`];
    /// * the order becomes CONFIRMED with `tx_hash` and `confirmed_at`;
    /// * the wallet is credited with a RECHARGE history row linked to the order and the hash.
    async fn confirm_recharge(
        &self,
        order_no: &str,
        tx_hash: &str,
        confirmations: i64,
    ) -> Result<(RechargeOrder, WalletHistory), RechargeError>;

    /// Operator action: PENDING -> FAILED.
    async fn fail_recharge_order(&self, order_no: &str, reason: &str) -> Result<RechargeOrder, RechargeError>;

    /// Records the latest confirmation count seen for a PENDING order. No-op for any other status.
    async fn update_confirmations(&self, order_no: &str, confirmations: i64) -> Result<(), RechargeError>;
}

#[derive(Debug, Clone, Error)]
pub enum RechargeError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Recharge amount {amount} is outside the allowed range {min} - {max}")]
    InvalidAmount { amount: Amount, min: Amount, max: Amount },
    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),
    #[error("Recharge order {0} does not exist")]
    OrderNotFound(String),
    #[error("Recharge order {0} has expired")]
    OrderExpired(String),
    #[error("Recharge order {0} has already been completed")]
    OrderCompleted(String),
    #[error("Recharge order {0} is not accessible to this user")]
    Forbidden(String),
    #[error("Recharge order {order_no} has already been processed. Status: {status}")]
    AlreadyProcessed { order_no: String, status: RechargeStatus },
    #[error("Transaction {0} is already attached to another recharge order")]
    TxHashReused(String),
    #[error("The exact amount {0} is already used by an open recharge order")]
    ExactAmountTaken(Amount),
    #[error("Recharge order number {0} already exists")]
    DuplicateOrderNo(String),
    #[error("Could not generate a unique exact amount after {0} attempts")]
    GenerateExactAmount(usize),
    #[error("Chain query failed: {0}")]
    ChainQuery(#[from] ChainError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Invalid recharge configuration: {0}")]
    Configuration(String),
}

impl RechargeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } |
            Self::InvalidFormat(_) |
            Self::OrderNotFound(_) |
            Self::OrderExpired(_) |
            Self::OrderCompleted(_) |
            Self::Forbidden(_) => ErrorKind::Validation,
            Self::AlreadyProcessed { .. } |
            Self::TxHashReused(_) |
            Self::ExactAmountTaken(_) |
            Self::DuplicateOrderNo(_) => ErrorKind::Conflict,
            Self::DatabaseError(_) | Self::ChainQuery(_) => ErrorKind::Transient,
            Self::GenerateExactAmount(_) | Self::Configuration(_) => ErrorKind::Fatal,
            Self::Wallet(e) => e.kind(),
        }
    }

    /// True for errors that mean another evaluator won the race for this order or transfer.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<sqlx::Error> for RechargeError {
    fn from(e: sqlx::Error) -> Self {
        match is_unique_violation(&e) {
            Some(msg) if msg.contains("exact_amount") => RechargeError::ExactAmountTaken(Amount::default()),
            Some(msg) if msg.contains("tx_hash") => RechargeError::TxHashReused(msg),
            Some(msg) if msg.contains("order_no") => RechargeError::DuplicateOrderNo(msg),
            _ => RechargeError::DatabaseError(e.to_string()),
        }
    }
}
