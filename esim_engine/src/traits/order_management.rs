use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{Amount, EsimCard, NewOrder, Order, OrderDetail, OrderStatus, WalletHistory},
    provider::ProviderError,
    traits::{
        data_objects::{CompletedOrder, ErrorKind, OrderCompletion, OrderQueryFilter, OrderStats},
        is_unique_violation,
        WalletError,
    },
};

/// Storage contract for eSIM purchase orders.
///
/// Methods that change an order's state lock the order row first and re-check its status inside the same
/// transaction, so they are safe to call from racing evaluators.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// In one transaction, debits `order.total_amount` from the owner's wallet (PAYMENT, related to the new order
    /// number) and inserts the order with status PAID.
    async fn create_paid_order(&self, order: NewOrder) -> Result<(Order, WalletHistory), OrderError>;

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, OrderError>;

    async fn fetch_order_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError>;

    /// Returns a page of orders, newest first, and the total number of matching orders.
    async fn search_orders(&self, filter: OrderQueryFilter) -> Result<(Vec<Order>, i64), OrderError>;

    /// Claims a PAID order for provider submission by pushing its `next_sync_at` to `lease_until`. Returns `None` if
    /// the order is not PAID, or another submitter holds an unexpired claim.
    async fn claim_for_submission(
        &self,
        id: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError>;

    /// PAID -> PROCESSING after the provider accepted the order.
    async fn mark_order_submitted(
        &self,
        id: i64,
        provider_order_id: &str,
        next_sync_at: DateTime<Utc>,
    ) -> Result<Order, OrderError>;

    /// Records a poll or submission attempt that did not change the order's state.
    async fn record_sync_attempt(
        &self,
        id: i64,
        now: DateTime<Utc>,
        next_sync_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<Order, OrderError>;

    /// Moves the next poll to `next_sync_at` without using up an attempt.
    async fn defer_sync(
        &self,
        id: i64,
        now: DateTime<Utc>,
        next_sync_at: DateTime<Utc>,
        note: &str,
    ) -> Result<Order, OrderError>;

    /// PAID orders whose submission is due.
    async fn fetch_unsubmitted_orders(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, OrderError>;

    /// PROCESSING orders whose next poll is due.
    async fn fetch_orders_due_for_sync(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, OrderError>;

    /// Atomically stores the provider snapshot, materialises the eSIM cards and marks the order COMPLETED.
    /// Returns `None` without changing anything if the order is no longer PROCESSING.
    async fn complete_order(
        &self,
        id: i64,
        completion: OrderCompletion,
    ) -> Result<Option<CompletedOrder>, OrderError>;

    /// Atomically refunds the order total to the owner (REFUND, related to the order number) and marks the order
    /// FAILED. Returns `None` without changing anything if the order is already terminal.
    async fn fail_and_refund_order(&self, id: i64, reason: &str) -> Result<Option<Order>, OrderError>;

    /// PENDING -> CANCELLED. No money moves, since a PENDING order was never debited.
    async fn cancel_order(&self, id: i64) -> Result<Order, OrderError>;

    async fn fetch_order_detail(&self, order_id: i64) -> Result<Option<OrderDetail>, OrderError>;

    async fn fetch_esim_cards_for_order(&self, order_id: i64) -> Result<Vec<EsimCard>, OrderError>;

    async fn order_stats(&self, user_id: i64) -> Result<OrderStats, OrderError>;
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Product {0} does not exist")]
    ProductNotFound(i64),
    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(i64),
    #[error("Order total mismatch. Expected {expected}, but the order costs {actual}")]
    AmountMismatch { expected: Amount, actual: Amount },
    #[error("Quantity must be positive. Got {0}")]
    InvalidQuantity(i64),
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),
    #[error("Insufficient balance. Available: {available}, required: {required}")]
    InsufficientBalance { available: Amount, required: Amount },
    #[error("Order {0} belongs to another user")]
    Forbidden(String),
    #[error("Order {order_no} cannot go from {from} to {to}")]
    InvalidTransition { order_no: String, from: OrderStatus, to: OrderStatus },
    #[error("Order {0} has not been submitted to the provider yet")]
    NotSubmitted(String),
    #[error("ICCID {0} is already registered")]
    DuplicateIccid(String),
    #[error("Order number {0} already exists")]
    DuplicateOrderNo(String),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Wallet error: {0}")]
    Wallet(WalletError),
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OrderNotFound(_) |
            Self::ProductNotFound(_) |
            Self::ProductUnavailable(_) |
            Self::AmountMismatch { .. } |
            Self::InvalidQuantity(_) |
            Self::InvalidEmail(_) |
            Self::InsufficientBalance { .. } |
            Self::Forbidden(_) |
            Self::InvalidTransition { .. } |
            Self::NotSubmitted(_) => ErrorKind::Validation,
            Self::DuplicateIccid(_) | Self::DuplicateOrderNo(_) => ErrorKind::Conflict,
            Self::DatabaseError(_) => ErrorKind::Transient,
            Self::Provider(e) => e.kind(),
            Self::Wallet(e) => e.kind(),
        }
    }
}

impl From<WalletError> for OrderError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::InsufficientBalance { available, required } => {
                OrderError::InsufficientBalance { available, required }
            },
            e => OrderError::Wallet(e),
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self {
        match is_unique_violation(&e) {
            Some(msg) if msg.contains("iccid") => OrderError::DuplicateIccid(msg),
            Some(msg) if msg.contains("order_no") => OrderError::DuplicateOrderNo(msg),
            _ => OrderError::DatabaseError(e.to_string()),
        }
    }
}
