use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};
use serde::Serialize;

use crate::{
    db_types::{Amount, EsimCard, Order, OrderDetail, OrderStatus},
    traits::RechargeError,
};

//--------------------------------------    RechargeConfig     -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct RechargeConfig {
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub order_expiry: chrono::Duration,
    pub required_confirmations: i64,
    pub deposit_address: String,
    /// Upper bound on one chain query, retries included.
    pub chain_timeout: Duration,
}

impl Default for RechargeConfig {
    fn default() -> Self {
        Self {
            min_amount: Amount::from_whole(10),
            max_amount: Amount::from_whole(10_000),
            order_expiry: chrono::Duration::minutes(30),
            required_confirmations: 19,
            deposit_address: String::default(),
            chain_timeout: Duration::from_secs(60),
        }
    }
}

impl RechargeConfig {
    pub fn validate(&self) -> Result<(), RechargeError> {
        if !self.min_amount.is_positive() {
            return Err(RechargeError::Configuration(format!("min_amount must be positive. Got {}", self.min_amount)));
        }
        if self.max_amount <= self.min_amount {
            return Err(RechargeError::Configuration(format!(
                "max_amount ({}) must exceed min_amount ({})",
                self.max_amount, self.min_amount
            )));
        }
        if self.required_confirmations < 1 {
            return Err(RechargeError::Configuration("required_confirmations must be at least 1".into()));
        }
        if self.deposit_address.trim().is_empty() {
            return Err(RechargeError::Configuration("deposit_address is not set".into()));
        }
        Ok(())
    }
}

/// Source of reconciliation tags in `0..10_000`. Production uses the OS RNG; tests inject fixed sequences.
pub type TagSource = Arc<dyn Fn() -> u32 + Send + Sync>;

pub fn random_tag_source() -> TagSource {
    Arc::new(|| OsRng.gen_range(0..10_000))
}

//--------------------------------------      OrderConfig      -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// Delay between provider polls of a PROCESSING order.
    pub sync_interval: chrono::Duration,
    /// A PROCESSING order is failed and refunded once it has been polled this many times.
    pub max_sync_attempts: i64,
    /// Maximum number of orders handled per tick, for each of submission and polling.
    pub batch_size: i64,
    /// How long a submitter owns a PAID order before another may retry it.
    pub submit_lease: chrono::Duration,
    /// A PAID order the provider never accepted is failed and refunded after this long.
    pub order_timeout: chrono::Duration,
    pub provider_timeout: Duration,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            sync_interval: chrono::Duration::seconds(10),
            max_sync_attempts: 100,
            batch_size: 50,
            submit_lease: chrono::Duration::seconds(60),
            order_timeout: chrono::Duration::minutes(30),
            provider_timeout: Duration::from_secs(30),
        }
    }
}

//--------------------------------------   Request objects     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEsimOrderRequest {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// What the client believes the order costs. Must agree with the catalogue price.
    pub expected_total: Amount,
    pub customer_email: Option<String>,
    pub remark: Option<String>,
}

//--------------------------------------   Result objects      -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderWithDetail {
    pub order: Order,
    pub detail: Option<OrderDetail>,
    pub cards: Vec<EsimCard>,
}

/// Outcome of one submission or poll of a single order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub order_id: i64,
    pub success: bool,
    pub message: String,
    pub new_status: OrderStatus,
    pub sync_attempt: i64,
}

impl SyncResult {
    pub fn new<S: Into<String>>(order: &Order, success: bool, message: S) -> Self {
        Self {
            order_id: order.id,
            success,
            message: message.into(),
            new_status: order.status,
            sync_attempt: order.sync_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub order_id: i64,
    pub status: OrderStatus,
    pub is_running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub sync_attempts: i64,
    pub last_error: Option<String>,
}

impl From<&Order> for SyncStatus {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            is_running: order.status.is_paid_and_open(),
            last_sync_at: order.last_sync_at,
            next_sync_at: order.next_sync_at,
            sync_attempts: order.sync_attempts,
            last_error: order.last_sync_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub expired: usize,
    pub confirmed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderSyncSummary {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
}
