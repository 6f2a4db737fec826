use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{
    Amount,
    EsimCard,
    EsimStatus,
    HistoryKind,
    HistoryStatus,
    NewEsimCard,
    Order,
    OrderStatus,
    ProductStatus,
    ProductType,
};

/// Coarse classification of every engine error, used by background loops to decide whether to retry, and by the
/// HTTP layer to pick a status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request-shape or business-rule violation. Surfaced to the user.
    Validation,
    /// A race was lost. Callers log and abort idempotently.
    Conflict,
    /// Network or store hiccup. Retried by the caller's policy or on the next tick.
    Transient,
    /// Configuration or invariant violation.
    Fatal,
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamps a user-supplied page window to sane bounds.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = offset.filter(|o| *o >= 0).unwrap_or(0);
    (limit, offset)
}

//--------------------------------------   HistoryFilter   ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub kind: Option<HistoryKind>,
    pub status: Option<HistoryStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl HistoryFilter {
    pub fn with_kind(mut self, kind: HistoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: HistoryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_records: i64,
    pub total_income: Amount,
    pub total_expense: Amount,
    pub pending_amount: Amount,
    pub completed_amount: Amount,
}

//--------------------------------------  OrderQueryFilter  ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderQueryFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderQueryFilter {
    pub fn for_user(user_id: i64) -> Self {
        Self { user_id: Some(user_id), ..Default::default() }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: i64,
    pub pending_orders: i64,
    pub completed_orders: i64,
    pub total_amount: Amount,
}

/// Everything the provider told us about a completed order, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCompletion {
    pub provider_payload: serde_json::Value,
    pub items: serde_json::Value,
    pub esims: serde_json::Value,
    pub cards: Vec<NewEsimCard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedOrder {
    pub order: Order,
    pub cards: Vec<EsimCard>,
}

//-------------------------------------- ProductQueryFilter ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQueryFilter {
    pub product_type: Option<ProductType>,
    pub status: Option<ProductStatus>,
    pub country: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

//--------------------------------------  CardQueryFilter   ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardQueryFilter {
    pub user_id: Option<i64>,
    pub order_id: Option<i64>,
    pub status: Option<EsimStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
