use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use esim_engine::{
    api::recharge_api::TAG_DECIMALS,
    db_types::{Amount, EsimCard, Order, RechargeOrder, RechargeStatus, WalletHistory},
};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;

//----------------------------------------------   Envelopes  ----------------------------------------------------
/// `{code: 0, message: "success", data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { code: 0, message: "success".into(), data }
    }
}

/// Wraps `data` in the success envelope.
pub fn ok_json<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(data))
}

/// `{code, message, details?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, details: Option<String>) -> Self {
        Self { code: code.code(), message: code.message().to_string(), details }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, (limit, offset): (i64, i64)) -> Self {
        Self { items, total, limit, offset }
    }
}

//----------------------------------------------   Queries  ----------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Status filters arrive as free text and are parsed case-insensitively by the handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPageQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletHistoryQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQuery {
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    pub country: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

//----------------------------------------------   Recharge  ----------------------------------------------------
/// The amount is left untyped so that a malformed value maps to INVALID_FORMAT instead of a generic body error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRechargeRequest {
    pub amount: serde_json::Value,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeResponse {
    pub order_no: String,
    pub amount: Amount,
    /// Always printed with the four tag digits, e.g. "100.1200"
    pub exact_amount: String,
    pub wallet_address: String,
    pub status: RechargeStatus,
    pub tx_hash: Option<String>,
    pub confirmations: i64,
    pub remark: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<RechargeOrder> for RechargeResponse {
    fn from(order: RechargeOrder) -> Self {
        Self {
            exact_amount: order.exact_amount.format_dp(TAG_DECIMALS),
            order_no: order.order_no,
            amount: order.amount,
            wallet_address: order.deposit_address,
            status: order.status,
            tx_hash: order.tx_hash,
            confirmations: order.confirmations,
            remark: order.remark,
            expires_at: order.expires_at,
            confirmed_at: order.confirmed_at,
            created_at: order.created_at,
        }
    }
}

//----------------------------------------------   Wallet  ----------------------------------------------------
pub type WalletHistoryPage = Page<WalletHistory>;

//----------------------------------------------   Orders  ----------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: i64,
    pub quantity: i64,
    /// What the client was shown as the order total
    pub total_amount: serde_json::Value,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

pub type OrderPage = Page<Order>;
pub type CardPage = Page<EsimCard>;
