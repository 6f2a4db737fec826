use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use esim_engine::traits::{CatalogueError, EsimCardError, OrderError, RechargeError, WalletError};
use log::error;
use thiserror::Error;

use crate::data_objects::ErrorResponse;

/// The stable numeric codes that clients switch on. Never renumber these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest = 40000,
    InvalidAmount = 40001,
    InvalidFormat = 40002,
    OrderNotFound = 40003,
    OrderExpired = 40004,
    OrderCompleted = 40005,
    WalletNotFound = 40006,
    ProductNotFound = 40007,
    ProductUnavailable = 40008,
    InsufficientBalance = 40009,
    Unauthorized = 40100,
    Forbidden = 40300,
    NotFound = 40400,
    Conflict = 40900,
    Internal = 50000,
    GenerateExactAmount = 50001,
    ChainQuery = 50002,
    DbError = 50003,
    ProviderError = 50004,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::OrderExpired => "ORDER_EXPIRED",
            Self::OrderCompleted => "ORDER_COMPLETED",
            Self::WalletNotFound => "WALLET_NOT_FOUND",
            Self::ProductNotFound => "PRODUCT_NOT_FOUND",
            Self::ProductUnavailable => "PRODUCT_UNAVAILABLE",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
            Self::GenerateExactAmount => "GENERATE_EXACT_AMOUNT",
            Self::ChainQuery => "CHAIN_QUERY",
            Self::DbError => "DB_ERROR",
            Self::ProviderError => "PROVIDER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest |
            Self::InvalidAmount |
            Self::InvalidFormat |
            Self::OrderExpired |
            Self::OrderCompleted |
            Self::ProductUnavailable |
            Self::InsufficientBalance => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::OrderNotFound | Self::WalletNotFound | Self::ProductNotFound | Self::NotFound => {
                StatusCode::NOT_FOUND
            },
            Self::Conflict => StatusCode::CONFLICT,
            Self::ChainQuery | Self::ProviderError => StatusCode::BAD_GATEWAY,
            Self::Internal | Self::GenerateExactAmount | Self::DbError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("Invalid query parameter: {0}")]
    InvalidQuery(String),
    #[error("Invalid amount: {0}")]
    InvalidAmountFormat(String),
    #[error("Authentication failed. {0}")]
    Unauthorized(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("{0}")]
    Wallet(#[from] WalletError),
    #[error("{0}")]
    Recharge(#[from] RechargeError),
    #[error("{0}")]
    Order(#[from] OrderError),
    #[error("{0}")]
    Catalogue(#[from] CatalogueError),
    #[error("{0}")]
    Card(#[from] EsimCardError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

fn wallet_code(e: &WalletError) -> ErrorCode {
    match e {
        WalletError::DatabaseError(_) => ErrorCode::DbError,
        WalletError::WalletNotFound(_) => ErrorCode::WalletNotFound,
        WalletError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
        WalletError::InsufficientFrozen { .. } => ErrorCode::InvalidRequest,
        WalletError::InvalidAmount(_) => ErrorCode::InvalidAmount,
        WalletError::DuplicateTx(_) => ErrorCode::Conflict,
    }
}

fn recharge_code(e: &RechargeError) -> ErrorCode {
    match e {
        RechargeError::DatabaseError(_) => ErrorCode::DbError,
        RechargeError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
        RechargeError::InvalidFormat(_) => ErrorCode::InvalidFormat,
        RechargeError::OrderNotFound(_) => ErrorCode::OrderNotFound,
        RechargeError::OrderExpired(_) => ErrorCode::OrderExpired,
        RechargeError::OrderCompleted(_) => ErrorCode::OrderCompleted,
        RechargeError::Forbidden(_) => ErrorCode::Forbidden,
        RechargeError::AlreadyProcessed { .. } |
        RechargeError::TxHashReused(_) |
        RechargeError::ExactAmountTaken(_) |
        RechargeError::DuplicateOrderNo(_) => ErrorCode::Conflict,
        RechargeError::GenerateExactAmount(_) => ErrorCode::GenerateExactAmount,
        RechargeError::ChainQuery(_) => ErrorCode::ChainQuery,
        RechargeError::Wallet(e) => wallet_code(e),
        RechargeError::Configuration(_) => ErrorCode::Internal,
    }
}

fn order_code(e: &OrderError) -> ErrorCode {
    match e {
        OrderError::DatabaseError(_) => ErrorCode::DbError,
        OrderError::OrderNotFound(_) => ErrorCode::OrderNotFound,
        OrderError::ProductNotFound(_) => ErrorCode::ProductNotFound,
        OrderError::ProductUnavailable(_) => ErrorCode::ProductUnavailable,
        OrderError::AmountMismatch { .. } => ErrorCode::InvalidAmount,
        OrderError::InvalidQuantity(_) => ErrorCode::InvalidRequest,
        OrderError::InvalidEmail(_) => ErrorCode::InvalidFormat,
        OrderError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
        OrderError::Forbidden(_) => ErrorCode::Forbidden,
        OrderError::InvalidTransition { .. } | OrderError::NotSubmitted(_) => ErrorCode::Conflict,
        OrderError::DuplicateIccid(_) | OrderError::DuplicateOrderNo(_) => ErrorCode::Conflict,
        OrderError::Provider(_) => ErrorCode::ProviderError,
        OrderError::Wallet(e) => wallet_code(e),
    }
}

impl ServerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InitializeError(_) | Self::ConfigurationError(_) | Self::IOError(_) | Self::Unspecified(_) => {
                ErrorCode::Internal
            },
            Self::InvalidRequestBody(_) | Self::InvalidRequestPath(_) | Self::InvalidQuery(_) => {
                ErrorCode::InvalidRequest
            },
            Self::InvalidAmountFormat(_) => ErrorCode::InvalidFormat,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::NoRecordFound(_) => ErrorCode::NotFound,
            Self::Wallet(e) => wallet_code(e),
            Self::Recharge(e) => recharge_code(e),
            Self::Order(e) => order_code(e),
            Self::Catalogue(CatalogueError::DatabaseError(_)) => ErrorCode::DbError,
            Self::Catalogue(CatalogueError::ProductNotFound(_)) => ErrorCode::ProductNotFound,
            Self::Catalogue(CatalogueError::InvalidPrice { .. }) => ErrorCode::InvalidAmount,
            Self::Card(e) => match e {
                EsimCardError::DatabaseError(_) => ErrorCode::DbError,
                EsimCardError::CardNotFound(_) => ErrorCode::NotFound,
                EsimCardError::Forbidden(_) => ErrorCode::Forbidden,
                EsimCardError::NotSyncable(_) => ErrorCode::InvalidRequest,
                EsimCardError::Provider(_) => ErrorCode::ProviderError,
            },
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        self.error_code().status()
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.error_code();
        if code.status().is_server_error() {
            error!("💻️ Request failed with {}: {self}", code.message());
        }
        let body = ErrorResponse::new(code, Some(self.to_string()));
        HttpResponse::build(code.status())
            .insert_header(ContentType::json())
            .body(serde_json::to_string(&body).unwrap_or_else(|_| format!(r#"{{"code":{}}}"#, code.code())))
    }
}
