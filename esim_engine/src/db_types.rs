use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use esim_common::Amount;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

/// Generates a status-like enum that is stored in the database and sent over the wire as its upper-case name.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? } default $default:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
        #[sqlx(rename_all = "UPPERCASE")]
        #[serde(rename_all = "UPPERCASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($label => Ok(Self::$variant),)+
                    other => Err(ConversionError(format!("{} is not a valid {}", other, stringify!($name)))),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                value.parse().unwrap_or_else(|_| {
                    error!("Invalid {}: {value}. But this conversion cannot fail. Defaulting to {}",
                        stringify!($name), Self::$default);
                    Self::$default
                })
            }
        }
    };
}

//--------------------------------------         User          ---------------------------------------------------------
/// A chat-platform user. The id is the Telegram user id.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language: Option<String>,
}

impl NewUser {
    pub fn new(id: i64) -> Self {
        Self { id, ..Default::default() }
    }

    pub fn with_username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }
}

//--------------------------------------        Wallet         ---------------------------------------------------------
/// Per-user balance. Only ever mutated through the ledger operations, which append a [`WalletHistory`] row for
/// every change.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: Amount,
    pub frozen: Amount,
    pub total_income: Amount,
    pub total_expense: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------     HistoryKind       ---------------------------------------------------------
string_enum!(
    /// The direction and reason of a wallet mutation.
    HistoryKind {
        Recharge => "RECHARGE",
        Payment => "PAYMENT",
        Refund => "REFUND",
    } default Payment
);

//--------------------------------------    HistoryStatus      ---------------------------------------------------------
string_enum!(
    HistoryStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    } default Pending
);

//--------------------------------------    WalletHistory      ---------------------------------------------------------
/// One append-only ledger row. `amount` is signed: negative for payments and freezes.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct WalletHistory {
    pub id: i64,
    pub user_id: i64,
    pub kind: HistoryKind,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub status: HistoryStatus,
    pub description: String,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     LedgerEntry       ---------------------------------------------------------
/// A request to move money in or out of a wallet. `amount` is always positive; the ledger operation decides the sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub user_id: i64,
    pub amount: Amount,
    pub kind: HistoryKind,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub tx_hash: Option<String>,
    pub description: String,
}

impl LedgerEntry {
    pub fn new<S: Into<String>>(user_id: i64, amount: Amount, kind: HistoryKind, description: S) -> Self {
        Self {
            user_id,
            amount,
            kind,
            related_type: None,
            related_id: None,
            tx_hash: None,
            description: description.into(),
        }
    }

    pub fn related_to<T: Into<String>, I: Into<String>>(mut self, related_type: T, related_id: I) -> Self {
        self.related_type = Some(related_type.into());
        self.related_id = Some(related_id.into());
        self
    }

    pub fn with_tx_hash<S: Into<String>>(mut self, tx_hash: S) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

//--------------------------------------    RechargeStatus     ---------------------------------------------------------
string_enum!(
    RechargeStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Expired => "EXPIRED",
        Failed => "FAILED",
    } default Pending
);

impl RechargeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

//--------------------------------------    RechargeOrder      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct RechargeOrder {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    /// The nominal amount the user asked to deposit, and the amount that is credited on confirmation.
    pub amount: Amount,
    /// The nominal amount plus the per-order reconciliation tag. This is what the user must actually transfer.
    pub exact_amount: Amount,
    pub deposit_address: String,
    pub status: RechargeStatus,
    pub tx_hash: Option<String>,
    pub confirmations: i64,
    pub remark: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RechargeOrder {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRechargeOrder {
    pub order_no: String,
    pub user_id: i64,
    pub amount: Amount,
    pub exact_amount: Amount,
    pub deposit_address: String,
    pub remark: Option<String>,
    pub expires_at: DateTime<Utc>,
}

//--------------------------------------     OrderStatus       ---------------------------------------------------------
string_enum!(
    OrderStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
        Failed => "FAILED",
        Refunded => "REFUNDED",
    } default Pending
);

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed | Self::Refunded)
    }

    /// Orders in these states have had their total debited from the owner's wallet and not yet refunded.
    pub fn is_paid_and_open(&self) -> bool {
        matches!(self, Self::Paid | Self::Processing)
    }
}

//--------------------------------------         Order         ---------------------------------------------------------
/// An eSIM purchase order.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Amount,
    pub total_amount: Amount,
    pub status: OrderStatus,
    pub customer_email: Option<String>,
    pub remark: Option<String>,
    pub provider_order_id: Option<String>,
    pub sync_attempts: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub last_sync_error: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_no: String,
    pub user_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Amount,
    pub total_amount: Amount,
    pub customer_email: Option<String>,
    pub remark: Option<String>,
}

//--------------------------------------      OrderDetail      ---------------------------------------------------------
/// Snapshot of the provider's response at the moment an order completed.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct OrderDetail {
    pub id: i64,
    pub order_id: i64,
    pub provider_payload: Json<serde_json::Value>,
    pub items: Json<serde_json::Value>,
    pub esims: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      EsimStatus       ---------------------------------------------------------
string_enum!(
    EsimStatus {
        Pending => "PENDING",
        Active => "ACTIVE",
        Expired => "EXPIRED",
        Suspended => "SUSPENDED",
        Terminated => "TERMINATED",
    } default Pending
);

impl EsimStatus {
    /// Cards in these states no longer report usage.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Expired | Self::Terminated)
    }
}

//--------------------------------------       EsimCard        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct EsimCard {
    pub id: i64,
    pub user_id: i64,
    pub order_id: i64,
    pub iccid: String,
    pub activation_code: Option<String>,
    pub qr_code: Option<String>,
    pub lpa: Option<String>,
    pub apple_install_url: Option<String>,
    pub status: EsimStatus,
    /// Data used, in MB
    pub data_used: i64,
    /// Data remaining, in MB
    pub data_remaining: i64,
    pub usage_percent: f64,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// The provider's identifier for this eSIM, used for usage queries
    pub provider_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEsimCard {
    pub iccid: String,
    pub activation_code: Option<String>,
    pub qr_code: Option<String>,
    pub lpa: Option<String>,
    pub apple_install_url: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_order_id: Option<String>,
}

/// Usage figures reported by the provider for one card.
#[derive(Debug, Clone, PartialEq)]
pub struct EsimUsageUpdate {
    pub status: Option<EsimStatus>,
    pub data_used: i64,
    pub data_remaining: i64,
    pub usage_percent: f64,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

//--------------------------------------      ProductType      ---------------------------------------------------------
string_enum!(
    ProductType {
        Local => "LOCAL",
        Regional => "REGIONAL",
        Global => "GLOBAL",
    } default Local
);

string_enum!(
    ProductStatus {
        Active => "ACTIVE",
        Inactive => "INACTIVE",
    } default Inactive
);

//--------------------------------------        Product        ---------------------------------------------------------
/// A catalogue entry. The catalogue is maintained by an external sync job; the engine only reads it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Product {
    pub id: i64,
    pub third_party_id: String,
    pub name: String,
    pub product_type: ProductType,
    pub countries: Json<Vec<String>>,
    pub data_size_mb: i64,
    pub valid_days: i64,
    pub price: Amount,
    pub cost_price: Amount,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub third_party_id: String,
    pub name: String,
    pub product_type: ProductType,
    pub countries: Vec<String>,
    pub data_size_mb: i64,
    pub valid_days: i64,
    pub price: Amount,
    pub cost_price: Amount,
    pub status: ProductStatus,
}

impl NewProduct {
    pub fn new<S: Into<String>>(third_party_id: S, name: S, price: Amount) -> Self {
        Self {
            third_party_id: third_party_id.into(),
            name: name.into(),
            product_type: ProductType::Local,
            countries: vec![],
            data_size_mb: 1024,
            valid_days: 7,
            price,
            cost_price: price,
            status: ProductStatus::Active,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_names() {
        assert_eq!(OrderStatus::Processing.to_string(), "PROCESSING");
        assert_eq!("completed".parse::<OrderStatus>().unwrap(), OrderStatus::Completed);
        assert_eq!(RechargeStatus::from("nonsense".to_string()), RechargeStatus::Pending);
        assert!("FROZEN".parse::<HistoryKind>().is_err());
        assert_eq!(serde_json::to_string(&EsimStatus::Active).unwrap(), "\"ACTIVE\"");
    }

    #[test]
    fn terminal_states() {
        assert!(RechargeStatus::Confirmed.is_terminal());
        assert!(!RechargeStatus::Pending.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Paid.is_paid_and_open());
        assert!(!OrderStatus::Pending.is_paid_and_open());
    }
}
