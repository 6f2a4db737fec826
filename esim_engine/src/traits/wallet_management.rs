use thiserror::Error;

use crate::{
    db_types::{Amount, LedgerEntry, NewUser, User, Wallet, WalletHistory},
    traits::{
        data_objects::{ErrorKind, HistoryFilter, HistoryStats},
        is_unique_violation,
    },
};

/// The Wallet Ledger.
///
/// Every mutating method runs in a single store transaction that locks the wallet row, checks that neither `balance`
/// nor `frozen` would go negative, updates the wallet and appends exactly one COMPLETED [`WalletHistory`] row
/// recording the balance before and after. Implementations never retry internally.
#[allow(async_fn_in_trait)]
pub trait WalletManagement {
    /// Creates the user and an empty wallet on first contact. On later calls the profile fields are refreshed.
    async fn ensure_user(&self, user: NewUser) -> Result<User, WalletError>;

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, WalletError>;

    async fn fetch_wallet(&self, user_id: i64) -> Result<Option<Wallet>, WalletError>;

    /// Adds `entry.amount` to the balance. If `entry.tx_hash` is set and a completed history row already carries that
    /// hash, fails with [`WalletError::DuplicateTx`].
    async fn credit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError>;

    /// Subtracts `entry.amount` from the balance, failing with [`WalletError::InsufficientBalance`] if the locked
    /// balance is too small.
    async fn debit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError>;

    /// Moves `amount` from the spendable balance into `frozen`.
    async fn freeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError>;

    /// Moves `amount` from `frozen` back into the spendable balance.
    async fn unfreeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError>;

    /// Returns a page of history rows, newest first, together with the total number of matching rows.
    async fn fetch_history(
        &self,
        user_id: i64,
        filter: HistoryFilter,
    ) -> Result<(Vec<WalletHistory>, i64), WalletError>;

    async fn fetch_history_record(&self, user_id: i64, id: i64) -> Result<Option<WalletHistory>, WalletError>;

    async fn history_stats(&self, user_id: i64) -> Result<HistoryStats, WalletError>;
}

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("No wallet exists for user {0}")]
    WalletNotFound(i64),
    #[error("Insufficient balance. Available: {available}, required: {required}")]
    InsufficientBalance { available: Amount, required: Amount },
    #[error("Insufficient frozen funds. Frozen: {frozen}, requested: {requested}")]
    InsufficientFrozen { frozen: Amount, requested: Amount },
    #[error("Ledger amounts must be positive. Got {0}")]
    InvalidAmount(Amount),
    #[error("Transaction {0} has already been credited")]
    DuplicateTx(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Transient,
            Self::WalletNotFound(_) |
            Self::InsufficientBalance { .. } |
            Self::InsufficientFrozen { .. } |
            Self::InvalidAmount(_) => ErrorKind::Validation,
            Self::DuplicateTx(_) => ErrorKind::Conflict,
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        match is_unique_violation(&e) {
            Some(msg) if msg.contains("tx_hash") => WalletError::DuplicateTx(msg),
            _ => WalletError::DatabaseError(e.to_string()),
        }
    }
}
