//! # Backend contracts
//!
//! These traits define what a storage backend must provide for the engine's APIs to work. [`crate::SqliteDatabase`]
//! implements all of them.
//!
//! * [`WalletManagement`] is the Wallet Ledger: users, wallets, and the append-only balance history.
//! * [`RechargeManagement`] stores recharge orders and performs the atomic deposit confirmation.
//! * [`OrderManagement`] stores eSIM orders and performs the atomic pay, complete and refund transitions.
//! * [`ProductCatalogue`] gives read access to the product catalogue.
//! * [`EsimCardManagement`] stores issued eSIM cards and their usage.
mod catalogue;
mod data_objects;
mod esim_cards;
mod order_management;
mod recharge_management;
mod wallet_management;

pub use catalogue::{CatalogueError, ProductCatalogue};
pub use data_objects::{
    clamp_page,
    CardQueryFilter,
    CompletedOrder,
    ErrorKind,
    HistoryFilter,
    HistoryStats,
    OrderCompletion,
    OrderQueryFilter,
    OrderStats,
    ProductQueryFilter,
    DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
pub use esim_cards::{EsimCardError, EsimCardManagement};
pub use order_management::{OrderError, OrderManagement};
pub use recharge_management::{RechargeError, RechargeManagement};
pub use wallet_management::{WalletError, WalletManagement};

/// If `e` is a unique-constraint violation, returns the database's message, which names the offending column.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(db.message().to_string()),
        _ => None,
    }
}
