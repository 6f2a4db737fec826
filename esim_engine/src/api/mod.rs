//! # eSIM engine public API
//!
//! The API is modular. Each API object is generic over the backend traits it needs, so callers can pick the
//! functionality they want and tests can swap in scripted collaborators.
//!
//! * [`wallet_api`] is the Wallet Ledger surface: users, balances, history and statistics.
//! * [`recharge_api`] is the Deposit Reconciliation Engine: recharge orders, chain matching, confirmation and expiry.
//! * [`order_flow_api`] is the Order Fulfillment State Machine: paid order creation, provider submission, the sync
//!   loop, completion and refunds.
//! * [`esim_card_api`] gives access to issued eSIM cards and refreshes their usage.
//! * [`catalogue_api`] is read access to the product catalogue.
//!
//! # API usage
//!
//! ```rust,ignore
//! use esim_engine::{SqliteDatabase, WalletApi};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! // SqliteDatabase implements WalletManagement
//! let api = WalletApi::new(db);
//! let wallet = api.balance(user_id).await?;
//! ```
pub mod catalogue_api;
pub mod esim_card_api;
pub mod objects;
pub mod order_flow_api;
pub mod recharge_api;
pub mod wallet_api;
