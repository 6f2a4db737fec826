//! eSIM Engine
//!
//! The engine holds the money-moving core of the eSIM chat-commerce backend. It is transport-agnostic: the HTTP
//! server, the background workers and the tests all drive it through the same API objects.
//!
//! The library is divided into these sections:
//! 1. Storage ([`mod@sqlite`] and [`mod@traits`]). The traits describe what a backend must do, with every
//!    balance-changing operation atomic. [`SqliteDatabase`] is the only backend. The row types live in
//!    [`mod@db_types`] and are public.
//! 2. The public API ([`mod@api`]): the Wallet Ledger, the Deposit Reconciliation Engine and the Order Fulfillment
//!    State Machine, plus read access to the catalogue and issued eSIM cards.
//! 3. Edge clients: the read-only [`mod@chain`] observer, the upstream eSIM [`mod@provider`] and the user
//!    [`mod@notifier`]. Each sits behind a trait so that tests can script it.
//!
//! The engine also publishes events after committing certain transitions (see [`mod@events`]). The server uses the
//! order-paid event to submit new orders to the provider straight away instead of waiting for the next sync tick.
pub mod api;
pub mod chain;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod notifier;
pub mod provider;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use api::{
    catalogue_api::CatalogueApi,
    esim_card_api::EsimCardApi,
    objects,
    order_flow_api::OrderFlowApi,
    recharge_api::RechargeFlowApi,
    wallet_api::WalletApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
