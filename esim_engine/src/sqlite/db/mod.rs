//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or open an atomic transaction and
//! pass `&mut tx` through to several of these functions.
//!
//! Timestamps are always bound from Rust (never `CURRENT_TIMESTAMP`) so that every stored value has the same textual
//! format and compares correctly as a string.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod esim_cards;
pub mod orders;
pub mod products;
pub mod recharge_orders;
pub mod users;
pub mod wallets;

const SQLITE_DB_URL: &str = "sqlite://data/esim_store.db";
/// How long a writer waits for the database write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn db_url() -> String {
    let result = env::var("ESIM_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ ESIM_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Builds the ` LIMIT … OFFSET …` tail for paged queries from already-clamped values.
pub(crate) fn page_clause(limit: i64, offset: i64) -> String {
    format!(" LIMIT {limit} OFFSET {offset}")
}
