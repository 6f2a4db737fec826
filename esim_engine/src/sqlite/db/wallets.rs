//! Wallet Ledger primitives.
//!
//! None of the functions here open their own transaction. The composite helpers ([`credit`], [`debit`], [`freeze`]
//! and [`unfreeze`]) must be called inside one, so that the wallet lock, the balance update and the history row
//! commit together. [`crate::SqliteDatabase`] does this for the stand-alone ledger calls, and the recharge and order
//! code embeds them in their own larger transactions.
use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{Amount, HistoryKind, HistoryStatus, LedgerEntry, Wallet, WalletHistory},
    sqlite::db::page_clause,
    traits::{clamp_page, HistoryFilter, HistoryStats, WalletError},
};

/// `related_type` values of the rows written by [`freeze`] and [`unfreeze`].
pub const FREEZE_RELATED_TYPE: &str = "freeze";
pub const UNFREEZE_RELATED_TYPE: &str = "unfreeze";

struct NewHistoryRow {
    user_id: i64,
    kind: HistoryKind,
    amount: Amount,
    balance_before: Amount,
    balance_after: Amount,
    description: String,
    related_type: Option<String>,
    related_id: Option<String>,
    tx_hash: Option<String>,
}

/// Creates an empty wallet for the user unless one exists already.
pub async fn create_wallet_if_missing(
    user_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO wallets (user_id, created_at, updated_at) VALUES ($1, $2, $2) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .bind(now)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_wallet(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<Wallet>, sqlx::Error> {
    let wallet = sqlx::query_as("SELECT * FROM wallets WHERE user_id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(wallet)
}

/// Touches the wallet row so that the current transaction holds the write lock, and returns the wallet as it is
/// now. Every balance change must start here.
pub async fn lock_wallet(
    user_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Wallet, WalletError> {
    let wallet: Option<Wallet> = sqlx::query_as("UPDATE wallets SET updated_at = $1 WHERE user_id = $2 RETURNING *")
        .bind(now)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    wallet.ok_or(WalletError::WalletNotFound(user_id))
}

async fn store_wallet(wallet: &Wallet, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Wallet, sqlx::Error> {
    let wallet = sqlx::query_as(
        r#"
            UPDATE wallets SET
                balance = $1,
                frozen = $2,
                total_income = $3,
                total_expense = $4,
                updated_at = $5
            WHERE id = $6
            RETURNING *;
        "#,
    )
    .bind(wallet.balance)
    .bind(wallet.frozen)
    .bind(wallet.total_income)
    .bind(wallet.total_expense)
    .bind(now)
    .bind(wallet.id)
    .fetch_one(conn)
    .await?;
    Ok(wallet)
}

async fn insert_history(
    row: NewHistoryRow,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<WalletHistory, sqlx::Error> {
    let history = sqlx::query_as(
        r#"
            INSERT INTO wallet_history (
                user_id,
                kind,
                amount,
                balance_before,
                balance_after,
                status,
                description,
                related_type,
                related_id,
                tx_hash,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *;
        "#,
    )
    .bind(row.user_id)
    .bind(row.kind)
    .bind(row.amount)
    .bind(row.balance_before)
    .bind(row.balance_after)
    .bind(HistoryStatus::Completed)
    .bind(row.description)
    .bind(row.related_type)
    .bind(row.related_id)
    .bind(row.tx_hash)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(history)
}

pub async fn completed_tx_hash_exists(tx_hash: &str, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM wallet_history WHERE tx_hash = $1 AND status = 'COMPLETED'")
            .bind(tx_hash)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

/// Adds `entry.amount` to the user's balance and appends the matching history row. Not atomic on its own.
pub async fn credit(
    entry: LedgerEntry,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(Wallet, WalletHistory), WalletError> {
    if !entry.amount.is_positive() {
        return Err(WalletError::InvalidAmount(entry.amount));
    }
    let mut wallet = lock_wallet(entry.user_id, now, conn).await?;
    if let Some(hash) = entry.tx_hash.as_deref() {
        if completed_tx_hash_exists(hash, conn).await? {
            return Err(WalletError::DuplicateTx(hash.to_string()));
        }
    }
    let before = wallet.balance;
    wallet.balance += entry.amount;
    wallet.total_income += entry.amount;
    let wallet = store_wallet(&wallet, now, conn).await?;
    let row = NewHistoryRow {
        user_id: entry.user_id,
        kind: entry.kind,
        amount: entry.amount,
        balance_before: before,
        balance_after: wallet.balance,
        description: entry.description,
        related_type: entry.related_type,
        related_id: entry.related_id,
        tx_hash: entry.tx_hash,
    };
    let history = insert_history(row, now, conn).await?;
    debug!("💰️ Credited {} to user {}. Balance {before} -> {}", entry.amount, entry.user_id, wallet.balance);
    Ok((wallet, history))
}

/// Subtracts `entry.amount` from the user's balance and appends the matching (negative) history row. Not atomic on
/// its own.
pub async fn debit(
    entry: LedgerEntry,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(Wallet, WalletHistory), WalletError> {
    if !entry.amount.is_positive() {
        return Err(WalletError::InvalidAmount(entry.amount));
    }
    let mut wallet = lock_wallet(entry.user_id, now, conn).await?;
    if wallet.balance < entry.amount {
        return Err(WalletError::InsufficientBalance { available: wallet.balance, required: entry.amount });
    }
    let before = wallet.balance;
    wallet.balance -= entry.amount;
    wallet.total_expense += entry.amount;
    let wallet = store_wallet(&wallet, now, conn).await?;
    let row = NewHistoryRow {
        user_id: entry.user_id,
        kind: entry.kind,
        amount: -entry.amount,
        balance_before: before,
        balance_after: wallet.balance,
        description: entry.description,
        related_type: entry.related_type,
        related_id: entry.related_id,
        tx_hash: entry.tx_hash,
    };
    let history = insert_history(row, now, conn).await?;
    debug!("💰️ Debited {} from user {}. Balance {before} -> {}", entry.amount, entry.user_id, wallet.balance);
    Ok((wallet, history))
}

/// Moves funds from the spendable balance into `frozen`. The history row records the drop in spendable balance.
pub async fn freeze(
    user_id: i64,
    amount: Amount,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Wallet, WalletError> {
    if !amount.is_positive() {
        return Err(WalletError::InvalidAmount(amount));
    }
    let mut wallet = lock_wallet(user_id, now, conn).await?;
    if wallet.balance < amount {
        return Err(WalletError::InsufficientBalance { available: wallet.balance, required: amount });
    }
    let before = wallet.balance;
    wallet.balance -= amount;
    wallet.frozen += amount;
    let wallet = store_wallet(&wallet, now, conn).await?;
    let row = NewHistoryRow {
        user_id,
        kind: HistoryKind::Payment,
        amount: -amount,
        balance_before: before,
        balance_after: wallet.balance,
        description: format!("Froze {amount}"),
        related_type: Some(FREEZE_RELATED_TYPE.to_string()),
        related_id: None,
        tx_hash: None,
    };
    insert_history(row, now, conn).await?;
    debug!("💰️ Froze {amount} for user {user_id}. Frozen: {}", wallet.frozen);
    Ok(wallet)
}

pub async fn unfreeze(
    user_id: i64,
    amount: Amount,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Wallet, WalletError> {
    if !amount.is_positive() {
        return Err(WalletError::InvalidAmount(amount));
    }
    let mut wallet = lock_wallet(user_id, now, conn).await?;
    if wallet.frozen < amount {
        return Err(WalletError::InsufficientFrozen { frozen: wallet.frozen, requested: amount });
    }
    let before = wallet.balance;
    wallet.frozen -= amount;
    wallet.balance += amount;
    let wallet = store_wallet(&wallet, now, conn).await?;
    let row = NewHistoryRow {
        user_id,
        kind: HistoryKind::Refund,
        amount,
        balance_before: before,
        balance_after: wallet.balance,
        description: format!("Released {amount}"),
        related_type: Some(UNFREEZE_RELATED_TYPE.to_string()),
        related_id: None,
        tx_hash: None,
    };
    insert_history(row, now, conn).await?;
    debug!("💰️ Released {amount} for user {user_id}. Frozen: {}", wallet.frozen);
    Ok(wallet)
}

fn push_history_filters(builder: &mut QueryBuilder<'_, Sqlite>, user_id: i64, filter: &HistoryFilter) {
    builder.push(" WHERE ");
    let mut where_clause = builder.separated(" AND ");
    where_clause.push("user_id = ");
    where_clause.push_bind_unseparated(user_id);
    if let Some(kind) = filter.kind {
        where_clause.push("kind = ");
        where_clause.push_bind_unseparated(kind);
    }
    if let Some(status) = filter.status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status);
    }
    if let Some(since) = filter.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = filter.until {
        where_clause.push("created_at < ");
        where_clause.push_bind_unseparated(until);
    }
}

/// A page of history rows, newest first, and the total number of rows matching the filter.
pub async fn fetch_history(
    user_id: i64,
    filter: &HistoryFilter,
    conn: &mut SqliteConnection,
) -> Result<(Vec<WalletHistory>, i64), sqlx::Error> {
    let (limit, offset) = clamp_page(filter.limit, filter.offset);
    let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM wallet_history");
    push_history_filters(&mut count_query, user_id, filter);
    let total: i64 = count_query.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut query = QueryBuilder::new("SELECT * FROM wallet_history");
    push_history_filters(&mut query, user_id, filter);
    query.push(" ORDER BY created_at DESC, id DESC");
    query.push(page_clause(limit, offset));
    trace!("🗃️ Executing query: {}", query.sql());
    let rows = query.build_query_as::<WalletHistory>().fetch_all(conn).await?;
    Ok((rows, total))
}

pub async fn fetch_history_record(
    user_id: i64,
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletHistory>, sqlx::Error> {
    let row = sqlx::query_as("SELECT * FROM wallet_history WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Aggregates over the user's history. Freeze and release rows move money between the wallet's own buckets, so they
/// count neither as income nor as expense.
pub async fn history_stats(user_id: i64, conn: &mut SqliteConnection) -> Result<HistoryStats, sqlx::Error> {
    let (total_records, total_income, total_expense, pending_amount, completed_amount): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' AND amount > 0 AND is_transfer = 0 THEN amount END), 0),
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' AND amount < 0 AND is_transfer = 0 THEN -amount END), 0),
                COALESCE(SUM(CASE WHEN status = 'PENDING' THEN amount END), 0),
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN amount END), 0)
            FROM (
                SELECT amount, status, COALESCE(related_type, '') IN ($2, $3) AS is_transfer
                FROM wallet_history WHERE user_id = $1
            );
        "#,
        )
        .bind(user_id)
        .bind(FREEZE_RELATED_TYPE)
        .bind(UNFREEZE_RELATED_TYPE)
        .fetch_one(conn)
        .await?;
    Ok(HistoryStats {
        total_records,
        total_income: Amount::from(total_income),
        total_expense: Amount::from(total_expense),
        pending_amount: Amount::from(pending_amount),
        completed_amount: Amount::from(completed_amount),
    })
}

/// The sum of every completed history row for the user. For a consistent ledger this equals the wallet balance.
pub async fn ledger_balance(user_id: i64, conn: &mut SqliteConnection) -> Result<Amount, sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM wallet_history WHERE user_id = $1 AND status = 'COMPLETED'",
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(Amount::from(total))
}
