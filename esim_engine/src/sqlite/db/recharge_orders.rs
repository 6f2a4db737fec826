use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Amount, NewRechargeOrder, RechargeOrder},
    sqlite::db::page_clause,
    traits::{is_unique_violation, RechargeError},
};

/// Inserts a new PENDING recharge order. The partial unique index on `exact_amount` is the final arbiter of tag
/// uniqueness, so a lost race shows up here as [`RechargeError::ExactAmountTaken`].
pub async fn insert_recharge_order(
    order: NewRechargeOrder,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<RechargeOrder, RechargeError> {
    let exact_amount = order.exact_amount;
    let order_no = order.order_no.clone();
    let result = sqlx::query_as(
        r#"
            INSERT INTO recharge_orders (
                order_no,
                user_id,
                amount,
                exact_amount,
                deposit_address,
                status,
                remark,
                expires_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $7, $8, $8)
            RETURNING *;
        "#,
    )
    .bind(order.order_no)
    .bind(order.user_id)
    .bind(order.amount)
    .bind(order.exact_amount)
    .bind(order.deposit_address)
    .bind(order.remark)
    .bind(order.expires_at)
    .bind(now)
    .fetch_one(conn)
    .await;
    match result {
        Ok(order) => Ok(order),
        Err(e) => match is_unique_violation(&e) {
            Some(msg) if msg.contains("exact_amount") => Err(RechargeError::ExactAmountTaken(exact_amount)),
            Some(msg) if msg.contains("order_no") => Err(RechargeError::DuplicateOrderNo(order_no)),
            _ => Err(e.into()),
        },
    }
}

pub async fn exact_amount_in_use(exact_amount: Amount, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM recharge_orders WHERE exact_amount = $1 AND status = 'PENDING'")
            .bind(exact_amount)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

pub async fn fetch_by_order_no(
    order_no: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<RechargeOrder>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM recharge_orders WHERE order_no = $1")
        .bind(order_no)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_pending(conn: &mut SqliteConnection) -> Result<Vec<RechargeOrder>, sqlx::Error> {
    let orders = sqlx::query_as("SELECT * FROM recharge_orders WHERE status = 'PENDING' ORDER BY created_at, id")
        .fetch_all(conn)
        .await?;
    Ok(orders)
}

pub async fn fetch_for_user(
    user_id: i64,
    limit: i64,
    offset: i64,
    conn: &mut SqliteConnection,
) -> Result<(Vec<RechargeOrder>, i64), sqlx::Error> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recharge_orders WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    let sql = format!(
        "SELECT * FROM recharge_orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC{}",
        page_clause(limit, offset)
    );
    let orders = sqlx::query_as(&sql).bind(user_id).fetch_all(conn).await?;
    Ok((orders, total))
}

/// Takes the write lock on the order row and returns its current state.
pub async fn lock_recharge_order(
    order_no: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<RechargeOrder>, sqlx::Error> {
    let order = sqlx::query_as("UPDATE recharge_orders SET updated_at = $1 WHERE order_no = $2 RETURNING *")
        .bind(now)
        .bind(order_no)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

/// True if some recharge order other than `id` already carries `tx_hash`.
pub async fn tx_hash_used_elsewhere(tx_hash: &str, id: i64, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recharge_orders WHERE tx_hash = $1 AND id <> $2")
        .bind(tx_hash)
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

pub async fn mark_confirmed(
    id: i64,
    tx_hash: &str,
    confirmations: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<RechargeOrder, RechargeError> {
    let result = sqlx::query_as(
        r#"
            UPDATE recharge_orders SET
                status = 'CONFIRMED',
                tx_hash = $1,
                confirmations = $2,
                confirmed_at = $3,
                updated_at = $3
            WHERE id = $4 AND status = 'PENDING'
            RETURNING *;
        "#,
    )
    .bind(tx_hash)
    .bind(confirmations)
    .bind(now)
    .bind(id)
    .fetch_one(conn)
    .await;
    match result {
        Ok(order) => Ok(order),
        Err(e) if is_unique_violation(&e).is_some() => Err(RechargeError::TxHashReused(tx_hash.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Expires a single PENDING order whose deadline has passed.
pub async fn expire_one(
    order_no: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<RechargeOrder>, sqlx::Error> {
    let order: Option<RechargeOrder> = sqlx::query_as(
        r#"
            UPDATE recharge_orders SET status = 'EXPIRED', updated_at = $1
            WHERE order_no = $2 AND status = 'PENDING' AND expires_at <= $1
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(order_no)
    .fetch_optional(conn)
    .await?;
    if let Some(o) = &order {
        debug!("🔄️ Recharge order {} expired", o.order_no);
    }
    Ok(order)
}

/// Bulk form of [`expire_one`]. A single statement, so it is atomic with respect to concurrent confirmations.
pub async fn expire_all(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Vec<RechargeOrder>, sqlx::Error> {
    let orders: Vec<RechargeOrder> = sqlx::query_as(
        r#"
            UPDATE recharge_orders SET status = 'EXPIRED', updated_at = $1
            WHERE status = 'PENDING' AND expires_at <= $1
            RETURNING *;
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    if !orders.is_empty() {
        info!("🔄️ {} recharge orders expired", orders.len());
    }
    Ok(orders)
}

pub async fn mark_failed(
    order_no: &str,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<RechargeOrder>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE recharge_orders SET status = 'FAILED', remark = $1, updated_at = $2
            WHERE order_no = $3 AND status = 'PENDING'
            RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(now)
    .bind(order_no)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn set_confirmations(
    order_no: &str,
    confirmations: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE recharge_orders SET confirmations = $1, updated_at = $2 WHERE order_no = $3 AND status = 'PENDING'",
    )
    .bind(confirmations)
    .bind(now)
    .bind(order_no)
    .execute(conn)
    .await?;
    Ok(())
}
