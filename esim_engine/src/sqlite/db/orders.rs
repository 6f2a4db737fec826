use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{Amount, NewOrder, Order, OrderDetail, OrderStatus},
    sqlite::db::page_clause,
    traits::{clamp_page, OrderCompletion, OrderQueryFilter, OrderStats},
};

/// Inserts a new order directly in the PAID state. Not atomic on its own; the caller debits the wallet in the same
/// transaction.
pub async fn insert_paid_order(
    order: NewOrder,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_no,
                user_id,
                product_id,
                product_name,
                quantity,
                unit_price,
                total_amount,
                status,
                customer_email,
                remark,
                paid_at,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'PAID', $8, $9, $10, $10, $10)
            RETURNING *;
        "#,
    )
    .bind(order.order_no)
    .bind(order.user_id)
    .bind(order.product_id)
    .bind(order.product_name)
    .bind(order.quantity)
    .bind(order.unit_price)
    .bind(order.total_amount)
    .bind(order.customer_email)
    .bind(order.remark)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("📦️ Order {} inserted with id {}", order.order_no, order.id);
    Ok(order)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_no(order_no: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_no = $1").bind(order_no).fetch_optional(conn).await?;
    Ok(order)
}

fn push_order_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &OrderQueryFilter) {
    if filter.user_id.is_none() && filter.status.is_none() {
        return;
    }
    builder.push(" WHERE ");
    let mut where_clause = builder.separated(" AND ");
    if let Some(user_id) = filter.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(status) = filter.status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status);
    }
}

pub async fn search_orders(
    filter: &OrderQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<(Vec<Order>, i64), sqlx::Error> {
    let (limit, offset) = clamp_page(filter.limit, filter.offset);
    let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM orders");
    push_order_filters(&mut count_query, filter);
    let total: i64 = count_query.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut query = QueryBuilder::new("SELECT * FROM orders");
    push_order_filters(&mut query, filter);
    query.push(" ORDER BY created_at DESC, id DESC");
    query.push(page_clause(limit, offset));
    trace!("📦️ Executing query: {}", query.sql());
    let orders = query.build_query_as::<Order>().fetch_all(conn).await?;
    Ok((orders, total))
}

/// Takes the write lock on the order row and returns its current state.
pub async fn lock_order(id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("UPDATE orders SET updated_at = $1 WHERE id = $2 RETURNING *")
        .bind(now)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

/// Pushes `next_sync_at` forward to `lease_until` if the order is PAID and not currently leased. This is a single
/// guarded statement, so at most one submitter wins.
pub async fn claim_for_submission(
    id: i64,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET next_sync_at = $1, updated_at = $2
            WHERE id = $3 AND status = 'PAID' AND (next_sync_at IS NULL OR next_sync_at <= $2)
            RETURNING *;
        "#,
    )
    .bind(lease_until)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Moves a PAID order to PROCESSING. Failed submissions do not count against the poll budget, so the attempt
/// counter starts again from zero.
pub async fn mark_submitted(
    id: i64,
    provider_order_id: &str,
    next_sync_at: DateTime<Utc>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = 'PROCESSING',
                provider_order_id = $1,
                next_sync_at = $2,
                sync_attempts = 0,
                last_sync_error = NULL,
                updated_at = $3
            WHERE id = $4 AND status = 'PAID'
            RETURNING *;
        "#,
    )
    .bind(provider_order_id)
    .bind(next_sync_at)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn record_sync_attempt(
    id: i64,
    now: DateTime<Utc>,
    next_sync_at: DateTime<Utc>,
    error: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                sync_attempts = sync_attempts + 1,
                last_sync_at = $1,
                next_sync_at = $2,
                last_sync_error = $3,
                updated_at = $1
            WHERE id = $4
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(next_sync_at)
    .bind(error)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Pushes the next poll back without counting it as an attempt.
pub async fn defer_sync(
    id: i64,
    now: DateTime<Utc>,
    next_sync_at: DateTime<Utc>,
    note: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                last_sync_at = $1,
                next_sync_at = $2,
                last_sync_error = $3,
                updated_at = $1
            WHERE id = $4
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(next_sync_at)
    .bind(note)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_due_with_status(
    status: OrderStatus,
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let orders = sqlx::query_as(
        r#"
            SELECT * FROM orders
            WHERE status = $1 AND (next_sync_at IS NULL OR next_sync_at <= $2)
            ORDER BY next_sync_at, id
            LIMIT $3;
        "#,
    )
    .bind(status)
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

pub async fn mark_completed(id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Order, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = 'COMPLETED',
                completed_at = $1,
                last_sync_at = $1,
                next_sync_at = NULL,
                last_sync_error = NULL,
                updated_at = $1
            WHERE id = $2
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn mark_failed(
    id: i64,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = 'FAILED',
                failure_reason = $1,
                next_sync_at = NULL,
                updated_at = $2
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(now)
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn mark_cancelled(id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Order, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET status = 'CANCELLED', next_sync_at = NULL, updated_at = $1 WHERE id = $2 RETURNING *",
    )
    .bind(now)
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

/// Stores the provider snapshot for an order, replacing any earlier one.
pub async fn upsert_order_detail(
    order_id: i64,
    completion: &OrderCompletion,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OrderDetail, sqlx::Error> {
    let detail = sqlx::query_as(
        r#"
            INSERT INTO order_details (order_id, provider_payload, items, esims, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (order_id) DO UPDATE SET
                provider_payload = excluded.provider_payload,
                items = excluded.items,
                esims = excluded.esims,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(Json(&completion.provider_payload))
    .bind(Json(&completion.items))
    .bind(Json(&completion.esims))
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(detail)
}

pub async fn fetch_order_detail(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<OrderDetail>, sqlx::Error> {
    let detail = sqlx::query_as("SELECT * FROM order_details WHERE order_id = $1")
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    Ok(detail)
}

pub async fn order_stats(user_id: i64, conn: &mut SqliteConnection) -> Result<OrderStats, sqlx::Error> {
    let (total_orders, pending_orders, completed_orders, total_amount): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status IN ('PENDING', 'PAID', 'PROCESSING') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN total_amount ELSE 0 END), 0)
            FROM orders WHERE user_id = $1;
        "#,
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(OrderStats { total_orders, pending_orders, completed_orders, total_amount: Amount::from(total_amount) })
}
