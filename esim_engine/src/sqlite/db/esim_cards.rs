use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{EsimCard, EsimUsageUpdate, NewEsimCard},
    sqlite::db::page_clause,
    traits::{clamp_page, CardQueryFilter},
};

pub async fn insert_card(
    user_id: i64,
    order_id: i64,
    card: &NewEsimCard,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<EsimCard, sqlx::Error> {
    let card = sqlx::query_as(
        r#"
            INSERT INTO esim_cards (
                user_id,
                order_id,
                iccid,
                activation_code,
                qr_code,
                lpa,
                apple_install_url,
                status,
                activated_at,
                expires_at,
                provider_order_id,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, $9, $10, $11, $11)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .bind(&card.iccid)
    .bind(&card.activation_code)
    .bind(&card.qr_code)
    .bind(&card.lpa)
    .bind(&card.apple_install_url)
    .bind(card.activated_at)
    .bind(card.expires_at)
    .bind(&card.provider_order_id)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(card)
}

pub async fn fetch_card(id: i64, conn: &mut SqliteConnection) -> Result<Option<EsimCard>, sqlx::Error> {
    let card = sqlx::query_as("SELECT * FROM esim_cards WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(card)
}

pub async fn fetch_cards_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<EsimCard>, sqlx::Error> {
    let cards =
        sqlx::query_as("SELECT * FROM esim_cards WHERE order_id = $1 ORDER BY id").bind(order_id).fetch_all(conn).await?;
    Ok(cards)
}

fn push_card_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &CardQueryFilter) {
    if filter.user_id.is_none() && filter.order_id.is_none() && filter.status.is_none() {
        return;
    }
    builder.push(" WHERE ");
    let mut where_clause = builder.separated(" AND ");
    if let Some(user_id) = filter.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(order_id) = filter.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id);
    }
    if let Some(status) = filter.status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status);
    }
}

pub async fn list_cards(
    filter: &CardQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<(Vec<EsimCard>, i64), sqlx::Error> {
    let (limit, offset) = clamp_page(filter.limit, filter.offset);
    let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM esim_cards");
    push_card_filters(&mut count_query, filter);
    let total: i64 = count_query.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut query = QueryBuilder::new("SELECT * FROM esim_cards");
    push_card_filters(&mut query, filter);
    query.push(" ORDER BY created_at DESC, id DESC");
    query.push(page_clause(limit, offset));
    let cards = query.build_query_as::<EsimCard>().fetch_all(conn).await?;
    Ok((cards, total))
}

/// Stores fresh usage figures. Status and dates are only overwritten when the provider reported them.
pub async fn update_usage(
    id: i64,
    usage: &EsimUsageUpdate,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<EsimCard>, sqlx::Error> {
    let card = sqlx::query_as(
        r#"
            UPDATE esim_cards SET
                status = COALESCE($1, status),
                data_used = $2,
                data_remaining = $3,
                usage_percent = $4,
                activated_at = COALESCE($5, activated_at),
                expires_at = COALESCE($6, expires_at),
                last_sync_at = $7,
                updated_at = $7
            WHERE id = $8
            RETURNING *;
        "#,
    )
    .bind(usage.status)
    .bind(usage.data_used)
    .bind(usage.data_remaining)
    .bind(usage.usage_percent)
    .bind(usage.activated_at)
    .bind(usage.expires_at)
    .bind(now)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(card)
}
