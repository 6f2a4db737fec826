use chrono::{DateTime, Utc};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{NewProduct, Product},
    sqlite::db::page_clause,
    traits::{clamp_page, ProductQueryFilter},
};

pub async fn fetch_product(id: i64, conn: &mut SqliteConnection) -> Result<Option<Product>, sqlx::Error> {
    let product = sqlx::query_as("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(product)
}

fn push_product_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ProductQueryFilter) {
    if filter.product_type.is_none() && filter.status.is_none() && filter.country.is_none() {
        return;
    }
    builder.push(" WHERE ");
    let mut where_clause = builder.separated(" AND ");
    if let Some(product_type) = filter.product_type {
        where_clause.push("product_type = ");
        where_clause.push_bind_unseparated(product_type);
    }
    if let Some(status) = filter.status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status);
    }
    if let Some(country) = &filter.country {
        where_clause.push("EXISTS (SELECT 1 FROM json_each(products.countries) WHERE upper(json_each.value) = upper(");
        where_clause.push_bind_unseparated(country.clone());
        where_clause.push_unseparated("))");
    }
}

pub async fn list_products(
    filter: &ProductQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<(Vec<Product>, i64), sqlx::Error> {
    let (limit, offset) = clamp_page(filter.limit, filter.offset);
    let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM products");
    push_product_filters(&mut count_query, filter);
    let total: i64 = count_query.build_query_scalar().fetch_one(&mut *conn).await?;

    let mut query = QueryBuilder::new("SELECT * FROM products");
    push_product_filters(&mut query, filter);
    query.push(" ORDER BY price, id");
    query.push(page_clause(limit, offset));
    let products = query.build_query_as::<Product>().fetch_all(conn).await?;
    Ok((products, total))
}

pub async fn upsert_product(
    product: NewProduct,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Product, sqlx::Error> {
    let product = sqlx::query_as(
        r#"
            INSERT INTO products (
                third_party_id,
                name,
                product_type,
                countries,
                data_size_mb,
                valid_days,
                price,
                cost_price,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (third_party_id) DO UPDATE SET
                name = excluded.name,
                product_type = excluded.product_type,
                countries = excluded.countries,
                data_size_mb = excluded.data_size_mb,
                valid_days = excluded.valid_days,
                price = excluded.price,
                cost_price = excluded.cost_price,
                status = excluded.status,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(product.third_party_id)
    .bind(product.name)
    .bind(product.product_type)
    .bind(Json(product.countries))
    .bind(product.data_size_mb)
    .bind(product.valid_days)
    .bind(product.price)
    .bind(product.cost_price)
    .bind(product.status)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(product)
}
