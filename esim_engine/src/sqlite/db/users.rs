use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{NewUser, User};

/// Inserts the user, or refreshes the profile fields of an existing one. Profile fields that arrive empty keep their
/// stored value.
pub async fn upsert_user(user: NewUser, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<User, sqlx::Error> {
    let user = sqlx::query_as(
        r#"
            INSERT INTO users (id, username, first_name, last_name, language, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $6)
            ON CONFLICT (id) DO UPDATE SET
                username = COALESCE(excluded.username, users.username),
                first_name = COALESCE(excluded.first_name, users.first_name),
                last_name = COALESCE(excluded.last_name, users.last_name),
                language = COALESCE(excluded.language, users.language),
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(user.id)
    .bind(user.username)
    .bind(user.first_name)
    .bind(user.last_name)
    .bind(user.language)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(user)
}

pub async fn fetch_user(id: i64, conn: &mut SqliteConnection) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(user)
}
