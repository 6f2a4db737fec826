//! SQLite backend for the eSIM engine.
//!
//! SQLite has no row-level locks. Every mutating transaction therefore starts with a guarded
//! `UPDATE … RETURNING *` on the row it protects. That first write takes the database write lock for the rest of the
//! transaction, so racing writers queue up on the busy timeout and re-read committed state when they get their turn.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::{SqliteDatabase, ORDER_RELATED_TYPE, RECHARGE_RELATED_TYPE};
