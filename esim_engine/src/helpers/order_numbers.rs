use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};

pub const RECHARGE_ORDER_PREFIX: &str = "RCH";
pub const ESIM_ORDER_PREFIX: &str = "ORD";

/// `{prefix}{unix seconds}{4 random digits}`. Uniqueness is enforced by the store; callers retry on collision.
pub fn new_order_no(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u32 = OsRng.gen_range(0..10_000);
    format!("{prefix}{}{suffix:04}", now.timestamp())
}
