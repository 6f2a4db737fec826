mod order_numbers;
mod retry;
mod validation;

pub use order_numbers::{new_order_no, ESIM_ORDER_PREFIX, RECHARGE_ORDER_PREFIX};
pub use retry::{retry_with_backoff, Cancelled, RetryPolicy};
pub use validation::is_valid_email;
