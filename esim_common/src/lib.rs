mod amount;
pub mod helpers;
pub mod op;
mod secret;

pub use amount::{Amount, AmountParseError, AMOUNT_DECIMALS, AMOUNT_SCALE, CURRENCY_CODE};
pub use secret::Secret;
