use std::str::FromStr;

use esim_engine::db_types::Amount;
use log::debug;

use crate::errors::ServerError;

/// Reads a money value from a JSON body field. Clients send either a decimal string ("100.50") or a JSON number.
pub fn parse_amount_value(value: &serde_json::Value) -> Result<Amount, ServerError> {
    let parsed = match value {
        serde_json::Value::String(s) => s.parse::<Amount>().map_err(|e| e.to_string()),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Amount::from_whole(i)),
            (None, Some(f)) => Amount::from_f64(f).map_err(|e| e.to_string()),
            _ => Err(format!("{n} is not a valid amount")),
        },
        serde_json::Value::Null => Err("amount is required".to_string()),
        other => Err(format!("{other} is not a valid amount")),
    };
    parsed.map_err(|e| {
        debug!("💻️ Rejecting amount {value}. {e}");
        ServerError::InvalidAmountFormat(e)
    })
}

/// Parses an optional, case-insensitive status-like query parameter.
pub fn parse_filter<T: FromStr>(value: Option<&str>, name: &str) -> Result<Option<T>, ServerError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => {
            s.parse::<T>().map(Some).map_err(|_| ServerError::InvalidQuery(format!("{s} is not a valid {name}")))
        },
    }
}
