use std::{env, str::FromStr};

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads `key` from the environment and parses it. Returns `Ok(None)` if the variable is unset or blank, and the
/// offending raw value if it does not parse.
pub fn parse_env_var<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env::var(key) {
        Ok(s) if s.trim().is_empty() => Ok(None),
        Ok(s) => s.trim().parse::<T>().map(Some).map_err(|_| s),
        Err(_) => Ok(None),
    }
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string in either case. Returns `None` on odd length or a non-hex digit.
pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok())).collect()
}
