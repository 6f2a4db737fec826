//! Telegram Mini App authentication.
//!
//! The Mini App forwards the `initData` string that Telegram hands it. The string is a URL-encoded set of key=value
//! pairs, one of which (`hash`) is an HMAC over all the others, keyed by the bot token. A request is authenticated
//! iff that HMAC checks out:
//!
//! ```text
//! secret_key        = HMAC_SHA256(key = "WebAppData", message = bot_token)
//! data_check_string = sorted("key=value" for every pair except hash).join("\n")
//! hash              = hex(HMAC_SHA256(key = secret_key, message = data_check_string))
//! ```
use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use chrono::{DateTime, Duration, TimeZone, Utc};
use esim_common::helpers::{from_hex, to_hex};
use esim_engine::db_types::NewUser;
use hmac::{Hmac, Mac};
use log::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::errors::ServerError;

type HmacSha256 = Hmac<Sha256>;

pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";
pub const INIT_DATA_QUERY_PARAM: &str = "init_data";
const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("No init data was supplied")]
    MissingInitData,
    #[error("The bot token is not configured")]
    NoBotToken,
    #[error("Init data has no hash")]
    MissingHash,
    #[error("Init data signature is invalid")]
    InvalidSignature,
    #[error("Init data has no valid user. {0}")]
    InvalidUser(String),
    #[error("Init data is too old. Signed at {0}")]
    Expired(DateTime<Utc>),
    #[error("Could not key the init data HMAC. {0}")]
    Key(String),
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ServerError::Unauthorized(e.to_string())
    }
}

/// The Telegram user that signed the request. Handlers receive it as an extractor once the init-data middleware has
/// validated the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl From<TelegramUser> for NewUser {
    fn from(user: TelegramUser) -> Self {
        NewUser {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            language: user.language_code,
        }
    }
}

impl FromRequest for TelegramUser {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .extensions()
            .get::<TelegramUser>()
            .cloned()
            .ok_or_else(|| ServerError::Unauthorized("Request was not authenticated".into()));
        ready(user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub user: TelegramUser,
    pub auth_date: Option<DateTime<Utc>>,
    pub query_id: Option<String>,
}

/// Builds the data-check string: every pair except `hash`, as `key=value`, sorted and joined by newlines. Returns it
/// together with the supplied hash.
pub fn data_check_string(raw: &str) -> (String, Option<String>) {
    let mut hash = None;
    let mut pairs = url::form_urlencoded::parse(raw.trim().as_bytes())
        .filter_map(|(k, v)| {
            if k == "hash" {
                hash = Some(v.into_owned());
                None
            } else {
                Some(format!("{k}={v}"))
            }
        })
        .collect::<Vec<String>>();
    pairs.sort();
    (pairs.join("\n"), hash)
}

/// HMAC over the data-check string, keyed with HMAC("WebAppData", bot_token).
fn init_data_mac(bot_token: &str, data_check_string: &str) -> Result<HmacSha256, AuthError> {
    let mut secret = HmacSha256::new_from_slice(WEB_APP_DATA_KEY).map_err(|e| AuthError::Key(e.to_string()))?;
    secret.update(bot_token.as_bytes());
    let secret_key = secret.finalize().into_bytes();
    let mut mac = HmacSha256::new_from_slice(&secret_key).map_err(|e| AuthError::Key(e.to_string()))?;
    mac.update(data_check_string.as_bytes());
    Ok(mac)
}

pub fn sign_data_check_string(bot_token: &str, data_check_string: &str) -> Result<String, AuthError> {
    let mac = init_data_mac(bot_token, data_check_string)?;
    Ok(to_hex(&mac.finalize().into_bytes()))
}

/// Validates `raw` against `bot_token`. If `max_age` is given, an `auth_date` older than that is rejected.
pub fn validate_init_data(
    raw: &str,
    bot_token: &str,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<InitData, AuthError> {
    if raw.trim().is_empty() {
        return Err(AuthError::MissingInitData);
    }
    if bot_token.is_empty() {
        return Err(AuthError::NoBotToken);
    }
    let (check_string, hash) = data_check_string(raw);
    let hash = hash.filter(|h| !h.is_empty()).ok_or(AuthError::MissingHash)?;
    let supplied = from_hex(&hash).ok_or(AuthError::InvalidSignature)?;
    // verify_slice compares in constant time
    init_data_mac(bot_token, &check_string)?.verify_slice(&supplied).map_err(|_| {
        trace!("🔐️ Init data hash mismatch. Data check string: {check_string}");
        AuthError::InvalidSignature
    })?;
    let fields = url::form_urlencoded::parse(raw.trim().as_bytes()).into_owned().collect::<Vec<(String, String)>>();
    let field = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    let user_json = field("user").ok_or_else(|| AuthError::InvalidUser("no user field".into()))?;
    let user: TelegramUser =
        serde_json::from_str(&user_json).map_err(|e| AuthError::InvalidUser(e.to_string()))?;
    if user.id <= 0 {
        return Err(AuthError::InvalidUser(format!("invalid user id {}", user.id)));
    }
    let auth_date =
        field("auth_date").and_then(|s| s.parse::<i64>().ok()).and_then(|s| Utc.timestamp_opt(s, 0).single());
    if let (Some(max_age), Some(signed_at)) = (max_age, auth_date) {
        if now - signed_at > max_age {
            return Err(AuthError::Expired(signed_at));
        }
    }
    Ok(InitData { user, auth_date, query_id: field("query_id") })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub const BOT_TOKEN: &str = "123456:TEST-bot-token";

    /// Produces a correctly signed init-data string for `user_id`.
    pub fn signed_init_data(user_id: i64, auth_date: i64) -> String {
        let user = format!(r#"{{"id":{user_id},"first_name":"Ada","username":"ada","language_code":"en"}}"#);
        let pairs = [("auth_date", auth_date.to_string()), ("query_id", "AAHdF6IQ".to_string()), ("user", user)];
        let mut check = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>();
        check.sort();
        let hash = sign_data_check_string(BOT_TOKEN, &check.join("\n")).unwrap();
        let mut encoder = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            encoder.append_pair(k, v);
        }
        encoder.append_pair("hash", &hash);
        encoder.finish()
    }

    #[test]
    fn valid_init_data() {
        let now = Utc::now();
        let raw = signed_init_data(42, now.timestamp());
        let data = validate_init_data(&raw, BOT_TOKEN, Some(Duration::hours(24)), now).unwrap();
        assert_eq!(data.user.id, 42);
        assert_eq!(data.user.username.as_deref(), Some("ada"));
        assert_eq!(data.query_id.as_deref(), Some("AAHdF6IQ"));
        assert_eq!(data.auth_date.map(|d| d.timestamp()), Some(now.timestamp()));
        let user: NewUser = data.user.into();
        assert_eq!(user.language.as_deref(), Some("en"));
    }

    #[test]
    fn check_string_is_sorted_and_excludes_hash() {
        let (check, hash) = data_check_string("user=%7B%22id%22%3A1%7D&hash=abc&auth_date=100");
        assert_eq!(check, "auth_date=100\nuser={\"id\":1}");
        assert_eq!(hash.as_deref(), Some("abc"));
    }

    #[test]
    fn tampered_init_data() {
        let now = Utc::now();
        let raw = signed_init_data(42, now.timestamp());
        let tampered = raw.replace("%22id%22%3A42", "%22id%22%3A43");
        assert_ne!(raw, tampered);
        assert_eq!(validate_init_data(&tampered, BOT_TOKEN, None, now), Err(AuthError::InvalidSignature));
        assert_eq!(validate_init_data(&raw, "other:token", None, now), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn hash_must_be_the_full_hex_digest() {
        let now = Utc::now();
        let raw = signed_init_data(42, now.timestamp());
        let (_, hash) = data_check_string(&raw);
        let hash = hash.unwrap();
        let upper = raw.replace(&hash, &hash.to_uppercase());
        assert!(validate_init_data(&upper, BOT_TOKEN, None, now).is_ok());
        let truncated = raw.replace(&hash, &hash[..32]);
        assert_eq!(validate_init_data(&truncated, BOT_TOKEN, None, now), Err(AuthError::InvalidSignature));
        let not_hex = raw.replace(&hash, &format!("zz{}", &hash[2..]));
        assert_eq!(validate_init_data(&not_hex, BOT_TOKEN, None, now), Err(AuthError::InvalidSignature));
        let odd = raw.replace(&hash, &hash[1..]);
        assert_eq!(validate_init_data(&odd, BOT_TOKEN, None, now), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn missing_parts() {
        let now = Utc::now();
        assert_eq!(validate_init_data("", BOT_TOKEN, None, now), Err(AuthError::MissingInitData));
        assert_eq!(validate_init_data("auth_date=1", BOT_TOKEN, None, now), Err(AuthError::MissingHash));
        let raw = signed_init_data(42, now.timestamp());
        assert_eq!(validate_init_data(&raw, "", None, now), Err(AuthError::NoBotToken));
    }

    #[test]
    fn stale_init_data() {
        let now = Utc::now();
        let raw = signed_init_data(42, (now - Duration::hours(25)).timestamp());
        assert!(matches!(
            validate_init_data(&raw, BOT_TOKEN, Some(Duration::hours(24)), now),
            Err(AuthError::Expired(_))
        ));
        assert!(validate_init_data(&raw, BOT_TOKEN, None, now).is_ok());
    }
}
