//! Server configuration.
//!
//! Everything is read from `ESIM_*` environment variables (a `.env` file is loaded first, if present). A value that
//! cannot be parsed is logged and replaced by its default, so that a typo never stops the server from booting. The
//! recharge limits are the exception: [`ServerConfig::validate`] refuses to start with inconsistent limits.
use std::{env, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use esim_common::{helpers::parse_boolean_flag, Amount, Secret};
use esim_engine::{
    api::objects::{OrderConfig, RechargeConfig},
    chain::DEFAULT_TRON_API_URL,
    provider::ProviderConfig,
};
use log::*;

use crate::errors::ServerError;

const DEFAULT_ESIM_HOST: &str = "127.0.0.1";
const DEFAULT_ESIM_PORT: u16 = 8380;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/esim_store.db";
const DEFAULT_INIT_DATA_MAX_AGE_SECS: i64 = 86_400;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;
const DEFAULT_EXPIRY_INTERVAL_SECS: u64 = 30;
const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub auth: AuthConfig,
    pub recharge: RechargeConfig,
    pub order: OrderConfig,
    pub chain: ChainConfig,
    pub provider: ProviderConfig,
    pub workers: WorkerConfig,
    /// How long a client may take to send the request headers.
    pub read_timeout: StdDuration,
    /// How long a client may take to acknowledge a shutdown of its connection.
    pub write_timeout: StdDuration,
}

//-------------------------------------------------  AuthConfig  -------------------------------------------------------
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// The Telegram bot token. It keys the init-data HMAC and is used to send notifications.
    pub bot_token: Secret<String>,
    /// Accept init data in the `init_data` query parameter as well as the header.
    pub dev_mode: bool,
    /// Reject init data signed longer ago than this. `None` disables the check.
    pub init_data_max_age: Option<Duration>,
}

//-------------------------------------------------  ChainConfig  ------------------------------------------------------
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub api_url: String,
    pub api_key: Secret<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { api_url: DEFAULT_TRON_API_URL.to_string(), api_key: Secret::default() }
    }
}

//-------------------------------------------------  WorkerConfig  -----------------------------------------------------
/// Tick intervals of the background workers.
#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    pub reconciliation_interval: StdDuration,
    pub expiry_interval: StdDuration,
    pub order_sync_interval: StdDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval: StdDuration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            expiry_interval: StdDuration::from_secs(DEFAULT_EXPIRY_INTERVAL_SECS),
            order_sync_interval: StdDuration::from_secs(10),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ESIM_HOST.to_string(),
            port: DEFAULT_ESIM_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            auth: AuthConfig {
                init_data_max_age: Some(Duration::seconds(DEFAULT_INIT_DATA_MAX_AGE_SECS)),
                ..Default::default()
            },
            recharge: RechargeConfig::default(),
            order: OrderConfig::default(),
            chain: ChainConfig::default(),
            provider: ProviderConfig::default(),
            workers: WorkerConfig::default(),
            read_timeout: StdDuration::from_secs(DEFAULT_SERVER_TIMEOUT_SECS),
            write_timeout: StdDuration::from_secs(DEFAULT_SERVER_TIMEOUT_SECS),
        }
    }
}

/// Reads and parses `key`, falling back to `default` (with a warning) if the value is malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match esim_common::helpers::parse_env_var::<T>(key) {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(raw) => {
            warn!("🪛️ {raw} is not a valid value for {key}. Using the default instead.");
            default
        },
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn env_secret(key: &str) -> Secret<String> {
    Secret::new(env_string(key).unwrap_or_default())
}

/// Positive values only; zero and negatives fall back to `default`.
fn env_positive<T: FromStr + PartialOrd + Default + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    let value = env_or(key, default);
    if value > T::default() {
        value
    } else {
        warn!("🪛️ {key} must be positive, but is {value}. Using the default instead.");
        default
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let host = env_string("ESIM_HOST").unwrap_or(defaults.host);
        let port = env_or("ESIM_PORT", DEFAULT_ESIM_PORT);
        let database_url = env_string("ESIM_DATABASE_URL").unwrap_or_else(|| {
            info!("🪛️ ESIM_DATABASE_URL is not set. Using {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let auth = AuthConfig::from_env();
        let recharge = recharge_config_from_env(defaults.recharge);
        let order = order_config_from_env(defaults.order);
        let chain = ChainConfig {
            api_url: env_string("ESIM_CHAIN_API_URL").unwrap_or(defaults.chain.api_url),
            api_key: env_secret("ESIM_CHAIN_API_KEY"),
        };
        let provider = ProviderConfig {
            base_url: env_string("ESIM_PROVIDER_BASE_URL").unwrap_or_default(),
            api_key: env_secret("ESIM_PROVIDER_API_KEY"),
            api_secret: env_secret("ESIM_PROVIDER_API_SECRET"),
        };
        if provider.base_url.is_empty() {
            error!("🪛️ ESIM_PROVIDER_BASE_URL is not set. eSIM orders cannot be fulfilled without it.");
        }
        let workers = WorkerConfig {
            reconciliation_interval: StdDuration::from_secs(env_positive(
                "ESIM_RECHARGE_MONITOR_INTERVAL_SECONDS",
                DEFAULT_MONITOR_INTERVAL_SECS,
            )),
            expiry_interval: StdDuration::from_secs(env_positive(
                "ESIM_EXPIRY_INTERVAL_SECONDS",
                DEFAULT_EXPIRY_INTERVAL_SECS,
            )),
            order_sync_interval: order.sync_interval.to_std().unwrap_or(defaults.workers.order_sync_interval),
        };
        let read_timeout =
            StdDuration::from_secs(env_positive("ESIM_SERVER_READ_TIMEOUT", DEFAULT_SERVER_TIMEOUT_SECS));
        let write_timeout =
            StdDuration::from_secs(env_positive("ESIM_SERVER_WRITE_TIMEOUT", DEFAULT_SERVER_TIMEOUT_SECS));
        Self {
            host,
            port,
            database_url,
            auth,
            recharge,
            order,
            chain,
            provider,
            workers,
            read_timeout,
            write_timeout,
        }
    }

    /// Checks the settings that the server cannot run without.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.recharge.validate().map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
        if self.order.max_sync_attempts < 1 {
            return Err(ServerError::ConfigurationError("ESIM_ORDER_MAX_SYNC_ATTEMPTS must be at least 1".into()));
        }
        if self.auth.bot_token.is_empty() {
            warn!("🪛️ ESIM_BOT_TOKEN is not set. Every Mini App request will be rejected.");
        }
        Ok(())
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let bot_token = env_secret("ESIM_BOT_TOKEN");
        let dev_mode = parse_boolean_flag(env::var("ESIM_DEV_MODE").ok(), false);
        if dev_mode {
            warn!("🪛️ Development mode is on. Init data is also accepted from the query string.");
        }
        let max_age = env_or("ESIM_INIT_DATA_MAX_AGE", DEFAULT_INIT_DATA_MAX_AGE_SECS);
        let init_data_max_age = if max_age > 0 {
            Some(Duration::seconds(max_age))
        } else {
            info!("🪛️ Init data age checks are disabled.");
            None
        };
        Self { bot_token, dev_mode, init_data_max_age }
    }
}

fn recharge_config_from_env(defaults: RechargeConfig) -> RechargeConfig {
    let min_amount = env_or::<Amount>("ESIM_RECHARGE_MIN_AMOUNT", defaults.min_amount);
    let max_amount = env_or::<Amount>("ESIM_RECHARGE_MAX_AMOUNT", defaults.max_amount);
    let expire_minutes = env_positive("ESIM_RECHARGE_ORDER_EXPIRE_MINUTES", defaults.order_expiry.num_minutes());
    let required_confirmations = env_or("ESIM_RECHARGE_REQUIRED_CONFIRMATIONS", defaults.required_confirmations);
    let deposit_address = env_string("ESIM_RECHARGE_DEPOSIT_ADDRESS").unwrap_or_else(|| {
        error!("🪛️ ESIM_RECHARGE_DEPOSIT_ADDRESS is not set. Please set it to the shared deposit address.");
        String::default()
    });
    RechargeConfig {
        min_amount,
        max_amount,
        order_expiry: Duration::minutes(expire_minutes),
        required_confirmations,
        deposit_address,
        ..defaults
    }
}

fn order_config_from_env(defaults: OrderConfig) -> OrderConfig {
    let sync_secs = env_positive("ESIM_ORDER_SYNC_INTERVAL_SECONDS", defaults.sync_interval.num_seconds());
    let timeout_minutes = env_positive("ESIM_ORDER_TIMEOUT_MINUTES", defaults.order_timeout.num_minutes());
    OrderConfig {
        sync_interval: Duration::seconds(sync_secs),
        max_sync_attempts: env_or("ESIM_ORDER_MAX_SYNC_ATTEMPTS", defaults.max_sync_attempts),
        batch_size: env_positive("ESIM_ORDER_SYNC_BATCH_SIZE", defaults.batch_size),
        order_timeout: Duration::minutes(timeout_minutes),
        ..defaults
    }
}
