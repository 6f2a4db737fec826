//! # eSIM server
//! The HTTP face of the eSIM chat-commerce backend. It is responsible for:
//! * Authenticating Telegram Mini App users from their signed init data.
//! * Serving the wallet, recharge, order, eSIM card and product routes under `/api/miniapp`.
//! * Running the background tickers that reconcile deposits, expire recharge orders and sync orders with the
//!   provider.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! `/health` is open. Everything under `/api/miniapp` needs the `X-Telegram-Init-Data` header. Responses use the
//! `{code, message, data}` envelope on success and `{code, message, details}` on failure.

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
