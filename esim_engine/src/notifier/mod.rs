//! Outbound user notifications.
//!
//! Notifications are fire-and-forget. Callers log failures and never undo committed work because of them.
mod telegram;

use chrono::{DateTime, Utc};
use log::*;
pub use telegram::TelegramNotifier;
use thiserror::Error;

use crate::db_types::{Amount, Order};

#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send_recharge_success(&self, user_id: i64, amount: Amount, order_no: &str) -> Result<(), NotifyError>;

    async fn send_order_completed(&self, user_id: i64, order: &Order, card_count: usize) -> Result<(), NotifyError>;

    async fn send_order_failed(&self, user_id: i64, order: &Order, reason: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

/// Writes notifications to the log. Used when no bot token is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send_recharge_success(&self, user_id: i64, amount: Amount, order_no: &str) -> Result<(), NotifyError> {
        info!("📬️ [user {user_id}] Recharge {order_no} of {amount} credited");
        Ok(())
    }

    async fn send_order_completed(&self, user_id: i64, order: &Order, card_count: usize) -> Result<(), NotifyError> {
        info!("📬️ [user {user_id}] Order {} completed with {card_count} eSIM(s)", order.order_no);
        Ok(())
    }

    async fn send_order_failed(&self, user_id: i64, order: &Order, reason: &str) -> Result<(), NotifyError> {
        info!("📬️ [user {user_id}] Order {} failed ({reason}). {} refunded", order.order_no, order.total_amount);
        Ok(())
    }
}

/// The notifier a deployment actually runs: Telegram when a bot token is configured, the log otherwise.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Telegram(TelegramNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    pub fn from_bot_token(token: esim_common::Secret<String>) -> Result<Self, NotifyError> {
        if token.is_empty() {
            warn!("📬️ No bot token is configured. Notifications will only be logged.");
            return Ok(Self::Log(LogNotifier));
        }
        Ok(Self::Telegram(TelegramNotifier::new(token)?))
    }
}

impl Notifier for ConfiguredNotifier {
    async fn send_recharge_success(&self, user_id: i64, amount: Amount, order_no: &str) -> Result<(), NotifyError> {
        match self {
            Self::Telegram(n) => n.send_recharge_success(user_id, amount, order_no).await,
            Self::Log(n) => n.send_recharge_success(user_id, amount, order_no).await,
        }
    }

    async fn send_order_completed(&self, user_id: i64, order: &Order, card_count: usize) -> Result<(), NotifyError> {
        match self {
            Self::Telegram(n) => n.send_order_completed(user_id, order, card_count).await,
            Self::Log(n) => n.send_order_completed(user_id, order, card_count).await,
        }
    }

    async fn send_order_failed(&self, user_id: i64, order: &Order, reason: &str) -> Result<(), NotifyError> {
        match self {
            Self::Telegram(n) => n.send_order_failed(user_id, order, reason).await,
            Self::Log(n) => n.send_order_failed(user_id, order, reason).await,
        }
    }
}

//--------------------------------------   Message bodies   ----------------------------------------------------------
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub(crate) fn recharge_success_message(amount: Amount, order_no: &str, at: DateTime<Utc>) -> String {
    format!(
        "🎉 <b>Recharge successful</b>\n\n💰 <b>Amount:</b> {} {}\n📋 <b>Order:</b> <code>{}</code>\n⏰ <b>Credited \
         at:</b> {}\n\nYour wallet balance has been updated.",
        amount.format_dp(2),
        esim_common::CURRENCY_CODE,
        escape_html(order_no),
        at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub(crate) fn order_completed_message(order: &Order, card_count: usize) -> String {
    format!(
        "✅ <b>Your eSIM is ready</b>\n\n📦 <b>Product:</b> {}\n📋 <b>Order:</b> <code>{}</code>\n📶 <b>eSIMs \
         issued:</b> {card_count}\n\nOpen the Mini App to view the activation details.",
        escape_html(&order.product_name),
        escape_html(&order.order_no)
    )
}

pub(crate) fn order_failed_message(order: &Order, reason: &str) -> String {
    format!(
        "⚠️ <b>Order could not be fulfilled</b>\n\n📋 <b>Order:</b> <code>{}</code>\n❓ <b>Reason:</b> {}\n💰 \
         <b>Refunded:</b> {} {}",
        escape_html(&order.order_no),
        escape_html(reason),
        order.total_amount.format_dp(2),
        esim_common::CURRENCY_CODE
    )
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn blank_token_logs_only() {
        let n = ConfiguredNotifier::from_bot_token(esim_common::Secret::default()).unwrap();
        assert!(matches!(n, ConfiguredNotifier::Log(_)));
        let n = ConfiguredNotifier::from_bot_token(esim_common::Secret::new("123:abc".to_string())).unwrap();
        assert!(matches!(n, ConfiguredNotifier::Telegram(_)));
    }

    #[test]
    fn recharge_message() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let msg = recharge_success_message("100.1234".parse().unwrap(), "RCH1717236000<1>", at);
        assert!(msg.contains("100.12 USDT"));
        assert!(msg.contains("<code>RCH1717236000&lt;1&gt;</code>"));
        assert!(msg.contains("2024-06-01 10:00:00 UTC"));
    }
}
