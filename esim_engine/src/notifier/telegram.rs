use std::time::Duration;

use esim_common::Secret;
use log::*;
use serde::Deserialize;
use serde_json::json;

use crate::{
    db_types::{Amount, Order},
    notifier::{order_completed_message, order_failed_message, recharge_success_message, Notifier, NotifyError},
};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const MAX_ATTEMPTS: u32 = 2;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends notifications as Telegram bot messages.
#[derive(Clone)]
pub struct TelegramNotifier {
    api_base: String,
    token: Secret<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TelegramNotifier({})", self.api_base)
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// The user blocked the bot or deleted their account. Nothing to retry and nothing to report.
fn is_user_unreachable(description: &str) -> bool {
    let d = description.to_ascii_lowercase();
    d.contains("blocked by the user") || d.contains("user is deactivated")
}

impl TelegramNotifier {
    pub fn new(token: Secret<String>) -> Result<Self, NotifyError> {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    pub fn with_api_base(api_base: &str, token: Secret<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { api_base: api_base.trim_end_matches('/').to_string(), token, client })
    }

    async fn send_once(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token.reveal());
        let body = json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" });
        let response = self.client.post(&url).json(&body).send().await?;
        let reply: TelegramResponse = response.json().await?;
        if reply.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected(reply.description.unwrap_or_default()))
        }
    }

    async fn send_with_retry(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(chat_id, text).await {
                Ok(()) => return Ok(()),
                Err(NotifyError::Rejected(d)) if is_user_unreachable(&d) => {
                    warn!("📬️ User {chat_id} has blocked the bot. Dropping notification.");
                    return Ok(());
                },
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!("📬️ Sending to {chat_id} failed (attempt {attempt}/{MAX_ATTEMPTS}): {e}");
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn send_recharge_success(&self, user_id: i64, amount: Amount, order_no: &str) -> Result<(), NotifyError> {
        let text = recharge_success_message(amount, order_no, chrono::Utc::now());
        self.send_with_retry(user_id, &text).await?;
        info!("📬️ Recharge notification for {order_no} sent to {user_id}");
        Ok(())
    }

    async fn send_order_completed(&self, user_id: i64, order: &Order, card_count: usize) -> Result<(), NotifyError> {
        self.send_with_retry(user_id, &order_completed_message(order, card_count)).await
    }

    async fn send_order_failed(&self, user_id: i64, order: &Order, reason: &str) -> Result<(), NotifyError> {
        self.send_with_retry(user_id, &order_failed_message(order, reason)).await
    }
}
