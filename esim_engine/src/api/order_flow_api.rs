//! The Order Fulfillment State Machine.
//!
//! ```text
//! PENDING -> PAID -> PROCESSING -> COMPLETED
//!              |          |
//!              +----------+-----> FAILED (refunded)
//! PENDING -> CANCELLED
//! ```
//!
//! Creation debits the wallet and stores the order as PAID in one transaction. Provider submission and polling
//! happen outside any transaction. The final transition (complete or fail and refund) re-locks the order and
//! re-checks its status, so racing pollers are harmless.
use std::{fmt::Debug, future::Future};

use chrono::Utc;
use log::*;
use serde_json::Value;

use crate::{
    api::objects::{NewEsimOrderRequest, OrderConfig, OrderSyncSummary, OrderWithDetail, SyncResult, SyncStatus},
    db_types::{Amount, NewEsimCard, NewOrder, Order, OrderStatus},
    events::{EventProducers, OrderPaidEvent},
    helpers::{is_valid_email, new_order_no, ESIM_ORDER_PREFIX},
    notifier::Notifier,
    provider::{ProviderClient, ProviderCreateOrder, ProviderError, ProviderOrder, ProviderOrderStatus},
    traits::{
        clamp_page,
        CatalogueError,
        OrderCompletion,
        OrderError,
        OrderManagement,
        OrderQueryFilter,
        OrderStats,
        ProductCatalogue,
        WalletError,
        WalletManagement,
    },
};

/// Tolerance when comparing the client's expected total with the catalogue price.
pub const PRICE_TOLERANCE: Amount = Amount::from_units(1_000_000);
/// Reason recorded on orders that were polled too many times.
pub const SYNC_TIMEOUT_REASON: &str = "sync_timeout";
/// Reason recorded on PAID orders that the provider never accepted in time.
pub const SUBMISSION_TIMEOUT_REASON: &str = "submission_timeout";
const ORDER_NO_ATTEMPTS: usize = 5;
/// Orders in a status the provider does not document are polled this many sync intervals apart.
const UNKNOWN_STATUS_BACKOFF: i32 = 6;

#[derive(Clone)]
pub struct OrderFlowApi<B, P, N> {
    db: B,
    provider: P,
    notifier: N,
    producers: EventProducers,
    config: OrderConfig,
}

impl<B, P, N> Debug for OrderFlowApi<B, P, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, P, N> OrderFlowApi<B, P, N> {
    pub fn new(db: B, provider: P, notifier: N, producers: EventProducers, config: OrderConfig) -> Self {
        Self { db, provider, notifier, producers, config }
    }

    pub fn config(&self) -> &OrderConfig {
        &self.config
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

fn catalogue_error(e: CatalogueError) -> OrderError {
    match e {
        CatalogueError::DatabaseError(s) => OrderError::DatabaseError(s),
        CatalogueError::ProductNotFound(id) => OrderError::ProductNotFound(id),
        e @ CatalogueError::InvalidPrice { .. } => OrderError::DatabaseError(e.to_string()),
    }
}

/// Runs a provider call under the configured timeout.
async fn with_timeout<T, F>(timeout: std::time::Duration, call: F) -> Result<T, ProviderError>
where F: Future<Output = Result<T, ProviderError>> {
    tokio::time::timeout(timeout, call).await.unwrap_or(Err(ProviderError::Timeout))
}

/// Turns the provider's view of a completed order into what gets stored locally. eSIMs without an ICCID are
/// skipped, as are repeated ICCIDs within one response.
pub fn completion_from_provider(remote: &ProviderOrder) -> OrderCompletion {
    let mut cards: Vec<NewEsimCard> = Vec::with_capacity(remote.esims.len());
    for esim in &remote.esims {
        if esim.iccid.is_empty() {
            warn!("📦️ Provider order {} lists an eSIM without an ICCID. Skipping it.", remote.order_number);
            continue;
        }
        if cards.iter().any(|c| c.iccid == esim.iccid) {
            warn!("📦️ Provider order {} lists ICCID {} twice", remote.order_number, esim.iccid);
            continue;
        }
        cards.push(NewEsimCard {
            iccid: esim.iccid.clone(),
            activation_code: esim.activation_code.clone(),
            qr_code: esim.qr_code.clone(),
            lpa: esim.lpa.clone(),
            apple_install_url: esim.apple_url.clone(),
            activated_at: esim.activated_at,
            expires_at: esim.expires_at,
            provider_order_id: esim.provider_esim_id.clone(),
        });
    }
    OrderCompletion {
        provider_payload: remote.raw.clone(),
        items: Value::Array(remote.order_items.clone()),
        esims: remote.raw.get("esims").cloned().unwrap_or_else(|| Value::Array(vec![])),
        cards,
    }
}

impl<B, P, N> OrderFlowApi<B, P, N>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    /// Validates the request, then debits the wallet and stores the order as PAID in one transaction. Subscribers to
    /// the order-paid hook are notified after the commit; submission to the provider happens from there or from the
    /// next sync tick.
    pub async fn create_esim_order(&self, request: NewEsimOrderRequest) -> Result<Order, OrderError> {
        if request.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(request.quantity));
        }
        let email = request.customer_email.as_deref().map(str::trim).filter(|e| !e.is_empty());
        if let Some(email) = email {
            if !is_valid_email(email) {
                return Err(OrderError::InvalidEmail(email.to_string()));
            }
        }
        let product = self
            .db
            .fetch_product(request.product_id)
            .await
            .map_err(catalogue_error)?
            .ok_or(OrderError::ProductNotFound(request.product_id))?;
        if !product.is_active() {
            return Err(OrderError::ProductUnavailable(product.id));
        }
        let total =
            product.price.checked_mul(request.quantity).ok_or(OrderError::InvalidQuantity(request.quantity))?;
        if (request.expected_total - total).abs() >= PRICE_TOLERANCE {
            return Err(OrderError::AmountMismatch { expected: request.expected_total, actual: total });
        }
        let wallet = self
            .db
            .fetch_wallet(request.user_id)
            .await?
            .ok_or(OrderError::Wallet(WalletError::WalletNotFound(request.user_id)))?;
        if wallet.balance < total {
            return Err(OrderError::InsufficientBalance { available: wallet.balance, required: total });
        }
        let mut attempt = 0;
        let (order, _) = loop {
            attempt += 1;
            let new_order = NewOrder {
                order_no: new_order_no(ESIM_ORDER_PREFIX, Utc::now()),
                user_id: request.user_id,
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: request.quantity,
                unit_price: product.price,
                total_amount: total,
                customer_email: email.map(str::to_string),
                remark: request.remark.clone(),
            };
            match self.db.create_paid_order(new_order).await {
                Err(OrderError::DuplicateOrderNo(_)) if attempt < ORDER_NO_ATTEMPTS => {
                    debug!("📦️ Order number collision. Retrying.");
                },
                result => break result?,
            }
        };
        self.producers.publish_order_paid(OrderPaidEvent::new(order.clone())).await;
        Ok(order)
    }

    /// Submits a PAID order to the provider. The order is claimed first, so concurrent submitters (the order-paid
    /// hook and the sync tick) never both reach the provider.
    pub async fn submit_order(&self, order_id: i64) -> Result<SyncResult, OrderError> {
        let now = Utc::now();
        let Some(order) = self.db.claim_for_submission(order_id, now, now + self.config.submit_lease).await? else {
            let current = self.fetch_existing(order_id).await?;
            return Ok(SyncResult::new(&current, false, "order is not awaiting submission"));
        };
        let product_ref = match self.db.fetch_product(order.product_id).await.map_err(catalogue_error)? {
            Some(p) => p.third_party_id,
            None => order.product_id.to_string(),
        };
        let request = ProviderCreateOrder {
            product_id: product_ref,
            quantity: order.quantity,
            customer_email: order.customer_email.clone().unwrap_or_default(),
        };
        let next_sync_at = now + self.config.sync_interval;
        match with_timeout(self.config.provider_timeout, self.provider.create_order(&request)).await {
            Ok(ack) => {
                let order = self.db.mark_order_submitted(order.id, &ack.order_number, next_sync_at).await?;
                info!("📦️ Order {} accepted by the provider as {}", order.order_no, ack.order_number);
                Ok(SyncResult::new(&order, true, format!("submitted as {}", ack.order_number)))
            },
            Err(e) => {
                warn!("📦️ Provider rejected or did not answer submission of order {}. {e}", order.order_no);
                let message = e.to_string();
                let order = self.db.record_sync_attempt(order.id, now, next_sync_at, Some(&message)).await?;
                let deadline = order.paid_at.unwrap_or(order.created_at) + self.config.order_timeout;
                if now >= deadline {
                    return self.fail_and_refund(&order, SUBMISSION_TIMEOUT_REASON).await;
                }
                Ok(SyncResult::new(&order, false, message))
            },
        }
    }

    /// One scheduler tick: submit due PAID orders, then poll due PROCESSING orders. Errors on one order are logged
    /// and do not stop the others.
    pub async fn process_pending_orders(&self) -> Result<OrderSyncSummary, OrderError> {
        let mut summary = OrderSyncSummary::default();
        let now = Utc::now();
        let unsubmitted = self.db.fetch_unsubmitted_orders(now, self.config.batch_size).await?;
        for order in unsubmitted {
            match self.submit_order(order.id).await {
                Ok(result) => summary.tally(&result, true),
                Err(e) => warn!("📦️ Could not submit order {}. {e}", order.order_no),
            }
        }
        let due = self.db.fetch_orders_due_for_sync(now, self.config.batch_size).await?;
        for order in due {
            let order_no = order.order_no.clone();
            match self.sync_order(order).await {
                Ok(result) => summary.tally(&result, false),
                Err(e) => warn!("📦️ Could not sync order {order_no}. {e}"),
            }
        }
        if summary != OrderSyncSummary::default() {
            debug!(
                "📦️ Order sync pass complete. {} submitted, {} completed, {} failed, {} in flight",
                summary.submitted, summary.completed, summary.failed, summary.in_flight
            );
        }
        Ok(summary)
    }

    /// Manual sync for one of the user's orders: submits it if still PAID, polls it if PROCESSING.
    pub async fn sync_one(&self, order_id: i64, user_id: i64) -> Result<SyncResult, OrderError> {
        let order = self.owned_order(order_id, user_id).await?;
        match order.status {
            OrderStatus::Paid => self.submit_order(order_id).await,
            OrderStatus::Processing => self.sync_order(order).await,
            status => Ok(SyncResult::new(&order, true, format!("order is already {status}"))),
        }
    }

    /// Polls the provider once for a PROCESSING order and applies the outcome.
    async fn sync_order(&self, order: Order) -> Result<SyncResult, OrderError> {
        if order.status != OrderStatus::Processing {
            return Ok(SyncResult::new(&order, false, format!("order is {}", order.status)));
        }
        if order.sync_attempts >= self.config.max_sync_attempts {
            warn!("📦️ Order {} reached {} sync attempts. Giving up.", order.order_no, order.sync_attempts);
            return self.fail_and_refund(&order, SYNC_TIMEOUT_REASON).await;
        }
        let now = Utc::now();
        let next_sync_at = now + self.config.sync_interval;
        let Some(provider_order_id) = order.provider_order_id.clone() else {
            let order = self.db.record_sync_attempt(order.id, now, next_sync_at, Some("no provider order id")).await?;
            return Err(OrderError::NotSubmitted(order.order_no));
        };
        let remote = match with_timeout(self.config.provider_timeout, self.provider.get_order(&provider_order_id)).await {
            Ok(remote) => remote,
            Err(e) => {
                debug!("📦️ Provider query for {} failed. {e}", order.order_no);
                let message = e.to_string();
                let order = self.db.record_sync_attempt(order.id, now, next_sync_at, Some(&message)).await?;
                return Ok(SyncResult::new(&order, false, message));
            },
        };
        match &remote.status {
            ProviderOrderStatus::Completed => self.complete(&order, &remote).await,
            ProviderOrderStatus::Cancelled | ProviderOrderStatus::Failed => {
                let reason = format!("provider order status: {}", remote.status);
                self.fail_and_refund(&order, &reason).await
            },
            ProviderOrderStatus::Pending | ProviderOrderStatus::Paid | ProviderOrderStatus::Processing => {
                let order = self.db.record_sync_attempt(order.id, now, next_sync_at, None).await?;
                trace!("📦️ Order {} is still {} at the provider", order.order_no, remote.status);
                Ok(SyncResult::new(&order, true, format!("provider status {}", remote.status)))
            },
            ProviderOrderStatus::Unknown(status) => {
                let message = format!("unknown provider status {status}");
                let retry_at = now + self.config.sync_interval * UNKNOWN_STATUS_BACKOFF;
                let order = self.db.defer_sync(order.id, now, retry_at, &message).await?;
                warn!(
                    "📦️ Provider reports unknown status '{status}' for order {}. Next poll at {retry_at}.",
                    order.order_no
                );
                Ok(SyncResult::new(&order, false, message))
            },
        }
    }

    async fn complete(&self, order: &Order, remote: &ProviderOrder) -> Result<SyncResult, OrderError> {
        let completion = completion_from_provider(remote);
        match self.db.complete_order(order.id, completion).await {
            Ok(Some(completed)) => {
                let card_count = completed.cards.len();
                if let Err(e) = self.notifier.send_order_completed(order.user_id, &completed.order, card_count).await {
                    warn!("📬️ Could not notify user {} about order {}. {e}", order.user_id, order.order_no);
                }
                Ok(SyncResult::new(&completed.order, true, format!("completed with {card_count} eSIM(s)")))
            },
            Ok(None) => {
                let current = self.fetch_existing(order.id).await?;
                Ok(SyncResult::new(&current, false, format!("order is already {}", current.status)))
            },
            Err(e @ OrderError::DuplicateIccid(_)) => {
                error!("📦️ Cannot complete order {}. {e}", order.order_no);
                let now = Utc::now();
                let message = e.to_string();
                let order =
                    self.db.record_sync_attempt(order.id, now, now + self.config.sync_interval, Some(&message)).await?;
                Ok(SyncResult::new(&order, false, message))
            },
            Err(e) => Err(e),
        }
    }

    async fn fail_and_refund(&self, order: &Order, reason: &str) -> Result<SyncResult, OrderError> {
        match self.db.fail_and_refund_order(order.id, reason).await? {
            Some(failed) => {
                if let Err(e) = self.notifier.send_order_failed(failed.user_id, &failed, reason).await {
                    warn!("📬️ Could not notify user {} about order {}. {e}", failed.user_id, failed.order_no);
                }
                Ok(SyncResult::new(&failed, false, reason))
            },
            None => {
                let current = self.fetch_existing(order.id).await?;
                Ok(SyncResult::new(&current, false, format!("order is already {}", current.status)))
            },
        }
    }

    async fn fetch_existing(&self, order_id: i64) -> Result<Order, OrderError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))
    }

    async fn owned_order(&self, order_id: i64, user_id: i64) -> Result<Order, OrderError> {
        let order = self.fetch_existing(order_id).await?;
        if order.user_id != user_id {
            return Err(OrderError::Forbidden(order.order_no));
        }
        Ok(order)
    }

    pub async fn get_order_with_detail(&self, order_id: i64, user_id: i64) -> Result<OrderWithDetail, OrderError> {
        let order = self.owned_order(order_id, user_id).await?;
        let detail = self.db.fetch_order_detail(order.id).await?;
        let cards = self.db.fetch_esim_cards_for_order(order.id).await?;
        Ok(OrderWithDetail { order, detail, cards })
    }

    pub async fn list_user_orders(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<(Vec<Order>, i64), OrderError> {
        let (limit, offset) = clamp_page(limit, offset);
        let mut filter = OrderQueryFilter::for_user(user_id).with_page(limit, offset);
        filter.status = status;
        self.db.search_orders(filter).await
    }

    /// Cancels one of the user's orders. Only PENDING orders can be cancelled.
    pub async fn cancel_order(&self, order_id: i64, user_id: i64) -> Result<Order, OrderError> {
        let order = self.owned_order(order_id, user_id).await?;
        self.db.cancel_order(order.id).await
    }

    pub async fn order_stats(&self, user_id: i64) -> Result<OrderStats, OrderError> {
        self.db.order_stats(user_id).await
    }

    pub async fn sync_status(&self, order_id: i64, user_id: i64) -> Result<SyncStatus, OrderError> {
        let order = self.owned_order(order_id, user_id).await?;
        Ok(SyncStatus::from(&order))
    }
}

impl OrderSyncSummary {
    fn tally(&mut self, result: &SyncResult, submission: bool) {
        match result.new_status {
            OrderStatus::Processing if submission && result.success => self.submitted += 1,
            OrderStatus::Completed => self.completed += 1,
            OrderStatus::Failed => self.failed += 1,
            _ => self.in_flight += 1,
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::provider::ProviderEsim;

    fn esim(iccid: &str) -> ProviderEsim {
        ProviderEsim {
            provider_esim_id: Some("900".into()),
            iccid: iccid.into(),
            status: None,
            activation_code: Some("LPA:1$x$y".into()),
            qr_code: None,
            lpa: None,
            apple_url: None,
            activated_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn completion_skips_blank_and_repeated_iccids() {
        let remote = ProviderOrder {
            provider_order_id: 7,
            order_number: "ES1".into(),
            status: ProviderOrderStatus::Completed,
            order_items: vec![json!({"productId": 1})],
            esims: vec![esim("8901"), esim(""), esim("8901"), esim("8902")],
            raw: json!({"orderNumber": "ES1", "esims": [{"iccid": "8901"}]}),
        };
        let completion = completion_from_provider(&remote);
        assert_eq!(completion.cards.len(), 2);
        assert_eq!(completion.cards[1].iccid, "8902");
        assert_eq!(completion.cards[0].provider_order_id.as_deref(), Some("900"));
        assert_eq!(completion.items, json!([{"productId": 1}]));
        assert_eq!(completion.esims, json!([{"iccid": "8901"}]));
    }

    #[test]
    fn price_tolerance_is_one_cent() {
        assert_eq!(PRICE_TOLERANCE, "0.01".parse().unwrap());
    }
}
