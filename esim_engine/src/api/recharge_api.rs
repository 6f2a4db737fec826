//! The Deposit Reconciliation Engine.
//!
//! Every recharge order carries an *exact amount*: the nominal amount plus a random tag of up to 0.9999. Deposits all
//! land on one shared address, and the tag is what ties an incoming transfer back to the order that expects it.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use tokio_util::sync::CancellationToken;

use crate::{
    api::objects::{random_tag_source, RechargeConfig, ReconciliationSummary, TagSource},
    chain::{amount_match, ChainError, ChainObserver, ChainTransfer, TransferStatus},
    db_types::{Amount, NewRechargeOrder, RechargeOrder, RechargeStatus},
    helpers::{new_order_no, retry_with_backoff, RetryPolicy, RECHARGE_ORDER_PREFIX},
    notifier::Notifier,
    traits::{clamp_page, RechargeError, RechargeManagement},
};

/// How many tags are tried before giving up on finding a free exact amount.
pub const MAX_TAG_ATTEMPTS: usize = 100;
/// Nominal amounts may have at most this many fractional digits; the digits below are reserved for the tag.
pub const NOMINAL_DECIMALS: u32 = 2;
pub const TAG_DECIMALS: u32 = 4;

#[derive(Clone)]
pub struct RechargeFlowApi<B, C, N> {
    db: B,
    chain: C,
    notifier: N,
    config: RechargeConfig,
    tags: TagSource,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<B, C, N> Debug for RechargeFlowApi<B, C, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RechargeFlowApi ({})", self.config.deposit_address)
    }
}

impl<B, C, N> RechargeFlowApi<B, C, N> {
    pub fn new(db: B, chain: C, notifier: N, config: RechargeConfig) -> Self {
        Self {
            db,
            chain,
            notifier,
            config,
            tags: random_tag_source(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tag_source(mut self, tags: TagSource) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Chain query backoff stops waiting when this token is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RechargeConfig {
        &self.config
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    fn next_exact_amount(&self, nominal: Amount) -> Amount {
        let tag = i64::from((self.tags)() % 10_000);
        nominal + Amount::from_scaled(tag, TAG_DECIMALS)
    }
}

impl<B, C, N> RechargeFlowApi<B, C, N>
where
    B: RechargeManagement,
    C: ChainObserver,
    N: Notifier,
{
    /// Opens a PENDING recharge order for `amount`, tagged with a unique exact amount.
    pub async fn create_recharge(
        &self,
        user_id: i64,
        amount: Amount,
        remark: Option<String>,
    ) -> Result<RechargeOrder, RechargeError> {
        if !amount.has_at_most_decimals(NOMINAL_DECIMALS) {
            return Err(RechargeError::InvalidFormat(format!(
                "{amount} has more than {NOMINAL_DECIMALS} decimal places"
            )));
        }
        if amount < self.config.min_amount || amount > self.config.max_amount {
            return Err(RechargeError::InvalidAmount {
                amount,
                min: self.config.min_amount,
                max: self.config.max_amount,
            });
        }
        for attempt in 1..=MAX_TAG_ATTEMPTS {
            let exact_amount = self.next_exact_amount(amount);
            if self.db.exact_amount_in_use(exact_amount).await? {
                trace!("🔄️ Exact amount {exact_amount} is taken (attempt {attempt})");
                continue;
            }
            let now = Utc::now();
            let order = NewRechargeOrder {
                order_no: new_order_no(RECHARGE_ORDER_PREFIX, now),
                user_id,
                amount,
                exact_amount,
                deposit_address: self.config.deposit_address.clone(),
                remark: remark.clone(),
                expires_at: now + self.config.order_expiry,
            };
            match self.db.insert_recharge_order(order).await {
                Ok(order) => {
                    info!(
                        "🔄️ Recharge order {} created for user {user_id}: {} (pay exactly {})",
                        order.order_no,
                        order.amount,
                        order.exact_amount.format_dp(TAG_DECIMALS)
                    );
                    return Ok(order);
                },
                Err(RechargeError::ExactAmountTaken(_) | RechargeError::DuplicateOrderNo(_)) => {
                    debug!("🔄️ Lost a race for exact amount {exact_amount} (attempt {attempt}). Retrying.");
                },
                Err(e) => return Err(e),
            }
        }
        warn!("🔄️ Could not find a free exact amount for {amount} after {MAX_TAG_ATTEMPTS} attempts");
        Err(RechargeError::GenerateExactAmount(MAX_TAG_ATTEMPTS))
    }

    /// Fetches a recharge order on behalf of `user_id`.
    pub async fn get_recharge(&self, order_no: &str, user_id: i64) -> Result<RechargeOrder, RechargeError> {
        let order = self
            .db
            .fetch_recharge_order(order_no)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_no.to_string()))?;
        if order.user_id != user_id {
            return Err(RechargeError::Forbidden(order_no.to_string()));
        }
        Ok(order)
    }

    pub async fn recharge_history(
        &self,
        user_id: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<(Vec<RechargeOrder>, i64), RechargeError> {
        let (limit, offset) = clamp_page(limit, offset);
        self.db.fetch_recharge_orders_for_user(user_id, limit, offset).await
    }

    /// Re-evaluates one order immediately and returns its refreshed state.
    pub async fn check(&self, order_no: &str) -> Result<RechargeOrder, RechargeError> {
        let order = self
            .db
            .fetch_recharge_order(order_no)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_no.to_string()))?;
        self.evaluate(order).await
    }

    /// [`Self::check`], after verifying that the order belongs to `user_id`.
    pub async fn check_for_user(&self, order_no: &str, user_id: i64) -> Result<RechargeOrder, RechargeError> {
        let order = self.get_recharge(order_no, user_id).await?;
        self.evaluate(order).await
    }

    /// Operator action: PENDING -> FAILED.
    pub async fn fail_recharge(&self, order_no: &str, reason: &str) -> Result<RechargeOrder, RechargeError> {
        self.db.fail_recharge_order(order_no, reason).await
    }

    /// Expires every PENDING order whose deadline has passed.
    pub async fn expire_old(&self) -> Result<Vec<RechargeOrder>, RechargeError> {
        self.db.expire_recharge_orders(Utc::now()).await
    }

    /// One reconciliation pass: expire stale orders, then match every remaining PENDING order against a single
    /// snapshot of recent deposits. A chain outage makes the pass a no-op.
    pub async fn process_pending(&self) -> Result<ReconciliationSummary, RechargeError> {
        let mut summary = ReconciliationSummary { expired: self.expire_old().await?.len(), ..Default::default() };
        let pending = self.db.fetch_pending_recharge_orders().await?;
        let Some(min_amount) = pending.iter().map(|o| o.amount).min() else {
            trace!("🔄️ No pending recharge orders");
            return Ok(summary);
        };
        let transfers = match self.fetch_transfers(min_amount).await {
            Ok(t) => t,
            Err(e) => {
                warn!("🔄️ Skipping reconciliation of {} orders this round. {e}", pending.len());
                summary.pending = pending.len();
                return Ok(summary);
            },
        };
        for order in pending {
            if self.cancel.is_cancelled() {
                debug!("🔄️ Reconciliation interrupted by shutdown");
                break;
            }
            let order_no = order.order_no.clone();
            match self.evaluate_against(order, &transfers).await {
                Ok(o) if o.status == RechargeStatus::Confirmed => summary.confirmed += 1,
                Ok(o) if o.status == RechargeStatus::Expired => summary.expired += 1,
                Ok(o) if o.status == RechargeStatus::Pending => summary.pending += 1,
                Ok(_) => {},
                Err(e) => warn!("🔄️ Could not reconcile recharge order {order_no}. {e}"),
            }
        }
        debug!(
            "🔄️ Reconciliation pass complete. {} confirmed, {} expired, {} still pending",
            summary.confirmed, summary.expired, summary.pending
        );
        Ok(summary)
    }

    /// Evaluates a single order, querying the chain for it alone.
    async fn evaluate(&self, order: RechargeOrder) -> Result<RechargeOrder, RechargeError> {
        if order.status != RechargeStatus::Pending {
            return Ok(order);
        }
        if let Some(expired) = self.expire_if_due(&order).await? {
            return Ok(expired);
        }
        let transfers = self.fetch_transfers(order.amount).await?;
        self.evaluate_against(order, &transfers).await
    }

    async fn expire_if_due(&self, order: &RechargeOrder) -> Result<Option<RechargeOrder>, RechargeError> {
        let now = Utc::now();
        if !order.is_expired_at(now) {
            return Ok(None);
        }
        match self.db.expire_recharge_order(&order.order_no, now).await? {
            Some(expired) => {
                info!("🔄️ Recharge order {} expired unpaid", expired.order_no);
                Ok(Some(expired))
            },
            // Someone else changed it first. Report whatever it is now.
            None => self.db.fetch_recharge_order(&order.order_no).await,
        }
    }

    /// Matches one PENDING order against a set of observed transfers, confirming it on the first transfer that
    /// matches the exact amount and is deep enough.
    async fn evaluate_against(
        &self,
        order: RechargeOrder,
        transfers: &[ChainTransfer],
    ) -> Result<RechargeOrder, RechargeError> {
        if order.status != RechargeStatus::Pending {
            return Ok(order);
        }
        if let Some(expired) = self.expire_if_due(&order).await? {
            return Ok(expired);
        }
        let required = self.config.required_confirmations;
        let mut deepest_unconfirmed: Option<i64> = None;
        let candidates = transfers.iter().filter(|t| {
            t.status != TransferStatus::Failed &&
                t.to == self.config.deposit_address &&
                amount_match(t.amount, order.exact_amount)
        });
        for transfer in candidates {
            if transfer.confirmations < required {
                trace!(
                    "🔄️ Transfer {} for {} has {}/{required} confirmations",
                    transfer.tx_hash,
                    order.order_no,
                    transfer.confirmations
                );
                deepest_unconfirmed = deepest_unconfirmed.max(Some(transfer.confirmations));
                continue;
            }
            match self.confirm(&order, transfer).await {
                Ok(confirmed) => return Ok(confirmed),
                Err(e) if e.is_conflict() => {
                    warn!("🔄️ Transfer {} not applied to {}. {e}", transfer.tx_hash, order.order_no);
                },
                Err(e) => return Err(e),
            }
        }
        if let Some(confirmations) = deepest_unconfirmed.filter(|c| *c != order.confirmations) {
            self.db.update_confirmations(&order.order_no, confirmations).await?;
        }
        let refreshed = self.db.fetch_recharge_order(&order.order_no).await?;
        Ok(refreshed.unwrap_or(order))
    }

    async fn confirm(&self, order: &RechargeOrder, transfer: &ChainTransfer) -> Result<RechargeOrder, RechargeError> {
        let (confirmed, _) =
            self.db.confirm_recharge(&order.order_no, &transfer.tx_hash, transfer.confirmations).await?;
        if let Err(e) = self.notifier.send_recharge_success(confirmed.user_id, confirmed.amount, &confirmed.order_no).await
        {
            warn!("📬️ Could not notify user {} about recharge {}. {e}", confirmed.user_id, confirmed.order_no);
        }
        Ok(confirmed)
    }

    /// Recent transfers into the deposit address, retrying transport errors with backoff, all within the chain
    /// timeout.
    async fn fetch_transfers(&self, min_amount: Amount) -> Result<Vec<ChainTransfer>, RechargeError> {
        let address = self.config.deposit_address.as_str();
        let query = retry_with_backoff("chain query", &self.retry, &self.cancel, ChainError::is_retryable, || {
            self.chain.get_incoming(address, min_amount)
        });
        match tokio::time::timeout(self.config.chain_timeout, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RechargeError::ChainQuery(ChainError::Timeout)),
        }
    }
}
