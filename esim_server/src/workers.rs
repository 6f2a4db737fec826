//! Background tickers: deposit reconciliation, recharge expiry and order sync.
//!
//! Each ticker runs its task once per interval. A tick that overruns the interval delays the next one; ticks of the
//! same task never overlap. When the shared [`CancellationToken`] is cancelled the current tick is allowed to finish
//! and no new tick starts. A tick that panics is logged and the ticker carries on.
use std::{future::Future, time::Duration};

use esim_engine::{
    chain::TronGridObserver,
    db_types::RechargeOrder,
    events::{EventHooks, OrderPaidEvent},
    notifier::ConfiguredNotifier,
    provider::EsimProviderClient,
    OrderFlowApi,
    RechargeFlowApi,
    SqliteDatabase,
};
use log::*;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type RechargeApi = RechargeFlowApi<SqliteDatabase, TronGridObserver, ConfiguredNotifier>;
pub type OrderApi = OrderFlowApi<SqliteDatabase, EsimProviderClient, ConfiguredNotifier>;

/// Starts a ticker. The returned handle resolves once `cancel` has fired and the last tick has finished.
pub fn start_ticker<F, Fut>(name: &'static str, interval: Duration, cancel: CancellationToken, task: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🕰️ {name} worker started. Interval: {}s", interval.as_secs_f64());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {},
            }
            trace!("🕰️ Running {name} job");
            if let Err(e) = tokio::spawn(task()).await {
                if e.is_panic() {
                    error!("🕰️ The {name} job panicked. The worker will try again on the next tick. {e}");
                } else {
                    warn!("🕰️ The {name} job was aborted. {e}");
                }
            }
        }
        info!("🕰️ {name} worker stopped");
    })
}

/// Matches pending recharge orders against recent deposits.
pub fn start_reconciliation_worker(api: RechargeApi, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    start_ticker("Reconciliation", interval, cancel, move || {
        let api = api.clone();
        async move {
            match api.process_pending().await {
                Ok(summary) if summary.confirmed + summary.expired > 0 => info!(
                    "🕰️ Reconciliation: {} confirmed, {} expired, {} still pending",
                    summary.confirmed, summary.expired, summary.pending
                ),
                Ok(summary) => debug!("🕰️ Reconciliation: {} orders still pending", summary.pending),
                Err(e) => error!("🕰️ Error running reconciliation job: {e}"),
            }
        }
    })
}

/// Cancels recharge orders whose payment window has closed.
pub fn start_expiry_worker(api: RechargeApi, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    start_ticker("Recharge expiry", interval, cancel, move || {
        let api = api.clone();
        async move {
            match api.expire_old().await {
                Ok(expired) if expired.is_empty() => trace!("🕰️ No recharge orders expired"),
                Ok(expired) => {
                    info!("🕰️ {} recharge orders expired", expired.len());
                    debug!("🕰️ Expired recharge orders: {}", order_list(&expired));
                },
                Err(e) => error!("🕰️ Error running recharge expiry job: {e}"),
            }
        }
    })
}

/// Submits paid orders and polls the provider for the ones in flight.
pub fn start_order_sync_worker(api: OrderApi, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    start_ticker("Order sync", interval, cancel, move || {
        let api = api.clone();
        async move {
            match api.process_pending_orders().await {
                Ok(s) if s.submitted + s.completed + s.failed > 0 => info!(
                    "🕰️ Order sync: {} submitted, {} completed, {} failed, {} in flight",
                    s.submitted, s.completed, s.failed, s.in_flight
                ),
                Ok(s) => trace!("🕰️ Order sync: {} orders in flight", s.in_flight),
                Err(e) => error!("🕰️ Error running order sync job: {e}"),
            }
        }
    })
}

/// Submits newly paid orders to the provider as soon as the payment commits. If this fails, the order-sync ticker
/// picks the order up later.
pub fn order_paid_hook(api: OrderApi) -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(move |ev: OrderPaidEvent| {
        let api = api.clone();
        Box::pin(async move {
            let order = ev.order;
            debug!("📬️ Order {} paid. Submitting it to the provider", order.order_no);
            match api.submit_order(order.id).await {
                Ok(result) => {
                    debug!("📬️ Submission of order {}: {} ({})", order.order_no, result.message, result.new_status)
                },
                Err(e) => warn!("📬️ Could not submit order {}. It will be retried. {e}", order.order_no),
            }
        })
    });
    hooks
}

fn order_list(orders: &[RechargeOrder]) -> String {
    orders
        .iter()
        .map(|o| format!("[{}] order_no: {} user: {}", o.id, o.order_no, o.user_id))
        .collect::<Vec<String>>()
        .join(", ")
}
