//! Scripted stand-ins for the chain observer, the eSIM provider and the notifier.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use chrono::Utc;

use crate::{
    api::objects::TagSource,
    chain::{ChainError, ChainObserver, ChainTransfer, TransferStatus},
    db_types::{Amount, Order},
    notifier::{Notifier, NotifyError},
    provider::{
        EsimUsage,
        ProviderClient,
        ProviderCreateOrder,
        ProviderError,
        ProviderEsim,
        ProviderOrder,
        ProviderOrderAck,
        ProviderOrderStatus,
    },
};

pub const DEPOSIT_ADDRESS: &str = "TTestDepositAddress";

/// Cycles through `tags` forever.
pub fn fixed_tag_source(tags: Vec<u32>) -> TagSource {
    let next = AtomicUsize::new(0);
    Arc::new(move || {
        let i = next.fetch_add(1, Ordering::SeqCst);
        tags[i % tags.len()]
    })
}

/// Pops scripted responses in order. The last one stays and is repeated.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

//--------------------------------------       MockChain        -----------------------------------------------------
#[derive(Default)]
struct ChainScript {
    transfers: Vec<ChainTransfer>,
    failures: VecDeque<ChainError>,
    calls: usize,
    delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MockChain {
    script: Arc<Mutex<ChainScript>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transfers(&self, transfers: Vec<ChainTransfer>) {
        self.script.lock().unwrap().transfers = transfers;
    }

    pub fn push_transfer(&self, transfer: ChainTransfer) {
        self.script.lock().unwrap().transfers.push(transfer);
    }

    /// The next call fails with `e`. Queued failures are used up before transfers are returned again.
    pub fn fail_next(&self, e: ChainError) {
        self.script.lock().unwrap().failures.push_back(e);
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls
    }
}

impl ChainObserver for MockChain {
    async fn get_incoming(&self, address: &str, min_amount: Amount) -> Result<Vec<ChainTransfer>, ChainError> {
        let (delay, result) = {
            let mut script = self.script.lock().unwrap();
            script.calls += 1;
            let result = match script.failures.pop_front() {
                Some(e) => Err(e),
                None => Ok(script
                    .transfers
                    .iter()
                    .filter(|t| t.to == address && t.amount >= min_amount)
                    .cloned()
                    .collect()),
            };
            (script.delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// A successful transfer into the test deposit address.
pub fn transfer(tx_hash: &str, amount: &str, confirmations: i64) -> ChainTransfer {
    ChainTransfer {
        tx_hash: tx_hash.to_string(),
        from: "TSender".to_string(),
        to: DEPOSIT_ADDRESS.to_string(),
        amount: amount.parse().unwrap(),
        confirmations,
        block_height: 1_000,
        timestamp: Utc::now(),
        status: TransferStatus::Confirmed,
    }
}

//--------------------------------------     MockProvider       -----------------------------------------------------
#[derive(Default)]
struct ProviderScript {
    acks: VecDeque<Result<ProviderOrderAck, ProviderError>>,
    orders: VecDeque<Result<ProviderOrder, ProviderError>>,
    usage: VecDeque<Result<EsimUsage, ProviderError>>,
    created: Vec<ProviderCreateOrder>,
    polled: Vec<String>,
    delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<ProviderScript>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ack(&self, ack: Result<ProviderOrderAck, ProviderError>) {
        self.script.lock().unwrap().acks.push_back(ack);
    }

    pub fn push_order(&self, order: Result<ProviderOrder, ProviderError>) {
        self.script.lock().unwrap().orders.push_back(order);
    }

    pub fn push_usage(&self, usage: Result<EsimUsage, ProviderError>) {
        self.script.lock().unwrap().usage.push_back(usage);
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    /// Every create-order request received so far.
    pub fn created(&self) -> Vec<ProviderCreateOrder> {
        self.script.lock().unwrap().created.clone()
    }

    pub fn polled(&self) -> Vec<String> {
        self.script.lock().unwrap().polled.clone()
    }

    async fn pause(&self) {
        let delay = self.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl ProviderClient for MockProvider {
    async fn create_order(&self, order: &ProviderCreateOrder) -> Result<ProviderOrderAck, ProviderError> {
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        script.created.push(order.clone());
        let n = script.created.len();
        next_scripted(&mut script.acks).unwrap_or_else(|| Ok(ack(&format!("PRV{n:04}"))))
    }

    async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, ProviderError> {
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        script.polled.push(provider_order_id.to_string());
        next_scripted(&mut script.orders)
            .unwrap_or_else(|| Err(ProviderError::Transport("no scripted order response".into())))
    }

    async fn get_esim_usage(&self, _provider_esim_id: &str) -> Result<EsimUsage, ProviderError> {
        self.pause().await;
        let mut script = self.script.lock().unwrap();
        next_scripted(&mut script.usage)
            .unwrap_or_else(|| Err(ProviderError::Transport("no scripted usage response".into())))
    }
}

pub fn ack(order_number: &str) -> ProviderOrderAck {
    ProviderOrderAck {
        provider_order_id: 1,
        order_number: order_number.to_string(),
        status: ProviderOrderStatus::Pending,
    }
}

pub fn provider_esim(iccid: &str) -> ProviderEsim {
    ProviderEsim {
        provider_esim_id: Some(format!("esim-{iccid}")),
        iccid: iccid.to_string(),
        status: Some("ACTIVE".into()),
        activation_code: Some(format!("LPA:1$smdp.example${iccid}")),
        qr_code: None,
        lpa: None,
        apple_url: None,
        activated_at: None,
        expires_at: None,
    }
}

pub fn provider_order(order_number: &str, status: ProviderOrderStatus, iccids: &[&str]) -> ProviderOrder {
    let esims: Vec<ProviderEsim> = iccids.iter().map(|i| provider_esim(i)).collect();
    let raw = serde_json::json!({
        "orderNumber": order_number,
        "status": status.to_string(),
        "esims": esims,
    });
    ProviderOrder {
        provider_order_id: 1,
        order_number: order_number.to_string(),
        status,
        order_items: vec![serde_json::json!({"quantity": iccids.len()})],
        esims,
        raw,
    }
}

//--------------------------------------   RecordingNotifier    -----------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RechargeSuccess { user_id: i64, amount: Amount, order_no: String },
    OrderCompleted { user_id: i64, order_no: String, cards: usize },
    OrderFailed { user_id: i64, order_no: String, reason: String },
}

/// Records every notification. With `failing()`, records and then reports a transport error.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, n: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(n);
        if self.fail {
            Err(NotifyError::Transport("notifier is down".into()))
        } else {
            Ok(())
        }
    }
}

impl Notifier for RecordingNotifier {
    async fn send_recharge_success(&self, user_id: i64, amount: Amount, order_no: &str) -> Result<(), NotifyError> {
        self.record(Notification::RechargeSuccess { user_id, amount, order_no: order_no.to_string() })
    }

    async fn send_order_completed(&self, user_id: i64, order: &Order, card_count: usize) -> Result<(), NotifyError> {
        self.record(Notification::OrderCompleted { user_id, order_no: order.order_no.clone(), cards: card_count })
    }

    async fn send_order_failed(&self, user_id: i64, order: &Order, reason: &str) -> Result<(), NotifyError> {
        self.record(Notification::OrderFailed {
            user_id,
            order_no: order.order_no.clone(),
            reason: reason.to_string(),
        })
    }
}
