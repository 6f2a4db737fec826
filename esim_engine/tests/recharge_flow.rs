use std::time::Duration;

use esim_engine::{
    chain::ChainError,
    db_types::{Amount, HistoryKind, RechargeStatus},
    helpers::RetryPolicy,
    objects::RechargeConfig,
    test_utils::{
        mocks::{fixed_tag_source, transfer, MockChain, Notification, RecordingNotifier, DEPOSIT_ADDRESS},
        prepare_env::new_test_db,
        seed::seed_user,
    },
    traits::{HistoryFilter, RechargeError, RechargeManagement, WalletManagement},
    RechargeFlowApi,
    SqliteDatabase,
};

type Api = RechargeFlowApi<SqliteDatabase, MockChain, RecordingNotifier>;

fn amt(s: &str) -> Amount {
    s.parse().unwrap()
}

fn config() -> RechargeConfig {
    RechargeConfig {
        deposit_address: DEPOSIT_ADDRESS.to_string(),
        chain_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn setup(config: RechargeConfig, tags: Vec<u32>) -> (SqliteDatabase, MockChain, RecordingNotifier, Api) {
    let db = new_test_db().await;
    seed_user(&db, 1, Amount::ZERO).await;
    seed_user(&db, 2, Amount::ZERO).await;
    let chain = MockChain::new();
    let notifier = RecordingNotifier::new();
    let api = RechargeFlowApi::new(db.clone(), chain.clone(), notifier.clone(), config)
        .with_tag_source(fixed_tag_source(tags))
        .with_retry_policy(RetryPolicy::no_delay(3));
    (db, chain, notifier, api)
}

#[tokio::test]
async fn new_recharge_orders_carry_a_tagged_amount() {
    let (_db, _chain, _notifier, api) = setup(config(), vec![1234, 1234, 77]).await;
    let order = api.create_recharge(1, amt("100"), Some("first top-up".into())).await.unwrap();
    assert_eq!(order.status, RechargeStatus::Pending);
    assert_eq!(order.amount, amt("100"));
    assert_eq!(order.exact_amount, amt("100.1234"));
    assert_eq!(order.deposit_address, DEPOSIT_ADDRESS);
    assert!(order.order_no.starts_with("RCH"));
    let ttl = order.expires_at - order.created_at;
    assert!((ttl - chrono::Duration::minutes(30)).num_seconds().abs() <= 1);

    // 100.1234 is taken, so the next order for the same amount skips to the next tag
    let second = api.create_recharge(2, amt("100"), None).await.unwrap();
    assert_eq!(second.exact_amount, amt("100.0077"));

    let fetched = api.get_recharge(&order.order_no, 1).await.unwrap();
    assert_eq!(fetched, order);
    assert!(matches!(api.get_recharge(&order.order_no, 2).await, Err(RechargeError::Forbidden(_))));
    assert!(matches!(api.get_recharge("RCH-nope", 1).await, Err(RechargeError::OrderNotFound(_))));
}

#[tokio::test]
async fn out_of_range_and_malformed_amounts_are_rejected() {
    let (db, _chain, _notifier, api) = setup(config(), vec![1]).await;
    for bad in ["9.99", "10000.01", "0", "-50"] {
        let err = api.create_recharge(1, amt(bad), None).await.unwrap_err();
        assert!(matches!(err, RechargeError::InvalidAmount { .. }), "{bad} gave {err}");
    }
    let err = api.create_recharge(1, amt("10.005"), None).await.unwrap_err();
    assert!(matches!(err, RechargeError::InvalidFormat(_)));
    // Boundaries are inclusive
    api.create_recharge(1, amt("10"), None).await.unwrap();
    api.create_recharge(1, amt("10000"), None).await.unwrap();
    assert_eq!(db.fetch_pending_recharge_orders().await.unwrap().len(), 2);
}

#[tokio::test]
async fn tag_space_exhaustion_is_reported() {
    let (_db, _chain, _notifier, api) = setup(config(), vec![5]).await;
    api.create_recharge(1, amt("50"), None).await.unwrap();
    let err = api.create_recharge(1, amt("50"), None).await.unwrap_err();
    assert!(matches!(err, RechargeError::GenerateExactAmount(100)));
    // A different nominal amount does not collide
    let other = api.create_recharge(1, amt("51"), None).await.unwrap();
    assert_eq!(other.exact_amount, amt("51.0005"));
}

#[tokio::test]
async fn deep_enough_deposit_confirms_and_credits_once() {
    let (db, chain, notifier, api) = setup(config(), vec![1234]).await;
    let order = api.create_recharge(1, amt("100"), None).await.unwrap();
    chain.push_transfer(transfer("0xfeed", "100.1234", 19));

    let confirmed = api.check(&order.order_no).await.unwrap();
    assert_eq!(confirmed.status, RechargeStatus::Confirmed);
    assert_eq!(confirmed.tx_hash.as_deref(), Some("0xfeed"));
    assert_eq!(confirmed.confirmations, 19);
    assert!(confirmed.confirmed_at.is_some());

    let wallet = db.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, amt("100"));
    assert_eq!(wallet.total_income, amt("100"));
    let (rows, _) = db.fetch_history(1, HistoryFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, HistoryKind::Recharge);
    assert_eq!(rows[0].tx_hash.as_deref(), Some("0xfeed"));
    assert_eq!(rows[0].related_type.as_deref(), Some("recharge_order"));
    assert_eq!(rows[0].related_id.as_deref(), Some(order.order_no.as_str()));
    assert_eq!(notifier.sent(), vec![Notification::RechargeSuccess {
        user_id: 1,
        amount: amt("100"),
        order_no: order.order_no.clone()
    }]);

    // Checking again, or another reconciliation pass, changes nothing
    let again = api.check(&order.order_no).await.unwrap();
    assert_eq!(again.status, RechargeStatus::Confirmed);
    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.confirmed, 0);
    let err = db.confirm_recharge(&order.order_no, "0xfeed", 30).await.unwrap_err();
    assert!(matches!(err, RechargeError::AlreadyProcessed { .. }));
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, amt("100"));
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn shallow_deposits_only_update_the_confirmation_count() {
    let (db, chain, notifier, api) = setup(config(), vec![4321]).await;
    let order = api.create_recharge(1, amt("25"), None).await.unwrap();
    chain.push_transfer(transfer("0x01", "25.4321", 3));
    chain.push_transfer(transfer("0x02", "25.4321", 7));
    chain.push_transfer(transfer("0x03", "99.9999", 40));

    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.confirmed, 0);
    let pending = api.check(&order.order_no).await.unwrap();
    assert_eq!(pending.status, RechargeStatus::Pending);
    assert_eq!(pending.confirmations, 7);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, Amount::ZERO);
    assert!(notifier.sent().is_empty());

    chain.set_transfers(vec![transfer("0x02", "25.4321", 19)]);
    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.confirmed, 1);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, amt("25"));
}

#[tokio::test]
async fn confirmation_threshold_is_inclusive() {
    let (db, chain, notifier, api) = setup(config(), vec![5]).await;
    let order = api.create_recharge(1, amt("50"), None).await.unwrap();
    chain.push_transfer(transfer("0xedge", "50.0005", 18));
    let pending = api.check(&order.order_no).await.unwrap();
    assert_eq!(pending.status, RechargeStatus::Pending);
    assert_eq!(pending.confirmations, 18);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, Amount::ZERO);
    assert!(notifier.sent().is_empty());

    chain.set_transfers(vec![transfer("0xedge", "50.0005", 19)]);
    let confirmed = api.check(&order.order_no).await.unwrap();
    assert_eq!(confirmed.status, RechargeStatus::Confirmed);
    assert_eq!(confirmed.confirmations, 19);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, amt("50"));
}

#[tokio::test]
async fn deposits_to_other_addresses_or_failed_transfers_are_ignored() {
    let (db, chain, _notifier, api) = setup(config(), vec![10]).await;
    let order = api.create_recharge(1, amt("20"), None).await.unwrap();
    let mut failed = transfer("0xbad", "20.001", 50);
    failed.status = esim_engine::chain::TransferStatus::Failed;
    chain.push_transfer(failed);
    let checked = api.check(&order.order_no).await.unwrap();
    assert_eq!(checked.status, RechargeStatus::Pending);
    // The nominal amount without the tag does not match either
    chain.set_transfers(vec![transfer("0xnominal", "20", 50)]);
    let checked = api.check(&order.order_no).await.unwrap();
    assert_eq!(checked.status, RechargeStatus::Pending);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn a_tx_hash_cannot_confirm_two_orders() {
    let (db, chain, _notifier, api) = setup(config(), vec![1, 2]).await;
    let first = api.create_recharge(1, amt("30"), None).await.unwrap();
    let second = api.create_recharge(2, amt("40"), None).await.unwrap();
    chain.push_transfer(transfer("0xsame", "30.0001", 20));
    assert_eq!(api.check(&first.order_no).await.unwrap().status, RechargeStatus::Confirmed);

    // A misbehaving observer reports the same hash for the second order's amount
    chain.set_transfers(vec![transfer("0xsame", "40.0002", 20)]);
    let checked = api.check(&second.order_no).await.unwrap();
    assert_eq!(checked.status, RechargeStatus::Pending);
    let err = db.confirm_recharge(&second.order_no, "0xsame", 20).await.unwrap_err();
    assert!(matches!(err, RechargeError::TxHashReused(_)));
    assert_eq!(db.fetch_wallet(2).await.unwrap().unwrap().balance, Amount::ZERO);
}

#[tokio::test]
async fn stale_orders_expire_and_cannot_be_confirmed() {
    let config = RechargeConfig { order_expiry: chrono::Duration::milliseconds(20), ..config() };
    let (db, chain, _notifier, api) = setup(config, vec![55]).await;
    let order = api.create_recharge(1, amt("15"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The money arrives too late
    chain.push_transfer(transfer("0xlate", "15.0055", 30));

    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(chain.calls(), 0, "no pending orders means no chain query");
    let expired = api.check(&order.order_no).await.unwrap();
    assert_eq!(expired.status, RechargeStatus::Expired);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, Amount::ZERO);

    let err = api.fail_recharge(&order.order_no, "manual").await.unwrap_err();
    assert!(matches!(err, RechargeError::OrderExpired(_)));
    // Its exact amount is free again
    assert!(!db.exact_amount_in_use(amt("15.0055")).await.unwrap());
}

#[tokio::test]
async fn operators_can_fail_pending_orders() {
    let (_db, chain, _notifier, api) = setup(config(), vec![9, 8]).await;
    let order = api.create_recharge(1, amt("12"), None).await.unwrap();
    let failed = api.fail_recharge(&order.order_no, "wrong network").await.unwrap();
    assert_eq!(failed.status, RechargeStatus::Failed);
    assert_eq!(failed.remark.as_deref(), Some("wrong network"));
    let err = api.fail_recharge(&order.order_no, "again").await.unwrap_err();
    assert!(matches!(err, RechargeError::AlreadyProcessed { .. }));

    let paid = api.create_recharge(1, amt("12"), None).await.unwrap();
    chain.push_transfer(transfer("0x12", "12.0008", 19));
    api.check(&paid.order_no).await.unwrap();
    let err = api.fail_recharge(&paid.order_no, "too late").await.unwrap_err();
    assert!(matches!(err, RechargeError::OrderCompleted(_)));
}

#[tokio::test]
async fn chain_outages_skip_the_pass() {
    let (db, chain, _notifier, api) = setup(config(), vec![3]).await;
    let api = api.with_retry_policy(RetryPolicy::no_delay(1));
    let order = api.create_recharge(1, amt("60"), None).await.unwrap();
    chain.push_transfer(transfer("0x60", "60.0003", 19));
    chain.fail_next(ChainError::Transport("connection reset".into()));

    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.confirmed, 0);
    assert_eq!(db.fetch_recharge_order(&order.order_no).await.unwrap().unwrap().status, RechargeStatus::Pending);

    // The next pass sees the deposit
    let summary = api.process_pending().await.unwrap();
    assert_eq!(summary.confirmed, 1);
}

#[tokio::test]
async fn transient_chain_errors_are_retried() {
    let (_db, chain, _notifier, api) = setup(config(), vec![3]).await;
    let order = api.create_recharge(1, amt("60"), None).await.unwrap();
    chain.push_transfer(transfer("0x60", "60.0003", 19));
    chain.fail_next(ChainError::Transport("connection reset".into()));
    chain.fail_next(ChainError::Http { status: 503, body: "busy".into() });

    let checked = api.check(&order.order_no).await.unwrap();
    assert_eq!(checked.status, RechargeStatus::Confirmed);
    assert_eq!(chain.calls(), 3);

    // Decode errors are not worth retrying
    let next = api.create_recharge(1, amt("61"), None).await.unwrap();
    chain.fail_next(ChainError::Decode("garbage".into()));
    let err = api.check(&next.order_no).await.unwrap_err();
    assert!(matches!(err, RechargeError::ChainQuery(ChainError::Decode(_))));
    assert_eq!(chain.calls(), 4);
}

#[tokio::test]
async fn slow_chain_queries_time_out() {
    let config = RechargeConfig { chain_timeout: Duration::from_millis(50), ..config() };
    let db = new_test_db().await;
    seed_user(&db, 1, Amount::ZERO).await;
    let chain = MockChain::new().with_delay(Duration::from_millis(500));
    let api = RechargeFlowApi::new(db.clone(), chain, RecordingNotifier::new(), config)
        .with_tag_source(fixed_tag_source(vec![1]));
    let order = api.create_recharge(1, amt("10"), None).await.unwrap();
    let err = api.check(&order.order_no).await.unwrap_err();
    assert!(matches!(err, RechargeError::ChainQuery(ChainError::Timeout)));
}

#[tokio::test]
async fn notification_failures_do_not_undo_the_credit() {
    let db = new_test_db().await;
    seed_user(&db, 1, Amount::ZERO).await;
    let chain = MockChain::new();
    let notifier = RecordingNotifier::failing();
    let api = RechargeFlowApi::new(db.clone(), chain.clone(), notifier.clone(), config())
        .with_tag_source(fixed_tag_source(vec![42]));
    let order = api.create_recharge(1, amt("10"), None).await.unwrap();
    chain.push_transfer(transfer("0x42", "10.0042", 25));
    let confirmed = api.check(&order.order_no).await.unwrap();
    assert_eq!(confirmed.status, RechargeStatus::Confirmed);
    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(db.fetch_wallet(1).await.unwrap().unwrap().balance, amt("10"));
}

#[tokio::test]
async fn recharge_history_is_paged_per_user() {
    let (_db, _chain, _notifier, api) = setup(config(), (0..20).collect()).await;
    for _ in 0..5 {
        api.create_recharge(1, amt("10"), None).await.unwrap();
    }
    api.create_recharge(2, amt("10"), None).await.unwrap();
    let (orders, total) = api.recharge_history(1, Some(2), Some(1)).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.user_id == 1));
    let (orders, total) = api.recharge_history(2, None, None).await.unwrap();
    assert_eq!((orders.len(), total), (1, 1));
}
