//! Racing evaluators and spenders against one SQLite file.
use esim_engine::{
    db_types::{Amount, HistoryKind, LedgerEntry, RechargeStatus},
    events::EventProducers,
    helpers::RetryPolicy,
    objects::{NewEsimOrderRequest, OrderConfig, RechargeConfig},
    test_utils::{
        mocks::{fixed_tag_source, transfer, MockChain, MockProvider, RecordingNotifier, DEPOSIT_ADDRESS},
        prepare_env::new_test_db,
        seed::{seed_product, seed_user},
    },
    traits::{OrderError, WalletManagement},
    OrderFlowApi,
    RechargeFlowApi,
};
use futures_util::future::join_all;

fn amt(s: &str) -> Amount {
    s.parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_credit_a_deposit_once() {
    let db = new_test_db().await;
    seed_user(&db, 1, Amount::ZERO).await;
    let chain = MockChain::new();
    let notifier = RecordingNotifier::new();
    let config = RechargeConfig { deposit_address: DEPOSIT_ADDRESS.to_string(), ..Default::default() };
    let api = RechargeFlowApi::new(db.clone(), chain.clone(), notifier.clone(), config)
        .with_tag_source(fixed_tag_source(vec![777]))
        .with_retry_policy(RetryPolicy::no_delay(1));
    let order = api.create_recharge(1, amt("100"), None).await.unwrap();
    chain.push_transfer(transfer("0xburst", "100.0777", 25));

    let checks = (0..10).map(|_| api.check(&order.order_no));
    let passes = (0..3).map(|_| async { api.process_pending().await.map(|_| ()) });
    let (checks, passes) = tokio::join!(join_all(checks), join_all(passes));
    for result in checks {
        assert_eq!(result.unwrap().status, RechargeStatus::Confirmed);
    }
    passes.into_iter().for_each(|r| r.unwrap());

    let wallet = db.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, amt("100"));
    assert_eq!(db.ledger_balance(1).await.unwrap(), amt("100"));
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_never_overdraw() {
    let db = new_test_db().await;
    seed_user(&db, 1, amt("100")).await;
    let product = seed_product(&db, "42", "25").await;
    let api = OrderFlowApi::new(
        db.clone(),
        MockProvider::new(),
        RecordingNotifier::new(),
        EventProducers::default(),
        OrderConfig::default(),
    );
    let attempts = (0..10).map(|_| {
        api.create_esim_order(NewEsimOrderRequest {
            user_id: 1,
            product_id: product.id,
            quantity: 1,
            expected_total: amt("25"),
            customer_email: None,
            remark: None,
        })
    });
    let results = join_all(attempts).await;
    let paid = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(paid, 4);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, OrderError::InsufficientBalance { .. })));
    let wallet = db.fetch_wallet(1).await.unwrap().unwrap();
    assert_eq!(wallet.balance, Amount::ZERO);
    assert_eq!(wallet.total_expense, amt("100"));
    assert_eq!(db.ledger_balance(1).await.unwrap(), Amount::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_credits_and_debits_reconcile() {
    let db = new_test_db().await;
    seed_user(&db, 1, amt("50")).await;
    let credits: Vec<_> = (0..20)
        .map(|i| {
            let db = db.clone();
            tokio::spawn(async move {
                let entry = LedgerEntry::new(1, amt("1.25"), HistoryKind::Recharge, format!("deposit {i}"))
                    .with_tx_hash(format!("0x{i:04}"));
                db.credit(entry).await.map(|_| ())
            })
        })
        .collect();
    let debits: Vec<_> = (0..20)
        .map(|i| {
            let db = db.clone();
            tokio::spawn(async move {
                let entry = LedgerEntry::new(1, amt("3"), HistoryKind::Payment, format!("spend {i}"));
                db.debit(entry).await.map(|_| ())
            })
        })
        .collect();
    let credits = join_all(credits).await;
    let debits = join_all(debits).await;
    assert!(credits.into_iter().all(|r| r.unwrap().is_ok()));
    let spent = debits.into_iter().filter(|r| matches!(r, Ok(Ok(())))).count() as i64;

    let wallet = db.fetch_wallet(1).await.unwrap().unwrap();
    assert!(!wallet.balance.is_negative());
    assert_eq!(wallet.balance, amt("75") - amt("3") * spent);
    assert_eq!(db.ledger_balance(1).await.unwrap(), wallet.balance);
}
