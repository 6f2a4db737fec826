use std::time::Duration;

use actix_web::{http::StatusCode, web, web::ServiceConfig};
use esim_engine::{
    helpers::RetryPolicy,
    objects::RechargeConfig,
    test_utils::{
        mocks::{fixed_tag_source, transfer, MockChain, RecordingNotifier, DEPOSIT_ADDRESS},
        prepare_env::new_test_db,
    },
    RechargeFlowApi,
    SqliteDatabase,
    WalletApi,
};
use serde_json::{json, Value};

use super::helpers::{assert_error, assert_success, get, post};
use crate::routes::{BalanceRoute, CheckRechargeRoute, CreateRechargeRoute, RechargeHistoryRoute, RechargeOrderRoute};

type Db = SqliteDatabase;

struct Fixture {
    db: SqliteDatabase,
    chain: MockChain,
    api: RechargeFlowApi<Db, MockChain, RecordingNotifier>,
}

impl Fixture {
    async fn new() -> Self {
        let db = new_test_db().await;
        let chain = MockChain::new();
        let config = RechargeConfig {
            deposit_address: DEPOSIT_ADDRESS.to_string(),
            chain_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let api = RechargeFlowApi::new(db.clone(), chain.clone(), RecordingNotifier::new(), config)
            .with_tag_source(fixed_tag_source(vec![1234]))
            .with_retry_policy(RetryPolicy::no_delay(1));
        Self { db, chain, api }
    }

    fn routes(&self) -> impl FnOnce(&mut ServiceConfig) {
        let api = self.api.clone();
        let wallets = WalletApi::new(self.db.clone());
        move |cfg| {
            cfg.service(CreateRechargeRoute::<Db, MockChain, RecordingNotifier, Db>::new())
                .service(RechargeHistoryRoute::<Db, MockChain, RecordingNotifier>::new())
                .service(RechargeOrderRoute::<Db, MockChain, RecordingNotifier>::new())
                .service(CheckRechargeRoute::<Db, MockChain, RecordingNotifier>::new())
                .service(BalanceRoute::<Db>::new())
                .app_data(web::Data::new(api))
                .app_data(web::Data::new(wallets));
        }
    }

    async fn create(&self, user_id: i64, amount: Value) -> Value {
        let body = json!({ "amount": amount, "remark": "top-up" });
        let (status, body) = post("/api/miniapp/wallet/recharge", user_id, Some(body), self.routes()).await;
        assert_success(status, body)
    }
}

#[actix_web::test]
async fn create_and_fetch_recharge() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let order = fx.create(42, json!("100")).await;
    let order_no = order["order_no"].as_str().unwrap().to_string();
    assert!(order_no.starts_with("RCH"), "{order_no}");
    assert_eq!(order["amount"], "100.00");
    assert_eq!(order["exact_amount"], "100.1234");
    assert_eq!(order["wallet_address"], DEPOSIT_ADDRESS);
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["remark"], "top-up");

    let path = format!("/api/miniapp/wallet/recharge/{order_no}");
    let (status, body) = get(&path, 42, fx.routes()).await;
    assert_eq!(assert_success(status, body), order);

    let (status, body) = get(&path, 43, fx.routes()).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, 40300, "FORBIDDEN");

    let (status, body) = get("/api/miniapp/wallet/recharge/RCH000", 42, fx.routes()).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40003, "ORDER_NOT_FOUND");
}

#[actix_web::test]
async fn numeric_amounts_are_accepted() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let order = fx.create(42, json!(50)).await;
    assert_eq!(order["amount"], "50.00");
    let order = fx.create(42, json!(12.5)).await;
    assert_eq!(order["amount"], "12.50");
    assert_eq!(order["exact_amount"], "12.6234");
}

#[actix_web::test]
async fn bad_amounts() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let cases = [
        (json!("100.123"), 40002, "INVALID_FORMAT"),
        (json!("ten"), 40002, "INVALID_FORMAT"),
        (json!(null), 40002, "INVALID_FORMAT"),
        (json!("5"), 40001, "INVALID_AMOUNT"),
        (json!(20000), 40001, "INVALID_AMOUNT"),
        (json!("-10"), 40001, "INVALID_AMOUNT"),
    ];
    for (amount, code, message) in cases {
        let body = json!({ "amount": amount });
        let (status, body) = post("/api/miniapp/wallet/recharge", 42, Some(body), fx.routes()).await;
        assert_error(status, &body, StatusCode::BAD_REQUEST, code, message);
    }
    let (status, body) = post("/api/miniapp/wallet/recharge", 42, Some(json!([1, 2])), fx.routes()).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40000, "INVALID_REQUEST");
}

#[actix_web::test]
async fn manual_check_credits_the_wallet() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let order = fx.create(42, json!("100")).await;
    let order_no = order["order_no"].as_str().unwrap();
    let check = format!("/api/miniapp/wallet/recharge/{order_no}/check");

    // Not on chain yet
    let (status, body) = post(&check, 42, None, fx.routes()).await;
    assert_eq!(assert_success(status, body)["status"], "PENDING");

    fx.chain.push_transfer(transfer("tx-0001", "100.1234", 20));
    let (status, body) = post(&check, 42, None, fx.routes()).await;
    let confirmed = assert_success(status, body);
    assert_eq!(confirmed["status"], "CONFIRMED");
    assert_eq!(confirmed["tx_hash"], "tx-0001");

    let (status, body) = get("/api/miniapp/wallet/balance", 42, fx.routes()).await;
    assert_eq!(assert_success(status, body)["balance"], "100.00");

    // Checking again changes nothing
    let (status, body) = post(&check, 42, None, fx.routes()).await;
    assert_eq!(assert_success(status, body)["status"], "CONFIRMED");
    let (status, body) = get("/api/miniapp/wallet/balance", 42, fx.routes()).await;
    assert_eq!(assert_success(status, body)["balance"], "100.00");

    let (status, body) = post(&check, 43, None, fx.routes()).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, 40300, "FORBIDDEN");
}

#[actix_web::test]
async fn recharge_history_pages() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    for amount in ["100", "200", "300"] {
        fx.create(42, json!(amount)).await;
    }
    fx.create(43, json!("400")).await;
    let (status, body) = get("/api/miniapp/wallet/recharge/history?limit=2", 42, fx.routes()).await;
    let page = assert_success(status, body);
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let (status, body) = get("/api/miniapp/wallet/recharge/history?limit=2&offset=2", 42, fx.routes()).await;
    let page = assert_success(status, body);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["amount"], "100.00");
}
