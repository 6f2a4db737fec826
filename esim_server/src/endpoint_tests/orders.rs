use actix_web::{http::StatusCode, web, web::ServiceConfig};
use esim_engine::{
    db_types::Amount,
    events::EventProducers,
    objects::OrderConfig,
    provider::ProviderOrderStatus,
    test_utils::{
        mocks::{provider_order, MockProvider, RecordingNotifier},
        prepare_env::new_test_db,
        seed::{seed_product, seed_user},
    },
    EsimCardApi,
    OrderFlowApi,
    SqliteDatabase,
    WalletApi,
};
use serde_json::{json, Value};

use super::helpers::{assert_error, assert_success, get, post};
use crate::routes::{
    BalanceRoute,
    CancelOrderRoute,
    CardByIdRoute,
    CreateOrderRoute,
    MyCardsRoute,
    MyOrdersRoute,
    OrderByIdRoute,
    OrderStatsRoute,
    OrderSyncStatusRoute,
    SyncOrderRoute,
};

type Db = SqliteDatabase;
type Api = OrderFlowApi<Db, MockProvider, RecordingNotifier>;

struct Fixture {
    provider: MockProvider,
    api: Api,
    cards: EsimCardApi<Db, MockProvider>,
    wallets: WalletApi<Db>,
    product_id: i64,
}

impl Fixture {
    async fn new() -> Self {
        let db = new_test_db().await;
        seed_user(&db, 42, "100".parse().unwrap()).await;
        seed_user(&db, 43, Amount::ZERO).await;
        let product = seed_product(&db, "42", "25").await;
        let provider = MockProvider::new();
        let config = OrderConfig { sync_interval: chrono::Duration::zero(), ..Default::default() };
        let api = OrderFlowApi::new(
            db.clone(),
            provider.clone(),
            RecordingNotifier::new(),
            EventProducers::default(),
            config,
        );
        let cards = EsimCardApi::new(db.clone(), provider.clone());
        Self { provider, api, cards, wallets: WalletApi::new(db), product_id: product.id }
    }

    fn routes(&self) -> impl FnOnce(&mut ServiceConfig) {
        let (api, cards, wallets) = (self.api.clone(), self.cards.clone(), self.wallets.clone());
        move |cfg| {
            cfg.service(CreateOrderRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(MyOrdersRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(OrderStatsRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(OrderByIdRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(CancelOrderRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(SyncOrderRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(OrderSyncStatusRoute::<Db, MockProvider, RecordingNotifier>::new())
                .service(MyCardsRoute::<Db, MockProvider>::new())
                .service(CardByIdRoute::<Db, MockProvider>::new())
                .service(BalanceRoute::<Db>::new())
                .app_data(web::Data::new(api))
                .app_data(web::Data::new(cards))
                .app_data(web::Data::new(wallets));
        }
    }

    fn order_body(&self, quantity: i64, total: &str) -> Value {
        json!({
            "product_id": self.product_id,
            "quantity": quantity,
            "total_amount": total,
            "customer_email": "ada@example.com",
        })
    }

    async fn place(&self, quantity: i64, total: &str) -> (StatusCode, Value) {
        post("/api/miniapp/esim/orders", 42, Some(self.order_body(quantity, total)), self.routes()).await
    }

    async fn balance(&self, user_id: i64) -> Value {
        let (status, body) = get("/api/miniapp/wallet/balance", user_id, self.routes()).await;
        assert_success(status, body)["balance"].clone()
    }
}

#[actix_web::test]
async fn buying_an_esim_debits_the_wallet() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let (status, body) = fx.place(2, "50").await;
    let order = assert_success(status, body);
    assert_eq!(order["status"], "PAID");
    assert_eq!(order["total_amount"], "50.00");
    assert_eq!(order["quantity"], 2);
    assert!(order["order_no"].as_str().unwrap().starts_with("ORD"));
    assert_eq!(fx.balance(42).await, "50.00");

    let path = format!("/api/miniapp/esim/orders/{}", order["id"]);
    let (status, body) = get(&path, 42, fx.routes()).await;
    let detail = assert_success(status, body);
    assert_eq!(detail["order"]["id"], order["id"]);
    assert_eq!(detail["cards"].as_array().unwrap().len(), 0);

    let (status, body) = get(&path, 43, fx.routes()).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, 40300, "FORBIDDEN");
}

#[actix_web::test]
async fn rejected_orders_leave_the_balance_alone() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let (status, body) = fx.place(2, "40").await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40001, "INVALID_AMOUNT");
    let (status, body) = fx.place(5, "125").await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40009, "INSUFFICIENT_BALANCE");
    let (status, body) = fx.place(1, "2x").await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40002, "INVALID_FORMAT");

    let mut body = fx.order_body(1, "25");
    body["product_id"] = json!(9999);
    let (status, body) = post("/api/miniapp/esim/orders", 42, Some(body), fx.routes()).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40007, "PRODUCT_NOT_FOUND");

    let mut body = fx.order_body(1, "25");
    body["customer_email"] = json!("not-an-email");
    let (status, body) = post("/api/miniapp/esim/orders", 42, Some(body), fx.routes()).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40002, "INVALID_FORMAT");

    assert_eq!(fx.balance(42).await, "100.00");
}

#[actix_web::test]
async fn manual_sync_follows_the_order_to_completion() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let (status, body) = fx.place(1, "25").await;
    let order = assert_success(status, body);
    let sync = format!("/api/miniapp/esim/orders/{}/sync", order["id"]);

    // The first sync submits the paid order
    let (status, body) = post(&sync, 42, None, fx.routes()).await;
    let result = assert_success(status, body);
    assert_eq!(result["success"], true);
    assert_eq!(result["new_status"], "PROCESSING");
    assert_eq!(fx.provider.created().len(), 1);

    let status_path = format!("/api/miniapp/esim/orders/{}/sync-status", order["id"]);
    let (status, body) = get(&status_path, 42, fx.routes()).await;
    let sync_status = assert_success(status, body);
    assert_eq!(sync_status["is_running"], true);

    // Then polls the provider
    fx.provider.push_order(Ok(provider_order("PRV0001", ProviderOrderStatus::Completed, &["8988000000000000001"])));
    let (status, body) = post(&sync, 42, None, fx.routes()).await;
    assert_eq!(assert_success(status, body)["new_status"], "COMPLETED");

    let (status, body) = get("/api/miniapp/esim/cards", 42, fx.routes()).await;
    let cards = assert_success(status, body);
    assert_eq!(cards["total"], 1);
    let card = &cards["items"][0];
    assert_eq!(card["iccid"], "8988000000000000001");

    let card_path = format!("/api/miniapp/esim/cards/{}", card["id"]);
    let (status, body) = get(&card_path, 42, fx.routes()).await;
    assert_eq!(assert_success(status, body)["iccid"], "8988000000000000001");
    let (status, body) = get(&card_path, 43, fx.routes()).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, 40300, "FORBIDDEN");

    let path = format!("/api/miniapp/esim/orders/{}", order["id"]);
    let (status, body) = get(&path, 42, fx.routes()).await;
    let detail = assert_success(status, body);
    assert_eq!(detail["order"]["status"], "COMPLETED");
    assert_eq!(detail["cards"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn failed_provider_orders_are_refunded() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let (status, body) = fx.place(1, "25").await;
    let order = assert_success(status, body);
    assert_eq!(fx.balance(42).await, "75.00");
    let sync = format!("/api/miniapp/esim/orders/{}/sync", order["id"]);
    let (status, body) = post(&sync, 42, None, fx.routes()).await;
    assert_success(status, body);
    fx.provider.push_order(Ok(provider_order("PRV0001", ProviderOrderStatus::Cancelled, &[])));
    let (status, body) = post(&sync, 42, None, fx.routes()).await;
    assert_eq!(assert_success(status, body)["new_status"], "FAILED");
    assert_eq!(fx.balance(42).await, "100.00");
}

#[actix_web::test]
async fn listing_and_stats() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    for _ in 0..3 {
        let (status, body) = fx.place(1, "25").await;
        assert_success(status, body);
    }
    let (status, body) = get("/api/miniapp/esim/orders?status=paid&limit=2", 42, fx.routes()).await;
    let page = assert_success(status, body);
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let (status, body) = get("/api/miniapp/esim/orders?status=completed", 42, fx.routes()).await;
    assert_eq!(assert_success(status, body)["total"], 0);

    let (status, body) = get("/api/miniapp/esim/orders?status=lost", 42, fx.routes()).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40000, "INVALID_REQUEST");

    let (status, body) = get("/api/miniapp/esim/orders/stats", 42, fx.routes()).await;
    let stats = assert_success(status, body);
    assert_eq!(stats["total_orders"], 3);
    assert_eq!(stats["pending_orders"], 3);
    assert_eq!(stats["completed_orders"], 0);
    assert_eq!(stats["total_amount"], "0.00");

    let (status, body) = get("/api/miniapp/esim/orders", 43, fx.routes()).await;
    assert_eq!(assert_success(status, body)["total"], 0);
}

#[actix_web::test]
async fn paid_orders_cannot_be_cancelled() {
    let _ = env_logger::try_init().ok();
    let fx = Fixture::new().await;
    let (status, body) = fx.place(1, "25").await;
    let order = assert_success(status, body);
    let cancel = format!("/api/miniapp/esim/orders/{}/cancel", order["id"]);
    let (status, body) = post(&cancel, 42, None, fx.routes()).await;
    assert_error(status, &body, StatusCode::CONFLICT, 40900, "CONFLICT");
    let (status, body) = post(&cancel, 43, None, fx.routes()).await;
    assert_error(status, &body, StatusCode::FORBIDDEN, 40300, "FORBIDDEN");
    let (status, body) = post("/api/miniapp/esim/orders/424242/cancel", 42, None, fx.routes()).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40003, "ORDER_NOT_FOUND");
}
