use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::{TimeZone, Utc};
use esim_engine::{
    db_types::{Amount, HistoryKind, HistoryStatus, User, Wallet, WalletHistory},
    traits::{HistoryStats, WalletError},
    WalletApi,
};
use mockall::predicate::eq;

use super::{
    helpers::{assert_error, assert_success, get},
    mocks::MockWalletManager,
};
use crate::routes::{BalanceRoute, WalletHistoryRecordRoute, WalletHistoryRoute, WalletHistoryStatsRoute};

fn amt(s: &str) -> Amount {
    s.parse().unwrap()
}

fn user(id: i64) -> User {
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    User {
        id,
        username: Some("ada".into()),
        first_name: Some("Ada".into()),
        last_name: None,
        language: Some("en".into()),
        is_active: true,
        created_at: at,
        updated_at: at,
    }
}

fn wallet(user_id: i64, balance: &str) -> Wallet {
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    Wallet {
        id: 7,
        user_id,
        balance: amt(balance),
        frozen: Amount::ZERO,
        total_income: amt(balance),
        total_expense: Amount::ZERO,
        created_at: at,
        updated_at: at,
    }
}

fn recharge_row(id: i64, user_id: i64) -> WalletHistory {
    WalletHistory {
        id,
        user_id,
        kind: HistoryKind::Recharge,
        amount: amt("100"),
        balance_before: Amount::ZERO,
        balance_after: amt("100"),
        status: HistoryStatus::Completed,
        description: "USDT recharge".into(),
        related_type: Some("recharge_order".into()),
        related_id: Some("RCH17000000001234".into()),
        tx_hash: Some("abc123".into()),
        created_at: Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap(),
    }
}

fn routes(db: MockWalletManager) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        cfg.service(BalanceRoute::<MockWalletManager>::new())
            .service(WalletHistoryRoute::<MockWalletManager>::new())
            .service(WalletHistoryStatsRoute::<MockWalletManager>::new())
            .service(WalletHistoryRecordRoute::<MockWalletManager>::new())
            .app_data(web::Data::new(WalletApi::new(db)));
    }
}

#[actix_web::test]
async fn balance_registers_the_caller() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_ensure_user()
        .withf(|u| u.id == 42 && u.username.as_deref() == Some("ada") && u.language.as_deref() == Some("en"))
        .times(1)
        .returning(|u| Ok(user(u.id)));
    db.expect_fetch_wallet().with(eq(42)).times(1).returning(|id| Ok(Some(wallet(id, "12.5"))));
    let (status, body) = get("/api/miniapp/wallet/balance", 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["user_id"], 42);
    assert_eq!(data["balance"], "12.50");
    assert_eq!(data["frozen"], "0.00");
}

#[actix_web::test]
async fn balance_without_wallet() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_ensure_user().returning(|u| Ok(user(u.id)));
    db.expect_fetch_wallet().returning(|_| Ok(None));
    let (status, body) = get("/api/miniapp/wallet/balance", 42, routes(db)).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40006, "WALLET_NOT_FOUND");
}

#[actix_web::test]
async fn store_failures_are_internal_errors() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_ensure_user().returning(|_| Err(WalletError::DatabaseError("disk full".into())));
    let (status, body) = get("/api/miniapp/wallet/balance", 42, routes(db)).await;
    assert_error(status, &body, StatusCode::INTERNAL_SERVER_ERROR, 50003, "DB_ERROR");
}

#[actix_web::test]
async fn history_filters_reach_the_store() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_fetch_history()
        .withf(|user_id, f| {
            *user_id == 42 &&
                f.kind == Some(HistoryKind::Recharge) &&
                f.status == Some(HistoryStatus::Completed) &&
                f.since == Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()) &&
                f.until.is_none() &&
                f.limit == Some(5) &&
                f.offset == Some(10)
        })
        .times(1)
        .returning(|user_id, _| Ok((vec![recharge_row(3, user_id)], 11)));
    let path = "/api/miniapp/wallet/history?type=recharge&status=COMPLETED&start_date=2024-06-01T00:00:00Z&limit=5&offset=10";
    let (status, body) = get(path, 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["total"], 11);
    assert_eq!(data["limit"], 5);
    assert_eq!(data["offset"], 10);
    assert_eq!(data["items"][0]["kind"], "RECHARGE");
    assert_eq!(data["items"][0]["balance_after"], "100.00");
}

#[actix_web::test]
async fn history_page_size_is_capped() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_fetch_history().withf(|_, f| f.limit == Some(100) && f.offset == Some(0)).returning(|_, _| Ok((vec![], 0)));
    let (status, body) = get("/api/miniapp/wallet/history?limit=5000&offset=-3", 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["limit"], 100);
    assert_eq!(data["offset"], 0);
    assert_eq!(data["items"].as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn history_rejects_unknown_type() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get("/api/miniapp/wallet/history?type=bonus", 42, routes(MockWalletManager::new())).await;
    let details = assert_error(status, &body, StatusCode::BAD_REQUEST, 40000, "INVALID_REQUEST");
    assert!(details.contains("bonus"), "{details}");
}

#[actix_web::test]
async fn history_stats() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_history_stats().with(eq(42)).returning(|_| {
        Ok(HistoryStats {
            total_records: 3,
            total_income: amt("150"),
            total_expense: amt("25"),
            pending_amount: Amount::ZERO,
            completed_amount: amt("175"),
        })
    });
    let (status, body) = get("/api/miniapp/wallet/history/stats", 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["total_records"], 3);
    assert_eq!(data["total_income"], "150.00");
    assert_eq!(data["total_expense"], "25.00");
}

#[actix_web::test]
async fn history_record() {
    let _ = env_logger::try_init().ok();
    let mut db = MockWalletManager::new();
    db.expect_fetch_history_record().with(eq(42), eq(3)).returning(|user_id, id| Ok(Some(recharge_row(id, user_id))));
    let (status, body) = get("/api/miniapp/wallet/history/3", 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["id"], 3);
    assert_eq!(data["tx_hash"], "abc123");

    let mut db = MockWalletManager::new();
    db.expect_fetch_history_record().returning(|_, _| Ok(None));
    let (status, body) = get("/api/miniapp/wallet/history/4", 42, routes(db)).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40400, "NOT_FOUND");

    let (status, body) = get("/api/miniapp/wallet/history/latest", 42, routes(MockWalletManager::new())).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40000, "INVALID_REQUEST");
}
