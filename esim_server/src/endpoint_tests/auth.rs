use actix_web::{
    http::{Method, StatusCode},
    web,
    web::ServiceConfig,
};
use chrono::{Duration, Utc};
use esim_engine::WalletApi;

use super::{
    helpers::{assert_error, init_data_for, send},
    mocks::MockWalletManager,
};
use crate::{auth::test::signed_init_data, routes::BalanceRoute};

const BALANCE: &str = "/api/miniapp/wallet/balance";

// The mock has no expectations, so any call that reaches the store panics.
fn configure(cfg: &mut ServiceConfig) {
    cfg.service(BalanceRoute::<MockWalletManager>::new())
        .app_data(web::Data::new(WalletApi::new(MockWalletManager::new())));
}

#[actix_web::test]
async fn health_needs_no_init_data() {
    let _ = env_logger::try_init().ok();
    let (status, body) = send(Method::GET, "/health", None, None, configure).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[actix_web::test]
async fn missing_init_data() {
    let _ = env_logger::try_init().ok();
    let (status, body) = send(Method::GET, BALANCE, None, None, configure).await;
    let details = assert_error(status, &body, StatusCode::UNAUTHORIZED, 40100, "UNAUTHORIZED");
    assert!(details.contains("init data"), "{details}");
}

#[actix_web::test]
async fn tampered_init_data() {
    let _ = env_logger::try_init().ok();
    let tampered = init_data_for(42).replace("%22id%22%3A42", "%22id%22%3A7");
    let (status, body) = send(Method::GET, BALANCE, Some(&tampered), None, configure).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, 40100, "UNAUTHORIZED");
}

#[actix_web::test]
async fn stale_init_data() {
    let _ = env_logger::try_init().ok();
    let two_days_ago = (Utc::now() - Duration::days(2)).timestamp();
    let stale = signed_init_data(42, two_days_ago);
    let (status, body) = send(Method::GET, BALANCE, Some(&stale), None, configure).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, 40100, "UNAUTHORIZED");
}

#[actix_web::test]
async fn query_param_is_ignored_outside_dev_mode() {
    let _ = env_logger::try_init().ok();
    let mut encoder = url::form_urlencoded::Serializer::new(String::new());
    encoder.append_pair("init_data", &init_data_for(42));
    let path = format!("{BALANCE}?{}", encoder.finish());
    let (status, body) = send(Method::GET, &path, None, None, configure).await;
    assert_error(status, &body, StatusCode::UNAUTHORIZED, 40100, "UNAUTHORIZED");
}
