use actix_web::{
    body::to_bytes,
    http::{Method, StatusCode},
    test,
    test::TestRequest,
    web,
    web::ServiceConfig,
    App,
};
use chrono::{Duration, Utc};
use esim_common::Secret;
use log::debug;
use serde_json::Value;

use crate::{
    auth::test::{signed_init_data, BOT_TOKEN},
    middleware::InitDataMiddlewareFactory,
    routes::health,
    server::{extractor_config, path_config, query_config},
};

/// Fresh, correctly signed init data for `user_id`.
pub fn init_data_for(user_id: i64) -> String {
    signed_init_data(user_id, Utc::now().timestamp())
}

/// Sends one request through an app laid out like the real server: `/health` at the root and the routes added by
/// `configure` under `/api/miniapp`, behind the init-data check. Returns the status and the parsed JSON body
/// (`Value::Null` if the body is not JSON).
pub async fn send<F>(
    method: Method,
    path: &str,
    init_data: Option<&str>,
    body: Option<Value>,
    configure: F,
) -> (StatusCode, Value)
where
    F: FnOnce(&mut ServiceConfig),
{
    let mut req = TestRequest::default().method(method).uri(path);
    if let Some(init_data) = init_data {
        req = req.insert_header(("X-Telegram-Init-Data", init_data));
    }
    if let Some(body) = body {
        req = req.set_json(body);
    }
    let auth = InitDataMiddlewareFactory::new(Secret::new(BOT_TOKEN.to_string()), false, Some(Duration::hours(24)));
    let app = App::new()
        .app_data(extractor_config())
        .app_data(query_config())
        .app_data(path_config())
        .service(health)
        .service(web::scope("/api/miniapp").wrap(auth).configure(configure));
    let service = test::init_service(app).await;
    debug!("Making request to {path}");
    let (status, bytes) = match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => (res.status(), test::read_body(res).await),
        Err(e) => {
            let res = e.error_response();
            (res.status(), to_bytes(res.into_body()).await.unwrap())
        },
    };
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get<F: FnOnce(&mut ServiceConfig)>(path: &str, user_id: i64, configure: F) -> (StatusCode, Value) {
    let init_data = init_data_for(user_id);
    send(Method::GET, path, Some(&init_data), None, configure).await
}

pub async fn post<F: FnOnce(&mut ServiceConfig)>(
    path: &str,
    user_id: i64,
    body: Option<Value>,
    configure: F,
) -> (StatusCode, Value) {
    let init_data = init_data_for(user_id);
    send(Method::POST, path, Some(&init_data), body, configure).await
}

/// Asserts the error envelope and returns its `details`.
pub fn assert_error(status: StatusCode, body: &Value, expected_status: StatusCode, code: u64, message: &str) -> String {
    assert_eq!(status, expected_status, "{body}");
    assert_eq!(body["code"], code, "{body}");
    assert_eq!(body["message"], message, "{body}");
    body["details"].as_str().unwrap_or_default().to_string()
}

/// Asserts the success envelope and returns `data`.
pub fn assert_success(status: StatusCode, body: Value) -> Value {
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["code"], 0, "{body}");
    assert_eq!(body["message"], "success");
    body["data"].clone()
}
