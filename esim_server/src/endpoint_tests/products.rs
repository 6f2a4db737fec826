use actix_web::{http::StatusCode, web, web::ServiceConfig};
use esim_engine::{
    db_types::{NewProduct, ProductStatus, ProductType},
    test_utils::{prepare_env::new_test_db, seed::seed_product},
    traits::ProductCatalogue,
    CatalogueApi,
    SqliteDatabase,
};
use mockall::predicate::eq;

use super::{
    helpers::{assert_error, assert_success, get},
    mocks::MockCatalogue,
};
use crate::routes::{ProductByIdRoute, ProductsRoute};

fn routes<B: ProductCatalogue + 'static>(db: B) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        cfg.service(ProductsRoute::<B>::new())
            .service(ProductByIdRoute::<B>::new())
            .app_data(web::Data::new(CatalogueApi::new(db)));
    }
}

#[actix_web::test]
async fn product_filters_reach_the_store() {
    let _ = env_logger::try_init().ok();
    let mut db = MockCatalogue::new();
    db.expect_list_products()
        .withf(|f| {
            f.product_type == Some(ProductType::Regional) &&
                f.status == Some(ProductStatus::Active) &&
                f.country.as_deref() == Some("TH") &&
                f.limit == Some(20) &&
                f.offset == Some(0)
        })
        .times(1)
        .returning(|_| Ok((vec![], 0)));
    let (status, body) = get("/api/miniapp/products?type=regional&country=TH", 42, routes(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["total"], 0);
    assert_eq!(data["limit"], 20);
}

#[actix_web::test]
async fn unknown_product_type() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get("/api/miniapp/products?type=galactic", 42, routes(MockCatalogue::new())).await;
    assert_error(status, &body, StatusCode::BAD_REQUEST, 40000, "INVALID_REQUEST");
}

#[actix_web::test]
async fn missing_product() {
    let _ = env_logger::try_init().ok();
    let mut db = MockCatalogue::new();
    db.expect_fetch_product().with(eq(99)).returning(|_| Ok(None));
    let (status, body) = get("/api/miniapp/products/99", 42, routes(db)).await;
    assert_error(status, &body, StatusCode::NOT_FOUND, 40007, "PRODUCT_NOT_FOUND");
}

#[actix_web::test]
async fn catalogue_from_the_store() {
    let _ = env_logger::try_init().ok();
    let db = new_test_db().await;
    let cheap = seed_product(&db, "P-1", "4.5").await;
    seed_product(&db, "P-2", "25").await;
    let mut retired = NewProduct::new("P-3", "Retired plan", "1".parse().unwrap());
    retired.status = ProductStatus::Inactive;
    db.upsert_product(retired).await.unwrap();

    let (status, body) = get("/api/miniapp/products", 42, routes::<SqliteDatabase>(db.clone())).await;
    let data = assert_success(status, body);
    assert_eq!(data["total"], 2);
    let items = data["items"].as_array().unwrap();
    assert_eq!(items[0]["third_party_id"], "P-1");
    assert_eq!(items[1]["price"], "25.00");

    let path = format!("/api/miniapp/products/{}", cheap.id);
    let (status, body) = get(&path, 42, routes::<SqliteDatabase>(db)).await;
    let data = assert_success(status, body);
    assert_eq!(data["name"], "Plan P-1");
    assert_eq!(data["price"], "4.50");
}
