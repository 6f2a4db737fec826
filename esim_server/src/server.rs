use std::time::Duration;

use actix_web::{
    dev::Server,
    error::{JsonPayloadError, PathError, QueryPayloadError},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    HttpRequest,
    HttpServer,
};
use esim_engine::{
    chain::TronGridObserver,
    events::{EventHandlers, EventProducers},
    notifier::ConfiguredNotifier,
    provider::EsimProviderClient,
    CatalogueApi,
    EsimCardApi,
    OrderFlowApi,
    RechargeFlowApi,
    SqliteDatabase,
    WalletApi,
};
use futures::future::join_all;
use log::*;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    middleware::InitDataMiddlewareFactory,
    routes::{
        health,
        BalanceRoute,
        CancelOrderRoute,
        CardByIdRoute,
        CheckRechargeRoute,
        CreateOrderRoute,
        CreateRechargeRoute,
        MyCardsRoute,
        MyOrdersRoute,
        OrderByIdRoute,
        OrderStatsRoute,
        OrderSyncStatusRoute,
        ProductByIdRoute,
        ProductsRoute,
        RechargeHistoryRoute,
        RechargeOrderRoute,
        SyncCardRoute,
        SyncOrderRoute,
        WalletHistoryRecordRoute,
        WalletHistoryRoute,
        WalletHistoryStatsRoute,
    },
    workers::{
        order_paid_hook,
        start_expiry_worker,
        start_order_sync_worker,
        start_reconciliation_worker,
        OrderApi,
        RechargeApi,
    },
};

type Db = SqliteDatabase;
type Chain = TronGridObserver;
type Provider = EsimProviderClient;
type Notify = ConfiguredNotifier;

const EVENT_BUFFER_SIZE: usize = 256;

/// The API objects the request handlers work with. Each HTTP worker gets its own clone.
#[derive(Clone)]
pub struct ServerApis {
    pub wallet: WalletApi<Db>,
    pub recharge: RechargeApi,
    pub orders: OrderApi,
    pub cards: EsimCardApi<Db, Provider>,
    pub catalogue: CatalogueApi<Db>,
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    config.validate()?;
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let chain = TronGridObserver::new(&config.chain.api_url, config.chain.api_key.clone())
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let provider =
        EsimProviderClient::new(config.provider.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let notifier = ConfiguredNotifier::from_bot_token(config.auth.bot_token.clone())
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let cancel = CancellationToken::new();
    let recharge = RechargeFlowApi::new(db.clone(), chain, notifier.clone(), config.recharge.clone())
        .with_cancellation(cancel.clone());
    // Submits orders from the order-paid hook and the sync ticker. It publishes no events of its own.
    let submitter = OrderFlowApi::new(
        db.clone(),
        provider.clone(),
        notifier.clone(),
        EventProducers::default(),
        config.order.clone(),
    );
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, order_paid_hook(submitter.clone()));
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let apis = ServerApis {
        wallet: WalletApi::new(db.clone()),
        recharge: recharge.clone(),
        orders: OrderFlowApi::new(db.clone(), provider.clone(), notifier, producers, config.order.clone()),
        cards: EsimCardApi::new(db.clone(), provider),
        catalogue: CatalogueApi::new(db),
    };

    let workers = vec![
        start_reconciliation_worker(recharge.clone(), config.workers.reconciliation_interval, cancel.clone()),
        start_expiry_worker(recharge, config.workers.expiry_interval, cancel.clone()),
        start_order_sync_worker(submitter, config.workers.order_sync_interval, cancel.clone()),
    ];

    let srv = create_server_instance(&config, apis)?;
    info!("🚀️ Listening on {}:{}", config.host, config.port);
    // Resolves once actix has handled SIGINT/SIGTERM and drained its connections.
    let result = srv.await.map_err(ServerError::from);
    info!("🚀️ HTTP server stopped. Waiting for background workers to finish");
    cancel.cancel();
    for outcome in join_all(workers).await {
        if let Err(e) = outcome {
            warn!("🚀️ A background worker did not shut down cleanly. {e}");
        }
    }
    result
}

pub fn create_server_instance(config: &ServerConfig, apis: ServerApis) -> Result<Server, ServerError> {
    let auth = InitDataMiddlewareFactory::new(
        config.auth.bot_token.clone(),
        config.auth.dev_mode,
        config.auth.init_data_max_age,
    );
    let srv = HttpServer::new(move || {
        let miniapp_scope = web::scope("/api/miniapp")
            .wrap(auth.clone())
            .service(CreateRechargeRoute::<Db, Chain, Notify, Db>::new())
            .service(RechargeHistoryRoute::<Db, Chain, Notify>::new())
            .service(RechargeOrderRoute::<Db, Chain, Notify>::new())
            .service(CheckRechargeRoute::<Db, Chain, Notify>::new())
            .service(BalanceRoute::<Db>::new())
            .service(WalletHistoryRoute::<Db>::new())
            .service(WalletHistoryStatsRoute::<Db>::new())
            .service(WalletHistoryRecordRoute::<Db>::new())
            .service(CreateOrderRoute::<Db, Provider, Notify>::new())
            .service(MyOrdersRoute::<Db, Provider, Notify>::new())
            .service(OrderStatsRoute::<Db, Provider, Notify>::new())
            .service(OrderByIdRoute::<Db, Provider, Notify>::new())
            .service(CancelOrderRoute::<Db, Provider, Notify>::new())
            .service(SyncOrderRoute::<Db, Provider, Notify>::new())
            .service(OrderSyncStatusRoute::<Db, Provider, Notify>::new())
            .service(MyCardsRoute::<Db, Provider>::new())
            .service(CardByIdRoute::<Db, Provider>::new())
            .service(SyncCardRoute::<Db, Provider>::new())
            .service(ProductsRoute::<Db>::new())
            .service(ProductByIdRoute::<Db>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("esim::access_log"))
            .app_data(extractor_config())
            .app_data(query_config())
            .app_data(path_config())
            .app_data(web::Data::new(apis.wallet.clone()))
            .app_data(web::Data::new(apis.recharge.clone()))
            .app_data(web::Data::new(apis.orders.clone()))
            .app_data(web::Data::new(apis.cards.clone()))
            .app_data(web::Data::new(apis.catalogue.clone()))
            .service(health)
            .service(miniapp_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .client_request_timeout(config.read_timeout)
    .client_disconnect_timeout(config.write_timeout)
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Malformed bodies, queries and paths are answered with the error envelope instead of actix's plain-text errors.
pub fn extractor_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|e: JsonPayloadError, _req: &HttpRequest| ServerError::InvalidRequestBody(e.to_string()).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|e: QueryPayloadError, _req: &HttpRequest| ServerError::InvalidQuery(e.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|e: PathError, _req: &HttpRequest| ServerError::InvalidRequestPath(e.to_string()).into())
}
