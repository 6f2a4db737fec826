//! Request handler definitions
//!
//! Define each route and its handler here. Handlers stay thin: they parse the request, call one engine API and wrap
//! the result in the success envelope. Errors convert into [`ServerError`], which renders the error envelope.
//!
//! Every route under `/api/miniapp` sits behind the init-data middleware, so handlers can take a [`TelegramUser`]
//! argument to learn who is calling.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Anything that waits on the store, the chain observer or the provider
//! must be awaited, never blocked on.
use actix_web::{get, web, HttpResponse, Responder};
use esim_engine::{
    api::objects::NewEsimOrderRequest,
    chain::ChainObserver,
    db_types::{EsimStatus, HistoryKind, HistoryStatus, OrderStatus, ProductStatus, ProductType},
    notifier::Notifier,
    provider::ProviderClient,
    traits::{
        clamp_page,
        CardQueryFilter,
        EsimCardManagement,
        HistoryFilter,
        OrderManagement,
        ProductCatalogue,
        ProductQueryFilter,
        RechargeManagement,
        WalletManagement,
    },
    CatalogueApi,
    EsimCardApi,
    OrderFlowApi,
    RechargeFlowApi,
    WalletApi,
};
use log::*;

use crate::{
    auth::TelegramUser,
    data_objects::{
        ok_json,
        CreateOrderRequest,
        CreateRechargeRequest,
        Page,
        PageQuery,
        ProductQuery,
        RechargeResponse,
        StatusPageQuery,
        WalletHistoryQuery,
    },
    errors::ServerError,
    helpers::{parse_amount_value, parse_filter},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro.
// Each type parameter is listed with its trait bounds, e.g. `impl [B: OrderManagement + WalletManagement, P: ProviderClient]`.
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl [$($param:ident: $bound:ident $(+ $rest:ident)*),+]) => {
        paste::paste! { pub struct [<$name:camel Route>]<$($param),+>(core::marker::PhantomData<fn() -> ($($param,)+)>); }
        paste::paste! { impl<$($param),+> [<$name:camel Route>]<$($param),+> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData)
            }
        }}
        paste::paste! { impl<$($param),+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$($param),+>
        where
            $($param: $bound $(+ $rest)* + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<$($param),+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Recharge  ----------------------------------------------------
route!(create_recharge => Post "/wallet/recharge" impl [B: RechargeManagement, C: ChainObserver, N: Notifier, W: WalletManagement]);
/// Opens a recharge order. The response tells the user the exact amount to send and where to send it.
pub async fn create_recharge<B, C, N, W>(
    user: TelegramUser,
    body: web::Json<CreateRechargeRequest>,
    api: web::Data<RechargeFlowApi<B, C, N>>,
    wallets: web::Data<WalletApi<W>>,
) -> Result<HttpResponse, ServerError>
where
    B: RechargeManagement,
    C: ChainObserver,
    N: Notifier,
    W: WalletManagement,
{
    let request = body.into_inner();
    let amount = parse_amount_value(&request.amount)?;
    debug!("💻️ POST recharge of {amount} for user {}", user.id);
    let user_id = wallets.ensure_user(user.into()).await?.id;
    let remark = request.remark.filter(|r| !r.trim().is_empty());
    let order = api.create_recharge(user_id, amount, remark).await?;
    Ok(ok_json(RechargeResponse::from(order)))
}

route!(recharge_history => Get "/wallet/recharge/history" impl [B: RechargeManagement, C: ChainObserver, N: Notifier]);
pub async fn recharge_history<B, C, N>(
    user: TelegramUser,
    query: web::Query<PageQuery>,
    api: web::Data<RechargeFlowApi<B, C, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: RechargeManagement,
    C: ChainObserver,
    N: Notifier,
{
    let PageQuery { limit, offset } = query.into_inner();
    trace!("💻️ GET recharge history for user {}", user.id);
    let (orders, total) = api.recharge_history(user.id, limit, offset).await?;
    let orders = orders.into_iter().map(RechargeResponse::from).collect();
    Ok(ok_json(Page::new(orders, total, clamp_page(limit, offset))))
}

route!(recharge_order => Get "/wallet/recharge/{order_no}" impl [B: RechargeManagement, C: ChainObserver, N: Notifier]);
pub async fn recharge_order<B, C, N>(
    user: TelegramUser,
    path: web::Path<String>,
    api: web::Data<RechargeFlowApi<B, C, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: RechargeManagement,
    C: ChainObserver,
    N: Notifier,
{
    let order_no = path.into_inner();
    trace!("💻️ GET recharge {order_no} for user {}", user.id);
    let order = api.get_recharge(&order_no, user.id).await?;
    Ok(ok_json(RechargeResponse::from(order)))
}

route!(check_recharge => Post "/wallet/recharge/{order_no}/check" impl [B: RechargeManagement, C: ChainObserver, N: Notifier]);
/// Re-evaluates a recharge order against the chain right away, instead of waiting for the next reconciliation tick.
pub async fn check_recharge<B, C, N>(
    user: TelegramUser,
    path: web::Path<String>,
    api: web::Data<RechargeFlowApi<B, C, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: RechargeManagement,
    C: ChainObserver,
    N: Notifier,
{
    let order_no = path.into_inner();
    debug!("💻️ POST check recharge {order_no} for user {}", user.id);
    let order = api.check_for_user(&order_no, user.id).await?;
    Ok(ok_json(RechargeResponse::from(order)))
}

//----------------------------------------------   Wallet  ----------------------------------------------------
route!(balance => Get "/wallet/balance" impl [W: WalletManagement]);
/// The first thing the Mini App asks for, so this is also where new users get registered.
pub async fn balance<W: WalletManagement>(
    user: TelegramUser,
    api: web::Data<WalletApi<W>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET balance for user {}", user.id);
    let user_id = api.ensure_user(user.into()).await?.id;
    let wallet = api.balance(user_id).await?;
    Ok(ok_json(wallet))
}

route!(wallet_history => Get "/wallet/history" impl [W: WalletManagement]);
pub async fn wallet_history<W: WalletManagement>(
    user: TelegramUser,
    query: web::Query<WalletHistoryQuery>,
    api: web::Data<WalletApi<W>>,
) -> Result<HttpResponse, ServerError> {
    let query = query.into_inner();
    trace!("💻️ GET wallet history for user {}. {query:?}", user.id);
    let filter = HistoryFilter {
        kind: parse_filter::<HistoryKind>(query.kind.as_deref(), "type")?,
        status: parse_filter::<HistoryStatus>(query.status.as_deref(), "status")?,
        since: query.start_date,
        until: query.end_date,
        limit: query.limit,
        offset: query.offset,
    };
    let (records, total) = api.history(user.id, filter).await?;
    Ok(ok_json(Page::new(records, total, clamp_page(query.limit, query.offset))))
}

route!(wallet_history_stats => Get "/wallet/history/stats" impl [W: WalletManagement]);
pub async fn wallet_history_stats<W: WalletManagement>(
    user: TelegramUser,
    api: web::Data<WalletApi<W>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET wallet stats for user {}", user.id);
    let stats = api.stats(user.id).await?;
    Ok(ok_json(stats))
}

route!(wallet_history_record => Get "/wallet/history/{id}" impl [W: WalletManagement]);
pub async fn wallet_history_record<W: WalletManagement>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<WalletApi<W>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    trace!("💻️ GET wallet history record {id} for user {}", user.id);
    let record = api
        .history_record(user.id, id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("History record {id}")))?;
    Ok(ok_json(record))
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(create_order => Post "/esim/orders" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
/// Buys an eSIM with the wallet balance. The response is the PAID order; provider submission happens in the
/// background.
pub async fn create_order<B, P, N>(
    user: TelegramUser,
    body: web::Json<CreateOrderRequest>,
    api: web::Data<OrderFlowApi<B, P, N>>,
    wallets: web::Data<WalletApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let body = body.into_inner();
    let expected_total = parse_amount_value(&body.total_amount)?;
    debug!("💻️ POST order for product {} x{} by user {}", body.product_id, body.quantity, user.id);
    let user_id = wallets.ensure_user(user.into()).await?.id;
    let request = NewEsimOrderRequest {
        user_id,
        product_id: body.product_id,
        quantity: body.quantity,
        expected_total,
        customer_email: body.customer_email.filter(|e| !e.trim().is_empty()),
        remark: body.remark.filter(|r| !r.trim().is_empty()),
    };
    let order = api.create_esim_order(request).await?;
    Ok(ok_json(order))
}

route!(my_orders => Get "/esim/orders" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
pub async fn my_orders<B, P, N>(
    user: TelegramUser,
    query: web::Query<StatusPageQuery>,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let StatusPageQuery { status, limit, offset } = query.into_inner();
    let status = parse_filter::<OrderStatus>(status.as_deref(), "order status")?;
    trace!("💻️ GET orders for user {} (status: {status:?})", user.id);
    let (orders, total) = api.list_user_orders(user.id, status, limit, offset).await?;
    Ok(ok_json(Page::new(orders, total, clamp_page(limit, offset))))
}

route!(order_stats => Get "/esim/orders/stats" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
pub async fn order_stats<B, P, N>(
    user: TelegramUser,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let stats = api.order_stats(user.id).await?;
    Ok(ok_json(stats))
}

route!(order_by_id => Get "/esim/orders/{order_id}" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
/// The order, the provider's order detail (once completed) and the issued eSIM cards.
pub async fn order_by_id<B, P, N>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let order_id = path.into_inner();
    trace!("💻️ GET order {order_id} for user {}", user.id);
    let order = api.get_order_with_detail(order_id, user.id).await?;
    Ok(ok_json(order))
}

route!(cancel_order => Post "/esim/orders/{order_id}/cancel" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
pub async fn cancel_order<B, P, N>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let order_id = path.into_inner();
    debug!("💻️ POST cancel order {order_id} for user {}", user.id);
    let order = api.cancel_order(order_id, user.id).await?;
    Ok(ok_json(order))
}

route!(sync_order => Post "/esim/orders/{order_id}/sync" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
/// Polls the provider for one order right away.
pub async fn sync_order<B, P, N>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let order_id = path.into_inner();
    debug!("💻️ POST sync order {order_id} for user {}", user.id);
    let result = api.sync_one(order_id, user.id).await?;
    Ok(ok_json(result))
}

route!(order_sync_status => Get "/esim/orders/{order_id}/sync-status" impl [B: OrderManagement + WalletManagement + ProductCatalogue, P: ProviderClient, N: Notifier]);
pub async fn order_sync_status<B, P, N>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, P, N>>,
) -> Result<HttpResponse, ServerError>
where
    B: OrderManagement + WalletManagement + ProductCatalogue,
    P: ProviderClient,
    N: Notifier,
{
    let status = api.sync_status(path.into_inner(), user.id).await?;
    Ok(ok_json(status))
}

//----------------------------------------------   eSIM cards  ----------------------------------------------------
route!(my_cards => Get "/esim/cards" impl [B: EsimCardManagement, P: ProviderClient]);
pub async fn my_cards<B, P>(
    user: TelegramUser,
    query: web::Query<StatusPageQuery>,
    api: web::Data<EsimCardApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: EsimCardManagement,
    P: ProviderClient,
{
    let StatusPageQuery { status, limit, offset } = query.into_inner();
    let filter = CardQueryFilter {
        status: parse_filter::<EsimStatus>(status.as_deref(), "card status")?,
        limit,
        offset,
        ..Default::default()
    };
    trace!("💻️ GET cards for user {}", user.id);
    let (cards, total) = api.list_cards(user.id, filter).await?;
    Ok(ok_json(Page::new(cards, total, clamp_page(limit, offset))))
}

route!(card_by_id => Get "/esim/cards/{id}" impl [B: EsimCardManagement, P: ProviderClient]);
pub async fn card_by_id<B, P>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<EsimCardApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: EsimCardManagement,
    P: ProviderClient,
{
    let card = api.get_card(path.into_inner(), user.id).await?;
    Ok(ok_json(card))
}

route!(sync_card => Post "/esim/cards/{id}/sync" impl [B: EsimCardManagement, P: ProviderClient]);
/// Refreshes the card's data usage from the provider.
pub async fn sync_card<B, P>(
    user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<EsimCardApi<B, P>>,
) -> Result<HttpResponse, ServerError>
where
    B: EsimCardManagement,
    P: ProviderClient,
{
    let card_id = path.into_inner();
    debug!("💻️ POST sync usage of card {card_id} for user {}", user.id);
    let card = api.sync_card_usage(card_id, user.id).await?;
    Ok(ok_json(card))
}

//----------------------------------------------   Products  ----------------------------------------------------
route!(products => Get "/products" impl [B: ProductCatalogue]);
/// The active catalogue, cheapest first.
pub async fn products<B: ProductCatalogue>(
    _user: TelegramUser,
    query: web::Query<ProductQuery>,
    api: web::Data<CatalogueApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let query = query.into_inner();
    let filter = ProductQueryFilter {
        product_type: parse_filter::<ProductType>(query.product_type.as_deref(), "product type")?,
        status: Some(ProductStatus::Active),
        country: query.country.filter(|c| !c.trim().is_empty()),
        limit: query.limit,
        offset: query.offset,
    };
    let (items, total) = api.list_products(filter).await?;
    Ok(ok_json(Page::new(items, total, clamp_page(query.limit, query.offset))))
}

route!(product_by_id => Get "/products/{id}" impl [B: ProductCatalogue]);
pub async fn product_by_id<B: ProductCatalogue>(
    _user: TelegramUser,
    path: web::Path<i64>,
    api: web::Data<CatalogueApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let product = api.product(path.into_inner()).await?;
    Ok(ok_json(product))
}
