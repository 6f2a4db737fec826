//! `SqliteDatabase` is the concrete storage backend of the eSIM engine.
//!
//! It implements every trait in [`crate::traits`]. Each trait method that changes state runs in one transaction,
//! composed from the free functions in [`super::db`].
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, esim_cards, new_pool, orders, products, recharge_orders, users, wallets};
use crate::{
    db_types::{
        Amount,
        EsimCard,
        EsimUsageUpdate,
        HistoryKind,
        LedgerEntry,
        NewOrder,
        NewProduct,
        NewRechargeOrder,
        NewUser,
        Order,
        OrderDetail,
        OrderStatus,
        Product,
        RechargeOrder,
        RechargeStatus,
        User,
        Wallet,
        WalletHistory,
    },
    traits::{
        CardQueryFilter,
        CatalogueError,
        CompletedOrder,
        EsimCardError,
        EsimCardManagement,
        HistoryFilter,
        HistoryStats,
        OrderCompletion,
        OrderError,
        OrderManagement,
        OrderQueryFilter,
        OrderStats,
        ProductCatalogue,
        ProductQueryFilter,
        RechargeError,
        RechargeManagement,
        WalletError,
        WalletManagement,
    },
};

/// `related_type` used on ledger rows that belong to a recharge order.
pub const RECHARGE_RELATED_TYPE: &str = "recharge_order";
/// `related_type` used on ledger rows that belong to an eSIM order.
pub const ORDER_RELATED_TYPE: &str = "order";

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object, using `ESIM_DATABASE_URL` or the default location.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// The sum of the user's completed ledger rows. Equal to the wallet balance when the ledger is consistent.
    pub async fn ledger_balance(&self, user_id: i64) -> Result<Amount, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let total = wallets::ledger_balance(user_id, &mut conn).await?;
        Ok(total)
    }
}

//--------------------------------------  WalletManagement  ---------------------------------------------------------
impl WalletManagement for SqliteDatabase {
    async fn ensure_user(&self, user: NewUser) -> Result<User, WalletError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let user = users::upsert_user(user, now, &mut tx).await?;
        wallets::create_wallet_if_missing(user.id, now, &mut tx).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::fetch_user(user_id, &mut conn).await?;
        Ok(user)
    }

    async fn fetch_wallet(&self, user_id: i64) -> Result<Option<Wallet>, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::fetch_wallet(user_id, &mut conn).await?;
        Ok(wallet)
    }

    async fn credit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError> {
        let mut tx = self.pool.begin().await?;
        let result = wallets::credit(entry, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn debit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError> {
        let mut tx = self.pool.begin().await?;
        let result = wallets::debit(entry, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn freeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError> {
        let mut tx = self.pool.begin().await?;
        let wallet = wallets::freeze(user_id, amount, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn unfreeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError> {
        let mut tx = self.pool.begin().await?;
        let wallet = wallets::unfreeze(user_id, amount, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn fetch_history(
        &self,
        user_id: i64,
        filter: HistoryFilter,
    ) -> Result<(Vec<WalletHistory>, i64), WalletError> {
        let mut conn = self.pool.acquire().await?;
        let result = wallets::fetch_history(user_id, &filter, &mut conn).await?;
        Ok(result)
    }

    async fn fetch_history_record(&self, user_id: i64, id: i64) -> Result<Option<WalletHistory>, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let row = wallets::fetch_history_record(user_id, id, &mut conn).await?;
        Ok(row)
    }

    async fn history_stats(&self, user_id: i64) -> Result<HistoryStats, WalletError> {
        let mut conn = self.pool.acquire().await?;
        let stats = wallets::history_stats(user_id, &mut conn).await?;
        Ok(stats)
    }
}

//-------------------------------------- RechargeManagement ---------------------------------------------------------
impl RechargeManagement for SqliteDatabase {
    async fn exact_amount_in_use(&self, exact_amount: Amount) -> Result<bool, RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let in_use = recharge_orders::exact_amount_in_use(exact_amount, &mut conn).await?;
        Ok(in_use)
    }

    async fn insert_recharge_order(&self, order: NewRechargeOrder) -> Result<RechargeOrder, RechargeError> {
        let mut tx = self.pool.begin().await?;
        let order = recharge_orders::insert_recharge_order(order, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Recharge order {} saved with exact amount {}", order.order_no, order.exact_amount);
        Ok(order)
    }

    async fn fetch_recharge_order(&self, order_no: &str) -> Result<Option<RechargeOrder>, RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let order = recharge_orders::fetch_by_order_no(order_no, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_pending_recharge_orders(&self) -> Result<Vec<RechargeOrder>, RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let orders = recharge_orders::fetch_pending(&mut conn).await?;
        Ok(orders)
    }

    async fn fetch_recharge_orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RechargeOrder>, i64), RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let result = recharge_orders::fetch_for_user(user_id, limit, offset, &mut conn).await?;
        Ok(result)
    }

    async fn expire_recharge_order(
        &self,
        order_no: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<Option<RechargeOrder>, RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let order = recharge_orders::expire_one(order_no, now, &mut conn).await?;
        Ok(order)
    }

    async fn expire_recharge_orders(&self, now: chrono::DateTime<Utc>) -> Result<Vec<RechargeOrder>, RechargeError> {
        let mut conn = self.pool.acquire().await?;
        let orders = recharge_orders::expire_all(now, &mut conn).await?;
        Ok(orders)
    }

    async fn confirm_recharge(
        &self,
        order_no: &str,
        tx_hash: &str,
        confirmations: i64,
    ) -> Result<(RechargeOrder, WalletHistory), RechargeError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order = recharge_orders::lock_recharge_order(order_no, now, &mut tx)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_no.to_string()))?;
        if order.status != RechargeStatus::Pending {
            return Err(RechargeError::AlreadyProcessed { order_no: order.order_no, status: order.status });
        }
        if recharge_orders::tx_hash_used_elsewhere(tx_hash, order.id, &mut tx).await? {
            return Err(RechargeError::TxHashReused(tx_hash.to_string()));
        }
        let confirmed = recharge_orders::mark_confirmed(order.id, tx_hash, confirmations, now, &mut tx).await?;
        let entry = LedgerEntry::new(order.user_id, order.amount, HistoryKind::Recharge, format!("Recharge {order_no}"))
            .related_to(RECHARGE_RELATED_TYPE, order_no)
            .with_tx_hash(tx_hash);
        let (wallet, history) = wallets::credit(entry, now, &mut tx).await.map_err(|e| match e {
            WalletError::DuplicateTx(_) => RechargeError::TxHashReused(tx_hash.to_string()),
            e => RechargeError::from(e),
        })?;
        tx.commit().await?;
        info!(
            "💰️ Recharge {order_no} confirmed by {tx_hash}. User {} credited {}. New balance: {}",
            order.user_id, order.amount, wallet.balance
        );
        Ok((confirmed, history))
    }

    async fn fail_recharge_order(&self, order_no: &str, reason: &str) -> Result<RechargeOrder, RechargeError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order = recharge_orders::lock_recharge_order(order_no, now, &mut tx)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_no.to_string()))?;
        match order.status {
            RechargeStatus::Pending => {},
            RechargeStatus::Confirmed => return Err(RechargeError::OrderCompleted(order.order_no)),
            RechargeStatus::Expired => return Err(RechargeError::OrderExpired(order.order_no)),
            status => return Err(RechargeError::AlreadyProcessed { order_no: order.order_no, status }),
        }
        let failed = recharge_orders::mark_failed(order_no, reason, now, &mut tx)
            .await?
            .ok_or_else(|| RechargeError::OrderNotFound(order_no.to_string()))?;
        tx.commit().await?;
        info!("🔄️ Recharge order {order_no} marked as failed: {reason}");
        Ok(failed)
    }

    async fn update_confirmations(&self, order_no: &str, confirmations: i64) -> Result<(), RechargeError> {
        let mut conn = self.pool.acquire().await?;
        recharge_orders::set_confirmations(order_no, confirmations, Utc::now(), &mut conn).await?;
        Ok(())
    }
}

//--------------------------------------  OrderManagement   ---------------------------------------------------------
impl OrderManagement for SqliteDatabase {
    async fn create_paid_order(&self, order: NewOrder) -> Result<(Order, WalletHistory), OrderError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let entry = LedgerEntry::new(
            order.user_id,
            order.total_amount,
            HistoryKind::Payment,
            format!("eSIM order {} ({} x {})", order.order_no, order.quantity, order.product_name),
        )
        .related_to(ORDER_RELATED_TYPE, order.order_no.as_str());
        let (_, history) = wallets::debit(entry, now, &mut tx).await?;
        let order = orders::insert_paid_order(order, now, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ Order {} paid. {} debited from user {}", order.order_no, order.total_amount, order.user_id);
        Ok((order, history))
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_no(&self, order_no: &str) -> Result<Option<Order>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_no(order_no, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, filter: OrderQueryFilter) -> Result<(Vec<Order>, i64), OrderError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::search_orders(&filter, &mut conn).await?;
        Ok(result)
    }

    async fn claim_for_submission(
        &self,
        id: i64,
        now: chrono::DateTime<Utc>,
        lease_until: chrono::DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::claim_for_submission(id, now, lease_until, &mut conn).await?;
        Ok(order)
    }

    async fn mark_order_submitted(
        &self,
        id: i64,
        provider_order_id: &str,
        next_sync_at: chrono::DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let mut tx = self.pool.begin().await?;
        let updated = orders::mark_submitted(id, provider_order_id, next_sync_at, Utc::now(), &mut tx).await?;
        let order = match updated {
            Some(order) => order,
            None => {
                let current =
                    orders::fetch_order(id, &mut tx).await?.ok_or_else(|| OrderError::OrderNotFound(id.to_string()))?;
                return Err(OrderError::InvalidTransition {
                    order_no: current.order_no,
                    from: current.status,
                    to: OrderStatus::Processing,
                });
            },
        };
        tx.commit().await?;
        debug!("📦️ Order {} submitted to the provider as {provider_order_id}", order.order_no);
        Ok(order)
    }

    async fn record_sync_attempt(
        &self,
        id: i64,
        now: chrono::DateTime<Utc>,
        next_sync_at: chrono::DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<Order, OrderError> {
        let mut conn = self.pool.acquire().await?;
        orders::record_sync_attempt(id, now, next_sync_at, error, &mut conn)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(id.to_string()))
    }

    async fn defer_sync(
        &self,
        id: i64,
        now: chrono::DateTime<Utc>,
        next_sync_at: chrono::DateTime<Utc>,
        note: &str,
    ) -> Result<Order, OrderError> {
        let mut conn = self.pool.acquire().await?;
        orders::defer_sync(id, now, next_sync_at, note, &mut conn)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(id.to_string()))
    }

    async fn fetch_unsubmitted_orders(&self, now: chrono::DateTime<Utc>, limit: i64) -> Result<Vec<Order>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_due_with_status(OrderStatus::Paid, now, limit, &mut conn).await?;
        Ok(orders)
    }

    async fn fetch_orders_due_for_sync(
        &self,
        now: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_due_with_status(OrderStatus::Processing, now, limit, &mut conn).await?;
        Ok(orders)
    }

    async fn complete_order(
        &self,
        id: i64,
        completion: OrderCompletion,
    ) -> Result<Option<CompletedOrder>, OrderError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(id, now, &mut tx).await?.ok_or_else(|| OrderError::OrderNotFound(id.to_string()))?;
        if order.status != OrderStatus::Processing {
            debug!("📦️ Order {} is {} and cannot be completed. Skipping.", order.order_no, order.status);
            return Ok(None);
        }
        orders::upsert_order_detail(id, &completion, now, &mut tx).await?;
        let mut cards = Vec::with_capacity(completion.cards.len());
        for card in &completion.cards {
            let card = esim_cards::insert_card(order.user_id, order.id, card, now, &mut tx).await?;
            cards.push(card);
        }
        let order = orders::mark_completed(id, now, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ Order {} completed with {} eSIM cards", order.order_no, cards.len());
        Ok(Some(CompletedOrder { order, cards }))
    }

    async fn fail_and_refund_order(&self, id: i64, reason: &str) -> Result<Option<Order>, OrderError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(id, now, &mut tx).await?.ok_or_else(|| OrderError::OrderNotFound(id.to_string()))?;
        if order.status.is_terminal() {
            debug!("📦️ Order {} is already {}. Nothing to refund.", order.order_no, order.status);
            return Ok(None);
        }
        if order.status.is_paid_and_open() && order.total_amount.is_positive() {
            let entry = LedgerEntry::new(
                order.user_id,
                order.total_amount,
                HistoryKind::Refund,
                reason.to_string(),
            )
            .related_to(ORDER_RELATED_TYPE, order.order_no.as_str());
            wallets::credit(entry, now, &mut tx).await?;
        }
        let failed = orders::mark_failed(id, reason, now, &mut tx).await?;
        tx.commit().await?;
        warn!("📦️ Order {} failed ({reason}). {} refunded to user {}", failed.order_no, failed.total_amount, failed.user_id);
        Ok(Some(failed))
    }

    async fn cancel_order(&self, id: i64) -> Result<Order, OrderError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let order = orders::lock_order(id, now, &mut tx).await?.ok_or_else(|| OrderError::OrderNotFound(id.to_string()))?;
        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidTransition {
                order_no: order.order_no,
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }
        let order = orders::mark_cancelled(id, now, &mut tx).await?;
        tx.commit().await?;
        info!("📦️ Order {} cancelled", order.order_no);
        Ok(order)
    }

    async fn fetch_order_detail(&self, order_id: i64) -> Result<Option<OrderDetail>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let detail = orders::fetch_order_detail(order_id, &mut conn).await?;
        Ok(detail)
    }

    async fn fetch_esim_cards_for_order(&self, order_id: i64) -> Result<Vec<EsimCard>, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let cards = esim_cards::fetch_cards_for_order(order_id, &mut conn).await?;
        Ok(cards)
    }

    async fn order_stats(&self, user_id: i64) -> Result<OrderStats, OrderError> {
        let mut conn = self.pool.acquire().await?;
        let stats = orders::order_stats(user_id, &mut conn).await?;
        Ok(stats)
    }
}

//--------------------------------------  ProductCatalogue  ---------------------------------------------------------
impl ProductCatalogue for SqliteDatabase {
    async fn fetch_product(&self, id: i64) -> Result<Option<Product>, CatalogueError> {
        let mut conn = self.pool.acquire().await?;
        let product = products::fetch_product(id, &mut conn).await?;
        Ok(product)
    }

    async fn list_products(&self, filter: ProductQueryFilter) -> Result<(Vec<Product>, i64), CatalogueError> {
        let mut conn = self.pool.acquire().await?;
        let result = products::list_products(&filter, &mut conn).await?;
        Ok(result)
    }

    async fn upsert_product(&self, product: NewProduct) -> Result<Product, CatalogueError> {
        if !product.price.is_positive() {
            return Err(CatalogueError::InvalidPrice { third_party_id: product.third_party_id, price: product.price });
        }
        let mut conn = self.pool.acquire().await?;
        let product = products::upsert_product(product, Utc::now(), &mut conn).await?;
        Ok(product)
    }
}

//-------------------------------------- EsimCardManagement ---------------------------------------------------------
impl EsimCardManagement for SqliteDatabase {
    async fn fetch_card(&self, id: i64) -> Result<Option<EsimCard>, EsimCardError> {
        let mut conn = self.pool.acquire().await?;
        let card = esim_cards::fetch_card(id, &mut conn).await?;
        Ok(card)
    }

    async fn list_cards(&self, filter: CardQueryFilter) -> Result<(Vec<EsimCard>, i64), EsimCardError> {
        let mut conn = self.pool.acquire().await?;
        let result = esim_cards::list_cards(&filter, &mut conn).await?;
        Ok(result)
    }

    async fn update_card_usage(
        &self,
        id: i64,
        usage: EsimUsageUpdate,
        now: chrono::DateTime<Utc>,
    ) -> Result<EsimCard, EsimCardError> {
        let mut conn = self.pool.acquire().await?;
        esim_cards::update_usage(id, &usage, now, &mut conn).await?.ok_or(EsimCardError::CardNotFound(id))
    }
}
