use esim_engine::{
    db_types::{Amount, LedgerEntry, NewProduct, NewUser, Product, User, Wallet, WalletHistory},
    traits::{
        CatalogueError,
        HistoryFilter,
        HistoryStats,
        ProductCatalogue,
        ProductQueryFilter,
        WalletError,
        WalletManagement,
    },
};
use mockall::mock;

mock! {
    pub WalletManager {}
    impl WalletManagement for WalletManager {
        async fn ensure_user(&self, user: NewUser) -> Result<User, WalletError>;
        async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, WalletError>;
        async fn fetch_wallet(&self, user_id: i64) -> Result<Option<Wallet>, WalletError>;
        async fn credit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError>;
        async fn debit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError>;
        async fn freeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError>;
        async fn unfreeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError>;
        async fn fetch_history(&self, user_id: i64, filter: HistoryFilter) -> Result<(Vec<WalletHistory>, i64), WalletError>;
        async fn fetch_history_record(&self, user_id: i64, id: i64) -> Result<Option<WalletHistory>, WalletError>;
        async fn history_stats(&self, user_id: i64) -> Result<HistoryStats, WalletError>;
    }
}

mock! {
    pub Catalogue {}
    impl ProductCatalogue for Catalogue {
        async fn fetch_product(&self, id: i64) -> Result<Option<Product>, CatalogueError>;
        async fn list_products(&self, filter: ProductQueryFilter) -> Result<(Vec<Product>, i64), CatalogueError>;
        async fn upsert_product(&self, product: NewProduct) -> Result<Product, CatalogueError>;
    }
}
