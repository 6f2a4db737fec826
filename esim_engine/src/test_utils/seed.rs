use crate::{
    db_types::{Amount, HistoryKind, LedgerEntry, NewProduct, NewUser, Product, User},
    traits::{ProductCatalogue, WalletManagement},
    SqliteDatabase,
};

/// Registers a user and, if `balance` is positive, credits it as an opening deposit.
pub async fn seed_user(db: &SqliteDatabase, user_id: i64, balance: Amount) -> User {
    let user = db.ensure_user(NewUser::new(user_id).with_username(format!("user{user_id}"))).await.unwrap();
    if balance.is_positive() {
        db.credit(LedgerEntry::new(user_id, balance, HistoryKind::Recharge, "opening balance")).await.unwrap();
    }
    user
}

pub async fn seed_product(db: &SqliteDatabase, third_party_id: &str, price: &str) -> Product {
    let name = format!("Plan {third_party_id}");
    let product = NewProduct::new(third_party_id, name.as_str(), price.parse().unwrap());
    db.upsert_product(product).await.unwrap()
}
