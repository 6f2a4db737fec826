use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Amount, LedgerEntry, NewUser, User, Wallet, WalletHistory},
    traits::{clamp_page, HistoryFilter, HistoryStats, WalletError, WalletManagement},
};

/// User-facing surface of the Wallet Ledger.
///
/// Balances only ever change through [`WalletApi::credit`], [`WalletApi::debit`], [`WalletApi::freeze`] and
/// [`WalletApi::unfreeze`] (or the recharge and order flows, which use the same backend methods inside their own
/// transactions).
#[derive(Clone)]
pub struct WalletApi<B> {
    db: B,
}

impl<B: Debug> Debug for WalletApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletApi ({:?})", self.db)
    }
}

impl<B> WalletApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> WalletApi<B>
where B: WalletManagement
{
    /// Registers the user on first contact (with an empty wallet) and refreshes their profile afterwards.
    pub async fn ensure_user(&self, user: NewUser) -> Result<User, WalletError> {
        let user = self.db.ensure_user(user).await?;
        trace!("💰️ User {} is registered", user.id);
        Ok(user)
    }

    pub async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, WalletError> {
        self.db.fetch_user(user_id).await
    }

    pub async fn balance(&self, user_id: i64) -> Result<Wallet, WalletError> {
        self.db.fetch_wallet(user_id).await?.ok_or(WalletError::WalletNotFound(user_id))
    }

    /// A page of the user's balance history, newest first. Limits are clamped to the allowed page size.
    pub async fn history(
        &self,
        user_id: i64,
        filter: HistoryFilter,
    ) -> Result<(Vec<WalletHistory>, i64), WalletError> {
        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        self.db.fetch_history(user_id, filter.with_page(limit, offset)).await
    }

    pub async fn history_record(&self, user_id: i64, id: i64) -> Result<Option<WalletHistory>, WalletError> {
        self.db.fetch_history_record(user_id, id).await
    }

    pub async fn stats(&self, user_id: i64) -> Result<HistoryStats, WalletError> {
        self.db.history_stats(user_id).await
    }

    pub async fn credit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError> {
        let (wallet, row) = self.db.credit(entry).await?;
        debug!("💰️ Credited {} to user {}. Balance is now {}", row.amount, wallet.user_id, wallet.balance);
        Ok((wallet, row))
    }

    pub async fn debit(&self, entry: LedgerEntry) -> Result<(Wallet, WalletHistory), WalletError> {
        let (wallet, row) = self.db.debit(entry).await?;
        debug!("💰️ Debited {} from user {}. Balance is now {}", row.amount.abs(), wallet.user_id, wallet.balance);
        Ok((wallet, row))
    }

    pub async fn freeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError> {
        let wallet = self.db.freeze(user_id, amount).await?;
        debug!("💰️ Froze {amount} for user {user_id}. {} frozen in total", wallet.frozen);
        Ok(wallet)
    }

    pub async fn unfreeze(&self, user_id: i64, amount: Amount) -> Result<Wallet, WalletError> {
        let wallet = self.db.unfreeze(user_id, amount).await?;
        debug!("💰️ Released {amount} for user {user_id}. {} still frozen", wallet.frozen);
        Ok(wallet)
    }
}
