use std::{fmt::Debug, time::Duration};

use chrono::Utc;
use log::*;

use crate::{
    db_types::{EsimCard, EsimUsageUpdate},
    provider::{EsimUsage, ProviderClient, ProviderError},
    traits::{clamp_page, CardQueryFilter, EsimCardError, EsimCardManagement},
};

pub const USAGE_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Access to issued eSIM cards. Every lookup is scoped to the requesting user.
#[derive(Clone)]
pub struct EsimCardApi<B, P> {
    db: B,
    provider: P,
}

impl<B, P> Debug for EsimCardApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EsimCardApi")
    }
}

impl<B, P> EsimCardApi<B, P> {
    pub fn new(db: B, provider: P) -> Self {
        Self { db, provider }
    }
}

impl From<EsimUsage> for EsimUsageUpdate {
    fn from(usage: EsimUsage) -> Self {
        Self {
            status: usage.status,
            data_used: usage.data_used,
            data_remaining: usage.data_remaining,
            usage_percent: usage.usage_percent,
            activated_at: usage.activation_time,
            expires_at: usage.expire_time,
        }
    }
}

impl<B, P> EsimCardApi<B, P>
where
    B: EsimCardManagement,
    P: ProviderClient,
{
    pub async fn list_cards(&self, user_id: i64, filter: CardQueryFilter) -> Result<(Vec<EsimCard>, i64), EsimCardError> {
        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        let filter = CardQueryFilter { user_id: Some(user_id), limit: Some(limit), offset: Some(offset), ..filter };
        self.db.list_cards(filter).await
    }

    pub async fn get_card(&self, card_id: i64, user_id: i64) -> Result<EsimCard, EsimCardError> {
        let card = self.db.fetch_card(card_id).await?.ok_or(EsimCardError::CardNotFound(card_id))?;
        if card.user_id != user_id {
            return Err(EsimCardError::Forbidden(card_id));
        }
        Ok(card)
    }

    /// Pulls fresh usage figures from the provider. Cards that are expired or terminated are returned as they are.
    pub async fn sync_card_usage(&self, card_id: i64, user_id: i64) -> Result<EsimCard, EsimCardError> {
        let card = self.get_card(card_id, user_id).await?;
        if card.status.is_final() {
            trace!("🛰️ Card {} is {}. Not syncing usage.", card.id, card.status);
            return Ok(card);
        }
        let provider_id = card.provider_order_id.as_deref().ok_or(EsimCardError::NotSyncable(card.id))?;
        let usage = tokio::time::timeout(USAGE_SYNC_TIMEOUT, self.provider.get_esim_usage(provider_id))
            .await
            .unwrap_or(Err(ProviderError::Timeout))?;
        if let Some(iccid) = usage.iccid.as_deref() {
            if iccid != card.iccid {
                warn!("🛰️ Provider returned usage for ICCID {iccid} when asked about card {}", card.iccid);
            }
        }
        let card = self.db.update_card_usage(card.id, usage.into(), Utc::now()).await?;
        debug!("🛰️ Usage for card {} refreshed. {} MB remaining", card.id, card.data_remaining);
        Ok(card)
    }
}
