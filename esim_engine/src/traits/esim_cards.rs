use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{EsimCard, EsimUsageUpdate},
    provider::ProviderError,
    traits::{data_objects::ErrorKind, CardQueryFilter},
};

#[allow(async_fn_in_trait)]
pub trait EsimCardManagement {
    async fn fetch_card(&self, id: i64) -> Result<Option<EsimCard>, EsimCardError>;

    async fn list_cards(&self, filter: CardQueryFilter) -> Result<(Vec<EsimCard>, i64), EsimCardError>;

    /// Stores fresh usage figures and stamps `last_sync_at`.
    async fn update_card_usage(
        &self,
        id: i64,
        usage: EsimUsageUpdate,
        now: DateTime<Utc>,
    ) -> Result<EsimCard, EsimCardError>;
}

#[derive(Debug, Clone, Error)]
pub enum EsimCardError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("eSIM card {0} does not exist")]
    CardNotFound(i64),
    #[error("eSIM card {0} belongs to another user")]
    Forbidden(i64),
    #[error("eSIM card {0} has no provider reference to sync against")]
    NotSyncable(i64),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl EsimCardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Transient,
            Self::CardNotFound(_) | Self::Forbidden(_) | Self::NotSyncable(_) => ErrorKind::Validation,
            Self::Provider(e) => e.kind(),
        }
    }
}

impl From<sqlx::Error> for EsimCardError {
    fn from(e: sqlx::Error) -> Self {
        EsimCardError::DatabaseError(e.to_string())
    }
}
