use thiserror::Error;

use crate::{
    db_types::{Amount, NewProduct, Product},
    traits::{data_objects::ErrorKind, ProductQueryFilter},
};

/// Read access to the product catalogue. `upsert_product` is used by the external catalogue sync job and by tests.
#[allow(async_fn_in_trait)]
pub trait ProductCatalogue {
    async fn fetch_product(&self, id: i64) -> Result<Option<Product>, CatalogueError>;

    async fn list_products(&self, filter: ProductQueryFilter) -> Result<(Vec<Product>, i64), CatalogueError>;

    /// Inserts a product, or updates the existing one with the same `third_party_id`.
    async fn upsert_product(&self, product: NewProduct) -> Result<Product, CatalogueError>;
}

#[derive(Debug, Clone, Error)]
pub enum CatalogueError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Product {0} does not exist")]
    ProductNotFound(i64),
    #[error("Product {third_party_id} has price {price}. Prices must be positive")]
    InvalidPrice { third_party_id: String, price: Amount },
}

impl CatalogueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DatabaseError(_) => ErrorKind::Transient,
            Self::ProductNotFound(_) | Self::InvalidPrice { .. } => ErrorKind::Validation,
        }
    }
}

impl From<sqlx::Error> for CatalogueError {
    fn from(e: sqlx::Error) -> Self {
        CatalogueError::DatabaseError(e.to_string())
    }
}
