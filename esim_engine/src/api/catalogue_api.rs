use std::fmt::Debug;

use crate::{
    db_types::{NewProduct, Product},
    traits::{clamp_page, CatalogueError, ProductCatalogue, ProductQueryFilter},
};

pub struct CatalogueApi<B> {
    db: B,
}

impl<B> Debug for CatalogueApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CatalogueApi")
    }
}

impl<B: Clone> Clone for CatalogueApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B> CatalogueApi<B>
where B: ProductCatalogue
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn product(&self, id: i64) -> Result<Product, CatalogueError> {
        self.db.fetch_product(id).await?.ok_or(CatalogueError::ProductNotFound(id))
    }

    /// Products sorted by price. Country matching is case-insensitive.
    pub async fn list_products(&self, filter: ProductQueryFilter) -> Result<(Vec<Product>, i64), CatalogueError> {
        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        self.db.list_products(ProductQueryFilter { limit: Some(limit), offset: Some(offset), ..filter }).await
    }

    pub async fn upsert_product(&self, product: NewProduct) -> Result<Product, CatalogueError> {
        self.db.upsert_product(product).await
    }
}
