use may_postgres::Row;
use serde::{Deserialize, Serialize};

use super::{column, FromRow, Product, ProductId};
use crate::executor::StoreError;

/// Row of the derived `archived` table: a product hidden because its stock ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedEntry {
    pub product_id: ProductId,
    pub name: String,
    pub stock: i32,
    pub is_archived: bool,
}

impl ArchivedEntry {
    /// The archive row an exhausted product materialises to.
    pub fn for_product(product: &Product) -> Self {
        Self {
            product_id: product.product_id,
            name: product.name.clone(),
            stock: 0,
            is_archived: true,
        }
    }
}

impl FromRow for ArchivedEntry {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            product_id: column(row, "product_id")?,
            name: column(row, "name")?,
            stock: column(row, "stock")?,
            is_archived: column(row, "is_archived")?,
        })
    }
}
