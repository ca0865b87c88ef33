use may_postgres::Row;
use serde::{Deserialize, Serialize};

use super::{column, FromRow, Product, ProductId};
use crate::executor::StoreError;

/// Row of the derived `inventories` table: a sellable product and its stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub product_id: ProductId,
    pub name: String,
    pub stock: i32,
    pub is_available: bool,
}

impl InventoryEntry {
    /// The inventory row a stocked product materialises to.
    pub fn for_product(product: &Product) -> Self {
        Self {
            product_id: product.product_id,
            name: product.name.clone(),
            stock: product.stock,
            is_available: product.stock > 0,
        }
    }

    /// Listed in the storefront inventory view.
    pub fn is_listed(&self) -> bool {
        self.is_available && self.stock > 0
    }
}

impl FromRow for InventoryEntry {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            product_id: column(row, "product_id")?,
            name: column(row, "name")?,
            stock: column(row, "stock")?,
            is_available: column(row, "is_available")?,
        })
    }
}
