//! The store seam.
//!
//! Everything above this module (reconciler, catalog, scheduler) talks to
//! a [`Store`] and the [`UnitOfWork`] it hands out. A unit of work is one
//! transaction: reads see a consistent view, writes become visible on
//! [`UnitOfWork::commit`] and vanish on [`UnitOfWork::rollback`] or drop.
//!
//! Writes to the derived tables go exclusively through
//! [`UnitOfWork::apply`], which makes the reconciler's [`Change`] list the
//! only vocabulary for touching `inventories` and `archived`.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::executor::StoreError;
use crate::model::{
    ArchivedEntry, Category, CategoryId, InventoryEntry, Product, ProductId, StockStatus,
};

/// One write against a derived table, or a status write-back onto a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    InsertInventory(InventoryEntry),
    UpdateInventory(InventoryEntry),
    DeleteInventory { product_id: ProductId },
    UpsertArchived(ArchivedEntry),
    DeleteArchived { product_id: ProductId },
    MarkProduct { product_id: ProductId, status: StockStatus },
}

impl Change {
    pub fn product_id(&self) -> ProductId {
        match self {
            Change::InsertInventory(entry) | Change::UpdateInventory(entry) => entry.product_id,
            Change::UpsertArchived(entry) => entry.product_id,
            Change::DeleteInventory { product_id }
            | Change::DeleteArchived { product_id }
            | Change::MarkProduct { product_id, .. } => *product_id,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::InsertInventory(e) => {
                write!(f, "insert inventory {} (stock {})", e.product_id, e.stock)
            }
            Change::UpdateInventory(e) => {
                write!(f, "update inventory {} (stock {})", e.product_id, e.stock)
            }
            Change::DeleteInventory { product_id } => write!(f, "delete inventory {product_id}"),
            Change::UpsertArchived(e) => write!(f, "archive {}", e.product_id),
            Change::DeleteArchived { product_id } => write!(f, "unarchive {product_id}"),
            Change::MarkProduct { product_id, status } => write!(
                f,
                "mark product {product_id} available={} archived={}",
                status.is_available, status.is_archived
            ),
        }
    }
}

/// A transactional view of the storefront tables.
pub trait UnitOfWork {
    fn categories(&mut self) -> Result<Vec<Category>, StoreError>;

    /// Insert a category; the key is assigned by the store.
    fn insert_category(&mut self, name: &str) -> Result<Category, StoreError>;

    /// Every product, ordered by key.
    fn products(&mut self) -> Result<Vec<Product>, StoreError>;

    fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError>;

    fn products_in_category(&mut self, category_id: CategoryId) -> Result<Vec<Product>, StoreError>;

    fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Remove a product; its derived rows go with it.
    fn delete_product(&mut self, product_id: ProductId) -> Result<(), StoreError>;

    /// Overwrite the stock count of a product.
    fn set_stock(&mut self, product_id: ProductId, stock: i32) -> Result<(), StoreError>;

    /// Add `delta` to the stock count atomically and return the new count.
    ///
    /// A result below zero is rejected as a constraint violation.
    fn adjust_stock(&mut self, product_id: ProductId, delta: i32) -> Result<i32, StoreError>;

    /// Every inventory row, ordered by key.
    fn inventory(&mut self) -> Result<Vec<InventoryEntry>, StoreError>;

    /// Every archived row, ordered by key.
    fn archived(&mut self) -> Result<Vec<ArchivedEntry>, StoreError>;

    /// Apply one derived-table change.
    fn apply(&mut self, change: &Change) -> Result<(), StoreError>;

    fn savepoint(&mut self) -> Result<(), StoreError>;

    fn release_savepoint(&mut self) -> Result<(), StoreError>;

    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of units of work.
pub trait Store: Send + Sync {
    /// Start a unit of work.
    ///
    /// With a `budget`, statements issued after it has elapsed are
    /// cancelled by the store where the backend supports it.
    fn begin(&self, budget: Option<Duration>) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn begin(&self, budget: Option<Duration>) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        (**self).begin(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_product_id() {
        let entry = InventoryEntry {
            product_id: 3,
            name: "Milk".to_string(),
            stock: 7,
            is_available: true,
        };
        assert_eq!(Change::UpdateInventory(entry).product_id(), 3);
        assert_eq!(Change::DeleteArchived { product_id: 9 }.product_id(), 9);
        assert_eq!(
            Change::MarkProduct {
                product_id: 4,
                status: StockStatus::ARCHIVED
            }
            .product_id(),
            4
        );
    }

    #[test]
    fn test_change_serializes_with_kind_tag() {
        let json = serde_json::to_value(Change::DeleteInventory { product_id: 2 }).unwrap();
        assert_eq!(json["kind"], "delete_inventory");
        assert_eq!(json["product_id"], 2);
    }
}
