//! In-process store.
//!
//! Holds the four tables behind one mutex. A unit of work copies them on
//! begin and swaps the copy back on commit, so at most one unit of work is
//! open at a time and an abandoned one leaves no trace. Key, foreign-key
//! and stock checks mirror the Postgres schema and surface as
//! [`StoreError::Constraint`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Change, Store, UnitOfWork};
use crate::executor::StoreError;
use crate::model::{
    ArchivedEntry, Category, CategoryId, InventoryEntry, Product, ProductId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    categories: BTreeMap<CategoryId, Category>,
    products: BTreeMap<ProductId, Product>,
    inventory: BTreeMap<ProductId, InventoryEntry>,
    archived: BTreeMap<ProductId, ArchivedEntry>,
    last_category_id: CategoryId,
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn begin(&self, _budget: Option<Duration>) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))?;
        let work = Tables::clone(&guard);
        Ok(Box::new(MemoryUnit {
            guard,
            work,
            savepoints: Vec::new(),
        }))
    }
}

struct MemoryUnit<'a> {
    guard: MutexGuard<'a, Tables>,
    work: Tables,
    savepoints: Vec<Tables>,
}

impl MemoryUnit<'_> {
    fn product_mut(&mut self, product_id: ProductId) -> Result<&mut Product, StoreError> {
        self.work
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::NotFound {
                entity: "product",
                id: product_id,
            })
    }

    fn require_product(&self, product_id: ProductId, table: &str) -> Result<(), StoreError> {
        if self.work.products.contains_key(&product_id) {
            Ok(())
        } else {
            Err(StoreError::Constraint(format!(
                "{table}.product_id {product_id} references a missing product"
            )))
        }
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn categories(&mut self) -> Result<Vec<Category>, StoreError> {
        Ok(self.work.categories.values().cloned().collect())
    }

    fn insert_category(&mut self, name: &str) -> Result<Category, StoreError> {
        if self
            .work
            .categories
            .values()
            .any(|c| c.category_name == name)
        {
            return Err(StoreError::Constraint(format!(
                "category name {name:?} already exists"
            )));
        }
        self.work.last_category_id += 1;
        let category = Category {
            category_id: self.work.last_category_id,
            category_name: name.to_string(),
        };
        self.work
            .categories
            .insert(category.category_id, category.clone());
        Ok(category)
    }

    fn products(&mut self) -> Result<Vec<Product>, StoreError> {
        Ok(self.work.products.values().cloned().collect())
    }

    fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.work.products.get(&product_id).cloned())
    }

    fn products_in_category(&mut self, category_id: CategoryId) -> Result<Vec<Product>, StoreError> {
        Ok(self
            .work
            .products
            .values()
            .filter(|p| p.category_id == category_id)
            .cloned()
            .collect())
    }

    fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.work.products.contains_key(&product.product_id) {
            return Err(StoreError::Constraint(format!(
                "product {} already exists",
                product.product_id
            )));
        }
        if !self.work.categories.contains_key(&product.category_id) {
            return Err(StoreError::Constraint(format!(
                "products.category_id {} references a missing category",
                product.category_id
            )));
        }
        if product.stock < 0 {
            return Err(StoreError::Constraint(format!(
                "product {} stock must not be negative",
                product.product_id
            )));
        }
        self.work
            .products
            .insert(product.product_id, product.clone());
        Ok(())
    }

    fn delete_product(&mut self, product_id: ProductId) -> Result<(), StoreError> {
        if self.work.products.remove(&product_id).is_none() {
            return Err(StoreError::NotFound {
                entity: "product",
                id: product_id,
            });
        }
        self.work.inventory.remove(&product_id);
        self.work.archived.remove(&product_id);
        Ok(())
    }

    fn set_stock(&mut self, product_id: ProductId, stock: i32) -> Result<(), StoreError> {
        if stock < 0 {
            return Err(StoreError::Constraint(format!(
                "product {product_id} stock must not be negative"
            )));
        }
        self.product_mut(product_id)?.stock = stock;
        Ok(())
    }

    fn adjust_stock(&mut self, product_id: ProductId, delta: i32) -> Result<i32, StoreError> {
        let product = self.product_mut(product_id)?;
        let stock = product
            .stock
            .checked_add(delta)
            .filter(|s| *s >= 0)
            .ok_or_else(|| {
                StoreError::Constraint(format!(
                    "product {product_id} stock must stay between 0 and {}",
                    i32::MAX
                ))
            })?;
        product.stock = stock;
        Ok(stock)
    }

    fn inventory(&mut self) -> Result<Vec<InventoryEntry>, StoreError> {
        Ok(self.work.inventory.values().cloned().collect())
    }

    fn archived(&mut self) -> Result<Vec<ArchivedEntry>, StoreError> {
        Ok(self.work.archived.values().cloned().collect())
    }

    fn apply(&mut self, change: &Change) -> Result<(), StoreError> {
        match change {
            Change::InsertInventory(entry) => {
                self.require_product(entry.product_id, "inventories")?;
                self.work.inventory.insert(entry.product_id, entry.clone());
            }
            Change::UpdateInventory(entry) => {
                let row = self.work.inventory.get_mut(&entry.product_id).ok_or(
                    StoreError::NotFound {
                        entity: "inventory row",
                        id: entry.product_id,
                    },
                )?;
                *row = entry.clone();
            }
            Change::DeleteInventory { product_id } => {
                self.work.inventory.remove(product_id);
            }
            Change::UpsertArchived(entry) => {
                self.require_product(entry.product_id, "archived")?;
                self.work.archived.insert(entry.product_id, entry.clone());
            }
            Change::DeleteArchived { product_id } => {
                self.work.archived.remove(product_id);
            }
            Change::MarkProduct { product_id, status } => {
                let product = self.product_mut(*product_id)?;
                if product.derived_status() != *status {
                    return Err(StoreError::Constraint(format!(
                        "product {product_id} stock {} contradicts the requested status",
                        product.stock
                    )));
                }
                product.is_available = status.is_available;
                product.is_archived = status.is_archived;
            }
        }
        Ok(())
    }

    fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.work.clone());
        Ok(())
    }

    fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Other("no open savepoint".to_string()))
    }

    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.work = self
            .savepoints
            .pop()
            .ok_or_else(|| StoreError::Other("no open savepoint".to_string()))?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let work = std::mem::take(&mut self.work);
        *self.guard = work;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
