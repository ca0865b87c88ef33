//! Entity models for the storefront tables.
//!
//! `products` and `categories` are authoritative. `inventories` and
//! `archived` are derived from `products` by the reconciler and carry no
//! independent write path.

mod archived;
mod category;
mod inventory;
mod product;

pub use archived::ArchivedEntry;
pub use category::Category;
pub use inventory::InventoryEntry;
pub use product::{NewProduct, Product, StockStatus};

use may_postgres::types::FromSql;
use may_postgres::Row;

use crate::executor::StoreError;

/// Caller-assigned product key shared by `products`, `inventories` and `archived`.
pub type ProductId = i64;

/// Category key.
pub type CategoryId = i64;

/// Decode a model from a `may_postgres::Row`.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, StoreError>;
}

/// Typed column read that names the failing column.
pub(crate) fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::Parse(format!("column {name}: {e}")))
}
