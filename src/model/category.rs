use may_postgres::Row;
use serde::{Deserialize, Serialize};

use super::{column, CategoryId, FromRow};
use crate::executor::StoreError;

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category_id: CategoryId,
    pub category_name: String,
}

impl FromRow for Category {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            category_id: column(row, "category_id")?,
            category_name: column(row, "category_name")?,
        })
    }
}
