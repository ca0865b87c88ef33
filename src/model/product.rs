use chrono::NaiveDateTime;
use may_postgres::Row;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{column, CategoryId, FromRow, ProductId};
use crate::executor::StoreError;

/// Availability flags of a product.
///
/// Status is stock-driven: a product with stock is sellable and visible,
/// a product without stock is unavailable and archived. Every writer of
/// `is_available`/`is_archived` goes through [`StockStatus::for_stock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStatus {
    pub is_available: bool,
    pub is_archived: bool,
}

impl StockStatus {
    pub const AVAILABLE: StockStatus = StockStatus {
        is_available: true,
        is_archived: false,
    };
    pub const ARCHIVED: StockStatus = StockStatus {
        is_available: false,
        is_archived: true,
    };

    pub fn for_stock(stock: i32) -> Self {
        if stock > 0 {
            Self::AVAILABLE
        } else {
            Self::ARCHIVED
        }
    }
}

/// Authoritative catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
    pub date_added: NaiveDateTime,
    pub is_available: bool,
    pub is_archived: bool,
}

impl Product {
    pub fn status(&self) -> StockStatus {
        StockStatus {
            is_available: self.is_available,
            is_archived: self.is_archived,
        }
    }

    /// The status this product's stock calls for.
    pub fn derived_status(&self) -> StockStatus {
        StockStatus::for_stock(self.stock)
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            product_id: column(row, "product_id")?,
            category_id: column(row, "category_id")?,
            name: column(row, "name")?,
            description: column(row, "description")?,
            price: column(row, "price")?,
            stock: column(row, "stock")?,
            image_url: column(row, "image_url")?,
            date_added: column(row, "date_added")?,
            is_available: column(row, "is_available")?,
            is_archived: column(row, "is_archived")?,
        })
    }
}

/// Insert payload for a product. The key is assigned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub product_id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
}

impl NewProduct {
    pub fn new(
        product_id: ProductId,
        category_id: CategoryId,
        name: impl Into<String>,
        price: Decimal,
        stock: i32,
    ) -> Self {
        Self {
            product_id,
            category_id,
            name: name.into(),
            description: None,
            price,
            stock,
            image_url: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// The stored row, with flags derived from the initial stock.
    pub fn into_product(self, date_added: NaiveDateTime) -> Product {
        let status = StockStatus::for_stock(self.stock);
        Product {
            product_id: self.product_id,
            category_id: self.category_id,
            name: self.name,
            description: self.description,
            price: self.price,
            stock: self.stock,
            image_url: self.image_url,
            date_added,
            is_available: status.is_available,
            is_archived: status.is_archived,
        }
    }
}
