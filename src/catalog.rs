//! Storefront catalog operations.
//!
//! Everything here writes to `categories` and `products` only. Operations
//! that move stock reconcile synchronously afterwards, so the derived
//! tables usually reflect the write as soon as the call returns. A failed
//! reconcile is logged and left to the next tick; the committed write is
//! never reported as an error. The reconciler stays the only writer of
//! `inventories` and `archived`.

use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::executor::StoreError;
use crate::model::{
    ArchivedEntry, Category, CategoryId, InventoryEntry, NewProduct, Product, ProductId,
};
use crate::reconcile::Reconciler;
use crate::store::UnitOfWork;

const MAX_NAME_LEN: usize = 200;

/// Markup, script and SQL comment/terminator fragments are refused in
/// search queries.
const UNSAFE_SEARCH_PATTERN: &str = r"(?i)<.*?>|script|--|;";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("name must not be empty or longer than 200 characters")]
    InvalidName,
    #[error("price must be positive, got {0}")]
    InvalidPrice(Decimal),
    #[error("stock must not be negative, got {0}")]
    InvalidStock(i32),
    #[error("quantity {0} is not allowed here")]
    InvalidQuantity(i32),
    #[error("invalid search query: {0}")]
    InvalidSearch(String),
    #[error("minimum price {min} exceeds maximum price {max}")]
    InvalidFilter { min: Decimal, max: Decimal },
    #[error("product {0} not found")]
    NotFound(ProductId),
    #[error("category {0} not found")]
    CategoryNotFound(CategoryId),
    #[error("product {0} already exists")]
    DuplicateProduct(ProductId),
    #[error("product {product_id} has {available} in stock, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Server-side product filter. Unset bounds do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFilter {
    pub category_id: Option<CategoryId>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

impl ProductFilter {
    fn validate(&self) -> Result<(), CatalogError> {
        match (self.min_price, self.max_price) {
            (Some(min), Some(max)) if min > max => Err(CatalogError::InvalidFilter { min, max }),
            _ => Ok(()),
        }
    }

    pub fn matches(&self, product: &Product) -> bool {
        self.category_id.map_or(true, |id| product.category_id == id)
            && self.min_price.map_or(true, |min| product.price >= min)
            && self.max_price.map_or(true, |max| product.price <= max)
    }
}

pub struct Catalog {
    reconciler: Arc<Reconciler>,
}

impl Catalog {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn add_category(&self, name: &str) -> Result<Category, CatalogError> {
        let name = valid_name(name)?;
        self.write(|uow| Ok(uow.insert_category(name)?))
    }

    pub fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        self.read(|uow| Ok(uow.categories()?))
    }

    /// Add a product; its flags follow the initial stock.
    pub fn add_product(&self, new: NewProduct) -> Result<Product, CatalogError> {
        let name = valid_name(&new.name)?.to_string();
        if new.price <= Decimal::ZERO {
            return Err(CatalogError::InvalidPrice(new.price));
        }
        if new.stock < 0 {
            return Err(CatalogError::InvalidStock(new.stock));
        }
        let product = NewProduct { name, ..new }.into_product(Utc::now().naive_utc());

        self.write(|uow| {
            if !uow
                .categories()?
                .iter()
                .any(|c| c.category_id == product.category_id)
            {
                return Err(CatalogError::CategoryNotFound(product.category_id));
            }
            if uow.product(product.product_id)?.is_some() {
                return Err(CatalogError::DuplicateProduct(product.product_id));
            }
            uow.insert_product(&product)?;
            Ok(())
        })?;
        log::info!("added product {} ({})", product.product_id, product.name);
        self.sync();
        Ok(product)
    }

    pub fn product(&self, product_id: ProductId) -> Result<Product, CatalogError> {
        self.read(|uow| uow.product(product_id)?.ok_or(CatalogError::NotFound(product_id)))
    }

    pub fn products(&self) -> Result<Vec<Product>, CatalogError> {
        self.read(|uow| Ok(uow.products()?))
    }

    pub fn products_in_category(&self, category_id: CategoryId) -> Result<Vec<Product>, CatalogError> {
        self.read(|uow| Ok(uow.products_in_category(category_id)?))
    }

    pub fn filter_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, CatalogError> {
        filter.validate()?;
        let products = match filter.category_id {
            Some(category_id) => self.products_in_category(category_id)?,
            None => self.products()?,
        };
        Ok(products.into_iter().filter(|p| filter.matches(p)).collect())
    }

    /// Available products whose name or category contains any word of
    /// `query` (case-insensitive), narrowed by `filter`.
    pub fn search(&self, query: &str, filter: &ProductFilter) -> Result<Vec<Product>, CatalogError> {
        let terms = search_terms(query)?;
        filter.validate()?;

        let (categories, products) = self.read(|uow| Ok((uow.categories()?, uow.products()?)))?;
        let category_names: HashMap<CategoryId, String> = categories
            .into_iter()
            .map(|c| (c.category_id, c.category_name.to_lowercase()))
            .collect();

        Ok(products
            .into_iter()
            .filter(|p| p.is_available && filter.matches(p))
            .filter(|p| {
                let name = p.name.to_lowercase();
                let category = category_names
                    .get(&p.category_id)
                    .map(String::as_str)
                    .unwrap_or_default();
                terms
                    .iter()
                    .any(|term| name.contains(term.as_str()) || category.contains(term.as_str()))
            })
            .collect())
    }

    /// Add `additional` units to a product's stock.
    pub fn restock(&self, product_id: ProductId, additional: i32) -> Result<Product, CatalogError> {
        self.write(|uow| {
            require_product(uow, product_id)?;
            if additional < 0 {
                return Err(CatalogError::InvalidQuantity(additional));
            }
            uow.adjust_stock(product_id, additional)?;
            Ok(())
        })?;
        self.sync();
        self.product(product_id)
    }

    /// Take `quantity` units out of stock, as a checkout would.
    pub fn sell(&self, product_id: ProductId, quantity: i32) -> Result<Product, CatalogError> {
        if quantity <= 0 {
            return Err(CatalogError::InvalidQuantity(quantity));
        }
        self.write(|uow| {
            let product = require_product(uow, product_id)?;
            if product.stock < quantity {
                return Err(CatalogError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: product.stock,
                });
            }
            uow.adjust_stock(product_id, -quantity)?;
            Ok(())
        })?;
        self.sync();
        self.product(product_id)
    }

    /// Withdraw a product from sale by emptying its stock.
    pub fn archive(&self, product_id: ProductId) -> Result<Product, CatalogError> {
        self.write(|uow| {
            require_product(uow, product_id)?;
            uow.set_stock(product_id, 0)?;
            Ok(())
        })?;
        log::info!("archived product {product_id}");
        self.sync();
        self.product(product_id)
    }

    /// Put an archived product back on sale with `stock` units.
    pub fn unarchive(&self, product_id: ProductId, stock: i32) -> Result<Product, CatalogError> {
        if stock <= 0 {
            return Err(CatalogError::InvalidStock(stock));
        }
        self.write(|uow| {
            require_product(uow, product_id)?;
            uow.set_stock(product_id, stock)?;
            Ok(())
        })?;
        log::info!("unarchived product {product_id} with stock {stock}");
        self.sync();
        self.product(product_id)
    }

    /// Delete a product together with its derived rows.
    pub fn remove_product(&self, product_id: ProductId) -> Result<(), CatalogError> {
        self.write(|uow| {
            require_product(uow, product_id)?;
            uow.delete_product(product_id)?;
            Ok(())
        })?;
        log::info!("removed product {product_id}");
        Ok(())
    }

    /// Inventory rows that are sellable right now.
    pub fn inventory_listing(&self) -> Result<Vec<InventoryEntry>, CatalogError> {
        self.read(|uow| {
            Ok(uow
                .inventory()?
                .into_iter()
                .filter(InventoryEntry::is_listed)
                .collect())
        })
    }

    pub fn archived_listing(&self) -> Result<Vec<ArchivedEntry>, CatalogError> {
        self.read(|uow| Ok(uow.archived()?))
    }

    /// Reconcile now, after the catalog write has committed.
    ///
    /// A failed run never fails the caller: the write already landed and
    /// the next tick materialises it.
    fn sync(&self) {
        match self.reconciler.reconcile() {
            Ok(report) => log::debug!("catalog write reconciled by run {}", report.run_id),
            Err(e) if e.is_transient() => log::debug!("deferring reconcile to the next tick: {e}"),
            Err(e) => {
                log::error!("reconcile after catalog write failed, left to the next tick: {e}")
            }
        }
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&mut dyn UnitOfWork) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut uow = self.reconciler.store().begin(None)?;
        let result = f(&mut *uow);
        uow.rollback()?;
        result
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut dyn UnitOfWork) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut uow = self.reconciler.store().begin(None)?;
        match f(&mut *uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback() {
                    log::warn!("rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

fn valid_name(name: &str) -> Result<&str, CatalogError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        Err(CatalogError::InvalidName)
    } else {
        Ok(name)
    }
}

fn search_terms(query: &str) -> Result<Vec<String>, CatalogError> {
    let unsafe_input = Regex::new(UNSAFE_SEARCH_PATTERN)
        .map_err(|e| CatalogError::InvalidSearch(format!("invalid pattern: {e}")))?;
    if unsafe_input.is_match(query) {
        return Err(CatalogError::InvalidSearch(
            "invalid characters in search query".to_string(),
        ));
    }
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return Err(CatalogError::InvalidSearch("query must not be empty".to_string()));
    }
    Ok(terms)
}

fn require_product(uow: &mut dyn UnitOfWork, product_id: ProductId) -> Result<Product, CatalogError> {
    uow.product(product_id)?.ok_or(CatalogError::NotFound(product_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn catalog() -> (Catalog, CategoryId) {
        let reconciler = Arc::new(Reconciler::new(Arc::new(MemoryStore::new())));
        let catalog = Catalog::new(reconciler);
        let dairy = catalog.add_category("Dairy").unwrap();
        (catalog, dairy.category_id)
    }

    fn milk(category_id: CategoryId, stock: i32) -> NewProduct {
        NewProduct::new(1, category_id, "Milk", Decimal::new(129, 2), stock)
    }

    #[test]
    fn test_add_product_validates_input() {
        let (catalog, dairy) = catalog();
        assert!(matches!(
            catalog.add_product(NewProduct::new(1, dairy, "  ", Decimal::ONE, 1)),
            Err(CatalogError::InvalidName)
        ));
        assert!(matches!(
            catalog.add_product(NewProduct::new(1, dairy, "Milk", Decimal::ZERO, 1)),
            Err(CatalogError::InvalidPrice(_))
        ));
        assert!(matches!(
            catalog.add_product(milk(dairy, -1)),
            Err(CatalogError::InvalidStock(-1))
        ));
        assert!(matches!(
            catalog.add_product(milk(99, 1)),
            Err(CatalogError::CategoryNotFound(99))
        ));

        catalog.add_product(milk(dairy, 2)).unwrap();
        assert!(matches!(
            catalog.add_product(milk(dairy, 2)),
            Err(CatalogError::DuplicateProduct(1))
        ));
    }

    #[test]
    fn test_new_product_is_listed_immediately() {
        let (catalog, dairy) = catalog();
        catalog.add_product(milk(dairy, 6)).unwrap();
        let listing = catalog.inventory_listing().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].stock, 6);
    }

    #[test]
    fn test_restock_rules() {
        let (catalog, dairy) = catalog();
        catalog.add_product(milk(dairy, 0)).unwrap();
        assert_eq!(catalog.archived_listing().unwrap().len(), 1);

        assert!(matches!(catalog.restock(7, 3), Err(CatalogError::NotFound(7))));
        assert!(matches!(
            catalog.restock(1, -3),
            Err(CatalogError::InvalidQuantity(-3))
        ));

        let product = catalog.restock(1, 5).unwrap();
        assert_eq!(product.stock, 5);
        assert!(product.is_available);
        assert!(catalog.archived_listing().unwrap().is_empty());
        assert_eq!(catalog.inventory_listing().unwrap()[0].stock, 5);
    }

    #[test]
    fn test_sell_until_sold_out() {
        let (catalog, dairy) = catalog();
        catalog.add_product(milk(dairy, 3)).unwrap();

        assert!(matches!(catalog.sell(1, 0), Err(CatalogError::InvalidQuantity(0))));
        assert!(matches!(
            catalog.sell(1, 4),
            Err(CatalogError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            })
        ));

        assert_eq!(catalog.sell(1, 2).unwrap().stock, 1);
        let sold_out = catalog.sell(1, 1).unwrap();
        assert_eq!(sold_out.stock, 0);
        assert!(sold_out.is_archived);
        assert!(catalog.inventory_listing().unwrap().is_empty());
        assert_eq!(catalog.archived_listing().unwrap()[0].product_id, 1);
    }

    #[test]
    fn test_archive_round_trip() {
        let (catalog, dairy) = catalog();
        catalog.add_product(milk(dairy, 4)).unwrap();

        let archived = catalog.archive(1).unwrap();
        assert_eq!(archived.stock, 0);
        assert!(archived.is_archived);
        assert_eq!(catalog.archived_listing().unwrap().len(), 1);

        assert!(matches!(
            catalog.unarchive(1, 0),
            Err(CatalogError::InvalidStock(0))
        ));
        let back = catalog.unarchive(1, 8).unwrap();
        assert!(back.is_available && !back.is_archived);
        assert!(catalog.archived_listing().unwrap().is_empty());
        assert_eq!(catalog.inventory_listing().unwrap()[0].stock, 8);
    }

    #[test]
    fn test_remove_product_drops_derived_rows() {
        let (catalog, dairy) = catalog();
        catalog.add_product(milk(dairy, 4)).unwrap();
        catalog.remove_product(1).unwrap();
        assert!(catalog.inventory_listing().unwrap().is_empty());
        assert!(matches!(catalog.product(1), Err(CatalogError::NotFound(1))));
        assert!(matches!(
            catalog.remove_product(1),
            Err(CatalogError::NotFound(1))
        ));
    }

    #[test]
    fn test_filter_products_by_category_and_price() {
        let (catalog, dairy) = catalog();
        let bakery = catalog.add_category("Bakery").unwrap().category_id;
        catalog.add_product(milk(dairy, 1)).unwrap();
        catalog
            .add_product(NewProduct::new(2, bakery, "Bread", Decimal::new(349, 2), 2))
            .unwrap();
        catalog
            .add_product(NewProduct::new(3, bakery, "Bagel", Decimal::new(99, 2), 2))
            .unwrap();

        let filter = ProductFilter {
            category_id: Some(bakery),
            min_price: Some(Decimal::ONE),
            max_price: None,
        };
        let found = catalog.filter_products(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Bread");

        let inverted = ProductFilter {
            min_price: Some(Decimal::TEN),
            max_price: Some(Decimal::ONE),
            ..ProductFilter::default()
        };
        assert!(matches!(
            catalog.filter_products(&inverted),
            Err(CatalogError::InvalidFilter { .. })
        ));
        assert_eq!(catalog.categories().unwrap().len(), 2);
    }

    #[test]
    fn test_search_matches_name_or_category() {
        let (catalog, dairy) = catalog();
        let bakery = catalog.add_category("Bakery").unwrap().category_id;
        catalog.add_product(milk(dairy, 1)).unwrap();
        catalog
            .add_product(NewProduct::new(2, bakery, "Sourdough", Decimal::new(549, 2), 2))
            .unwrap();
        catalog
            .add_product(NewProduct::new(3, bakery, "Rye", Decimal::new(399, 2), 0))
            .unwrap();

        let by_name = catalog.search("MILK", &ProductFilter::default()).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].product_id, 1);

        // Rye is sold out, so only Sourdough is returned for its category.
        let by_category = catalog.search("bakery", &ProductFilter::default()).unwrap();
        assert_eq!(by_category.len(), 1);
        assert_eq!(by_category[0].name, "Sourdough");

        let cheap = ProductFilter {
            max_price: Some(Decimal::new(200, 2)),
            ..ProductFilter::default()
        };
        let found = catalog.search("sourdough milk", &cheap).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Milk");
    }

    #[test]
    fn test_search_rejects_unsafe_or_empty_queries() {
        let (catalog, _) = catalog();
        for query in ["<b>milk</b>", "milk; DROP TABLE products", "milk --", "JavaScript", "   "] {
            assert!(
                matches!(
                    catalog.search(query, &ProductFilter::default()),
                    Err(CatalogError::InvalidSearch(_))
                ),
                "{query:?} should be rejected"
            );
        }
    }
}
