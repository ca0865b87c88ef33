//! # Grocer
//!
//! Storefront catalog over PostgreSQL with a background reconciler that
//! keeps the derived `inventories` and `archived` tables in line with
//! `products`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use grocer::{Catalog, GrocerConfig, PgStore, ReconcileScheduler, Reconciler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GrocerConfig::load()?;
//! let store = PgStore::new(config.database.url.clone())?;
//! store.ensure_schema()?;
//!
//! let reconciler = Arc::new(
//!     Reconciler::new(Arc::new(store)).with_budget(config.reconciler.run_budget()),
//! );
//! let scheduler = ReconcileScheduler::start(reconciler.clone(), config.reconciler.scheduler())?;
//! let catalog = Catalog::new(reconciler);
//! catalog.restock(1, 12)?;
//! scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod test_helpers;
pub mod transaction;

pub use catalog::{Catalog, CatalogError, ProductFilter};
pub use config::{DatabaseConfig, GrocerConfig, ReconcilerConfig};
pub use connection::{connect, ConnectionError};
pub use executor::{Executor, PgExecutor, StoreError};
pub use model::{
    ArchivedEntry, Category, CategoryId, InventoryEntry, NewProduct, Product, ProductId,
    StockStatus,
};
pub use reconcile::{plan, ReconcileError, ReconcileReport, Reconciler};
pub use scheduler::{ReconcileScheduler, SchedulerConfig, SchedulerError, SchedulerHandle, TickStats};
pub use store::{Change, MemoryStore, PgStore, Store, UnitOfWork};
pub use transaction::{IsolationLevel, Transaction};
