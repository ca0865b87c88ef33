//! Helpers for tests that need a real PostgreSQL server.
//!
//! Set `TEST_DATABASE_URL` to run them; without it, [`TestDatabase::new`]
//! returns `None` and the caller skips.

use crate::connection::connect;
use crate::executor::{Executor, PgExecutor, StoreError};
use crate::schema;
use crate::store::PgStore;

pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

pub struct TestDatabase {
    url: String,
}

impl TestDatabase {
    /// `None` when `TEST_DATABASE_URL` is unset.
    pub fn new() -> Option<Self> {
        match std::env::var(TEST_DATABASE_URL) {
            Ok(url) if !url.trim().is_empty() => Some(Self { url }),
            _ => {
                eprintln!("{TEST_DATABASE_URL} is not set, skipping");
                None
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// A fresh executor on its own connection.
    pub fn executor(&self) -> Result<PgExecutor, StoreError> {
        Ok(PgExecutor::new(connect(&self.url)?))
    }

    /// Create the storefront tables and empty them.
    pub fn reset(&self) -> Result<(), StoreError> {
        let executor = self.executor()?;
        schema::ensure_schema(&executor)?;
        executor.execute(
            &format!(
                "TRUNCATE {}, {}, {}, {} RESTART IDENTITY CASCADE",
                schema::ARCHIVED,
                schema::INVENTORIES,
                schema::PRODUCTS,
                schema::CATEGORIES
            ),
            &[],
        )?;
        Ok(())
    }

    /// A store on an emptied schema.
    pub fn store(&self) -> Result<PgStore, StoreError> {
        self.reset()?;
        PgStore::connect(self.url.clone())
    }
}
