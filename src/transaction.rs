//! Transactions over a `may_postgres` client.
//!
//! A [`Transaction`] implements [`Executor`], so store code runs unchanged
//! inside or outside one. Savepoints let a unit of work discard a single
//! failed row without abandoning the whole transaction.

use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use std::time::Duration;

use crate::executor::{timed, Executor, StoreError};
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read committed (PostgreSQL default)
    #[default]
    ReadCommitted,
    /// Repeatable read: every statement sees the snapshot taken by the first one
    RepeatableRead,
}

impl IsolationLevel {
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
        }
    }
}

/// A database transaction
///
/// Dropping an open transaction issues a best-effort `ROLLBACK`.
pub struct Transaction {
    client: Client,
    savepoints: u32,
    closed: bool,
}

impl Transaction {
    pub(crate) fn begin(client: Client, isolation_level: IsolationLevel) -> Result<Self, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let begin_sql = format!("BEGIN ISOLATION LEVEL {}", isolation_level.to_sql());
        timed(&begin_sql, || client.execute(begin_sql.as_str(), &[]))?;

        Ok(Self {
            client,
            savepoints: 0,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            Err(StoreError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    fn control(&self, sql: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        timed(sql, || self.client.execute(sql, &[]))?;
        Ok(())
    }

    /// Bound every following statement of this transaction by `budget`.
    ///
    /// Uses `SET LOCAL`, so the setting ends with the transaction.
    pub fn set_statement_timeout(&self, budget: Duration) -> Result<(), StoreError> {
        let millis = budget.as_millis().max(1);
        self.control(&format!("SET LOCAL statement_timeout = {millis}"))
    }

    /// Open a savepoint nested in the current one.
    pub fn savepoint(&mut self) -> Result<(), StoreError> {
        self.control(&format!("SAVEPOINT sp_{}", self.savepoints + 1))?;
        self.savepoints += 1;
        Ok(())
    }

    /// Keep the work done since the innermost savepoint.
    pub fn release_savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoints == 0 {
            return Err(StoreError::Other("no open savepoint".to_string()));
        }
        self.control(&format!("RELEASE SAVEPOINT sp_{}", self.savepoints))?;
        self.savepoints -= 1;
        Ok(())
    }

    /// Discard the work done since the innermost savepoint.
    pub fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        if self.savepoints == 0 {
            return Err(StoreError::Other("no open savepoint".to_string()));
        }
        let name = format!("sp_{}", self.savepoints);
        self.control(&format!("ROLLBACK TO SAVEPOINT {name}"))?;
        self.control(&format!("RELEASE SAVEPOINT {name}"))?;
        self.savepoints -= 1;
        Ok(())
    }

    /// Commit the transaction
    pub fn commit(mut self) -> Result<(), StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.control("COMMIT")?;
        self.closed = true;
        Ok(())
    }

    /// Rollback the transaction
    pub fn rollback(mut self) -> Result<(), StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();

        self.control("ROLLBACK")?;
        self.closed = true;
        Ok(())
    }

    /// Check if the transaction is closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.client.execute("ROLLBACK", &[]) {
                log::warn!("rollback of abandoned transaction failed: {e}");
            }
        }
    }
}

impl Executor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, StoreError> {
        self.ensure_open()?;
        timed(query, || self.client.execute(query, params))
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, StoreError> {
        self.ensure_open()?;
        timed(query, || self.client.query_one(query, params))
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, StoreError> {
        self.ensure_open()?;
        timed(query, || self.client.query(query, params))
    }
}
