//! Relational query collaborator
//!
//! The VM runs `SQL` statements through a [`QueryExecutor`]. Named parameters
//! (`:name`, `@name`) are resolved lazily: whenever a run fails for want of
//! one parameter, that single name is looked up through the caller's variable
//! lookup and the query is retried.

use thiserror::Error;

use crate::db::DbError;

pub mod params;
pub mod sqlite;

pub use sqlite::SqliteExecutor;

/// One result row: column name → value rendered as text, in column order.
pub type Row = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query failed: {query}")]
    Failed {
        query: String,
        #[source]
        source: DbError,
    },
    #[error("no query database is available")]
    Unavailable,
}

pub trait QueryExecutor {
    /// Run `query`, returning every row. `lookup` resolves a named parameter
    /// to its value; unknown names resolve to the empty string.
    fn execute(
        &mut self,
        query: &str,
        read_only: bool,
        lookup: &mut dyn FnMut(&str) -> String,
    ) -> Result<Vec<Row>, QueryError>;
}

/// Executor for runs that have no database; every query fails.
#[derive(Debug, Default)]
pub struct NoDatabase;

impl QueryExecutor for NoDatabase {
    fn execute(
        &mut self,
        _query: &str,
        _read_only: bool,
        _lookup: &mut dyn FnMut(&str) -> String,
    ) -> Result<Vec<Row>, QueryError> {
        Err(QueryError::Unavailable)
    }
}
