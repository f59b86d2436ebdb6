//! SQLite handle shared by the query executor and the response cache
//!
//! The interpreter is synchronous, so each handle owns a current-thread tokio
//! runtime and drives `sqlx` with `block_on`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column as _, ConnectOptions, Connection, Executor, Row as _, ValueRef};
use std::str::FromStr;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::sql::params::statement_count;
use crate::sql::Row;

/* ===================== Error Types ===================== */

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to start database runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("no value supplied for parameter :{0}")]
    MissingParameter(String),
    #[error("read-only query holds {0} statements; only one is allowed")]
    MultipleStatements(usize),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/* ===================== Database ===================== */

pub struct Database {
    runtime: Runtime,
    conn: SqliteConnection,
}

impl Database {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://data.db`.
    pub fn connect(url: &str) -> Result<Self, DbError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let conn = runtime.block_on(options.connect())?;
        info!(url, "connected to database");
        Ok(Database { runtime, conn })
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::connect("sqlite::memory:")
    }

    /// Run one or more statements without parameters or results.
    pub fn execute_script(&mut self, script: &str) -> Result<(), DbError> {
        let Database { runtime, conn } = self;
        runtime.block_on((&mut *conn).execute(script))?;
        Ok(())
    }

    /// Run a parameterized statement that returns no rows. Parameters bind by
    /// position.
    pub fn execute(&mut self, statement: &str, params: &[&str]) -> Result<u64, DbError> {
        let Database { runtime, conn } = self;
        let mut query = sqlx::query(statement);
        for value in params {
            query = query.bind(value.to_string());
        }
        let result = runtime.block_on(query.execute(&mut *conn))?;
        Ok(result.rows_affected())
    }

    /// Run a parameterized query and return its rows as text. Parameters
    /// bind by position.
    pub fn fetch_text(&mut self, statement: &str, params: &[&str]) -> Result<Vec<Row>, DbError> {
        let Database { runtime, conn } = self;
        let mut query = sqlx::query(statement);
        for value in params {
            query = query.bind(value.to_string());
        }
        let rows = runtime.block_on(query.fetch_all(&mut *conn))?;
        rows.iter().map(row_to_text).collect()
    }

    /// Run a query with named parameters inside its own transaction.
    ///
    /// `names` lists the parameters in order of first appearance; `values`
    /// must hold every one of them, otherwise the first missing name is
    /// returned as [`DbError::MissingParameter`] before anything is sent to
    /// SQLite. Read-only queries must be a single statement, run with
    /// `query_only` set and are always rolled back; other queries are
    /// committed when they succeed.
    pub fn run_query(
        &mut self,
        statement: &str,
        read_only: bool,
        names: &[String],
        values: &[(String, String)],
    ) -> Result<Vec<Row>, DbError> {
        if read_only {
            // A second statement could end the transaction and undo query_only
            let count = statement_count(statement);
            if count > 1 {
                return Err(DbError::MultipleStatements(count));
            }
        }

        let mut bound = Vec::with_capacity(names.len());
        for name in names {
            match values.iter().find(|(key, _)| key == name) {
                Some((_, value)) => bound.push(value.clone()),
                None => return Err(DbError::MissingParameter(name.clone())),
            }
        }

        let Database { runtime, conn } = self;
        runtime.block_on(async move {
            let mut tx = conn.begin().await?;
            if read_only {
                sqlx::query("PRAGMA query_only = ON").execute(&mut *tx).await?;
            }

            let mut query = sqlx::query(statement);
            for value in bound {
                query = query.bind(value);
            }
            let result = query.fetch_all(&mut *tx).await;

            if read_only {
                sqlx::query("PRAGMA query_only = OFF").execute(&mut *tx).await?;
                tx.rollback().await?;
            } else if result.is_ok() {
                tx.commit().await?;
            } else {
                tx.rollback().await?;
            }

            let rows = result?;
            debug!(rows = rows.len(), read_only, "query finished");
            rows.iter().map(row_to_text).collect::<Result<Vec<Row>, DbError>>()
        })
    }
}

/// Render every column as text. NULL becomes the empty string.
fn row_to_text(row: &SqliteRow) -> Result<Row, DbError> {
    let mut out = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(idx)?.is_null() {
            String::new()
        } else if let Ok(text) = row.try_get::<String, _>(idx) {
            text
        } else if let Ok(int) = row.try_get::<i64, _>(idx) {
            int.to_string()
        } else if let Ok(float) = row.try_get::<f64, _>(idx) {
            float.to_string()
        } else {
            String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned()
        };
        out.push((column.name().to_string(), value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let mut db = Database::in_memory().unwrap();
        db.execute_script(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, note TEXT);
             INSERT INTO items (name, price, note) VALUES ('pen', 1.5, NULL);
             INSERT INTO items (name, price, note) VALUES ('ink', 3.0, 'blue');",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_columns_render_as_text() {
        let mut db = db();
        let rows = db
            .run_query("SELECT id, name, price, note FROM items ORDER BY id", true, &[], &[])
            .unwrap();
        assert_eq!(
            rows[0],
            vec![
                ("id".to_string(), "1".to_string()),
                ("name".to_string(), "pen".to_string()),
                ("price".to_string(), "1.5".to_string()),
                ("note".to_string(), String::new()),
            ]
        );
        assert_eq!(rows[1][3].1, "blue");
    }

    #[test]
    fn test_missing_parameter_is_reported_before_running() {
        let mut db = db();
        let err = db
            .run_query(
                "SELECT name FROM items WHERE name = :name",
                true,
                &["name".to_string()],
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, DbError::MissingParameter(name) if name == "name"));
    }

    #[test]
    fn test_read_only_query_cannot_write() {
        let mut db = db();
        let err = db.run_query("DELETE FROM items", true, &[], &[]);
        assert!(matches!(err, Err(DbError::Sql(_))));

        let rows = db.run_query("SELECT COUNT(*) AS n FROM items", true, &[], &[]).unwrap();
        assert_eq!(rows[0][0].1, "2");
    }

    #[test]
    fn test_read_only_query_cannot_lift_its_own_guard() {
        let mut db = db();
        let err = db.run_query(
            "PRAGMA query_only = OFF; COMMIT; DELETE FROM items",
            true,
            &[],
            &[],
        );
        assert!(matches!(err, Err(DbError::MultipleStatements(3))));

        // One statement at a time cannot commit a write either
        let _ = db.run_query("PRAGMA query_only = OFF", true, &[], &[]);
        assert!(db.run_query("DELETE FROM items", true, &[], &[]).is_err());

        let rows = db.run_query("SELECT COUNT(*) AS n FROM items", true, &[], &[]).unwrap();
        assert_eq!(rows[0][0].1, "2");
    }

    #[test]
    fn test_mutating_query_commits() {
        let mut db = db();
        db.run_query(
            "INSERT INTO items (name) VALUES (:name)",
            false,
            &["name".to_string()],
            &[("name".to_string(), "nib".to_string())],
        )
        .unwrap();
        let rows = db
            .fetch_text("SELECT name FROM items WHERE name = ?", &["nib"])
            .unwrap();
        assert_eq!(rows, vec![vec![("name".to_string(), "nib".to_string())]]);
    }
}
