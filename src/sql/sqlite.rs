//! SQLite-backed query executor

use tracing::{debug, info};

use super::params::named_parameters;
use super::{QueryError, QueryExecutor, Row};
use crate::db::{Database, DbError};

pub struct SqliteExecutor {
    db: Database,
}

impl SqliteExecutor {
    pub fn new(db: Database) -> Self {
        SqliteExecutor { db }
    }

    pub fn connect(url: &str) -> Result<Self, DbError> {
        Ok(Self::new(Database::connect(url)?))
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(
        &mut self,
        query: &str,
        read_only: bool,
        lookup: &mut dyn FnMut(&str) -> String,
    ) -> Result<Vec<Row>, QueryError> {
        info!(read_only, query, "executing query");
        let names = named_parameters(query);
        let mut values: Vec<(String, String)> = Vec::new();
        loop {
            match self.db.run_query(query, read_only, &names, &values) {
                Ok(rows) => {
                    for row in &rows {
                        debug!(?row, "query row");
                    }
                    return Ok(rows);
                }
                Err(DbError::MissingParameter(name)) => {
                    let value = lookup(&name);
                    debug!(parameter = %name, %value, "resolved query parameter");
                    values.push((name, value));
                }
                Err(source) => {
                    return Err(QueryError::Failed {
                        query: query.to_string(),
                        source,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    fn executor() -> SqliteExecutor {
        let mut db = Database::in_memory().unwrap();
        db.execute_script(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT, body TEXT);
             INSERT INTO notes (title, body) VALUES ('a', 'first');
             INSERT INTO notes (title, body) VALUES ('b', 'second');",
        )
        .unwrap();
        SqliteExecutor::new(db)
    }

    #[test]
    fn test_parameters_resolved_one_at_a_time() {
        let mut exec = executor();
        let vars = hashmap! { "title" => "b", "unused" => "x" };
        let mut asked = Vec::new();
        let rows = exec
            .execute(
                "SELECT body FROM notes WHERE title = :title OR body = @missing",
                true,
                &mut |name| {
                    asked.push(name.to_string());
                    vars.get(name).map(|v| v.to_string()).unwrap_or_default()
                },
            )
            .unwrap();
        assert_eq!(asked, vec!["title", "missing"]);
        assert_eq!(rows, vec![vec![("body".to_string(), "second".to_string())]]);
    }

    #[test]
    fn test_mutation_then_read() {
        let mut exec = executor();
        exec.execute(
            "INSERT INTO notes (title, body) VALUES (:t, 'third')",
            false,
            &mut |_| "c".to_string(),
        )
        .unwrap();
        let rows = exec
            .execute("SELECT COUNT(*) AS n FROM notes", true, &mut |_| String::new())
            .unwrap();
        assert_eq!(rows[0], vec![("n".to_string(), "3".to_string())]);
    }

    #[test]
    fn test_read_only_script_leaves_rows_in_place() {
        let mut exec = executor();
        let err = exec
            .execute(
                "PRAGMA query_only = OFF; COMMIT; DELETE FROM notes",
                true,
                &mut |_| String::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::Failed {
                source: DbError::MultipleStatements(3),
                ..
            }
        ));

        let rows = exec
            .execute("SELECT COUNT(*) AS n FROM notes", true, &mut |_| String::new())
            .unwrap();
        assert_eq!(rows[0], vec![("n".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_other_failures_carry_query_text() {
        let mut exec = executor();
        let err = exec
            .execute("SELECT * FROM nowhere", true, &mut |_| String::new())
            .unwrap_err();
        match err {
            QueryError::Failed { query, .. } => assert_eq!(query, "SELECT * FROM nowhere"),
            other => panic!("Expected query failure, got {:?}", other),
        }
    }
}
