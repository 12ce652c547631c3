//! SQLite implementation of [`Executor`].
//!
//! [`SqliteExecutor`] owns one rusqlite connection and runs every statement
//! of a call on it. Statements are prepared through rusqlite's statement
//! cache since the compiled queries and DML texts repeat.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Rows};

use ormgraph_core::{Row, Value};

use crate::error::PersistError;
use crate::executor::{Executor, RowConsumer, RowCursor, Statement};

/// SQLite-backed [`Executor`].
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, PersistError> {
        let conn = Connection::open(path).map_err(|e| PersistError::execution("<open>", e))?;
        Self::configure(conn)
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, PersistError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PersistError::execution("<open>", e))?;
        Self::configure(conn)
    }

    /// Wraps an already opened connection.
    pub fn from_connection(conn: Connection) -> Self {
        SqliteExecutor { conn }
    }

    fn configure(conn: Connection) -> Result<Self, PersistError> {
        // Foreign keys are off by default in SQLite.
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| PersistError::execution("PRAGMA foreign_keys", e))?;
        Ok(SqliteExecutor { conn })
    }

    /// The underlying connection, for DDL and transaction control.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs a batch of semicolon separated statements (schema setup).
    pub fn execute_batch(&self, sql: &str) -> Result<(), PersistError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| PersistError::execution(sql, e))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Real(r) => Value::Real(r),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Blob(b),
    }
}

/// Cursor over live rusqlite rows.
struct SqliteCursor<'s> {
    rows: Rows<'s>,
    width: usize,
    sql: &'s str,
    current: Row,
}

impl RowCursor for SqliteCursor<'_> {
    fn next_row(&mut self) -> Result<Option<&Row>, PersistError> {
        let values = match self
            .rows
            .next()
            .map_err(|e| PersistError::execution(self.sql, e))?
        {
            Some(row) => {
                let mut values = Vec::with_capacity(self.width);
                for i in 0..self.width {
                    let value: SqlValue = row
                        .get(i)
                        .map_err(|e| PersistError::execution(self.sql, e))?;
                    values.push(from_sql(value));
                }
                values
            }
            None => return Ok(None),
        };
        self.current = Row::new(values);
        Ok(Some(&self.current))
    }
}

impl Executor for SqliteExecutor {
    fn query(
        &self,
        statement: &Statement,
        consume: &mut RowConsumer<'_>,
    ) -> Result<(), PersistError> {
        tracing::debug!(sql = statement.sql(), params = statement.params().len(), "query");
        let mut prepared = self
            .conn
            .prepare_cached(statement.sql())
            .map_err(|e| PersistError::execution(statement.sql(), e))?;
        let width = prepared.column_count();
        let rows = prepared
            .query(params_from_iter(statement.params().iter().map(to_sql)))
            .map_err(|e| PersistError::execution(statement.sql(), e))?;
        let mut cursor = SqliteCursor {
            rows,
            width,
            sql: statement.sql(),
            current: Row::default(),
        };
        consume(&mut cursor)
    }

    fn execute(&self, statement: &Statement) -> Result<usize, PersistError> {
        tracing::debug!(sql = statement.sql(), params = statement.params().len(), "execute");
        let mut prepared = self
            .conn
            .prepare_cached(statement.sql())
            .map_err(|e| PersistError::execution(statement.sql(), e))?;
        prepared
            .execute(params_from_iter(statement.params().iter().map(to_sql)))
            .map_err(|e| PersistError::execution(statement.sql(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::collect_rows;

    #[test]
    fn roundtrip_values_through_sqlite() {
        let exec = SqliteExecutor::in_memory().unwrap();
        exec.execute_batch("CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB);")
            .unwrap();
        let inserted = exec
            .execute(&Statement::new(
                "INSERT INTO t (i, r, s, b) VALUES (?, ?, ?, ?)",
                vec![
                    Value::from(1),
                    Value::from(2.5),
                    Value::from("x"),
                    Value::Blob(vec![1, 2]),
                ],
            ))
            .unwrap();
        assert_eq!(inserted, 1);

        let mut rows = Vec::new();
        exec.query(&Statement::new("SELECT i, r, s, b FROM t", vec![]), &mut |c| {
            rows = collect_rows(c)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            rows,
            vec![Row::new(vec![
                Value::from(1),
                Value::from(2.5),
                Value::from("x"),
                Value::Blob(vec![1, 2]),
            ])]
        );
    }

    #[test]
    fn failing_statement_carries_sql() {
        let exec = SqliteExecutor::in_memory().unwrap();
        let err = exec
            .execute(&Statement::new("DELETE FROM missing", vec![]))
            .unwrap_err();
        match err {
            PersistError::Execution { sql, .. } => assert_eq!(sql, "DELETE FROM missing"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
