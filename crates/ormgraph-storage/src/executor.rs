//! The [`Executor`] trait: statement execution and forward-only row cursors.
//!
//! The engine never opens connections itself. Every statement of one logical
//! call goes through the executor the caller passed in, so a multi-statement
//! load stays on one connection.

use ormgraph_core::{Row, Value};

use crate::error::PersistError;

/// SQL text with positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Statement {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Forward-only cursor over the rows of one query.
pub trait RowCursor {
    /// Advances to the next row, `None` once drained.
    fn next_row(&mut self) -> Result<Option<&Row>, PersistError>;
}

/// Callback receiving the cursor of a running query.
pub type RowConsumer<'c> = dyn FnMut(&mut dyn RowCursor) -> Result<(), PersistError> + 'c;

/// Statement execution contract.
pub trait Executor {
    /// Runs a query and hands its cursor to `consume`. The cursor is only
    /// valid during the callback.
    fn query(&self, statement: &Statement, consume: &mut RowConsumer<'_>)
        -> Result<(), PersistError>;

    /// Runs a write statement, returning the number of affected rows.
    fn execute(&self, statement: &Statement) -> Result<usize, PersistError>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn query(
        &self,
        statement: &Statement,
        consume: &mut RowConsumer<'_>,
    ) -> Result<(), PersistError> {
        (**self).query(statement, consume)
    }

    fn execute(&self, statement: &Statement) -> Result<usize, PersistError> {
        (**self).execute(statement)
    }
}

/// Cursor over rows already held in memory.
#[derive(Debug, Clone)]
pub struct BufferedCursor<'r> {
    rows: &'r [Row],
    position: usize,
}

impl<'r> BufferedCursor<'r> {
    pub fn new(rows: &'r [Row]) -> Self {
        BufferedCursor { rows, position: 0 }
    }
}

impl RowCursor for BufferedCursor<'_> {
    fn next_row(&mut self) -> Result<Option<&Row>, PersistError> {
        let row = self.rows.get(self.position);
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }
}

/// Drains a cursor into owned rows.
pub fn collect_rows(cursor: &mut dyn RowCursor) -> Result<Vec<Row>, PersistError> {
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row()? {
        rows.push(row.clone());
    }
    Ok(rows)
}
