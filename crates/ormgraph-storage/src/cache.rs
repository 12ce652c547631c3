//! Read cache for the duration of one explicit operation.
//!
//! [`CachingExecutor`] buffers the rows of every query it runs and replays
//! them for a parameter-identical statement, so repeated reads inside one
//! operation hit the datastore once. Replayed rows are inflated again: the
//! instances of a cached read are value-equal to, but independent of, the
//! first read's. Writes pass straight through and do not invalidate.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use ormgraph_core::Row;

use crate::error::PersistError;
use crate::executor::{collect_rows, BufferedCursor, Executor, RowConsumer, Statement};

pub struct CachingExecutor<'a, E: Executor + ?Sized> {
    inner: &'a E,
    rows: RefCell<HashMap<Statement, Vec<Row>>>,
}

impl<'a, E: Executor + ?Sized> CachingExecutor<'a, E> {
    pub fn new(inner: &'a E) -> Self {
        CachingExecutor {
            inner,
            rows: RefCell::new(HashMap::new()),
        }
    }

    /// Number of distinct statements buffered so far.
    pub fn cached(&self) -> usize {
        self.rows.borrow().len()
    }
}

impl<E: Executor + ?Sized> Executor for CachingExecutor<'_, E> {
    fn query(
        &self,
        statement: &Statement,
        consume: &mut RowConsumer<'_>,
    ) -> Result<(), PersistError> {
        let cached = self.rows.borrow().get(statement).cloned();
        let rows = match cached {
            Some(rows) => {
                trace!(sql = statement.sql(), "read cache hit");
                rows
            }
            None => {
                let mut rows = Vec::new();
                self.inner.query(statement, &mut |cursor| {
                    rows = collect_rows(cursor)?;
                    Ok(())
                })?;
                self.rows
                    .borrow_mut()
                    .insert(statement.clone(), rows.clone());
                rows
            }
        };
        consume(&mut BufferedCursor::new(&rows))
    }

    fn execute(&self, statement: &Statement) -> Result<usize, PersistError> {
        self.inner.execute(statement)
    }
}

/// Runs `operation` with a read cache in front of `exec`.
pub fn with_read_cache<E, T>(
    exec: &E,
    operation: impl FnOnce(&CachingExecutor<'_, E>) -> Result<T, PersistError>,
) -> Result<T, PersistError>
where
    E: Executor + ?Sized,
{
    let cache = CachingExecutor::new(exec);
    operation(&cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingExecutor;
    use ormgraph_core::Value;

    #[test]
    fn identical_statements_run_once() {
        let exec = CountingExecutor::seeded();
        exec.run("INSERT INTO author (id, name) VALUES (1, 'Ann')");
        let statement = Statement::new("SELECT name FROM author WHERE id = ?", vec![Value::from(1)]);
        let other = Statement::new("SELECT name FROM author WHERE id = ?", vec![Value::from(2)]);

        with_read_cache(&exec, |cache| {
            for _ in 0..3 {
                cache.query(&statement, &mut |cursor| {
                    assert_eq!(collect_rows(cursor)?.len(), 1);
                    Ok(())
                })?;
            }
            cache.query(&other, &mut |cursor| {
                assert!(collect_rows(cursor)?.is_empty());
                Ok(())
            })?;
            assert_eq!(cache.cached(), 2);
            Ok(())
        })
        .unwrap();
        assert_eq!(exec.queries(), 2);
    }
}
