//! INSERT / UPDATE / DELETE statement builders.

use ormgraph_core::{ColumnValues, Id};

use crate::config::PersistenceConfig;
use crate::criteria::render_id_in;
use crate::error::PersistError;
use crate::executor::{Executor, Statement};

pub(crate) fn insert(table: &str, values: &ColumnValues) -> Statement {
    let columns: Vec<&str> = values.keys().map(String::as_str).collect();
    let marks = vec!["?"; columns.len()].join(", ");
    Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            marks
        ),
        values.values().cloned().collect(),
    )
}

pub(crate) fn update(table: &str, values: &ColumnValues, keys: &ColumnValues) -> Statement {
    let set = values
        .keys()
        .map(|c| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    let (condition, key_params) = key_condition(keys);
    let mut params: Vec<_> = values.values().cloned().collect();
    params.extend(key_params);
    Statement::new(
        format!("UPDATE {} SET {} WHERE {}", table, set, condition),
        params,
    )
}

pub(crate) fn delete(table: &str, keys: &ColumnValues) -> Statement {
    let (condition, params) = key_condition(keys);
    Statement::new(format!("DELETE FROM {} WHERE {}", table, condition), params)
}

/// Batched delete of the rows whose `columns` hold one of `ids`.
pub(crate) fn delete_in(table: &str, columns: &[String], ids: &[Id]) -> Statement {
    let (condition, params) = render_id_in(table, columns, ids);
    Statement::new(format!("DELETE FROM {} WHERE {}", table, condition), params)
}

fn key_condition(keys: &ColumnValues) -> (String, Vec<ormgraph_core::Value>) {
    let mut params = Vec::with_capacity(keys.len());
    let condition = keys
        .iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} IS NULL", column)
            } else {
                params.push(value.clone());
                format!("{} = ?", column)
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    (condition, params)
}

/// Runs a write and verifies it touched `expected` rows when row count
/// checks are enabled.
pub(crate) fn execute_checked(
    exec: &dyn Executor,
    config: &PersistenceConfig,
    statement: &Statement,
    expected: usize,
) -> Result<usize, PersistError> {
    let actual = exec.execute(statement)?;
    if config.check_row_counts && actual != expected {
        return Err(PersistError::RowCount {
            sql: statement.sql().to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_core::Value;

    fn values(pairs: &[(&str, Value)]) -> ColumnValues {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn builds_insert() {
        let statement = insert(
            "book",
            &values(&[("id", Value::from(1)), ("title", Value::from("Dune"))]),
        );
        assert_eq!(statement.sql(), "INSERT INTO book (id, title) VALUES (?, ?)");
        assert_eq!(statement.params().len(), 2);
    }

    #[test]
    fn builds_update_with_key_params_last() {
        let statement = update(
            "book",
            &values(&[("title", Value::from("Dune"))]),
            &values(&[("id", Value::from(1))]),
        );
        assert_eq!(statement.sql(), "UPDATE book SET title = ? WHERE id = ?");
        assert_eq!(statement.params(), &[Value::from("Dune"), Value::from(1)]);
    }

    #[test]
    fn null_keys_render_is_null() {
        let statement = delete(
            "author_book",
            &values(&[("author_id", Value::from(1)), ("position", Value::Null)]),
        );
        assert_eq!(
            statement.sql(),
            "DELETE FROM author_book WHERE author_id = ? AND position IS NULL"
        );
        assert_eq!(statement.params().len(), 1);
    }

    #[test]
    fn batched_delete() {
        let statement = delete_in("book", &["id".to_string()], &[Id::single(1), Id::single(2)]);
        assert_eq!(statement.sql(), "DELETE FROM book WHERE book.id IN (?, ?)");
    }
}
