use std::sync::Arc;

use ormgraph_core::RowView;

use crate::error::PersistError;
use crate::join::{CompiledQuery, JoinTree, TableRef};

/// Column carrying the subtype number in the phase-one union.
const SUBTYPE_COLUMN: &str = "subtype_no";

/// One complete table per subtype; the phase-one query reads a UNION ALL of
/// their keys tagged with the subtype number.
#[derive(Debug)]
pub struct TablePerClass {
    tables: Vec<String>,
    query: Arc<CompiledQuery>,
}

/// `SELECT <columns>[, <i> AS subtype_no] FROM <table>` for every table,
/// glued with UNION ALL.
pub(super) fn union(tables: &[String], columns: &[String], tagged: bool) -> String {
    tables
        .iter()
        .enumerate()
        .map(|(i, table)| {
            let mut select = columns.join(", ");
            if tagged {
                select.push_str(&format!(", {} AS {}", i, SUBTYPE_COLUMN));
            }
            format!("SELECT {} FROM {}", select, table)
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

impl TablePerClass {
    pub fn new(tables: Vec<String>, id_columns: &[String]) -> Result<Self, PersistError> {
        let sql = union(&tables, id_columns, true);
        let mut columns = id_columns.to_vec();
        columns.push(SUBTYPE_COLUMN.to_string());
        let mut tree = JoinTree::passive(TableRef::Subquery(sql), columns);
        let query = tree.compile()?;
        Ok(TablePerClass { tables, query })
    }

    pub fn query(&self) -> &Arc<CompiledQuery> {
        &self.query
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub(super) fn routing_columns(&self) -> Vec<String> {
        vec![SUBTYPE_COLUMN.to_string()]
    }

    pub(super) fn route(&self, row: &RowView<'_>) -> Result<usize, PersistError> {
        let value = row.get(SUBTYPE_COLUMN);
        value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n < self.tables.len())
            .ok_or_else(|| PersistError::consistency(format!("unknown subtype number {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use ormgraph_core::{Row, Value};

    use super::*;

    #[test]
    fn phase_one_reads_a_tagged_union() {
        let resolver =
            TablePerClass::new(vec!["cat".into(), "dog".into()], &["id".to_string()]).unwrap();
        assert_eq!(
            resolver.query().sql(),
            "SELECT q.id AS q_id, q.subtype_no AS q_subtype_no FROM \
             (SELECT id, 0 AS subtype_no FROM cat UNION ALL SELECT id, 1 AS subtype_no FROM dog) AS q"
        );
        let columns = resolver.query().nodes()[0].columns();
        let row = Row::new(vec![Value::from(7), Value::from(1)]);
        assert_eq!(resolver.route(&RowView::new(&row, columns)).unwrap(), 1);
        let row = Row::new(vec![Value::from(7), Value::from(5)]);
        assert!(resolver.route(&RowView::new(&row, columns)).is_err());
    }
}
