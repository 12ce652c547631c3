use std::sync::Arc;

use ormgraph_core::RowView;

use crate::error::PersistError;
use crate::join::{CompiledQuery, JoinTree, TableRef};

/// Column of the keyed select holding the key of subtype table `i`, NULL
/// when the root row has no row there.
fn subtype_column(i: usize) -> String {
    format!("subtype_{}", i)
}

fn keyed(
    table: &str,
    id_columns: &[String],
    subtype_tables: &[(String, Vec<String>)],
    columns: &[String],
) -> TableRef {
    let mut select: Vec<String> = columns
        .iter()
        .map(|c| format!("{}.{} AS {}", table, c, c))
        .collect();
    let mut joins = String::new();
    for (i, (sub_table, keys)) in subtype_tables.iter().enumerate() {
        select.push(format!("{}.{} AS {}", sub_table, keys[0], subtype_column(i)));
        let on: Vec<String> = id_columns
            .iter()
            .zip(keys)
            .map(|(id, key)| format!("{}.{} = {}.{}", table, id, sub_table, key))
            .collect();
        joins.push_str(&format!(" LEFT OUTER JOIN {} ON {}", sub_table, on.join(" AND ")));
    }
    TableRef::Subquery(format!("SELECT {} FROM {}{}", select.join(", "), table, joins))
}

/// A root table plus one table per subtype sharing its key. A row belongs to
/// the subtype whose table has a matching row.
#[derive(Debug)]
pub struct JoinedTables {
    table: String,
    id_columns: Vec<String>,
    subtype_tables: Vec<(String, Vec<String>)>,
    query: Arc<CompiledQuery>,
}

impl JoinedTables {
    /// `subtype_tables[i]` is the (table, key columns) of subtype `i`.
    pub fn new(
        table: &str,
        id_columns: &[String],
        subtype_tables: Vec<(String, Vec<String>)>,
    ) -> Result<Self, PersistError> {
        if let Some((sub_table, _)) = subtype_tables
            .iter()
            .find(|(_, keys)| keys.len() != id_columns.len() || keys.is_empty())
        {
            return Err(PersistError::configuration(format!(
                "subtype table '{}' of '{}' must be keyed by the {}-column id",
                sub_table,
                table,
                id_columns.len()
            )));
        }
        let mut columns = id_columns.to_vec();
        columns.extend((0..subtype_tables.len()).map(subtype_column));
        let mut tree = JoinTree::passive(keyed(table, id_columns, &subtype_tables, id_columns), columns);
        let query = tree.compile()?;
        Ok(JoinedTables {
            table: table.to_string(),
            id_columns: id_columns.to_vec(),
            subtype_tables,
            query,
        })
    }

    pub fn query(&self) -> &Arc<CompiledQuery> {
        &self.query
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The root table outer-joined to every subtype table, selecting
    /// `columns` of the root plus one `subtype_<i>` key per subtype.
    pub(super) fn keyed(&self, columns: &[String]) -> TableRef {
        keyed(&self.table, &self.id_columns, &self.subtype_tables, columns)
    }

    pub(super) fn routing_columns(&self) -> Vec<String> {
        (0..self.subtype_tables.len()).map(subtype_column).collect()
    }

    pub(super) fn route(&self, row: &RowView<'_>) -> Result<usize, PersistError> {
        let found: Vec<usize> = (0..self.subtype_tables.len())
            .filter(|i| !row.get(&subtype_column(*i)).is_null())
            .collect();
        match found.as_slice() {
            [single] => Ok(*single),
            [] => Err(PersistError::consistency(format!(
                "row of {} has no subtype row",
                self.table
            ))),
            _ => Err(PersistError::consistency(format!(
                "row of {} has rows in {} subtype tables",
                self.table,
                found.len()
            ))),
        }
    }
}
