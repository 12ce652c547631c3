use std::collections::HashMap;
use std::sync::Arc;

use ormgraph_core::{RowView, Value};

use crate::error::PersistError;
use crate::join::{CompiledQuery, JoinTree, TableRef};

/// Every subtype in one table, told apart by a discriminator column.
#[derive(Debug)]
pub struct SingleTable {
    table: String,
    discriminator: String,
    subtypes: HashMap<Value, usize>,
    query: Arc<CompiledQuery>,
}

impl SingleTable {
    /// `values[i]` is the discriminator value of subtype `i`.
    pub fn new(
        table: &str,
        discriminator: &str,
        id_columns: &[String],
        values: Vec<Value>,
    ) -> Result<Self, PersistError> {
        let mut subtypes = HashMap::new();
        for (i, value) in values.into_iter().enumerate() {
            if let Some(previous) = subtypes.insert(value.clone(), i) {
                return Err(PersistError::configuration(format!(
                    "subtypes {} and {} share discriminator value {}",
                    previous, i, value
                )));
            }
        }
        let mut columns = id_columns.to_vec();
        columns.push(discriminator.to_string());
        let mut tree = JoinTree::passive(TableRef::table(table), columns);
        let query = tree.compile()?;
        Ok(SingleTable {
            table: table.to_string(),
            discriminator: discriminator.to_string(),
            subtypes,
            query,
        })
    }

    pub fn query(&self) -> &Arc<CompiledQuery> {
        &self.query
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub(super) fn route(&self, row: &RowView<'_>) -> Result<usize, PersistError> {
        let value = row.get(&self.discriminator);
        self.subtypes.get(value).copied().ok_or_else(|| {
            PersistError::consistency(format!(
                "unknown discriminator {} in {}.{}",
                value, self.table, self.discriminator
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use ormgraph_core::Row;

    use super::*;

    fn resolver() -> SingleTable {
        SingleTable::new(
            "animal",
            "kind",
            &["id".to_string()],
            vec![Value::from(1), Value::from(2)],
        )
        .unwrap()
    }

    fn route(resolver: &SingleTable, values: Vec<Value>) -> Result<usize, PersistError> {
        let row = Row::new(values);
        let view = RowView::new(&row, resolver.query().nodes()[0].columns());
        resolver.route(&view)
    }

    #[test]
    fn routes_by_discriminator() {
        let resolver = resolver();
        assert_eq!(
            resolver.query().sql(),
            "SELECT animal.id AS animal_id, animal.kind AS animal_kind FROM animal AS animal"
        );
        assert_eq!(route(&resolver, vec![Value::from(3), Value::from(2)]).unwrap(), 1);
    }

    #[test]
    fn unknown_discriminator_is_a_consistency_error() {
        let err = route(&resolver(), vec![Value::from(3), Value::from(9)]).unwrap_err();
        assert!(matches!(err, PersistError::Consistency { .. }));
    }

    #[test]
    fn duplicate_values_are_rejected() {
        let err = SingleTable::new(
            "animal",
            "kind",
            &["id".to_string()],
            vec![Value::from(1), Value::from(1)],
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }
}
