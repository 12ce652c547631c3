//! Opaque WHERE-clause builder.
//!
//! [`Criteria`] conditions name entity properties. They are resolved against
//! the root mapping and its table alias when a statement is rendered, so an
//! unknown property fails before anything reaches the datastore.

use ormgraph_core::{EntityMapping, Id, Value};

use crate::error::PersistError;

/// Placeholder replaced by the root table alias in raw fragments.
pub const ROOT_ALIAS_PLACEHOLDER: &str = "{root}";

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq { property: String, value: Value },
    IsNull { property: String },
    IdIn(Vec<Id>),
    Raw { fragment: String, params: Vec<Value> },
}

/// Conjunction of conditions on the root entity of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    conditions: Vec<Condition>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            property: property.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(mut self, property: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull {
            property: property.into(),
        });
        self
    }

    pub fn id_in(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.conditions.push(Condition::IdIn(ids.into_iter().collect()));
        self
    }

    /// A raw SQL fragment; `{root}` expands to the root table alias.
    pub fn raw(mut self, fragment: impl Into<String>, params: Vec<Value>) -> Self {
        self.conditions.push(Condition::Raw {
            fragment: fragment.into(),
            params,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Renders the conditions as a WHERE body (without the keyword).
    pub(crate) fn render(
        &self,
        mapping: &EntityMapping,
        alias: &str,
    ) -> Result<(String, Vec<Value>), PersistError> {
        let mut parts = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::new();
        for condition in &self.conditions {
            match condition {
                Condition::Eq { property, value } => {
                    let column = mapping.column_of(property)?;
                    if value.is_null() {
                        parts.push(format!("{}.{} IS NULL", alias, column));
                    } else {
                        parts.push(format!("{}.{} = ?", alias, column));
                        params.push(value.clone());
                    }
                }
                Condition::IsNull { property } => {
                    let column = mapping.column_of(property)?;
                    parts.push(format!("{}.{} IS NULL", alias, column));
                }
                Condition::IdIn(ids) => {
                    let (sql, values) = render_id_in(alias, &mapping.id_columns(), ids);
                    parts.push(sql);
                    params.extend(values);
                }
                Condition::Raw {
                    fragment,
                    params: values,
                } => {
                    parts.push(format!(
                        "({})",
                        fragment.replace(ROOT_ALIAS_PLACEHOLDER, alias)
                    ));
                    params.extend(values.iter().cloned());
                }
            }
        }
        Ok((parts.join(" AND "), params))
    }
}

/// `alias.id IN (?, ?)` for single-column keys, an OR of conjunctions for
/// composite ones. An empty id list renders a condition matching nothing.
pub(crate) fn render_id_in(alias: &str, columns: &[String], ids: &[Id]) -> (String, Vec<Value>) {
    if ids.is_empty() {
        return ("1 = 0".to_string(), Vec::new());
    }
    let mut params = Vec::with_capacity(ids.len() * columns.len());
    if columns.len() == 1 {
        let marks = vec!["?"; ids.len()].join(", ");
        for id in ids {
            params.extend(id.values().iter().cloned());
        }
        return (format!("{}.{} IN ({})", alias, columns[0], marks), params);
    }
    let tuple = columns
        .iter()
        .map(|c| format!("{}.{} = ?", alias, c))
        .collect::<Vec<_>>()
        .join(" AND ");
    let clauses = ids
        .iter()
        .map(|id| {
            params.extend(id.values().iter().cloned());
            format!("({})", tuple)
        })
        .collect::<Vec<_>>()
        .join(" OR ");
    (format!("({})", clauses), params)
}
