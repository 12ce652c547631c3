//! Per-entity mapping tables.
//!
//! An [`EntityMapping`] is the explicit, statically declared correspondence
//! between an entity's properties and the columns of one table. It knows how
//! to assemble an identifier from a row, build or fill an instance from a
//! row, and extract column values from an instance. Fixed columns carry values
//! every row of the mapping holds, such as a single-table discriminator.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::CoreError;
use crate::id::Id;
use crate::row::RowView;
use crate::value::Value;

/// Column name to value, in statement order.
pub type ColumnValues = IndexMap<String, Value>;

/// One property ↔ column entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub property: String,
    pub column: String,
    /// Whether the column is part of the identifier.
    pub identifier: bool,
}

/// Mapping of one entity kind onto one table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    entity: String,
    table: String,
    properties: Vec<PropertyMapping>,
    fixed_columns: Vec<(String, Value)>,
}

impl EntityMapping {
    pub fn builder(entity: impl Into<String>, table: impl Into<String>) -> EntityMappingBuilder {
        EntityMappingBuilder {
            entity: entity.into(),
            table: table.into(),
            properties: Vec::new(),
            fixed_columns: Vec::new(),
        }
    }

    /// Entity kind given to instances built by this mapping.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn properties(&self) -> &[PropertyMapping] {
        &self.properties
    }

    pub fn fixed_columns(&self) -> &[(String, Value)] {
        &self.fixed_columns
    }

    pub fn id_properties(&self) -> impl Iterator<Item = &PropertyMapping> {
        self.properties.iter().filter(|p| p.identifier)
    }

    pub fn id_columns(&self) -> Vec<String> {
        self.id_properties().map(|p| p.column.clone()).collect()
    }

    /// Every property column, in declaration order.
    pub fn columns(&self) -> Vec<String> {
        self.properties.iter().map(|p| p.column.clone()).collect()
    }

    pub fn column_of(&self, property: &str) -> Result<&str, CoreError> {
        self.properties
            .iter()
            .find(|p| p.property == property)
            .map(|p| p.column.as_str())
            .ok_or_else(|| CoreError::UnknownProperty {
                entity: self.entity.clone(),
                property: property.to_string(),
            })
    }

    pub fn property_of_column(&self, column: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.column == column)
            .map(|p| p.property.as_str())
    }

    /// Assembles the identifier of the row, `None` when its id columns are
    /// all null.
    pub fn read_id(&self, row: &RowView<'_>) -> Option<Id> {
        Id::from_values(self.id_properties().map(|p| row.get(&p.column).clone()))
    }

    /// Builds a fresh instance from the row.
    pub fn construct(&self, row: &RowView<'_>) -> Entity {
        let mut entity = Entity::new(self.entity.clone());
        self.merge_into(&mut entity, row);
        entity
    }

    /// Copies every mapped column of the row into `entity`.
    pub fn merge_into(&self, entity: &mut Entity, row: &RowView<'_>) {
        for p in &self.properties {
            entity.set(p.property.clone(), row.get(&p.column).clone());
        }
    }

    /// Identifier of an instance, `None` when it has not been assigned.
    pub fn id_of(&self, entity: &Entity) -> Option<Id> {
        Id::from_values(self.id_properties().map(|p| entity.get(&p.property).clone()))
    }

    /// All column values of an instance, fixed columns included.
    pub fn extract(&self, entity: &Entity) -> ColumnValues {
        let mut values: ColumnValues = self
            .properties
            .iter()
            .map(|p| (p.column.clone(), entity.get(&p.property).clone()))
            .collect();
        for (column, value) in &self.fixed_columns {
            values.insert(column.clone(), value.clone());
        }
        values
    }

    /// Column values of the non-identifier properties.
    pub fn extract_updatable(&self, entity: &Entity) -> ColumnValues {
        self.properties
            .iter()
            .filter(|p| !p.identifier)
            .map(|p| (p.column.clone(), entity.get(&p.property).clone()))
            .collect()
    }

    /// Identifier columns bound to the components of `id`.
    pub fn key_values(&self, id: &Id) -> ColumnValues {
        self.id_columns()
            .into_iter()
            .zip(id.values().iter().cloned())
            .collect()
    }

    /// Sets the property mapped on `column`, if any.
    pub fn set_column(&self, entity: &mut Entity, column: &str, value: Value) {
        if let Some(property) = self.property_of_column(column) {
            entity.set(property.to_string(), value);
        }
    }
}

/// Builder validating an [`EntityMapping`].
#[derive(Debug, Clone)]
pub struct EntityMappingBuilder {
    entity: String,
    table: String,
    properties: Vec<PropertyMapping>,
    fixed_columns: Vec<(String, Value)>,
}

impl EntityMappingBuilder {
    /// Maps an identifier property. Call several times for a composite key.
    pub fn id(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.properties.push(PropertyMapping {
            property: property.into(),
            column: column.into(),
            identifier: true,
        });
        self
    }

    pub fn property(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.properties.push(PropertyMapping {
            property: property.into(),
            column: column.into(),
            identifier: false,
        });
        self
    }

    /// A column written with the same value for every instance.
    pub fn fixed_column(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed_columns.push((column.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<EntityMapping, CoreError> {
        if self.table.trim().is_empty() {
            return Err(CoreError::InvalidMapping {
                entity: self.entity,
                reason: "table name is empty".into(),
            });
        }
        if !self.properties.iter().any(|p| p.identifier) {
            return Err(CoreError::MissingIdentifier { entity: self.entity });
        }
        let mut seen_properties = std::collections::HashSet::new();
        let mut seen_columns = std::collections::HashSet::new();
        for p in &self.properties {
            if !seen_properties.insert(p.property.as_str()) {
                return Err(CoreError::DuplicateProperty {
                    entity: self.entity.clone(),
                    property: p.property.clone(),
                });
            }
            if !seen_columns.insert(p.column.as_str()) {
                return Err(CoreError::DuplicateColumn {
                    entity: self.entity.clone(),
                    column: p.column.clone(),
                });
            }
        }
        for (column, _) in &self.fixed_columns {
            if !seen_columns.insert(column.as_str()) {
                return Err(CoreError::DuplicateColumn {
                    entity: self.entity.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(EntityMapping {
            entity: self.entity,
            table: self.table,
            properties: self.properties,
            fixed_columns: self.fixed_columns,
        })
    }
}
