//! JSON schema files and the [`Registry`] of loaders built from them.
//!
//! A schema declares entities (table, id, properties, relations), optional
//! hierarchies over them and the persistence config. Persisters are built in
//! dependency order: a relation target before its owner, subtypes before
//! their hierarchy. A two-phase relation to an entity on a cycle of
//! declarations (a self-reference included) gets a deferred target, bound
//! once every persister is built. Any other cycle is rejected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use ormgraph_core::{EntityMapping, Value};

use crate::config::PersistenceConfig;
use crate::error::PersistError;
use crate::loader::{DeferredLoader, Loader};
use crate::persister::EntityPersister;
use crate::polymorphic::PolymorphicPersister;
use crate::relation::{Cardinality, Cascade, FetchMode, RelationMapping, RelationStorage};

/// `"title"` maps property and column of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyDef {
    Same(String),
    Mapped { property: String, column: String },
}

impl PropertyDef {
    fn parts(&self) -> (&str, &str) {
        match self {
            PropertyDef::Same(name) => (name, name),
            PropertyDef::Mapped { property, column } => (property, column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryTableDef {
    pub table: String,
    /// Key columns, matching the entity id positionally.
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub storage: RelationStorage,
    #[serde(default)]
    pub fetch: FetchMode,
    #[serde(default)]
    pub cascade: Cascade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub id: Vec<PropertyDef>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub fixed_columns: IndexMap<String, Value>,
    #[serde(default)]
    pub secondary_table: Option<SecondaryTableDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyDef {
    SingleTable { discriminator: String },
    Joined,
    TablePerClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyDef {
    pub name: String,
    pub strategy: StrategyDef,
    pub subtypes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    #[serde(default)]
    pub config: PersistenceConfig,
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    #[serde(default)]
    pub hierarchies: Vec<HierarchyDef>,
}

enum Declared<'a> {
    Entity(&'a EntityDef),
    Hierarchy(&'a HierarchyDef),
}

/// Loaders by entity or hierarchy name.
#[derive(Debug)]
pub struct Registry {
    loaders: IndexMap<String, Loader>,
    config: PersistenceConfig,
}

impl Registry {
    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        let def: SchemaDef = serde_json::from_str(json)?;
        Self::build(&def)
    }

    pub fn build(def: &SchemaDef) -> Result<Self, PersistError> {
        let mut graph: DiGraph<&str, Option<(&str, &str)>> = DiGraph::new();
        let mut declared: HashMap<&str, (NodeIndex, Declared<'_>)> = HashMap::new();
        for entity in &def.entities {
            let index = graph.add_node(&entity.name);
            if declared
                .insert(&entity.name, (index, Declared::Entity(entity)))
                .is_some()
            {
                return Err(duplicate(&entity.name));
            }
        }
        for hierarchy in &def.hierarchies {
            let index = graph.add_node(&hierarchy.name);
            if declared
                .insert(&hierarchy.name, (index, Declared::Hierarchy(hierarchy)))
                .is_some()
            {
                return Err(duplicate(&hierarchy.name));
            }
        }

        let lookup = |name: &str, from: &str| {
            declared.get(name).map(|(index, _)| *index).ok_or_else(|| {
                PersistError::configuration(format!("'{}' refers to undeclared '{}'", from, name))
            })
        };
        // weight: the (owner, relation) a two-phase edge to an entity stands for
        let mut edges = Vec::new();
        for entity in &def.entities {
            let owner = lookup(&entity.name, &entity.name)?;
            for relation in &entity.relations {
                let target = lookup(&relation.target, &entity.name)?;
                let deferrable = relation.fetch == FetchMode::TwoPhase
                    && matches!(declared.get(relation.target.as_str()), Some((_, Declared::Entity(_))));
                let weight = deferrable.then_some((entity.name.as_str(), relation.name.as_str()));
                edges.push((target, owner, weight));
            }
        }
        for hierarchy in &def.hierarchies {
            let owner = lookup(&hierarchy.name, &hierarchy.name)?;
            for subtype in &hierarchy.subtypes {
                edges.push((lookup(subtype, &hierarchy.name)?, owner, None));
            }
        }
        for (from, to, weight) in edges {
            graph.add_edge(from, to, weight);
        }

        let mut component = HashMap::new();
        for (i, members) in tarjan_scc(&graph).into_iter().enumerate() {
            for node in members {
                component.insert(node, i);
            }
        }
        let mut deferred: HashSet<(&str, &str)> = HashSet::new();
        let ordering = graph.filter_map(
            |_, name| Some(*name),
            |edge, weight| {
                let (from, to) = graph.edge_endpoints(edge)?;
                match weight {
                    Some(relation) if component.get(&from) == component.get(&to) => {
                        deferred.insert(*relation);
                        None
                    }
                    _ => Some(()),
                }
            },
        );

        let order = toposort(&ordering, None).map_err(|cycle| {
            PersistError::configuration(format!(
                "schema declarations form a cycle through '{}' that only two-phase relations to entities can close",
                ordering[cycle.node_id()]
            ))
        })?;

        let mut registry = Registry {
            loaders: IndexMap::new(),
            config: def.config.clone(),
        };
        let mut unbound: Vec<(&str, DeferredLoader)> = Vec::new();
        for index in order {
            let name = ordering[index];
            let Some((_, declaration)) = declared.get(name) else {
                continue;
            };
            let loader = match declaration {
                Declared::Entity(entity) => {
                    let mut deferred_targets = HashMap::new();
                    for relation in &entity.relations {
                        if !deferred.contains(&(entity.name.as_str(), relation.name.as_str())) {
                            continue;
                        }
                        let Some((_, Declared::Entity(target))) = declared.get(relation.target.as_str())
                        else {
                            continue;
                        };
                        let loader = DeferredLoader::new(Arc::new(entity_mapping(target)?));
                        unbound.push((target.name.as_str(), loader.clone()));
                        deferred_targets.insert(relation.name.as_str(), loader);
                    }
                    registry.build_entity(entity, &deferred_targets)?
                }
                Declared::Hierarchy(hierarchy) => registry.build_hierarchy(hierarchy)?,
            };
            tracing::debug!(name, "registered loader");
            registry.loaders.insert(name.to_string(), loader);
        }

        for (entity, loader) in unbound {
            match registry.get(entity)? {
                Loader::Entity(persister) => loader.bind(persister)?,
                other => {
                    return Err(PersistError::configuration(format!(
                        "deferred target '{}' is not an entity",
                        other.name()
                    )))
                }
            }
            tracing::debug!(entity, "bound deferred relation target");
        }
        Ok(registry)
    }

    fn build_entity(
        &self,
        def: &EntityDef,
        deferred: &HashMap<&str, DeferredLoader>,
    ) -> Result<Loader, PersistError> {
        let mut builder = EntityPersister::builder(entity_mapping(def)?).config(self.config.clone());

        if let Some(secondary) = &def.secondary_table {
            if secondary.key.len() != def.id.len() {
                return Err(PersistError::configuration(format!(
                    "secondary table '{}' of '{}' needs {} key column(s)",
                    secondary.table,
                    def.name,
                    def.id.len()
                )));
            }
            let mut sub = EntityMapping::builder(def.name.clone(), secondary.table.clone());
            for (id, key) in def.id.iter().zip(&secondary.key) {
                sub = sub.id(id.parts().0, key.clone());
            }
            for p in &secondary.properties {
                let (property, column) = p.parts();
                sub = sub.property(property, column);
            }
            builder = builder.secondary_table(sub.build()?);
        }

        for relation in &def.relations {
            let target = match deferred.get(relation.name.as_str()) {
                Some(loader) => Loader::Deferred(loader.clone()),
                None => self.get(&relation.target)?.clone(),
            };
            builder = builder.relation(
                RelationMapping::new(
                    relation.name.clone(),
                    target,
                    relation.cardinality,
                    relation.storage.clone(),
                )
                .fetch(relation.fetch)
                .cascade(relation.cascade),
            );
        }
        Ok(builder.build()?.into())
    }

    fn build_hierarchy(&self, def: &HierarchyDef) -> Result<Loader, PersistError> {
        let mut subtypes = Vec::with_capacity(def.subtypes.len());
        for name in &def.subtypes {
            match self.get(name)? {
                Loader::Entity(persister) => subtypes.push(persister.clone()),
                _ => {
                    return Err(PersistError::configuration(format!(
                        "hierarchy '{}' nests hierarchy '{}'",
                        def.name, name
                    )))
                }
            }
        }
        let persister = match &def.strategy {
            StrategyDef::SingleTable { discriminator } => {
                PolymorphicPersister::single_table(def.name.clone(), discriminator, subtypes)?
            }
            StrategyDef::Joined => PolymorphicPersister::joined(def.name.clone(), subtypes)?,
            StrategyDef::TablePerClass => {
                PolymorphicPersister::table_per_class(def.name.clone(), subtypes)?
            }
        };
        Ok(Loader::Polymorphic(Arc::new(
            persister.with_config(self.config.clone()),
        )))
    }

    pub fn get(&self, name: &str) -> Result<&Loader, PersistError> {
        self.loaders
            .get(name)
            .ok_or_else(|| PersistError::configuration(format!("no loader named '{}'", name)))
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Loader names in build order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

fn entity_mapping(def: &EntityDef) -> Result<EntityMapping, PersistError> {
    let mut mapping = EntityMapping::builder(def.name.clone(), def.table.clone());
    for id in &def.id {
        let (property, column) = id.parts();
        mapping = mapping.id(property, column);
    }
    for p in &def.properties {
        let (property, column) = p.parts();
        mapping = mapping.property(property, column);
    }
    for (column, value) in &def.fixed_columns {
        mapping = mapping.fixed_column(column.clone(), value.clone());
    }
    Ok(mapping.build()?)
}

fn duplicate(name: &str) -> PersistError {
    PersistError::configuration(format!("'{}' is declared twice", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_targets_before_owners() {
        let registry = Registry::from_json(
            r#"{
                "entities": [
                    {"name": "Author", "table": "author", "id": ["id"], "properties": ["name"],
                     "relations": [{"name": "books", "target": "Book", "cardinality": "many",
                                    "storage": {"kind": "target_columns", "columns": ["author_id"]}}]},
                    {"name": "Book", "table": "book", "id": ["id"],
                     "properties": [{"property": "title", "column": "book_title"}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Book", "Author"]);
        assert_eq!(registry.config().in_operator_max_size, 100);
    }

    #[test]
    fn join_fetched_cycles_are_rejected() {
        let err = Registry::from_json(
            r#"{
                "entities": [
                    {"name": "A", "table": "a", "id": ["id"],
                     "relations": [{"name": "b", "target": "B", "cardinality": "one",
                                    "storage": {"kind": "source_columns", "columns": ["b_id"]},
                                    "fetch": "join"}]},
                    {"name": "B", "table": "b", "id": ["id"],
                     "relations": [{"name": "a", "target": "A", "cardinality": "one",
                                    "storage": {"kind": "source_columns", "columns": ["a_id"]},
                                    "fetch": "join"}]}
                ]
            }"#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn self_reference_is_bound_after_the_build() {
        let registry = Registry::from_json(
            r#"{"entities": [{"name": "Person", "table": "person", "id": ["id"], "properties": ["name"],
                 "relations": [{"name": "mother", "target": "Person", "cardinality": "one",
                                "storage": {"kind": "source_columns", "columns": ["mother_id"]}}]}]}"#,
        )
        .unwrap();
        let Loader::Entity(person) = registry.get("Person").unwrap() else {
            panic!("Person is an entity");
        };
        let Loader::Deferred(mother) = person.relations()[0].target() else {
            panic!("the self-reference is deferred");
        };
        assert!(Arc::ptr_eq(&mother.get().unwrap(), person));
        assert_eq!(person.relations()[0].target().key(), registry.get("Person").unwrap().key());
        assert!(person.explain().contains("-- then Person.mother:\nPerson by id"));
    }

    #[test]
    fn two_phase_edge_closes_a_cycle_with_a_join() {
        let registry = Registry::from_json(
            r#"{
                "entities": [
                    {"name": "Team", "table": "team", "id": ["id"],
                     "relations": [{"name": "members", "target": "Member", "cardinality": "many",
                                    "storage": {"kind": "target_columns", "columns": ["team_id"]},
                                    "fetch": "join"}]},
                    {"name": "Member", "table": "member", "id": ["id"],
                     "relations": [{"name": "captain_of", "target": "Team", "cardinality": "one",
                                    "storage": {"kind": "source_columns", "columns": ["captained_id"]}}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Member", "Team"]);
    }

    #[test]
    fn cycles_through_a_hierarchy_are_rejected() {
        let err = Registry::from_json(
            r#"{
                "entities": [
                    {"name": "Cat", "table": "animal", "id": ["id"], "fixed_columns": {"kind": 1},
                     "relations": [{"name": "litter", "target": "Animal", "cardinality": "many",
                                    "storage": {"kind": "target_columns", "columns": ["mother_id"]}}]}
                ],
                "hierarchies": [
                    {"name": "Animal", "strategy": {"kind": "single_table", "discriminator": "kind"},
                     "subtypes": ["Cat"]}
                ]
            }"#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn undeclared_targets_are_rejected() {
        let err = Registry::from_json(
            r#"{"entities": [{"name": "A", "table": "a", "id": ["id"],
                 "relations": [{"name": "b", "target": "Nope", "cardinality": "one",
                                "storage": {"kind": "source_columns", "columns": ["b_id"]}}]}]}"#,
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = Registry::from_json("{").unwrap_err();
        assert!(matches!(err, PersistError::Serialization(_)));
    }
}
