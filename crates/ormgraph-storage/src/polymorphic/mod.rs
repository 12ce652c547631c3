//! Polymorphic persisters: one loader over a hierarchy of entity kinds.
//!
//! Each resolver supplies a key table carrying, next to the ids, the
//! columns that tell the subtype of a row apart: the discriminator, one
//! outer-joined key per subtype table, or the tag of a UNION over the
//! subtype tables. Owners join that table in phase one, so a related id is
//! routed to its subtype persister before phase two. Loading a hierarchy by
//! id runs the same routing as a query of its own, then invokes each subtype
//! persister once with its share. Writes dispatch on the instance kind.

mod joined;
mod single_table;
mod table_per_class;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use ormgraph_core::{ColumnValues, Entity, EntityRef, Id, RowView, Value};

use crate::config::PersistenceConfig;
use crate::criteria::render_id_in;
use crate::error::PersistError;
use crate::executor::Executor;
use crate::join::{CompiledQuery, TableRef};
use crate::persister::{distinct, EntityPersister};
use crate::two_phase::LoadContext;

pub use joined::JoinedTables;
pub use single_table::SingleTable;
pub use table_per_class::TablePerClass;

/// How the subtype of a stored instance is determined.
#[derive(Debug)]
pub enum SubtypeResolver {
    SingleTable(SingleTable),
    Joined(JoinedTables),
    TablePerClass(TablePerClass),
}

impl SubtypeResolver {
    pub fn query(&self) -> &Arc<CompiledQuery> {
        match self {
            SubtypeResolver::SingleTable(r) => r.query(),
            SubtypeResolver::Joined(r) => r.query(),
            SubtypeResolver::TablePerClass(r) => r.query(),
        }
    }

    /// Columns of [`key_table`](Self::key_table) that tell the subtype apart.
    fn routing_columns(&self) -> Vec<String> {
        match self {
            SubtypeResolver::SingleTable(r) => vec![r.discriminator().to_string()],
            SubtypeResolver::Joined(r) => r.routing_columns(),
            SubtypeResolver::TablePerClass(r) => r.routing_columns(),
        }
    }

    /// Position of the subtype owning a row read through the key table.
    fn route(&self, row: &RowView<'_>) -> Result<usize, PersistError> {
        match self {
            SubtypeResolver::SingleTable(r) => r.route(row),
            SubtypeResolver::Joined(r) => r.route(row),
            SubtypeResolver::TablePerClass(r) => r.route(row),
        }
    }

    /// Table carrying the ids, `extra_columns` and the routing columns.
    fn key_table(&self, id_columns: &[String], extra_columns: &[String]) -> TableRef {
        let mut columns = id_columns.to_vec();
        for column in extra_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        match self {
            SubtypeResolver::SingleTable(r) => TableRef::table(r.table()),
            SubtypeResolver::Joined(r) => r.keyed(&columns),
            SubtypeResolver::TablePerClass(r) => {
                TableRef::Subquery(table_per_class::union(r.tables(), &columns, true))
            }
        }
    }
}

/// Loader over a closed set of subtype persisters.
#[derive(Debug)]
pub struct PolymorphicPersister {
    name: String,
    id_columns: Vec<String>,
    resolver: SubtypeResolver,
    subtypes: IndexMap<String, Arc<EntityPersister>>,
    config: PersistenceConfig,
}

fn index_subtypes(
    name: &str,
    subtypes: Vec<Arc<EntityPersister>>,
) -> Result<(Vec<String>, IndexMap<String, Arc<EntityPersister>>), PersistError> {
    let Some(first) = subtypes.first() else {
        return Err(PersistError::configuration(format!(
            "hierarchy '{}' has no subtypes",
            name
        )));
    };
    let id_columns = first.mapping().id_columns();
    let mut indexed = IndexMap::new();
    for subtype in subtypes {
        let kind = subtype.mapping().entity().to_string();
        if subtype.mapping().id_columns() != id_columns {
            return Err(PersistError::configuration(format!(
                "subtype '{}' of '{}' does not share the hierarchy id columns",
                kind, name
            )));
        }
        if indexed.insert(kind.clone(), subtype).is_some() {
            return Err(PersistError::configuration(format!(
                "subtype '{}' appears twice in '{}'",
                kind, name
            )));
        }
    }
    Ok((id_columns, indexed))
}

fn shared_table(name: &str, subtypes: &IndexMap<String, Arc<EntityPersister>>) -> Result<String, PersistError> {
    let mut tables = subtypes.values().map(|p| p.mapping().table().to_string());
    let table = tables.next().unwrap_or_default();
    if tables.any(|t| t != table) {
        return Err(PersistError::configuration(format!(
            "subtypes of '{}' must share the table '{}'",
            name, table
        )));
    }
    Ok(table)
}

impl PolymorphicPersister {
    /// Subtypes sharing one table; each subtype mapping carries its
    /// discriminator value as a fixed column.
    pub fn single_table(
        name: impl Into<String>,
        discriminator: &str,
        subtypes: Vec<Arc<EntityPersister>>,
    ) -> Result<Self, PersistError> {
        let name = name.into();
        let (id_columns, subtypes) = index_subtypes(&name, subtypes)?;
        let table = shared_table(&name, &subtypes)?;
        let mut values = Vec::with_capacity(subtypes.len());
        for (kind, persister) in &subtypes {
            let value = persister
                .mapping()
                .fixed_columns()
                .iter()
                .find(|(column, _)| column == discriminator)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    PersistError::configuration(format!(
                        "subtype '{}' of '{}' has no fixed '{}' column",
                        kind, name, discriminator
                    ))
                })?;
            values.push(value);
        }
        let resolver = SingleTable::new(&table, discriminator, &id_columns, values)?;
        Ok(Self::assemble(name, id_columns, SubtypeResolver::SingleTable(resolver), subtypes))
    }

    /// Subtypes sharing a root table, each with one secondary table keyed
    /// by the root id.
    pub fn joined(
        name: impl Into<String>,
        subtypes: Vec<Arc<EntityPersister>>,
    ) -> Result<Self, PersistError> {
        let name = name.into();
        let (id_columns, subtypes) = index_subtypes(&name, subtypes)?;
        let table = shared_table(&name, &subtypes)?;
        let mut tables = Vec::with_capacity(subtypes.len());
        for (kind, persister) in &subtypes {
            match persister.secondary_tables() {
                [secondary] => tables.push((secondary.table().to_string(), secondary.id_columns())),
                _ => {
                    return Err(PersistError::configuration(format!(
                        "subtype '{}' of '{}' needs exactly one subtype table",
                        kind, name
                    )))
                }
            }
        }
        let resolver = JoinedTables::new(&table, &id_columns, tables)?;
        Ok(Self::assemble(name, id_columns, SubtypeResolver::Joined(resolver), subtypes))
    }

    /// One complete table per subtype. Ids must be unique across them.
    pub fn table_per_class(
        name: impl Into<String>,
        subtypes: Vec<Arc<EntityPersister>>,
    ) -> Result<Self, PersistError> {
        let name = name.into();
        let (id_columns, subtypes) = index_subtypes(&name, subtypes)?;
        let tables: Vec<String> = subtypes
            .values()
            .map(|p| p.mapping().table().to_string())
            .collect();
        if tables.iter().collect::<HashSet<_>>().len() != tables.len() {
            return Err(PersistError::configuration(format!(
                "subtypes of '{}' must each own a table",
                name
            )));
        }
        let resolver = TablePerClass::new(tables, &id_columns)?;
        Ok(Self::assemble(name, id_columns, SubtypeResolver::TablePerClass(resolver), subtypes))
    }

    fn assemble(
        name: String,
        id_columns: Vec<String>,
        resolver: SubtypeResolver,
        subtypes: IndexMap<String, Arc<EntityPersister>>,
    ) -> Self {
        PolymorphicPersister {
            name,
            id_columns,
            resolver,
            subtypes,
            config: PersistenceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id_columns(&self) -> &[String] {
        &self.id_columns
    }

    pub fn resolver(&self) -> &SubtypeResolver {
        &self.resolver
    }

    pub fn subtypes(&self) -> impl Iterator<Item = (&str, &Arc<EntityPersister>)> {
        self.subtypes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn subtype(&self, kind: &str) -> Result<&Arc<EntityPersister>, PersistError> {
        self.subtypes
            .get(kind)
            .ok_or_else(|| PersistError::UnknownSubtype {
                hierarchy: self.name.clone(),
                kind: kind.to_string(),
            })
    }

    pub(crate) fn key_table(&self, extra_columns: &[String]) -> TableRef {
        self.resolver.key_table(&self.id_columns, extra_columns)
    }

    pub(crate) fn routing_columns(&self) -> Vec<String> {
        self.resolver.routing_columns()
    }

    /// `table` outer-joined to the key table on `target_columns`, selecting
    /// `columns` of `table` plus the routing columns. Stands in for a link
    /// table in phase one.
    pub(crate) fn link_table(
        &self,
        table: &str,
        columns: &[String],
        target_columns: &[String],
    ) -> TableRef {
        let mut select: Vec<String> = columns
            .iter()
            .map(|c| format!("{}.{} AS {}", table, c, c))
            .collect();
        select.extend(
            self.routing_columns()
                .iter()
                .map(|c| format!("routing.{} AS {}", c, c)),
        );
        let on: Vec<String> = target_columns
            .iter()
            .zip(&self.id_columns)
            .map(|(target, id)| format!("{}.{} = routing.{}", table, target, id))
            .collect();
        TableRef::Subquery(format!(
            "SELECT {} FROM {} LEFT OUTER JOIN {} AS routing ON {}",
            select.join(", "),
            table,
            self.key_table(&[]).sql(),
            on.join(" AND ")
        ))
    }

    /// Subtype persister owning a row read through the key table.
    pub(crate) fn subtype_of(&self, row: &RowView<'_>) -> Result<&Arc<EntityPersister>, PersistError> {
        let position = self.resolver.route(row)?;
        self.subtypes
            .get_index(position)
            .map(|(_, persister)| persister)
            .ok_or_else(|| {
                PersistError::consistency(format!("'{}' has no subtype {}", self.name, position))
            })
    }

    pub fn id_of(&self, entity: &Entity) -> Result<Option<Id>, PersistError> {
        Ok(self.subtype(entity.kind())?.mapping().id_of(entity))
    }

    pub fn explain(&self) -> String {
        let query = self.resolver.query();
        let placeholder = Id::composite(vec![Value::Null; self.id_columns.len()]);
        let filter = render_id_in(query.root_alias(), &self.id_columns, &[placeholder]);
        let mut out = query.statement(Some(filter)).sql().to_string();
        for (kind, persister) in &self.subtypes {
            out.push_str(&format!("\n-- {} as {}:\n{}", self.name, kind, persister.explain()));
        }
        out
    }

    /// Runs the phase-one query, returning (subtype position, id) pairs in
    /// row order.
    fn route(&self, exec: &dyn Executor, ids: &[Id]) -> Result<Vec<(usize, Id)>, PersistError> {
        let query = self.resolver.query();
        let root = &query.nodes()[0];
        let mut routed = Vec::with_capacity(ids.len());
        let mut seen = HashSet::new();
        for chunk in ids.chunks(self.config.chunk_size()) {
            let filter = render_id_in(query.root_alias(), &self.id_columns, chunk);
            exec.query(&query.statement(Some(filter)), &mut |cursor| {
                while let Some(row) = cursor.next_row()? {
                    let view = RowView::new(row, root.columns());
                    let Some(id) = Id::from_values(view.get_all(&self.id_columns)) else {
                        continue;
                    };
                    let subtype = self.resolver.route(&view)?;
                    if seen.insert(id.clone()) {
                        routed.push((subtype, id));
                    }
                }
                Ok(())
            })?;
        }
        Ok(routed)
    }

    fn group(routed: &[(usize, Id)]) -> IndexMap<usize, Vec<Id>> {
        let mut groups: IndexMap<usize, Vec<Id>> = IndexMap::new();
        for (subtype, id) in routed {
            groups.entry(*subtype).or_default().push(id.clone());
        }
        groups
    }

    pub fn select(&self, exec: &dyn Executor, ids: &[Id]) -> Result<Vec<EntityRef>, PersistError> {
        self.select_in(exec, ids, &mut LoadContext::new())
    }

    /// Loads mixed-kind instances; one batch per subtype.
    pub fn select_in(
        &self,
        exec: &dyn Executor,
        ids: &[Id],
        ctx: &mut LoadContext,
    ) -> Result<Vec<EntityRef>, PersistError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let routed = self.route(exec, &ids)?;
        let mut loaded: HashMap<Id, EntityRef> = HashMap::new();
        for (subtype, ids) in Self::group(&routed) {
            let Some((kind, persister)) = self.subtypes.get_index(subtype) else {
                continue;
            };
            debug!(hierarchy = %self.name, subtype = %kind, ids = ids.len(), "subtype batch");
            for instance in persister.select_in(exec, &ids, ctx)? {
                if let Some(id) = persister.mapping().id_of(&instance.borrow()) {
                    loaded.insert(id, instance.clone());
                }
            }
        }
        Ok(routed
            .into_iter()
            .filter_map(|(_, id)| loaded.remove(&id))
            .collect())
    }

    pub fn insert(&self, exec: &dyn Executor, entity: &EntityRef) -> Result<(), PersistError> {
        self.insert_with(exec, entity, &ColumnValues::new())
    }

    pub fn insert_with(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        extras: &ColumnValues,
    ) -> Result<(), PersistError> {
        self.subtype(&entity.kind())?.insert_with(exec, entity, extras)
    }

    pub fn update(
        &self,
        exec: &dyn Executor,
        pairs: &[(EntityRef, EntityRef)],
        all_columns: bool,
    ) -> Result<(), PersistError> {
        for (original, replacement) in pairs {
            let kind = replacement.kind();
            if original.kind() != kind {
                return Err(PersistError::consistency(format!(
                    "instance of '{}' cannot become '{}'",
                    original.kind(),
                    kind
                )));
            }
            self.subtype(&kind)?
                .update(exec, &[(original.clone(), replacement.clone())], all_columns)?;
        }
        Ok(())
    }

    pub fn update_columns(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        columns: &ColumnValues,
    ) -> Result<(), PersistError> {
        self.subtype(&entity.kind())?.update_columns(exec, entity, columns)
    }

    pub fn delete(&self, exec: &dyn Executor, entities: &[EntityRef]) -> Result<(), PersistError> {
        for entity in entities {
            self.subtype(&entity.kind())?
                .delete(exec, std::slice::from_ref(entity))?;
        }
        Ok(())
    }

    pub fn delete_by_id(&self, exec: &dyn Executor, ids: &[Id]) -> Result<(), PersistError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(());
        }
        let routed = self.route(exec, &ids)?;
        for (subtype, ids) in Self::group(&routed) {
            if let Some((_, persister)) = self.subtypes.get_index(subtype) {
                persister.delete_by_id(exec, &ids)?;
            }
        }
        Ok(())
    }
}
