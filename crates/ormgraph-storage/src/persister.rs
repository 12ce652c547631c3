//! [`EntityPersister`]: reads and writes one entity kind and, through its
//! relations, the graph below it.
//!
//! The persister's join tree is compiled once when it is built. Join-fetched
//! relations graft the target persister's tree, so nested relations come
//! back in the same statement; two-phase relations contribute key columns
//! and are completed after the owner's rows are drained.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use ormgraph_core::{ColumnValues, EntityMapping, EntityRef, Id, Value};

use crate::config::PersistenceConfig;
use crate::criteria::{render_id_in, Criteria};
use crate::dml;
use crate::error::PersistError;
use crate::executor::Executor;
use crate::inflate::Inflater;
use crate::join::{CompiledQuery, JoinKind, JoinTree, KeyPair, RowMerger, TableRef};
use crate::loader::Loader;
use crate::relation::{FetchMode, RelationMapping, RelationStorage};
use crate::two_phase::{self, enqueue_merger, LoadContext};
use crate::update::{diff_relation, source_owned_before_row, RelationWriter};

/// Persister of one entity kind.
#[derive(Debug)]
pub struct EntityPersister {
    mapping: Arc<EntityMapping>,
    secondary: Vec<Arc<EntityMapping>>,
    relations: Vec<RelationMapping>,
    config: PersistenceConfig,
    tree: JoinTree,
    query: Arc<CompiledQuery>,
}

/// Builder for [`EntityPersister`].
#[derive(Debug)]
pub struct EntityPersisterBuilder {
    mapping: Arc<EntityMapping>,
    secondary: Vec<Arc<EntityMapping>>,
    relations: Vec<RelationMapping>,
    config: PersistenceConfig,
}

impl EntityPersisterBuilder {
    /// A table sharing the primary key, read with an inner join and written
    /// alongside the primary row (joined-table subtypes).
    pub fn secondary_table(mut self, mapping: EntityMapping) -> Self {
        self.secondary.push(Arc::new(mapping));
        self
    }

    pub fn relation(mut self, relation: RelationMapping) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<EntityPersister, PersistError> {
        let entity = self.mapping.entity().to_string();
        let id_columns = self.mapping.id_columns();

        let mut names = HashSet::new();
        for relation in &self.relations {
            if !names.insert(relation.name()) {
                return Err(PersistError::configuration(format!(
                    "relation '{}.{}' is declared twice",
                    entity,
                    relation.name()
                )));
            }
            relation.validate(&entity, &id_columns)?;
        }
        for secondary in &self.secondary {
            if secondary.id_columns().len() != id_columns.len() {
                return Err(PersistError::configuration(format!(
                    "secondary table '{}' of '{}' must be keyed by the {}-column id",
                    secondary.table(),
                    entity,
                    id_columns.len()
                )));
            }
        }

        let mut tree = JoinTree::new(self.mapping.clone());
        let root = tree.root_name().to_string();

        for secondary in &self.secondary {
            tree.add_merge_join(
                &root,
                TableRef::table(secondary.table()),
                secondary.columns(),
                KeyPair::new(id_columns.clone(), secondary.id_columns()),
                JoinKind::Inner,
                RowMerger::properties(secondary.clone()),
            );
        }

        let ordered = self
            .relations
            .iter()
            .any(|r| r.fetch_mode() == FetchMode::Join && r.is_indexed());
        if ordered {
            for column in &id_columns {
                tree.order_by(&root, column);
            }
        }

        for relation in &self.relations {
            register(&mut tree, &root, &id_columns, relation)?;
        }

        let query = tree.compile()?;
        debug!(entity = %entity, sql = query.sql(), "compiled persister");
        Ok(EntityPersister {
            mapping: self.mapping,
            secondary: self.secondary,
            relations: self.relations,
            config: self.config,
            tree,
            query,
        })
    }
}

/// Adds the join nodes reading `relation` below `root`.
fn register(
    tree: &mut JoinTree,
    root: &str,
    id_columns: &[String],
    relation: &RelationMapping,
) -> Result<(), PersistError> {
    let target = relation.target();
    let fixer = relation.fixer();
    let target_ids = target.id_columns();

    match relation.fetch_mode() {
        FetchMode::Join => {
            let Loader::Entity(persister) = target else {
                return Err(PersistError::configuration(format!(
                    "relation '{}' can only join a built entity persister",
                    relation.name()
                )));
            };
            let subtree = persister.tree();
            match relation.storage() {
                RelationStorage::SourceColumns { columns } => {
                    tree.graft(
                        root,
                        subtree,
                        KeyPair::new(columns.clone(), target_ids),
                        JoinKind::Outer,
                        fixer,
                        Vec::new(),
                    );
                }
                RelationStorage::TargetColumns { columns, index } => {
                    let node = tree.graft(
                        root,
                        subtree,
                        KeyPair::new(id_columns.to_vec(), columns.clone()),
                        JoinKind::Outer,
                        fixer,
                        index.iter().cloned().collect(),
                    );
                    if let Some(index) = index {
                        tree.order_by(&node, index);
                    }
                }
                RelationStorage::Association {
                    table,
                    source_columns,
                    target_columns,
                    index,
                } => {
                    let link = tree.add_passive_join(
                        root,
                        TableRef::table(table),
                        index.iter().cloned().collect(),
                        KeyPair::new(id_columns.to_vec(), source_columns.clone()),
                        JoinKind::Outer,
                    );
                    tree.graft(
                        &link,
                        subtree,
                        KeyPair::new(target_columns.clone(), target_ids),
                        JoinKind::Outer,
                        fixer,
                        Vec::new(),
                    );
                    if let Some(index) = index {
                        tree.order_by(&link, index);
                    }
                }
            }
        }
        FetchMode::TwoPhase => {
            let routing = target.routing_columns();
            match relation.storage() {
                RelationStorage::SourceColumns { columns } if routing.is_empty() => {
                    tree.add_inline_merge(
                        root,
                        columns.clone(),
                        enqueue_merger(target.clone(), fixer, columns.clone(), None),
                    );
                }
                RelationStorage::SourceColumns { columns } => {
                    let mut selected = target_ids.clone();
                    selected.extend(routing);
                    tree.add_merge_join(
                        root,
                        target.key_table(&[]),
                        selected,
                        KeyPair::new(columns.clone(), target_ids.clone()),
                        JoinKind::Outer,
                        enqueue_merger(target.clone(), fixer, target_ids, None),
                    );
                }
                RelationStorage::TargetColumns { columns, index } => {
                    let mut selected = target_ids.clone();
                    selected.extend(index.iter().cloned());
                    selected.extend(routing);
                    let mut key_columns = columns.clone();
                    key_columns.extend(index.iter().cloned());
                    tree.add_merge_join(
                        root,
                        target.key_table(&key_columns),
                        selected,
                        KeyPair::new(id_columns.to_vec(), columns.clone()),
                        JoinKind::Outer,
                        enqueue_merger(target.clone(), fixer, target_ids, index.clone()),
                    );
                }
                RelationStorage::Association {
                    table,
                    source_columns,
                    target_columns,
                    index,
                } => {
                    let mut link_columns = source_columns.clone();
                    link_columns.extend(target_columns.iter().cloned());
                    link_columns.extend(index.iter().cloned());
                    let mut selected = target_columns.clone();
                    selected.extend(index.iter().cloned());
                    selected.extend(routing);
                    tree.add_merge_join(
                        root,
                        target.link_table(table, &link_columns, target_columns),
                        selected,
                        KeyPair::new(id_columns.to_vec(), source_columns.clone()),
                        JoinKind::Outer,
                        enqueue_merger(target.clone(), fixer, target_columns.clone(), index.clone()),
                    );
                }
            }
        }
    }
    Ok(())
}

/// Ids in first-seen order without repeats.
pub(crate) fn distinct(ids: &[Id]) -> Vec<Id> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

impl EntityPersister {
    pub fn builder(mapping: EntityMapping) -> EntityPersisterBuilder {
        EntityPersisterBuilder {
            mapping: Arc::new(mapping),
            secondary: Vec::new(),
            relations: Vec::new(),
            config: PersistenceConfig::default(),
        }
    }

    pub fn new(mapping: EntityMapping) -> Result<Self, PersistError> {
        Self::builder(mapping).build()
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    pub fn secondary_tables(&self) -> &[Arc<EntityMapping>] {
        &self.secondary
    }

    pub fn relations(&self) -> &[RelationMapping] {
        &self.relations
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn tree(&self) -> &JoinTree {
        &self.tree
    }

    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }

    /// The statement run for a batch of ids.
    pub fn explain(&self) -> String {
        let placeholder = Id::composite(vec![Value::Null; self.mapping.id_columns().len()]);
        let filter = render_id_in(
            self.query.root_alias(),
            &self.mapping.id_columns(),
            &[placeholder],
        );
        let mut out = self.query.statement(Some(filter)).sql().to_string();
        for relation in &self.relations {
            if relation.fetch_mode() != FetchMode::TwoPhase {
                continue;
            }
            let target = relation.target();
            let plan = match target {
                // closes a cycle, its plan is printed where it is declared
                Loader::Deferred(_) => format!("{} by id", target.name()),
                _ => target.explain(),
            };
            out.push_str(&format!(
                "\n-- then {}.{}:\n{}",
                self.mapping.entity(),
                relation.name(),
                plan
            ));
        }
        out
    }

    // ---- reads ----

    pub fn select(&self, exec: &dyn Executor, ids: &[Id]) -> Result<Vec<EntityRef>, PersistError> {
        self.select_in(exec, ids, &mut LoadContext::new())
    }

    /// Loads the instances with the given ids, splitting the id list into
    /// `IN` chunks. Instances are shared across chunks.
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
        let id_columns = self.mapping.id_columns();
        let filters = ids
            .chunks(self.config.chunk_size())
            .map(|chunk| Some(render_id_in(self.query.root_alias(), &id_columns, chunk)))
            .collect();
        self.load(exec, filters, ctx)
    }

    pub fn select_by_criteria(
        &self,
        exec: &dyn Executor,
        criteria: &Criteria,
    ) -> Result<Vec<EntityRef>, PersistError> {
        self.select_by_criteria_in(exec, criteria, &mut LoadContext::new())
    }

    pub fn select_by_criteria_in(
        &self,
        exec: &dyn Executor,
        criteria: &Criteria,
        ctx: &mut LoadContext,
    ) -> Result<Vec<EntityRef>, PersistError> {
        let filter = if criteria.is_empty() {
            None
        } else {
            Some(criteria.render(&self.mapping, self.query.root_alias())?)
        };
        self.load(exec, vec![filter], ctx)
    }

    fn load(
        &self,
        exec: &dyn Executor,
        filters: Vec<Option<(String, Vec<Value>)>>,
        ctx: &mut LoadContext,
    ) -> Result<Vec<EntityRef>, PersistError> {
        let mut scope = ctx.scope();
        let mut inflater = Inflater::new(&self.query);
        for filter in filters {
            let statement = self.query.statement(filter);
            exec.query(&statement, &mut |cursor| {
                inflater.consume(cursor, &mut scope).map(|_| ())
            })?;
        }
        let roots = inflater.finish();
        let key = self as *const Self as *const () as usize;
        for root in &roots {
            if let Some(id) = self.mapping.id_of(&root.borrow()) {
                scope.remember(key, id, root);
            }
        }
        two_phase::complete(exec, &mut scope)?;
        debug!(entity = self.mapping.entity(), loaded = roots.len(), "select");
        Ok(roots)
    }

    // ---- writes ----

    fn require_id(&self, entity: &EntityRef) -> Result<Id, PersistError> {
        self.mapping
            .id_of(&entity.borrow())
            .ok_or_else(|| PersistError::MissingIdentifier {
                entity: self.mapping.entity().to_string(),
            })
    }

    fn source_owned(&self) -> impl Iterator<Item = (&RelationMapping, &[String])> {
        self.relations.iter().filter_map(|r| match r.storage() {
            RelationStorage::SourceColumns { columns } => Some((r, columns.as_slice())),
            _ => None,
        })
    }

    fn collections(&self) -> impl Iterator<Item = &RelationMapping> {
        self.relations
            .iter()
            .filter(|r| !matches!(r.storage(), RelationStorage::SourceColumns { .. }))
    }

    /// Column values of the primary row, foreign keys of source-owned
    /// relations included.
    fn row_values(&self, entity: &EntityRef) -> Result<ColumnValues, PersistError> {
        let mut values = self.mapping.extract(&entity.borrow());
        for (relation, columns) in self.source_owned() {
            let target_id = match entity.to_one(relation.name()) {
                Some(target) => Some(relation.target().id_of(&target.borrow())?.ok_or_else(
                    || PersistError::MissingIdentifier {
                        entity: target.kind(),
                    },
                )?),
                None => None,
            };
            for (i, column) in columns.iter().enumerate() {
                let value = target_id
                    .as_ref()
                    .and_then(|id| id.values().get(i).cloned())
                    .unwrap_or_default();
                values.insert(column.clone(), value);
            }
        }
        Ok(values)
    }

    fn writer<'a>(&'a self, exec: &'a dyn Executor, relation: &'a RelationMapping, owner_id: &'a Id) -> RelationWriter<'a> {
        RelationWriter {
            exec,
            config: &self.config,
            relation,
            owner_id,
        }
    }

    pub fn insert(&self, exec: &dyn Executor, entity: &EntityRef) -> Result<(), PersistError> {
        self.insert_with(exec, entity, &ColumnValues::new())
    }

    /// Inserts the instance, cascading through its relations. `extras` are
    /// written into the primary row on top of the mapped columns.
    pub fn insert_with(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        extras: &ColumnValues,
    ) -> Result<(), PersistError> {
        let id = self.require_id(entity)?;

        for (relation, _) in self.source_owned() {
            if let Some(target) = entity.to_one(relation.name()) {
                if !target.is_persisted() {
                    if relation.cascade_rules().insert {
                        relation.target().insert(exec, &target)?;
                    } else {
                        debug!(relation = relation.name(), "insert not cascaded");
                    }
                }
            }
        }

        let mut values = self.row_values(entity)?;
        for (column, value) in extras {
            values.insert(column.clone(), value.clone());
        }
        dml::execute_checked(exec, &self.config, &dml::insert(self.mapping.table(), &values), 1)?;
        for secondary in &self.secondary {
            let values = secondary.extract(&entity.borrow());
            dml::execute_checked(exec, &self.config, &dml::insert(secondary.table(), &values), 1)?;
        }
        entity.borrow_mut().mark_persisted(true);

        for relation in self.collections() {
            let targets = entity.borrow().related(relation.name());
            self.writer(exec, relation, &id).insert_all(&targets)?;
        }
        Ok(())
    }

    /// Writes the difference between each (original, replacement) pair:
    /// changed columns only unless `all_columns`, then every relation.
    pub fn update(
        &self,
        exec: &dyn Executor,
        pairs: &[(EntityRef, EntityRef)],
        all_columns: bool,
    ) -> Result<(), PersistError> {
        for (original, replacement) in pairs {
            let id = self.require_id(original)?;
            let replacement_id = self.require_id(replacement)?;
            if id != replacement_id {
                return Err(PersistError::IdentifierMismatch {
                    entity: self.mapping.entity().to_string(),
                    original: id.to_string(),
                    replacement: replacement_id.to_string(),
                });
            }

            let mut orphans = Vec::new();
            for (relation, _) in self.source_owned() {
                let ctx = diff_relation(
                    relation,
                    &original.borrow().related(relation.name()),
                    &replacement.borrow().related(relation.name()),
                )?;
                for orphan in source_owned_before_row(exec, relation, ctx, all_columns)? {
                    orphans.push((relation, orphan));
                }
            }

            let before = self.row_values(original)?;
            let after = self.row_values(replacement)?;
            self.write_changes(exec, self.mapping.table(), &self.mapping, &id, &before, &after, all_columns)?;
            for secondary in &self.secondary {
                let before = secondary.extract(&original.borrow());
                let after = secondary.extract(&replacement.borrow());
                self.write_changes(exec, secondary.table(), secondary, &id, &before, &after, all_columns)?;
            }

            for (relation, orphan) in orphans {
                debug!(relation = relation.name(), "deleting orphan");
                relation.target().delete(exec, &[orphan])?;
            }

            for relation in self.collections() {
                let ctx = diff_relation(
                    relation,
                    &original.borrow().related(relation.name()),
                    &replacement.borrow().related(relation.name()),
                )?;
                if ctx.is_unchanged() && !relation.cascade_rules().update {
                    continue;
                }
                self.writer(exec, relation, &id).apply(ctx, all_columns)?;
            }
            replacement.borrow_mut().mark_persisted(true);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_changes(
        &self,
        exec: &dyn Executor,
        table: &str,
        mapping: &EntityMapping,
        id: &Id,
        before: &ColumnValues,
        after: &ColumnValues,
        all_columns: bool,
    ) -> Result<(), PersistError> {
        let id_columns = mapping.id_columns();
        let changed: ColumnValues = after
            .iter()
            .filter(|(column, _)| !id_columns.contains(*column))
            .filter(|(column, value)| all_columns || before.get(*column) != Some(*value))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        let statement = dml::update(table, &changed, &mapping.key_values(id));
        dml::execute_checked(exec, &self.config, &statement, 1)?;
        Ok(())
    }

    /// Writes relation-owned columns (back-references, positions) on the
    /// primary row of an existing instance.
    pub fn update_columns(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        columns: &ColumnValues,
    ) -> Result<(), PersistError> {
        if columns.is_empty() {
            return Ok(());
        }
        let id = self.require_id(entity)?;
        let statement = dml::update(self.mapping.table(), columns, &self.mapping.key_values(&id));
        dml::execute_checked(exec, &self.config, &statement, 1)?;
        Ok(())
    }

    /// Deletes the instances one row at a time, cascading through every
    /// relation.
    pub fn delete(&self, exec: &dyn Executor, entities: &[EntityRef]) -> Result<(), PersistError> {
        for entity in entities {
            let id = self.require_id(entity)?;
            self.delete_collections(exec, entity, &id)?;
            for secondary in self.secondary.iter().rev() {
                let statement = dml::delete(secondary.table(), &secondary.key_values(&id));
                dml::execute_checked(exec, &self.config, &statement, 1)?;
            }
            let statement = dml::delete(self.mapping.table(), &self.mapping.key_values(&id));
            dml::execute_checked(exec, &self.config, &statement, 1)?;
            entity.borrow_mut().mark_persisted(false);
            self.delete_source_owned(exec, entity)?;
        }
        Ok(())
    }

    /// Deletes by id with batched `IN` statements. Instances are loaded first
    /// when relations have to cascade.
    pub fn delete_by_id(&self, exec: &dyn Executor, ids: &[Id]) -> Result<(), PersistError> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(());
        }
        let loaded = if self.relations.is_empty() {
            Vec::new()
        } else {
            self.select(exec, &ids)?
        };
        for entity in &loaded {
            let id = self.require_id(entity)?;
            self.delete_collections(exec, entity, &id)?;
        }

        let id_columns = self.mapping.id_columns();
        for chunk in ids.chunks(self.config.chunk_size()) {
            for secondary in self.secondary.iter().rev() {
                let statement = dml::delete_in(secondary.table(), &secondary.id_columns(), chunk);
                dml::execute_checked(exec, &self.config, &statement, chunk.len())?;
            }
            let statement = dml::delete_in(self.mapping.table(), &id_columns, chunk);
            dml::execute_checked(exec, &self.config, &statement, chunk.len())?;
        }

        for entity in &loaded {
            entity.borrow_mut().mark_persisted(false);
            self.delete_source_owned(exec, entity)?;
        }
        Ok(())
    }

    fn delete_collections(&self, exec: &dyn Executor, entity: &EntityRef, id: &Id) -> Result<(), PersistError> {
        for relation in self.collections() {
            let targets = entity.borrow().related(relation.name());
            self.writer(exec, relation, id).delete_owner(&targets)?;
        }
        Ok(())
    }

    fn delete_source_owned(&self, exec: &dyn Executor, entity: &EntityRef) -> Result<(), PersistError> {
        for (relation, _) in self.source_owned() {
            if !relation.cascade_rules().orphan_removal {
                continue;
            }
            if let Some(target) = entity.to_one(relation.name()) {
                relation.target().delete(exec, &[target])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{author_book_schema, CountingExecutor};
    use ormgraph_core::Entity;

    #[test]
    fn explain_lists_two_phase_targets() {
        let registry = author_book_schema();
        let explain = registry.get("Author").unwrap().explain();
        assert!(explain.starts_with("SELECT author.id AS author_id"));
        assert!(explain.contains("-- then Author.books:"));
        assert!(explain.contains("FROM book AS book"));
    }

    #[test]
    fn relation_validation_runs_at_build() {
        let registry = author_book_schema();
        let book = registry.get("Book").unwrap().clone();
        let err = EntityPersister::builder(
            EntityMapping::builder("Shelf", "shelf").id("id", "id").build().unwrap(),
        )
        .relation(RelationMapping::to_one("books", book.clone(), vec!["a".into(), "b".into()]))
        .build()
        .unwrap_err();
        assert!(err.is_configuration());

        let err = EntityPersister::builder(
            EntityMapping::builder("Shelf", "shelf").id("id", "id").build().unwrap(),
        )
        .relation(RelationMapping::to_one("x", book.clone(), vec!["x_id".into()]))
        .relation(RelationMapping::to_one("x", book, vec!["y_id".into()]))
        .build()
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn update_without_changes_writes_nothing() {
        let registry = author_book_schema();
        let author = registry.get("Author").unwrap();
        let exec = CountingExecutor::seeded();
        let a: EntityRef = Entity::new("Author").with("id", 1).with("name", "Ann").into();
        author.insert(&exec, &a).unwrap();

        let writes = exec.executes();
        author.update(&exec, &[(a.clone(), a.deep_clone())], false).unwrap();
        assert_eq!(exec.executes(), writes);
    }

    #[test]
    fn update_rejects_mismatched_ids() {
        let registry = author_book_schema();
        let author = registry.get("Author").unwrap();
        let exec = CountingExecutor::seeded();
        let a: EntityRef = Entity::new("Author").with("id", 1).into();
        let b: EntityRef = Entity::new("Author").with("id", 2).into();
        let err = author.update(&exec, &[(a, b)], false).unwrap_err();
        assert!(matches!(err, PersistError::IdentifierMismatch { .. }));
    }

    #[test]
    fn row_count_mismatch_is_reported() {
        let registry = author_book_schema();
        let book = registry.get("Book").unwrap();
        let exec = CountingExecutor::seeded();
        let ghost: EntityRef = Entity::new("Book").with("id", 404).with("title", "x").into();
        let err = book.delete(&exec, &[ghost]).unwrap_err();
        assert!(matches!(err, PersistError::RowCount { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn select_splits_ids_into_chunks() {
        let registry = crate::test_support::author_book_schema_with(PersistenceConfig {
            in_operator_max_size: 2,
            check_row_counts: true,
        });
        let book = registry.get("Book").unwrap();
        let exec = CountingExecutor::seeded();
        exec.run("INSERT INTO book (id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e')");
        let ids: Vec<Id> = (1..=5i64).map(Id::from).collect();
        let before = exec.queries();
        let books = book.select(&exec, &ids).unwrap();
        assert_eq!(books.len(), 5);
        assert_eq!(exec.queries() - before, 3);
    }
}
