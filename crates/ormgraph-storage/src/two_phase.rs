//! Two-phase relation loading.
//!
//! In phase one a relation only contributes the key columns of its targets
//! to the owner's query; every row turns into a [`RelationIds`] entry on the
//! pending queue of the current [`LoadContext`] scope. Once the owner's rows
//! are drained, [`complete`] loads the targets with one `select_in` per
//! distinct loader and wires them to their sources. Instances already built
//! during the same logical load are reused, so a cyclic graph terminates.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use tracing::{debug, warn};

use ormgraph_core::{EntityRef, Id};

use crate::error::PersistError;
use crate::executor::Executor;
use crate::join::{RelationFixer, RowMerger};
use crate::loader::Loader;

/// Identifies one target to load and where to put it.
#[derive(Debug, Clone)]
pub struct RelationIds {
    loader: Loader,
    fixer: RelationFixer,
    source: EntityRef,
    target_id: Id,
    index: Option<i64>,
}

impl RelationIds {
    pub fn new(
        loader: Loader,
        fixer: RelationFixer,
        source: EntityRef,
        target_id: Id,
        index: Option<i64>,
    ) -> Self {
        RelationIds {
            loader,
            fixer,
            source,
            target_id,
            index,
        }
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn source(&self) -> &EntityRef {
        &self.source
    }

    pub fn target_id(&self) -> &Id {
        &self.target_id
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }
}

type PendingKey = (usize, String, usize, Id, Option<i64>);

#[derive(Debug, Default)]
struct Pending {
    entries: Vec<RelationIds>,
    seen: HashSet<PendingKey>,
}

/// Cross-phase state of one logical load: a stack of pending queues, one per
/// open load scope, and the instances built so far by loader and id.
#[derive(Debug, Default)]
pub struct LoadContext {
    scopes: Vec<Pending>,
    loaded: HashMap<(usize, Id), EntityRef>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Entries waiting in the innermost scope.
    pub fn pending(&self) -> usize {
        self.scopes.last().map_or(0, |p| p.entries.len())
    }

    /// Queues `ids` in the innermost scope. Returns false for an entry
    /// already queued (same relation, source instance, target and index).
    pub fn enqueue(&mut self, ids: RelationIds) -> bool {
        if self.scopes.is_empty() {
            self.scopes.push(Pending::default());
        }
        let Some(pending) = self.scopes.last_mut() else {
            return false;
        };
        let key = (
            ids.loader.key(),
            ids.fixer.relation().to_string(),
            ids.source.addr(),
            ids.target_id.clone(),
            ids.index,
        );
        if !pending.seen.insert(key) {
            return false;
        }
        pending.entries.push(ids);
        true
    }

    /// Records an instance built by loader `key`.
    pub fn remember(&mut self, key: usize, id: Id, instance: &EntityRef) {
        self.loaded.entry((key, id)).or_insert_with(|| instance.clone());
    }

    pub fn recall(&self, key: usize, id: &Id) -> Option<EntityRef> {
        self.loaded.get(&(key, id.clone())).cloned()
    }

    /// Opens a scope, closed when the guard drops (error paths included).
    pub fn scope(&mut self) -> LoadScope<'_> {
        let depth = self.scopes.len();
        self.scopes.push(Pending::default());
        LoadScope { ctx: self, depth }
    }

    fn take_pending(&mut self) -> Vec<RelationIds> {
        self.scopes
            .last_mut()
            .map(|p| {
                p.seen.clear();
                std::mem::take(&mut p.entries)
            })
            .unwrap_or_default()
    }
}

/// Guard of an open [`LoadContext`] scope.
pub struct LoadScope<'a> {
    ctx: &'a mut LoadContext,
    depth: usize,
}

impl Deref for LoadScope<'_> {
    type Target = LoadContext;

    fn deref(&self) -> &LoadContext {
        self.ctx
    }
}

impl DerefMut for LoadScope<'_> {
    fn deref_mut(&mut self) -> &mut LoadContext {
        self.ctx
    }
}

impl Drop for LoadScope<'_> {
    fn drop(&mut self) {
        self.ctx.scopes.truncate(self.depth);
    }
}

/// Merger queuing the target whose key sits in `target_columns` of the row,
/// with the collection index read from `index_column`. A hierarchy key is
/// queued for the subtype its routing columns name.
pub(crate) fn enqueue_merger(
    loader: Loader,
    fixer: RelationFixer,
    target_columns: Vec<String>,
    index_column: Option<String>,
) -> RowMerger {
    RowMerger::new(move |source, row, ctx| {
        let Some(target_id) = Id::from_values(row.get_all(&target_columns)) else {
            return Ok(());
        };
        let index = index_column.as_deref().and_then(|c| row.get(c).as_i64());
        ctx.enqueue(RelationIds::new(
            loader.route(row)?,
            fixer.clone(),
            source.clone(),
            target_id,
            index,
        ));
        Ok(())
    })
}

/// Phase two for the innermost scope.
pub(crate) fn complete(exec: &dyn Executor, ctx: &mut LoadContext) -> Result<(), PersistError> {
    let mut entries = ctx.take_pending();
    if entries.is_empty() {
        return Ok(());
    }
    entries.sort_by_key(|e| e.index);

    let mut batches: IndexMap<usize, (Loader, Vec<Id>, HashSet<Id>)> = IndexMap::new();
    for entry in &entries {
        let (_, ids, seen) = batches
            .entry(entry.loader.key())
            .or_insert_with(|| (entry.loader.clone(), Vec::new(), HashSet::new()));
        if seen.insert(entry.target_id.clone()) {
            ids.push(entry.target_id.clone());
        }
    }

    let mut loaded: HashMap<(usize, Id), EntityRef> = HashMap::new();
    for (key, (loader, ids, _)) in &batches {
        let mut missing = Vec::with_capacity(ids.len());
        for id in ids {
            match ctx.recall(*key, id) {
                Some(known) => {
                    loaded.insert((*key, id.clone()), known);
                }
                None => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            continue;
        }
        debug!(loader = loader.name(), ids = missing.len(), "two-phase batch");
        for target in loader.select_in(exec, &missing, ctx)? {
            if let Some(id) = loader.id_of(&target.borrow())? {
                loaded.insert((*key, id), target.clone());
            }
        }
    }

    for entry in &entries {
        match loaded.get(&(entry.loader.key(), entry.target_id.clone())) {
            Some(target) => entry.fixer.apply(&entry.source, target),
            None => warn!(
                loader = entry.loader.name(),
                relation = entry.fixer.relation(),
                id = %entry.target_id,
                "dangling relation key, target not found"
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{author_book_schema, CountingExecutor};
    use ormgraph_core::Entity;

    #[test]
    fn scope_guard_pops_on_drop() {
        let mut ctx = LoadContext::new();
        {
            let mut scope = ctx.scope();
            assert_eq!(scope.depth(), 1);
            let _inner = scope.scope();
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn enqueue_deduplicates() {
        let registry = author_book_schema();
        let loader = registry.get("Book").unwrap().clone();
        let source: EntityRef = Entity::new("Author").with("id", 1).into();
        let mut ctx = LoadContext::new();
        let fixer = RelationFixer::to_many("books");
        let entry = RelationIds::new(loader, fixer, source, Id::single(3), None);
        assert!(ctx.enqueue(entry.clone()));
        assert!(!ctx.enqueue(entry));
        assert_eq!(ctx.pending(), 1);
    }

    #[test]
    fn one_batch_per_loader_and_dangling_keys_skipped() {
        let registry = author_book_schema();
        let exec = CountingExecutor::seeded();
        exec.run("INSERT INTO book (id, title, author_id) VALUES (3, 'A', NULL), (4, 'B', NULL)");
        let loader = registry.get("Book").unwrap().clone();
        let a1: EntityRef = Entity::new("Author").with("id", 1).into();
        let a2: EntityRef = Entity::new("Author").with("id", 2).into();
        let fixer = RelationFixer::to_many("books");

        let mut ctx = LoadContext::new();
        let mut scope = ctx.scope();
        for (source, id) in [(&a1, 3), (&a1, 4), (&a2, 3), (&a2, 99)] {
            scope.enqueue(RelationIds::new(
                loader.clone(),
                fixer.clone(),
                source.clone(),
                Id::single(id),
                None,
            ));
        }
        let before = exec.queries();
        complete(&exec, &mut scope).unwrap();
        assert_eq!(exec.queries() - before, 1);
        assert_eq!(a1.to_many("books").len(), 2);
        assert_eq!(a2.to_many("books").len(), 1);
        assert!(a1.to_many("books")[0].ptr_eq(&a2.to_many("books")[0]));
    }

    #[test]
    fn entries_are_applied_in_index_order() {
        let registry = author_book_schema();
        let exec = CountingExecutor::seeded();
        exec.run("INSERT INTO book (id, title, author_id) VALUES (3, 'A', NULL), (4, 'B', NULL)");
        let loader = registry.get("Book").unwrap().clone();
        let shelf: EntityRef = Entity::new("Author").with("id", 1).into();
        let fixer = RelationFixer::list("shelf");

        let mut ctx = LoadContext::new();
        for (id, index) in [(4, 2), (3, 0), (4, 1)] {
            ctx.enqueue(RelationIds::new(
                loader.clone(),
                fixer.clone(),
                shelf.clone(),
                Id::single(id),
                Some(index),
            ));
        }
        complete(&exec, &mut ctx).unwrap();
        let ids: Vec<_> = shelf
            .to_many("shelf")
            .iter()
            .map(|b| b.get("id").as_i64())
            .collect();
        assert_eq!(ids, vec![Some(3), Some(4), Some(4)]);
    }
}
