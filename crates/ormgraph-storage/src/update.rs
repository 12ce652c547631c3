//! Writes of one relation after its collection was diffed.
//!
//! Held targets are updated first, removed ones deleted or detached, added
//! ones inserted or linked; link-table rows are rewritten last. For foreign
//! keys owned by the source row, targets are written before that row and
//! orphans deleted after it, see [`source_owned_before_row`].

use tracing::debug;

use ormgraph_core::{ColumnValues, EntityRef, Id, Value};

use crate::config::PersistenceConfig;
use crate::diff::{diff_list, diff_set, Diff, IndexedDiff};
use crate::dml;
use crate::error::PersistError;
use crate::executor::Executor;
use crate::relation::{RelationMapping, RelationStorage};

/// A collection element with its position, if the collection is ordered.
#[derive(Debug, Clone)]
pub struct Placed {
    pub entity: EntityRef,
    pub index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct HeldEntry {
    pub original: EntityRef,
    pub replacement: EntityRef,
    pub original_index: Option<usize>,
    pub new_index: Option<usize>,
}

impl HeldEntry {
    pub fn is_reindexed(&self) -> bool {
        self.original_index != self.new_index
    }
}

/// Diff of one relation plus whatever the writer needs to remember while
/// applying it.
#[derive(Debug, Default)]
pub struct UpdateContext<B = ()> {
    pub added: Vec<Placed>,
    pub held: Vec<HeldEntry>,
    pub removed: Vec<Placed>,
    pub bookkeeping: B,
}

/// Link-table rows pending for an association relation.
#[derive(Debug, Default)]
pub struct AssociationRows {
    pub deletes: Vec<ColumnValues>,
    pub inserts: Vec<ColumnValues>,
    pub orphans: Vec<EntityRef>,
}

impl<B: Default> UpdateContext<B> {
    pub fn from_diffs(diffs: Vec<Diff<EntityRef>>) -> Self {
        let mut ctx = UpdateContext::default();
        for diff in diffs {
            match diff {
                Diff::Added(entity) => ctx.added.push(Placed {
                    entity,
                    index: None,
                }),
                Diff::Held {
                    original,
                    replacement,
                } => ctx.held.push(HeldEntry {
                    original,
                    replacement,
                    original_index: None,
                    new_index: None,
                }),
                Diff::Removed(entity) => ctx.removed.push(Placed {
                    entity,
                    index: None,
                }),
            }
        }
        ctx
    }

    pub fn from_indexed(diffs: Vec<IndexedDiff<EntityRef>>) -> Self {
        let mut ctx = UpdateContext::default();
        for diff in diffs {
            match diff {
                IndexedDiff::Added { replacement, index } => ctx.added.push(Placed {
                    entity: replacement,
                    index: Some(index),
                }),
                IndexedDiff::Held {
                    original,
                    replacement,
                    original_index,
                    new_index,
                } => ctx.held.push(HeldEntry {
                    original,
                    replacement,
                    original_index: Some(original_index),
                    new_index: Some(new_index),
                }),
                IndexedDiff::Removed { original, index } => ctx.removed.push(Placed {
                    entity: original,
                    index: Some(index),
                }),
            }
        }
        ctx
    }

    /// Nothing added or removed and nothing moved.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.held.iter().all(|h| !h.is_reindexed())
    }
}

/// Diffs the targets of `relation` before and after, by target id.
pub fn diff_relation<B: Default>(
    relation: &RelationMapping,
    before: &[EntityRef],
    after: &[EntityRef],
) -> Result<UpdateContext<B>, PersistError> {
    let target = relation.target();
    let keyed = |list: &[EntityRef]| -> Result<Vec<(EntityRef, Option<Id>)>, PersistError> {
        list.iter()
            .map(|e| Ok((e.clone(), target.id_of(&e.borrow())?)))
            .collect()
    };
    let before = keyed(before)?;
    let after = keyed(after)?;
    let id = |pair: &(EntityRef, Option<Id>)| pair.1.clone();

    if relation.is_indexed() {
        let diffs = diff_list(&before, &after, id)
            .into_iter()
            .map(|d| match d {
                IndexedDiff::Added { replacement, index } => IndexedDiff::Added {
                    replacement: replacement.0,
                    index,
                },
                IndexedDiff::Held {
                    original,
                    replacement,
                    original_index,
                    new_index,
                } => IndexedDiff::Held {
                    original: original.0,
                    replacement: replacement.0,
                    original_index,
                    new_index,
                },
                IndexedDiff::Removed { original, index } => IndexedDiff::Removed {
                    original: original.0,
                    index,
                },
            })
            .collect();
        Ok(UpdateContext::from_indexed(diffs))
    } else {
        let diffs = diff_set(&before, &after, id)
            .into_iter()
            .map(|d| match d {
                Diff::Added(e) => Diff::Added(e.0),
                Diff::Held {
                    original,
                    replacement,
                } => Diff::Held {
                    original: original.0,
                    replacement: replacement.0,
                },
                Diff::Removed(e) => Diff::Removed(e.0),
            })
            .collect();
        Ok(UpdateContext::from_diffs(diffs))
    }
}

/// Targets of a source-owned foreign key, written before the source row.
/// Returns the orphans to delete once the row no longer references them.
pub(crate) fn source_owned_before_row(
    exec: &dyn Executor,
    relation: &RelationMapping,
    ctx: UpdateContext,
    all_columns: bool,
) -> Result<Vec<EntityRef>, PersistError> {
    let target = relation.target();
    let cascade = relation.cascade_rules();
    for held in &ctx.held {
        if cascade.update {
            target.update(exec, &[(held.original.clone(), held.replacement.clone())], all_columns)?;
        }
    }
    for added in &ctx.added {
        if !added.entity.is_persisted() {
            if cascade.insert {
                target.insert(exec, &added.entity)?;
            } else {
                debug!(relation = relation.name(), "insert not cascaded");
            }
        }
    }
    Ok(if cascade.orphan_removal {
        ctx.removed.into_iter().map(|p| p.entity).collect()
    } else {
        Vec::new()
    })
}

/// Applies relation writes for one owner instance.
pub(crate) struct RelationWriter<'a> {
    pub exec: &'a dyn Executor,
    pub config: &'a PersistenceConfig,
    pub relation: &'a RelationMapping,
    pub owner_id: &'a Id,
}

impl RelationWriter<'_> {
    /// Writes every target of a freshly inserted owner.
    pub fn insert_all(&self, targets: &[EntityRef]) -> Result<(), PersistError> {
        let indexed = self.relation.is_indexed();
        let ctx = UpdateContext {
            added: targets
                .iter()
                .enumerate()
                .map(|(i, t)| Placed {
                    entity: t.clone(),
                    index: indexed.then_some(i),
                })
                .collect(),
            ..UpdateContext::default()
        };
        self.apply(ctx, false)
    }

    pub fn apply(&self, ctx: UpdateContext, all_columns: bool) -> Result<(), PersistError> {
        match self.relation.storage() {
            RelationStorage::SourceColumns { .. } => Ok(()),
            RelationStorage::TargetColumns { columns, index } => {
                self.apply_target_owned(ctx, columns, index.as_deref(), all_columns)
            }
            RelationStorage::Association { .. } => {
                let ctx = UpdateContext {
                    added: ctx.added,
                    held: ctx.held,
                    removed: ctx.removed,
                    bookkeeping: AssociationRows::default(),
                };
                self.apply_association(ctx, all_columns)
            }
        }
    }

    fn back_reference(&self, columns: &[String], index: Option<&str>, position: Option<usize>) -> ColumnValues {
        let mut values: ColumnValues = columns
            .iter()
            .cloned()
            .zip(self.owner_id.values().iter().cloned())
            .collect();
        if let Some(index) = index {
            values.insert(index.to_string(), Value::from(position));
        }
        values
    }

    fn detached(columns: &[String], index: Option<&str>) -> ColumnValues {
        let mut values: ColumnValues = columns.iter().map(|c| (c.clone(), Value::Null)).collect();
        if let Some(index) = index {
            values.insert(index.to_string(), Value::Null);
        }
        values
    }

    fn apply_target_owned(
        &self,
        ctx: UpdateContext,
        columns: &[String],
        index: Option<&str>,
        all_columns: bool,
    ) -> Result<(), PersistError> {
        let target = self.relation.target();
        let cascade = self.relation.cascade_rules();

        for held in &ctx.held {
            if cascade.update {
                target.update(
                    self.exec,
                    &[(held.original.clone(), held.replacement.clone())],
                    all_columns,
                )?;
            }
            if let (Some(index), true) = (index, held.is_reindexed()) {
                let mut values = ColumnValues::new();
                values.insert(index.to_string(), Value::from(held.new_index));
                target.update_columns(self.exec, &held.replacement, &values)?;
            }
        }

        for removed in &ctx.removed {
            if cascade.orphan_removal {
                debug!(relation = self.relation.name(), "deleting orphan");
                target.delete(self.exec, std::slice::from_ref(&removed.entity))?;
            } else {
                target.update_columns(self.exec, &removed.entity, &Self::detached(columns, index))?;
            }
        }

        for added in &ctx.added {
            let link = self.back_reference(columns, index, added.index);
            if added.entity.is_persisted() {
                target.update_columns(self.exec, &added.entity, &link)?;
            } else if cascade.insert {
                target.insert_with(self.exec, &added.entity, &link)?;
            } else {
                debug!(relation = self.relation.name(), "insert not cascaded");
            }
        }
        Ok(())
    }

    fn link_row(&self, target: &EntityRef, position: Option<usize>) -> Result<ColumnValues, PersistError> {
        let RelationStorage::Association {
            source_columns,
            target_columns,
            index,
            ..
        } = self.relation.storage()
        else {
            return Ok(ColumnValues::new());
        };
        let target_id = self
            .relation
            .target()
            .id_of(&target.borrow())?
            .ok_or_else(|| PersistError::MissingIdentifier {
                entity: target.kind(),
            })?;
        let mut row: ColumnValues = source_columns
            .iter()
            .cloned()
            .zip(self.owner_id.values().iter().cloned())
            .collect();
        row.extend(target_columns.iter().cloned().zip(target_id.values().iter().cloned()));
        if let Some(index) = index {
            row.insert(index.clone(), Value::from(position));
        }
        Ok(row)
    }

    fn apply_association(
        &self,
        mut ctx: UpdateContext<AssociationRows>,
        all_columns: bool,
    ) -> Result<(), PersistError> {
        let RelationStorage::Association { table, .. } = self.relation.storage() else {
            return Ok(());
        };
        let target = self.relation.target();
        let cascade = self.relation.cascade_rules();

        for held in &ctx.held {
            if cascade.update {
                target.update(
                    self.exec,
                    &[(held.original.clone(), held.replacement.clone())],
                    all_columns,
                )?;
            }
            if self.relation.is_indexed() && held.is_reindexed() {
                let old = self.link_row(&held.original, held.original_index)?;
                let new = self.link_row(&held.replacement, held.new_index)?;
                ctx.bookkeeping.deletes.push(old);
                ctx.bookkeeping.inserts.push(new);
            }
        }

        for removed in &ctx.removed {
            let row = self.link_row(&removed.entity, removed.index)?;
            ctx.bookkeeping.deletes.push(row);
            if cascade.orphan_removal {
                ctx.bookkeeping.orphans.push(removed.entity.clone());
            }
        }

        // removals first, so an added target may take a vacated unique slot
        let rows = &mut ctx.bookkeeping;
        for row in &rows.deletes {
            dml::execute_checked(self.exec, self.config, &dml::delete(table, row), 1)?;
        }
        if !rows.orphans.is_empty() {
            target.delete(self.exec, &rows.orphans)?;
        }

        for added in &ctx.added {
            if !added.entity.is_persisted() {
                if !cascade.insert {
                    debug!(relation = self.relation.name(), "insert not cascaded, no link written");
                    continue;
                }
                target.insert(self.exec, &added.entity)?;
            }
            let row = self.link_row(&added.entity, added.index)?;
            rows.inserts.push(row);
        }
        for row in &rows.inserts {
            dml::execute_checked(self.exec, self.config, &dml::insert(table, row), 1)?;
        }
        Ok(())
    }

    /// Relation side of deleting the owner: targets are deleted (delete
    /// cascade) or detached; link rows always go.
    pub fn delete_owner(&self, targets: &[EntityRef]) -> Result<(), PersistError> {
        let target = self.relation.target();
        let cascade = self.relation.cascade_rules();
        match self.relation.storage() {
            RelationStorage::SourceColumns { .. } => Ok(()),
            RelationStorage::TargetColumns { columns, index } => {
                if targets.is_empty() {
                    return Ok(());
                }
                if cascade.delete {
                    target.delete(self.exec, targets)
                } else {
                    let detached = Self::detached(columns, index.as_deref());
                    for t in targets {
                        target.update_columns(self.exec, t, &detached)?;
                    }
                    Ok(())
                }
            }
            RelationStorage::Association {
                table,
                source_columns,
                ..
            } => {
                let keys: ColumnValues = source_columns
                    .iter()
                    .cloned()
                    .zip(self.owner_id.values().iter().cloned())
                    .collect();
                self.exec.execute(&dml::delete(table, &keys))?;
                if cascade.orphan_removal && !targets.is_empty() {
                    target.delete(self.exec, targets)?;
                }
                Ok(())
            }
        }
    }
}
