//! [`Loader`]: the uniform face of entity and polymorphic persisters.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use ormgraph_core::{ColumnValues, Entity, EntityMapping, EntityRef, Id, RowView};

use crate::error::PersistError;
use crate::executor::Executor;
use crate::join::TableRef;
use crate::persister::EntityPersister;
use crate::polymorphic::PolymorphicPersister;
use crate::two_phase::LoadContext;

/// Relation target: a single entity persister or a hierarchy.
#[derive(Clone)]
pub enum Loader {
    Entity(Arc<EntityPersister>),
    Polymorphic(Arc<PolymorphicPersister>),
    /// Entity target of a relation closing a cycle, bound after its owner.
    Deferred(DeferredLoader),
}

/// An entity persister known by its mapping until the registry binds it.
/// Holds the persister weakly, the registry owns it.
#[derive(Clone)]
pub struct DeferredLoader {
    mapping: Arc<EntityMapping>,
    slot: Arc<OnceLock<Weak<EntityPersister>>>,
}

impl DeferredLoader {
    pub fn new(mapping: Arc<EntityMapping>) -> Self {
        DeferredLoader {
            mapping,
            slot: Arc::new(OnceLock::new()),
        }
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn bind(&self, persister: &Arc<EntityPersister>) -> Result<(), PersistError> {
        if persister.mapping().entity() != self.mapping.entity() {
            return Err(PersistError::configuration(format!(
                "cannot bind '{}' where '{}' is expected",
                persister.mapping().entity(),
                self.mapping.entity()
            )));
        }
        self.slot.set(Arc::downgrade(persister)).map_err(|_| {
            PersistError::configuration(format!("'{}' is bound twice", self.mapping.entity()))
        })
    }

    pub fn get(&self) -> Result<Arc<EntityPersister>, PersistError> {
        self.slot.get().and_then(Weak::upgrade).ok_or_else(|| {
            PersistError::configuration(format!(
                "'{}' is not bound to a live persister",
                self.mapping.entity()
            ))
        })
    }

    fn key(&self) -> usize {
        match self.slot.get() {
            Some(persister) => persister.as_ptr() as *const () as usize,
            None => Arc::as_ptr(&self.slot) as *const () as usize,
        }
    }
}

impl Loader {
    /// Identity of the underlying persister, used to group batch loads.
    pub fn key(&self) -> usize {
        match self {
            Loader::Entity(p) => Arc::as_ptr(p) as *const () as usize,
            Loader::Polymorphic(p) => Arc::as_ptr(p) as *const () as usize,
            Loader::Deferred(d) => d.key(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Loader::Entity(p) => p.mapping().entity(),
            Loader::Polymorphic(p) => p.name(),
            Loader::Deferred(d) => d.mapping.entity(),
        }
    }

    pub fn id_columns(&self) -> Vec<String> {
        match self {
            Loader::Entity(p) => p.mapping().id_columns(),
            Loader::Polymorphic(p) => p.id_columns().to_vec(),
            Loader::Deferred(d) => d.mapping.id_columns(),
        }
    }

    /// Table holding the ids of every instance of this loader, selecting
    /// `extra_columns` and the routing columns alongside them.
    pub fn key_table(&self, extra_columns: &[String]) -> TableRef {
        match self {
            Loader::Entity(p) => TableRef::table(p.mapping().table()),
            Loader::Polymorphic(p) => p.key_table(extra_columns),
            Loader::Deferred(d) => TableRef::table(d.mapping.table()),
        }
    }

    /// Columns of the key table naming the subtype of a key; empty unless
    /// this is a hierarchy.
    pub fn routing_columns(&self) -> Vec<String> {
        match self {
            Loader::Polymorphic(p) => p.routing_columns(),
            _ => Vec::new(),
        }
    }

    /// Right side of a phase-one join through link table `table`: the link
    /// table itself, or for a hierarchy the link rows with their routing
    /// columns.
    pub fn link_table(&self, table: &str, columns: &[String], target_columns: &[String]) -> TableRef {
        match self {
            Loader::Polymorphic(p) => p.link_table(table, columns, target_columns),
            _ => TableRef::table(table),
        }
    }

    /// Loader finishing a key read in phase one: the subtype persister
    /// named by the row's routing columns for a hierarchy.
    pub fn route(&self, row: &RowView<'_>) -> Result<Loader, PersistError> {
        match self {
            Loader::Entity(_) => Ok(self.clone()),
            Loader::Polymorphic(p) => Ok(Loader::Entity(p.subtype_of(row)?.clone())),
            Loader::Deferred(d) => Ok(Loader::Entity(d.get()?)),
        }
    }

    pub fn id_of(&self, entity: &Entity) -> Result<Option<Id>, PersistError> {
        match self {
            Loader::Entity(p) => Ok(p.mapping().id_of(entity)),
            Loader::Polymorphic(p) => p.id_of(entity),
            Loader::Deferred(d) => Ok(d.mapping.id_of(entity)),
        }
    }

    pub fn select(&self, exec: &dyn Executor, ids: &[Id]) -> Result<Vec<EntityRef>, PersistError> {
        self.select_in(exec, ids, &mut LoadContext::new())
    }

    pub fn select_in(
        &self,
        exec: &dyn Executor,
        ids: &[Id],
        ctx: &mut LoadContext,
    ) -> Result<Vec<EntityRef>, PersistError> {
        match self {
            Loader::Entity(p) => p.select_in(exec, ids, ctx),
            Loader::Polymorphic(p) => p.select_in(exec, ids, ctx),
            Loader::Deferred(d) => d.get()?.select_in(exec, ids, ctx),
        }
    }

    pub fn insert(&self, exec: &dyn Executor, entity: &EntityRef) -> Result<(), PersistError> {
        self.insert_with(exec, entity, &ColumnValues::new())
    }

    /// Inserts with extra column values, e.g. a back-reference and position
    /// owned by a relation.
    pub fn insert_with(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        extras: &ColumnValues,
    ) -> Result<(), PersistError> {
        match self {
            Loader::Entity(p) => p.insert_with(exec, entity, extras),
            Loader::Polymorphic(p) => p.insert_with(exec, entity, extras),
            Loader::Deferred(d) => d.get()?.insert_with(exec, entity, extras),
        }
    }

    pub fn update(
        &self,
        exec: &dyn Executor,
        pairs: &[(EntityRef, EntityRef)],
        all_columns: bool,
    ) -> Result<(), PersistError> {
        match self {
            Loader::Entity(p) => p.update(exec, pairs, all_columns),
            Loader::Polymorphic(p) => p.update(exec, pairs, all_columns),
            Loader::Deferred(d) => d.get()?.update(exec, pairs, all_columns),
        }
    }

    /// Writes relation-owned columns on the row of an existing instance.
    pub fn update_columns(
        &self,
        exec: &dyn Executor,
        entity: &EntityRef,
        columns: &ColumnValues,
    ) -> Result<(), PersistError> {
        match self {
            Loader::Entity(p) => p.update_columns(exec, entity, columns),
            Loader::Polymorphic(p) => p.update_columns(exec, entity, columns),
            Loader::Deferred(d) => d.get()?.update_columns(exec, entity, columns),
        }
    }

    pub fn delete(&self, exec: &dyn Executor, entities: &[EntityRef]) -> Result<(), PersistError> {
        match self {
            Loader::Entity(p) => p.delete(exec, entities),
            Loader::Polymorphic(p) => p.delete(exec, entities),
            Loader::Deferred(d) => d.get()?.delete(exec, entities),
        }
    }

    pub fn delete_by_id(&self, exec: &dyn Executor, ids: &[Id]) -> Result<(), PersistError> {
        match self {
            Loader::Entity(p) => p.delete_by_id(exec, ids),
            Loader::Polymorphic(p) => p.delete_by_id(exec, ids),
            Loader::Deferred(d) => d.get()?.delete_by_id(exec, ids),
        }
    }

    pub fn explain(&self) -> String {
        match self {
            Loader::Entity(p) => p.explain(),
            Loader::Polymorphic(p) => p.explain(),
            Loader::Deferred(d) => match d.get() {
                Ok(p) => p.explain(),
                Err(e) => format!("-- {}", e),
            },
        }
    }
}

impl From<EntityPersister> for Loader {
    fn from(persister: EntityPersister) -> Self {
        Loader::Entity(Arc::new(persister))
    }
}

impl From<PolymorphicPersister> for Loader {
    fn from(persister: PolymorphicPersister) -> Self {
        Loader::Polymorphic(Arc::new(persister))
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loader::Entity(_) => write!(f, "Loader::Entity({})", self.name()),
            Loader::Polymorphic(_) => write!(f, "Loader::Polymorphic({})", self.name()),
            Loader::Deferred(d) => write!(
                f,
                "Loader::Deferred({}, bound: {})",
                self.name(),
                d.is_bound()
            ),
        }
    }
}
