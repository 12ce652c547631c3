//! Graph persistence for ormgraph entities over SQL datastores.
//!
//! Loads a root entity together with the graph reachable through its
//! relations, and writes such graphs back by diffing them against a
//! previously loaded state.
//!
//! # Architecture
//!
//! Reads have two strategies per relation:
//! - **Join fetch**: the relation is a node of the owner's join tree; one
//!   statement returns the whole subgraph and the inflater rebuilds it,
//!   sharing one instance per (node, id).
//! - **Two-phase fetch**: the owner's query only collects target keys (and,
//!   for a hierarchy, the columns naming each key's subtype); the targets
//!   are loaded afterwards with one batch per target persister. Relations
//!   closing a cycle of declarations are fetched this way.
//!
//! Writes cascade through relations: collections are diffed by id, then held
//! targets are updated, removed ones deleted or detached, added ones inserted
//! or linked.
//!
//! # Modules
//!
//! - [`join`]: JoinTree and its compilation to a CompiledQuery
//! - [`inflate`]: row-to-graph inflation with identity dedup
//! - [`two_phase`]: LoadContext and batched completion of two-phase relations
//! - [`diff`] / [`update`]: collection differ and relation writes
//! - [`persister`]: EntityPersister, one entity kind
//! - [`polymorphic`]: PolymorphicPersister and its subtype resolvers
//! - [`loader`]: the Loader variant over both persisters
//! - [`executor`] / [`sqlite`] / [`cache`]: statement execution
//! - [`schema`]: JSON schema files and the loader Registry

pub mod cache;
pub mod config;
pub mod criteria;
pub mod diff;
mod dml;
pub mod error;
pub mod executor;
pub mod inflate;
pub mod join;
pub mod loader;
pub mod persister;
pub mod polymorphic;
pub mod relation;
pub mod schema;
pub mod sqlite;
pub mod two_phase;
pub mod update;

#[cfg(test)]
mod test_support;

// Re-export key types for ergonomic use.
pub use cache::{with_read_cache, CachingExecutor};
pub use config::PersistenceConfig;
pub use criteria::Criteria;
pub use diff::{diff_list, diff_set, Diff, IndexedDiff};
pub use error::PersistError;
pub use executor::{Executor, RowConsumer, RowCursor, Statement};
pub use join::{CompiledQuery, JoinKind, JoinTree, KeyPair, RelationFixer, RowMerger, TableRef};
pub use loader::{DeferredLoader, Loader};
pub use persister::{EntityPersister, EntityPersisterBuilder};
pub use polymorphic::{PolymorphicPersister, SubtypeResolver};
pub use relation::{Cardinality, Cascade, FetchMode, RelationMapping, RelationStorage};
pub use schema::{Registry, SchemaDef};
pub use sqlite::SqliteExecutor;
pub use two_phase::{LoadContext, RelationIds};
pub use update::UpdateContext;
