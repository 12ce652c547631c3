//! Core data model for ormgraph.
//!
//! - [`value`]: column values
//! - [`id`]: assembled (possibly composite) identifiers
//! - [`row`]: result rows and per-node column lookup
//! - [`entity`]: dynamic instances and shared handles
//! - [`mapping`]: explicit property-to-column tables
//! - [`error`]: CoreError

pub mod entity;
pub mod error;
pub mod id;
pub mod mapping;
pub mod row;
pub mod value;

// Re-export commonly used types
pub use entity::{Entity, EntityRef, Related};
pub use error::CoreError;
pub use id::Id;
pub use mapping::{ColumnValues, EntityMapping, EntityMappingBuilder, PropertyMapping};
pub use row::{ColumnIndex, Row, RowView};
pub use value::Value;
