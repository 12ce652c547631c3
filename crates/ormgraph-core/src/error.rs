//! Core error types for ormgraph-core.
//!
//! Every variant is a configuration problem detected while a mapping is being
//! declared, before any statement runs.

use thiserror::Error;

/// Errors produced while declaring entity mappings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The mapping has no identifier property.
    #[error("entity '{entity}' declares no identifier property")]
    MissingIdentifier { entity: String },

    /// The same property name was mapped twice.
    #[error("entity '{entity}' maps property '{property}' twice")]
    DuplicateProperty { entity: String, property: String },

    /// Two properties (or a property and a fixed column) share a column.
    #[error("entity '{entity}' maps column '{column}' twice")]
    DuplicateColumn { entity: String, column: String },

    /// A property was referenced that has no matching column.
    #[error("entity '{entity}' has no property '{property}'")]
    UnknownProperty { entity: String, property: String },

    /// Any other structural problem with a mapping.
    #[error("invalid mapping for '{entity}': {reason}")]
    InvalidMapping { entity: String, reason: String },
}
