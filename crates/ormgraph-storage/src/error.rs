//! Persistence error types for ormgraph-storage.
//!
//! [`PersistError`] separates three families of failures:
//! - configuration problems (unknown join node, bad relation or mapping),
//!   raised while persisters are built or before a statement runs;
//! - execution failures, carrying the failing statement text;
//! - consistency violations found in the data itself.

use thiserror::Error;

use ormgraph_core::CoreError;

/// Boxed backend error carried by [`PersistError::Execution`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    /// An entity mapping is invalid.
    #[error("mapping error: {0}")]
    Mapping(#[from] CoreError),

    /// A join node name was referenced that the tree does not contain.
    #[error("unknown join node '{0}'")]
    UnknownNode(String),

    /// Any other invalid persister, relation or join tree configuration.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// An instance kind has no persister in a polymorphic hierarchy.
    #[error("unknown subtype '{kind}' in hierarchy '{hierarchy}'")]
    UnknownSubtype { hierarchy: String, kind: String },

    /// A statement failed in the backend.
    #[error("statement failed: {sql}: {source}")]
    Execution {
        sql: String,
        #[source]
        source: BoxError,
    },

    /// A write touched an unexpected number of rows.
    #[error("expected {expected} row(s) affected but got {actual}: {sql}")]
    RowCount {
        sql: String,
        expected: usize,
        actual: usize,
    },

    /// Stored data violates an invariant of the mapping.
    #[error("consistency violation: {reason}")]
    Consistency { reason: String },

    /// An instance that must carry an identifier has none.
    #[error("instance of '{entity}' has no identifier")]
    MissingIdentifier { entity: String },

    /// An update pair holds two different instances.
    #[error("update pair of '{entity}' mixes identifiers {original} and {replacement}")]
    IdentifierMismatch {
        entity: String,
        original: String,
        replacement: String,
    },

    /// A schema file could not be parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        PersistError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn consistency(reason: impl Into<String>) -> Self {
        PersistError::Consistency {
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(sql: &str, source: impl Into<BoxError>) -> Self {
        PersistError::Execution {
            sql: sql.to_string(),
            source: source.into(),
        }
    }

    /// True for errors detected from configuration alone.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PersistError::Mapping(_)
                | PersistError::UnknownNode(_)
                | PersistError::Configuration { .. }
                | PersistError::UnknownSubtype { .. }
                | PersistError::Serialization(_)
        )
    }
}
