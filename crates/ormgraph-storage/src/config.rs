//! Engine-wide persistence settings.
//!
//! Read from a schema file's `config` section or from the environment:
//! - `ORMGRAPH_IN_OPERATOR_MAX_SIZE`: ids per `IN (...)` list (default 100)
//! - `ORMGRAPH_CHECK_ROW_COUNTS`: verify affected rows on update/delete
//!   (default true)

use serde::{Deserialize, Serialize};

/// Settings shared by the persisters of one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Maximum number of ids bound in one `IN (...)` list; larger id sets are
    /// split into several statements.
    pub in_operator_max_size: usize,
    /// Whether update and delete statements must touch exactly the expected
    /// number of rows.
    pub check_row_counts: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            in_operator_max_size: 100,
            check_row_counts: true,
        }
    }
}

impl PersistenceConfig {
    /// Defaults overridden by `ORMGRAPH_*` environment variables. Unparsable
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut config = PersistenceConfig::default();
        if let Some(size) = std::env::var("ORMGRAPH_IN_OPERATOR_MAX_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|size| *size > 0)
        {
            config.in_operator_max_size = size;
        }
        if let Some(check) = std::env::var("ORMGRAPH_CHECK_ROW_COUNTS")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
        {
            config.check_row_counts = check;
        }
        config
    }

    /// Chunk size actually used for id lists (never zero).
    pub(crate) fn chunk_size(&self) -> usize {
        self.in_operator_max_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PersistenceConfig =
            serde_json::from_str(r#"{"in_operator_max_size": 2}"#).unwrap();
        assert_eq!(config.in_operator_max_size, 2);
        assert!(config.check_row_counts);
    }

    #[test]
    fn chunk_size_is_never_zero() {
        let config = PersistenceConfig {
            in_operator_max_size: 0,
            check_row_counts: true,
        };
        assert_eq!(config.chunk_size(), 1);
    }
}
