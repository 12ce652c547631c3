//! Relation mappings between persisters.

use serde::{Deserialize, Serialize};

use crate::error::PersistError;
use crate::join::RelationFixer;
use crate::loader::Loader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// How related instances are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Joined into the owner's query.
    Join,
    /// Keys collected with the owner, targets batch-loaded afterwards.
    #[default]
    TwoPhase,
}

/// Where the link between owner and target is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationStorage {
    /// Foreign key columns on the owner's table referencing the target id.
    SourceColumns { columns: Vec<String> },
    /// Foreign key columns on the target's table referencing the owner id,
    /// with an optional position column for ordered collections.
    TargetColumns {
        columns: Vec<String>,
        #[serde(default)]
        index: Option<String>,
    },
    /// A link table.
    Association {
        table: String,
        source_columns: Vec<String>,
        target_columns: Vec<String>,
        #[serde(default)]
        index: Option<String>,
    },
}

impl RelationStorage {
    pub fn index_column(&self) -> Option<&str> {
        match self {
            RelationStorage::SourceColumns { .. } => None,
            RelationStorage::TargetColumns { index, .. }
            | RelationStorage::Association { index, .. } => index.as_deref(),
        }
    }
}

/// Which writes propagate from the owner to its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cascade {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
    /// Targets dropped from the relation are deleted instead of detached.
    pub orphan_removal: bool,
}

impl Default for Cascade {
    fn default() -> Self {
        Cascade {
            insert: true,
            update: true,
            delete: true,
            orphan_removal: false,
        }
    }
}

impl Cascade {
    pub fn none() -> Self {
        Cascade {
            insert: false,
            update: false,
            delete: false,
            orphan_removal: false,
        }
    }
}

/// A named relation from an owner persister to a target loader.
#[derive(Debug, Clone)]
pub struct RelationMapping {
    name: String,
    target: Loader,
    cardinality: Cardinality,
    storage: RelationStorage,
    fetch: FetchMode,
    cascade: Cascade,
}

impl RelationMapping {
    pub fn new(
        name: impl Into<String>,
        target: Loader,
        cardinality: Cardinality,
        storage: RelationStorage,
    ) -> Self {
        RelationMapping {
            name: name.into(),
            target,
            cardinality,
            storage,
            fetch: FetchMode::default(),
            cascade: Cascade::default(),
        }
    }

    /// Single target, foreign key on the owner.
    pub fn to_one(name: impl Into<String>, target: Loader, columns: Vec<String>) -> Self {
        Self::new(
            name,
            target,
            Cardinality::One,
            RelationStorage::SourceColumns { columns },
        )
    }

    /// Collection, foreign key on the targets.
    pub fn one_to_many(
        name: impl Into<String>,
        target: Loader,
        columns: Vec<String>,
        index: Option<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            Cardinality::Many,
            RelationStorage::TargetColumns { columns, index },
        )
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Loader {
        &self.target
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn storage(&self) -> &RelationStorage {
        &self.storage
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch
    }

    pub fn cascade_rules(&self) -> Cascade {
        self.cascade
    }

    pub fn is_indexed(&self) -> bool {
        self.storage.index_column().is_some()
    }

    pub(crate) fn fixer(&self) -> RelationFixer {
        match (self.cardinality, self.is_indexed()) {
            (Cardinality::One, _) => RelationFixer::to_one(&self.name),
            (Cardinality::Many, true) => RelationFixer::list(&self.name),
            (Cardinality::Many, false) => RelationFixer::to_many(&self.name),
        }
    }

    /// Checks the relation against the owner's id columns.
    pub(crate) fn validate(&self, owner: &str, owner_id_columns: &[String]) -> Result<(), PersistError> {
        let target_id_columns = self.target.id_columns();
        let fail = |reason: String| {
            Err(PersistError::configuration(format!(
                "relation '{}.{}': {}",
                owner, self.name, reason
            )))
        };
        match &self.storage {
            RelationStorage::SourceColumns { columns } => {
                if self.cardinality == Cardinality::Many {
                    return fail("a collection cannot keep its foreign key on the owner".into());
                }
                if columns.len() != target_id_columns.len() {
                    return fail(format!(
                        "{} foreign key column(s) for a {}-column target id",
                        columns.len(),
                        target_id_columns.len()
                    ));
                }
            }
            RelationStorage::TargetColumns { columns, .. } => {
                if columns.len() != owner_id_columns.len() {
                    return fail(format!(
                        "{} foreign key column(s) for a {}-column owner id",
                        columns.len(),
                        owner_id_columns.len()
                    ));
                }
            }
            RelationStorage::Association {
                source_columns,
                target_columns,
                ..
            } => {
                if source_columns.len() != owner_id_columns.len()
                    || target_columns.len() != target_id_columns.len()
                {
                    return fail("link table columns do not match the ids they reference".into());
                }
            }
        }
        if self.cardinality == Cardinality::One && self.is_indexed() {
            return fail("a single-valued relation cannot be indexed".into());
        }
        if self.fetch == FetchMode::Join && matches!(self.target, Loader::Polymorphic(_)) {
            return fail("a polymorphic target can only be fetched in two phases".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_deserializes_from_tagged_json() {
        let storage: RelationStorage = serde_json::from_str(
            r#"{"kind": "association", "table": "author_book",
                "source_columns": ["author_id"], "target_columns": ["book_id"]}"#,
        )
        .unwrap();
        assert_eq!(storage.index_column(), None);
        let storage: RelationStorage = serde_json::from_str(
            r#"{"kind": "target_columns", "columns": ["author_id"], "index": "position"}"#,
        )
        .unwrap();
        assert_eq!(storage.index_column(), Some("position"));
    }

    #[test]
    fn cascade_defaults_keep_orphans() {
        let cascade: Cascade = serde_json::from_str(r#"{"delete": false}"#).unwrap();
        assert!(cascade.insert && cascade.update);
        assert!(!cascade.delete && !cascade.orphan_removal);
    }
}
