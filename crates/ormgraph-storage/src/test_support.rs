//! Fixtures shared by the unit tests.

use std::cell::Cell;
use std::sync::Arc;

use ormgraph_core::EntityMapping;

use crate::config::PersistenceConfig;
use crate::error::PersistError;
use crate::executor::{Executor, RowConsumer, Statement};
use crate::persister::EntityPersister;
use crate::polymorphic::PolymorphicPersister;
use crate::schema::Registry;
use crate::sqlite::SqliteExecutor;

pub(crate) const DDL: &str = "
    CREATE TABLE author (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE book (
        id INTEGER PRIMARY KEY,
        title TEXT,
        author_id INTEGER REFERENCES author (id),
        position INTEGER
    );
    CREATE TABLE animal (
        id INTEGER PRIMARY KEY,
        name TEXT,
        kind INTEGER,
        lives INTEGER,
        bark TEXT
    );
";

/// SQLite executor counting the statements it runs.
pub(crate) struct CountingExecutor {
    inner: SqliteExecutor,
    queries: Cell<usize>,
    executes: Cell<usize>,
}

impl CountingExecutor {
    pub fn seeded() -> Self {
        let inner = SqliteExecutor::in_memory().unwrap();
        inner.execute_batch(DDL).unwrap();
        CountingExecutor {
            inner,
            queries: Cell::new(0),
            executes: Cell::new(0),
        }
    }

    /// Runs fixture SQL without counting it.
    pub fn run(&self, sql: &str) {
        self.inner.execute_batch(sql).unwrap();
    }

    pub fn queries(&self) -> usize {
        self.queries.get()
    }

    pub fn executes(&self) -> usize {
        self.executes.get()
    }
}

impl Executor for CountingExecutor {
    fn query(
        &self,
        statement: &Statement,
        consume: &mut RowConsumer<'_>,
    ) -> Result<(), PersistError> {
        self.queries.set(self.queries.get() + 1);
        self.inner.query(statement, consume)
    }

    fn execute(&self, statement: &Statement) -> Result<usize, PersistError> {
        self.executes.set(self.executes.get() + 1);
        self.inner.execute(statement)
    }
}

const AUTHOR_BOOK: &str = r#"{
    "entities": [
        {"name": "Book", "table": "book", "id": ["id"], "properties": ["title"]},
        {"name": "Author", "table": "author", "id": ["id"], "properties": ["name"],
         "relations": [{"name": "books", "target": "Book", "cardinality": "many",
                        "storage": {"kind": "target_columns", "columns": ["author_id"]}}]}
    ]
}"#;

pub(crate) fn author_book_schema() -> Registry {
    Registry::from_json(AUTHOR_BOOK).unwrap()
}

pub(crate) fn author_book_schema_with(config: PersistenceConfig) -> Registry {
    let mut def: crate::schema::SchemaDef = serde_json::from_str(AUTHOR_BOOK).unwrap();
    def.config = config;
    Registry::build(&def).unwrap()
}

pub(crate) fn animal_single_table() -> PolymorphicPersister {
    let cat = EntityMapping::builder("Cat", "animal")
        .id("id", "id")
        .property("name", "name")
        .property("lives", "lives")
        .fixed_column("kind", 1)
        .build()
        .unwrap();
    let dog = EntityMapping::builder("Dog", "animal")
        .id("id", "id")
        .property("name", "name")
        .property("bark", "bark")
        .fixed_column("kind", 2)
        .build()
        .unwrap();
    PolymorphicPersister::single_table(
        "Animal",
        "kind",
        vec![
            Arc::new(EntityPersister::new(cat).unwrap()),
            Arc::new(EntityPersister::new(dog).unwrap()),
        ],
    )
    .unwrap()
}
