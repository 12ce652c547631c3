//! Shared fixtures for the storage integration tests.

#![allow(dead_code)]

use std::cell::Cell;

use ormgraph_core::{Entity, EntityRef, Value};
use ormgraph_storage::executor::{collect_rows, RowConsumer};
use ormgraph_storage::{Executor, PersistError, Registry, SqliteExecutor, Statement};

pub const LIBRARY_DDL: &str = "
    CREATE TABLE publisher (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE author (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE book (
        id INTEGER PRIMARY KEY,
        title TEXT,
        author_id INTEGER REFERENCES author (id),
        position INTEGER,
        publisher_id INTEGER REFERENCES publisher (id)
    );
    CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT);
    CREATE TABLE book_tag (
        book_id INTEGER NOT NULL REFERENCES book (id),
        tag_id INTEGER NOT NULL REFERENCES tag (id),
        position INTEGER
    );
";

/// Library schema; `orphan_removal` applies to `Author.books`.
pub fn library_schema(orphan_removal: bool) -> String {
    format!(
        r#"{{
        "entities": [
            {{"name": "Publisher", "table": "publisher", "id": ["id"], "properties": ["name"]}},
            {{"name": "Tag", "table": "tag", "id": ["id"], "properties": ["label"]}},
            {{"name": "Book", "table": "book", "id": ["id"], "properties": ["title"],
              "relations": [
                {{"name": "publisher", "target": "Publisher", "cardinality": "one",
                  "storage": {{"kind": "source_columns", "columns": ["publisher_id"]}},
                  "fetch": "join"}},
                {{"name": "tags", "target": "Tag", "cardinality": "many",
                  "storage": {{"kind": "association", "table": "book_tag",
                              "source_columns": ["book_id"], "target_columns": ["tag_id"],
                              "index": "position"}},
                  "fetch": "two_phase"}}
              ]}},
            {{"name": "Author", "table": "author", "id": ["id"], "properties": ["name"],
              "relations": [
                {{"name": "books", "target": "Book", "cardinality": "many",
                  "storage": {{"kind": "target_columns", "columns": ["author_id"], "index": "position"}},
                  "fetch": "join",
                  "cascade": {{"orphan_removal": {orphan_removal}}}}}
              ]}}
        ]
    }}"#
    )
}

pub fn library(orphan_removal: bool) -> (Registry, CountingExecutor) {
    let registry = Registry::from_json(&library_schema(orphan_removal)).unwrap();
    let exec = CountingExecutor::new(LIBRARY_DDL);
    (registry, exec)
}

/// SQLite executor counting the statements it runs.
pub struct CountingExecutor {
    pub inner: SqliteExecutor,
    queries: Cell<usize>,
    executes: Cell<usize>,
}

impl CountingExecutor {
    pub fn new(ddl: &str) -> Self {
        let inner = SqliteExecutor::in_memory().unwrap();
        inner.execute_batch(ddl).unwrap();
        CountingExecutor {
            inner,
            queries: Cell::new(0),
            executes: Cell::new(0),
        }
    }

    /// Fixture SQL, not counted.
    pub fn run(&self, sql: &str) {
        self.inner.execute_batch(sql).unwrap();
    }

    /// Rows of an ad-hoc query, not counted.
    pub fn rows(&self, sql: &str) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        self.inner
            .query(&Statement::new(sql, vec![]), &mut |cursor| {
                out = collect_rows(cursor)?
                    .into_iter()
                    .map(|r| r.values().to_vec())
                    .collect();
                Ok(())
            })
            .unwrap();
        out
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

pub fn publisher(id: i64, name: &str) -> EntityRef {
    Entity::new("Publisher").with("id", id).with("name", name).into()
}

pub fn tag(id: i64, label: &str) -> EntityRef {
    Entity::new("Tag").with("id", id).with("label", label).into()
}

pub fn book(id: i64, title: &str, publisher: &EntityRef, tags: Vec<EntityRef>) -> EntityRef {
    Entity::new("Book")
        .with("id", id)
        .with("title", title)
        .with_one("publisher", publisher.clone())
        .with_many("tags", tags)
        .into()
}

pub fn author(id: i64, name: &str, books: Vec<EntityRef>) -> EntityRef {
    Entity::new("Author")
        .with("id", id)
        .with("name", name)
        .with_many("books", books)
        .into()
}
