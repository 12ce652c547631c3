//! Rebuilds an instance graph from the flat rows of a compiled query.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::trace;

use ormgraph_core::{EntityRef, Id, Row, RowView};

use crate::error::PersistError;
use crate::executor::RowCursor;
use crate::join::{CompiledQuery, NodeConsumer};
use crate::two_phase::LoadContext;

/// Inflation state of one load call. Feed it every chunk of the call so that
/// instances are shared across chunks.
pub struct Inflater<'q> {
    query: &'q CompiledQuery,
    identities: HashMap<(usize, Id), EntityRef>,
    edges: HashSet<(usize, Id, Id)>,
    roots: Vec<EntityRef>,
    current: Vec<Option<(EntityRef, Id)>>,
}

impl<'q> Inflater<'q> {
    pub fn new(query: &'q CompiledQuery) -> Self {
        Inflater {
            query,
            identities: HashMap::new(),
            edges: HashSet::new(),
            roots: Vec::new(),
            current: Vec::new(),
        }
    }

    /// Drains `cursor`, returning the number of rows read.
    pub fn consume(
        &mut self,
        cursor: &mut dyn RowCursor,
        ctx: &mut LoadContext,
    ) -> Result<usize, PersistError> {
        let mut rows = 0;
        while let Some(row) = cursor.next_row()? {
            self.inflate_row(row, ctx)?;
            rows += 1;
        }
        trace!(rows, instances = self.identities.len(), "inflated");
        Ok(rows)
    }

    fn inflate_row(&mut self, row: &Row, ctx: &mut LoadContext) -> Result<(), PersistError> {
        let query = self.query;
        let nodes = query.nodes();
        self.current.clear();
        self.current.resize(nodes.len(), None);

        for (i, node) in nodes.iter().enumerate() {
            let view = RowView::new(row, &node.columns);
            let parent = match node.parent {
                Some(p) => match &self.current[p] {
                    Some(found) => Some(found.clone()),
                    // Absent parent: the whole subtree is absent for this row.
                    None => continue,
                },
                None => None,
            };

            match &node.consumer {
                NodeConsumer::Instance { mapping, fixer } => {
                    let Some(id) = mapping.read_id(&view) else {
                        continue;
                    };
                    let instance = match self.identities.entry((i, id.clone())) {
                        Entry::Occupied(found) => found.get().clone(),
                        Entry::Vacant(slot) => {
                            let mut entity = mapping.construct(&view);
                            entity.mark_persisted(true);
                            let instance = slot.insert(EntityRef::new(entity)).clone();
                            if parent.is_none() {
                                self.roots.push(instance.clone());
                            }
                            instance
                        }
                    };
                    if let (Some((owner, owner_id)), Some(fixer)) = (&parent, fixer) {
                        if self.edges.insert((i, owner_id.clone(), id.clone())) {
                            fixer.apply(owner, &instance);
                        }
                    }
                    self.current[i] = Some((instance, id));
                }
                NodeConsumer::Merge(merger) => {
                    if let Some((owner, _)) = &parent {
                        merger.apply(owner, &view, ctx)?;
                    }
                    self.current[i] = parent;
                }
                NodeConsumer::Passive => self.current[i] = parent,
            }
        }
        Ok(())
    }

    /// Distinct root instances in first-seen order.
    pub fn finish(self) -> Vec<EntityRef> {
        self.roots
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ormgraph_core::{EntityMapping, Value};

    use super::*;
    use crate::executor::BufferedCursor;
    use crate::join::{JoinKind, JoinTree, KeyPair, RelationFixer};

    fn tree() -> JoinTree {
        let author = Arc::new(
            EntityMapping::builder("Author", "author")
                .id("id", "id")
                .property("name", "name")
                .build()
                .unwrap(),
        );
        let book = Arc::new(
            EntityMapping::builder("Book", "book")
                .id("id", "id")
                .property("title", "title")
                .build()
                .unwrap(),
        );
        let publisher = Arc::new(
            EntityMapping::builder("Publisher", "publisher")
                .id("id", "id")
                .build()
                .unwrap(),
        );
        let mut tree = JoinTree::new(author);
        let books = tree.add_relation_join(
            "author",
            book,
            KeyPair::single("id", "author_id"),
            JoinKind::Outer,
            RelationFixer::to_many("books"),
        );
        tree.add_relation_join(
            &books,
            publisher,
            KeyPair::single("publisher_id", "id"),
            JoinKind::Outer,
            RelationFixer::to_one("publisher"),
        );
        tree
    }

    // author.id, author.name, book.id, book.title, book.author_id,
    // publisher.id
    fn row(a: i64, b: Option<i64>, p: Option<i64>) -> Row {
        Row::new(vec![
            Value::from(a),
            Value::from(format!("a{a}")),
            Value::from(b),
            Value::from(b.map(|b| format!("b{b}"))),
            Value::from(b.map(|_| a)),
            Value::from(p),
        ])
    }

    fn inflate(rows: &[Row]) -> Vec<EntityRef> {
        let mut tree = tree();
        let query = tree.compile().unwrap();
        let mut inflater = Inflater::new(&query);
        let mut ctx = LoadContext::new();
        inflater
            .consume(&mut BufferedCursor::new(rows), &mut ctx)
            .unwrap();
        inflater.finish()
    }

    #[test]
    fn shared_instances_are_built_once() {
        let roots = inflate(&[
            row(1, Some(10), Some(7)),
            row(1, Some(11), Some(7)),
            row(2, Some(10), Some(7)),
        ]);
        assert_eq!(roots.len(), 2);
        let books = roots[0].to_many("books");
        assert_eq!(books.len(), 2);
        assert!(books[0].ptr_eq(&roots[1].to_many("books")[0]));
        let p1 = books[0].to_one("publisher").unwrap();
        let p2 = books[1].to_one("publisher").unwrap();
        assert!(p1.ptr_eq(&p2));
        assert!(roots[0].is_persisted() && p1.is_persisted());
    }

    #[test]
    fn null_child_id_skips_node_and_subtree() {
        let roots = inflate(&[row(1, None, Some(7))]);
        assert_eq!(roots.len(), 1);
        assert!(roots[0].borrow().relation("books").is_none());
    }

    #[test]
    fn repeated_rows_call_fixer_once() {
        let roots = inflate(&[row(1, Some(10), None), row(1, Some(10), None)]);
        assert_eq!(roots[0].to_many("books").len(), 1);
        assert!(roots[0].to_many("books")[0].to_one("publisher").is_none());
    }

    #[test]
    fn roots_keep_first_seen_order() {
        let roots = inflate(&[row(3, None, None), row(1, None, None), row(3, None, None)]);
        let ids: Vec<_> = roots.iter().map(|r| r.get("id")).collect();
        assert_eq!(ids, vec![Value::from(3), Value::from(1)]);
    }
}
