//! Structural model of a graph query: nodes connected by SQL joins.
//!
//! Relations are registered against a named parent node and get a fresh,
//! stable node name back. Parent names are only resolved when the tree is
//! compiled, so a dangling reference surfaces as a configuration error from
//! [`JoinTree::compile`], never while rows are streaming.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use ormgraph_core::{EntityMapping, EntityRef, RowView};

use crate::error::PersistError;
use crate::join::compile::{compile, CompiledQuery};
use crate::two_phase::LoadContext;

/// SQL join flavour of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Outer,
}

impl JoinKind {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Outer => "LEFT OUTER JOIN",
        }
    }
}

/// Columns of the parent's table (left) matched against columns of the
/// node's own table (right), position by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    left: Vec<String>,
    right: Vec<String>,
}

impl KeyPair {
    pub fn new(left: Vec<String>, right: Vec<String>) -> Self {
        KeyPair { left, right }
    }

    pub fn single(left: impl Into<String>, right: impl Into<String>) -> Self {
        KeyPair {
            left: vec![left.into()],
            right: vec![right.into()],
        }
    }

    pub fn left(&self) -> &[String] {
        &self.left
    }

    pub fn right(&self) -> &[String] {
        &self.right
    }
}

/// Table a node reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    Table(String),
    /// A parenthesised sub-select, e.g. a UNION standing in for a table.
    Subquery(String),
}

impl TableRef {
    pub fn table(name: impl Into<String>) -> Self {
        TableRef::Table(name.into())
    }

    pub(crate) fn sql(&self) -> String {
        match self {
            TableRef::Table(name) => name.clone(),
            TableRef::Subquery(sql) => format!("({})", sql),
        }
    }

    fn name_hint(&self) -> String {
        match self {
            TableRef::Table(name) => sanitize(name),
            TableRef::Subquery(_) => "q".to_string(),
        }
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "t".to_string()
    } else {
        cleaned
    }
}

/// Where a node's columns come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Root,
    Joined { keys: KeyPair, kind: JoinKind },
    /// Extra columns of the parent's own table, read under its alias.
    Inline,
}

type FixFn = dyn Fn(&EntityRef, &EntityRef) + Send + Sync;

/// Wires a child instance onto its parent under one relation name.
#[derive(Clone)]
pub struct RelationFixer {
    relation: Arc<str>,
    fix: Arc<FixFn>,
}

impl RelationFixer {
    /// Single-valued relation: the child replaces whatever was set.
    pub fn to_one(relation: &str) -> Self {
        let name: Arc<str> = Arc::from(relation);
        let key = name.clone();
        RelationFixer {
            relation: name,
            fix: Arc::new(move |parent, child| {
                parent.borrow_mut().set_to_one(key.to_string(), Some(child.clone()));
            }),
        }
    }

    /// Collection relation, deduplicated by instance identity.
    pub fn to_many(relation: &str) -> Self {
        let name: Arc<str> = Arc::from(relation);
        let key = name.clone();
        RelationFixer {
            relation: name,
            fix: Arc::new(move |parent, child| {
                parent.borrow_mut().add_to_many(key.to_string(), child.clone());
            }),
        }
    }

    /// Indexed collection relation: appends, duplicates included.
    pub fn list(relation: &str) -> Self {
        let name: Arc<str> = Arc::from(relation);
        let key = name.clone();
        RelationFixer {
            relation: name,
            fix: Arc::new(move |parent, child| {
                parent.borrow_mut().push_to_many(key.to_string(), child.clone());
            }),
        }
    }

    pub fn custom(
        relation: &str,
        fix: impl Fn(&EntityRef, &EntityRef) + Send + Sync + 'static,
    ) -> Self {
        RelationFixer {
            relation: Arc::from(relation),
            fix: Arc::new(fix),
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn apply(&self, parent: &EntityRef, child: &EntityRef) {
        (self.fix)(parent, child)
    }
}

impl fmt::Debug for RelationFixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelationFixer").field(&self.relation).finish()
    }
}

type MergeFn =
    dyn Fn(&EntityRef, &RowView<'_>, &mut LoadContext) -> Result<(), PersistError> + Send + Sync;

/// Folds a node's columns into the nearest instance above it.
#[derive(Clone)]
pub struct RowMerger(Arc<MergeFn>);

impl RowMerger {
    pub fn new(
        merge: impl Fn(&EntityRef, &RowView<'_>, &mut LoadContext) -> Result<(), PersistError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        RowMerger(Arc::new(merge))
    }

    /// Copies the mapped columns of `mapping` into the instance.
    pub fn properties(mapping: Arc<EntityMapping>) -> Self {
        RowMerger::new(move |instance, row, _| {
            mapping.merge_into(&mut instance.borrow_mut(), row);
            Ok(())
        })
    }

    pub fn apply(
        &self,
        instance: &EntityRef,
        row: &RowView<'_>,
        ctx: &mut LoadContext,
    ) -> Result<(), PersistError> {
        (self.0)(instance, row, ctx)
    }
}

impl fmt::Debug for RowMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowMerger")
    }
}

/// What a node does with its columns while rows are read.
#[derive(Debug, Clone)]
pub enum NodeConsumer {
    /// Builds (or reuses) an instance and wires it to the parent instance.
    Instance {
        mapping: Arc<EntityMapping>,
        fixer: Option<RelationFixer>,
    },
    Merge(RowMerger),
    /// Contributes columns only.
    Passive,
}

/// One join step.
#[derive(Debug, Clone)]
pub struct JoinNode {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) table: TableRef,
    pub(crate) columns: Vec<String>,
    pub(crate) placement: Placement,
    pub(crate) consumer: NodeConsumer,
}

impl JoinNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn consumer(&self) -> &NodeConsumer {
        &self.consumer
    }
}

/// Registered nodes plus the order-by list; compiles into a
/// [`CompiledQuery`].
#[derive(Debug, Clone)]
pub struct JoinTree {
    nodes: IndexMap<String, JoinNode>,
    root: String,
    order_by: Vec<(String, String)>,
    next_suffix: usize,
    compiled: Option<Arc<CompiledQuery>>,
}

impl JoinTree {
    /// Tree whose root builds instances of `mapping`.
    pub fn new(mapping: Arc<EntityMapping>) -> Self {
        let table = TableRef::table(mapping.table());
        let columns = mapping.columns();
        Self::with_root(
            table,
            columns,
            NodeConsumer::Instance {
                mapping,
                fixer: None,
            },
        )
    }

    /// Tree whose root only contributes columns.
    pub fn passive(table: TableRef, columns: Vec<String>) -> Self {
        Self::with_root(table, columns, NodeConsumer::Passive)
    }

    fn with_root(table: TableRef, columns: Vec<String>, consumer: NodeConsumer) -> Self {
        let root = table.name_hint();
        let mut nodes = IndexMap::new();
        nodes.insert(
            root.clone(),
            JoinNode {
                name: root.clone(),
                parent: None,
                table,
                columns,
                placement: Placement::Root,
                consumer,
            },
        );
        JoinTree {
            nodes,
            root,
            order_by: Vec::new(),
            next_suffix: 1,
            compiled: None,
        }
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn node(&self, name: &str) -> Option<&JoinNode> {
        self.nodes.get(name)
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &JoinNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn order_by_entries(&self) -> &[(String, String)] {
        &self.order_by
    }

    fn fresh_name(&mut self, hint: &str) -> String {
        loop {
            let name = format!("{}_{}", hint, self.next_suffix);
            self.next_suffix += 1;
            if !self.nodes.contains_key(&name) {
                return name;
            }
        }
    }

    fn register(
        &mut self,
        parent: &str,
        table: TableRef,
        columns: Vec<String>,
        placement: Placement,
        consumer: NodeConsumer,
    ) -> String {
        let name = self.fresh_name(&table.name_hint());
        let columns = match &placement {
            Placement::Joined { keys, .. } => with_keys(columns, keys),
            _ => columns,
        };
        self.nodes.insert(
            name.clone(),
            JoinNode {
                name: name.clone(),
                parent: Some(parent.to_string()),
                table,
                columns,
                placement,
                consumer,
            },
        );
        self.compiled = None;
        name
    }

    /// Joins a table whose rows build child instances wired by `fixer`.
    pub fn add_relation_join(
        &mut self,
        parent: &str,
        mapping: Arc<EntityMapping>,
        keys: KeyPair,
        kind: JoinKind,
        fixer: RelationFixer,
    ) -> String {
        let table = TableRef::table(mapping.table());
        let columns = mapping.columns();
        self.register(
            parent,
            table,
            columns,
            Placement::Joined { keys, kind },
            NodeConsumer::Instance {
                mapping,
                fixer: Some(fixer),
            },
        )
    }

    /// Joins a table whose columns are folded into the current instance.
    pub fn add_merge_join(
        &mut self,
        parent: &str,
        table: TableRef,
        columns: Vec<String>,
        keys: KeyPair,
        kind: JoinKind,
        merger: RowMerger,
    ) -> String {
        self.register(
            parent,
            table,
            columns,
            Placement::Joined { keys, kind },
            NodeConsumer::Merge(merger),
        )
    }

    /// Joins a table that only contributes (key) columns.
    pub fn add_passive_join(
        &mut self,
        parent: &str,
        table: TableRef,
        columns: Vec<String>,
        keys: KeyPair,
        kind: JoinKind,
    ) -> String {
        self.register(
            parent,
            table,
            columns,
            Placement::Joined { keys, kind },
            NodeConsumer::Passive,
        )
    }

    /// Reads extra columns of the parent's own table and merges them.
    pub fn add_inline_merge(
        &mut self,
        parent: &str,
        columns: Vec<String>,
        merger: RowMerger,
    ) -> String {
        let table = self
            .nodes
            .get(parent)
            .map(|p| p.table.clone())
            .unwrap_or_else(|| TableRef::table(parent));
        self.register(
            parent,
            table,
            columns,
            Placement::Inline,
            NodeConsumer::Merge(merger),
        )
    }

    /// Copies `subtree` under `parent`, its root joined with `keys` and wired
    /// by `fixer`; `extra_columns` are added to the grafted root. Node names
    /// are re-issued, the subtree's order-by entries follow them. Under an
    /// outer graft every join of the subtree becomes outer. Returns the
    /// grafted root's name.
    pub fn graft(
        &mut self,
        parent: &str,
        subtree: &JoinTree,
        keys: KeyPair,
        kind: JoinKind,
        fixer: RelationFixer,
        extra_columns: Vec<String>,
    ) -> String {
        let mut renamed: IndexMap<String, String> = IndexMap::new();
        for node in subtree.nodes.values() {
            let name = self.fresh_name(&node.table.name_hint());
            renamed.insert(node.name.clone(), name);
        }
        let mut grafted_root = String::new();
        for node in subtree.nodes.values() {
            let name = renamed[&node.name].clone();
            let mut copy = node.clone();
            copy.name = name.clone();
            if node.name == subtree.root {
                grafted_root = name.clone();
                copy.parent = Some(parent.to_string());
                let mut columns = copy.columns;
                for extra in &extra_columns {
                    if !columns.contains(extra) {
                        columns.push(extra.clone());
                    }
                }
                copy.columns = with_keys(columns, &keys);
                copy.placement = Placement::Joined {
                    keys: keys.clone(),
                    kind,
                };
                if let NodeConsumer::Instance { mapping, .. } = copy.consumer {
                    copy.consumer = NodeConsumer::Instance {
                        mapping,
                        fixer: Some(fixer.clone()),
                    };
                }
            } else {
                copy.parent = node
                    .parent
                    .as_ref()
                    .map(|p| renamed.get(p).cloned().unwrap_or_else(|| p.clone()));
                // an absent grafted root must not drop the parent's row
                if let (JoinKind::Outer, Placement::Joined { kind: inner, .. }) =
                    (kind, &mut copy.placement)
                {
                    *inner = JoinKind::Outer;
                }
            }
            self.nodes.insert(name, copy);
        }
        for (node, column) in &subtree.order_by {
            let node = renamed.get(node).cloned().unwrap_or_else(|| node.clone());
            self.order_by.push((node, column.clone()));
        }
        self.compiled = None;
        grafted_root
    }

    /// Orders the result by `column` of `node`.
    pub fn order_by(&mut self, node: &str, column: &str) {
        self.order_by.push((node.to_string(), column.to_string()));
        self.compiled = None;
    }

    /// Compiles the tree, reusing the previous artifact when nothing was
    /// registered since.
    pub fn compile(&mut self) -> Result<Arc<CompiledQuery>, PersistError> {
        if let Some(compiled) = &self.compiled {
            return Ok(compiled.clone());
        }
        let compiled = Arc::new(compile(self)?);
        self.compiled = Some(compiled.clone());
        Ok(compiled)
    }
}

/// Contributed columns extended with the node's right-key columns.
fn with_keys(mut columns: Vec<String>, keys: &KeyPair) -> Vec<String> {
    for key in &keys.right {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns
}
