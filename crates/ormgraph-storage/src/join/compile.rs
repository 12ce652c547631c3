//! Join tree compilation.
//!
//! Compilation validates the tree, walks it depth first from the root in
//! registration order and produces the select list, join clauses and
//! per-node column indices. The walk order is also the order in which the
//! inflater visits nodes for every row.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use ormgraph_core::{ColumnIndex, Value};

use crate::error::PersistError;
use crate::executor::Statement;
use crate::join::tree::{JoinKind, JoinTree, NodeConsumer, Placement, TableRef};

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub table_alias: String,
    pub column: String,
    pub alias: String,
}

/// One rendered join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub alias: String,
    /// Qualified (left, right) column pairs.
    pub on: Vec<(String, String)>,
}

/// A node as the inflater sees it.
#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub(crate) name: String,
    pub(crate) parent: Option<usize>,
    pub(crate) alias: String,
    pub(crate) consumer: NodeConsumer,
    pub(crate) columns: ColumnIndex,
}

impl CompiledNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }
}

/// Immutable result of compiling a [`JoinTree`]; shared between loads.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    columns: Vec<SelectColumn>,
    root_table: TableRef,
    root_alias: String,
    joins: Vec<JoinClause>,
    order_by: Vec<String>,
    nodes: Vec<CompiledNode>,
    positions: HashMap<String, usize>,
    sql: String,
}

impl CompiledQuery {
    /// The select statement without WHERE or ORDER BY.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    pub fn root_table(&self) -> &TableRef {
        &self.root_table
    }

    pub fn columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    /// Nodes in traversal order; a parent always precedes its children.
    pub fn nodes(&self) -> &[CompiledNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&CompiledNode> {
        self.positions.get(name).map(|&i| &self.nodes[i])
    }

    /// Row position of `column` as selected by `node`.
    pub fn position(&self, node: &str, column: &str) -> Option<usize> {
        self.node(node).and_then(|n| n.columns.position(column))
    }

    /// Full statement for an optional WHERE body.
    pub fn statement(&self, filter: Option<(String, Vec<Value>)>) -> Statement {
        let mut sql = self.sql.clone();
        let mut params = Vec::new();
        if let Some((condition, values)) = filter {
            if !condition.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&condition);
                params = values;
            }
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        Statement::new(sql, params)
    }
}

pub(crate) fn compile(tree: &JoinTree) -> Result<CompiledQuery, PersistError> {
    let root = tree.root_name();
    if tree.node(root).is_none() {
        return Err(PersistError::UnknownNode(root.to_string()));
    }

    for node in tree.nodes() {
        match (node.parent(), node.placement()) {
            (None, Placement::Root) if node.name() == root => {}
            (None, _) | (Some(_), Placement::Root) => {
                return Err(PersistError::configuration(format!(
                    "join node '{}' must hang below the root",
                    node.name()
                )))
            }
            (Some(parent), _) if tree.node(parent).is_none() => {
                return Err(PersistError::UnknownNode(parent.to_string()))
            }
            _ => {}
        }
        if let Placement::Joined { keys, .. } = node.placement() {
            if keys.left().is_empty() || keys.left().len() != keys.right().len() {
                return Err(PersistError::configuration(format!(
                    "join node '{}' has {} left and {} right key columns",
                    node.name(),
                    keys.left().len(),
                    keys.right().len()
                )));
            }
        }
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for node in tree.nodes() {
        indices.insert(node.name(), graph.add_node(node.name()));
    }
    for node in tree.nodes() {
        if let Some(parent) = node.parent() {
            graph.add_edge(indices[parent], indices[node.name()], ());
        }
    }
    toposort(&graph, None).map_err(|cycle| {
        PersistError::configuration(format!(
            "join tree has a cycle through '{}'",
            graph[cycle.node_id()]
        ))
    })?;

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in tree.nodes() {
        if let Some(parent) = node.parent() {
            children.entry(parent).or_default().push(node.name());
        }
    }
    let mut order = Vec::with_capacity(tree.len());
    let mut stack = vec![root];
    while let Some(name) = stack.pop() {
        order.push(name);
        if let Some(below) = children.get(name) {
            stack.extend(below.iter().rev());
        }
    }

    let mut columns = Vec::new();
    let mut used_aliases = HashSet::new();
    let mut joins = Vec::new();
    let mut nodes: Vec<CompiledNode> = Vec::with_capacity(order.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut root_table = TableRef::table(root);

    for name in order {
        let Some(node) = tree.node(name) else {
            return Err(PersistError::UnknownNode(name.to_string()));
        };
        let parent = node.parent().map(|p| positions[p]);
        let alias = match (node.placement(), parent) {
            (Placement::Inline, Some(p)) => nodes[p].alias.clone(),
            _ => node.name().to_string(),
        };

        let mut index = ColumnIndex::new();
        for column in node.columns() {
            if index.contains(column) {
                continue;
            }
            let column_alias = unique_alias(&format!("{}_{}", alias, column), &mut used_aliases);
            columns.push(SelectColumn {
                table_alias: alias.clone(),
                column: column.clone(),
                alias: column_alias,
            });
            index.insert(column.clone(), columns.len() - 1);
        }

        match (node.placement(), parent) {
            (Placement::Root, _) => root_table = node.table().clone(),
            (Placement::Joined { keys, kind }, Some(p)) => {
                let parent_alias = &nodes[p].alias;
                joins.push(JoinClause {
                    kind: *kind,
                    table: node.table().clone(),
                    alias: alias.clone(),
                    on: keys
                        .left()
                        .iter()
                        .zip(keys.right())
                        .map(|(l, r)| (format!("{}.{}", parent_alias, l), format!("{}.{}", alias, r)))
                        .collect(),
                });
            }
            _ => {}
        }

        positions.insert(name.to_string(), nodes.len());
        nodes.push(CompiledNode {
            name: name.to_string(),
            parent,
            alias,
            consumer: node.consumer().clone(),
            columns: index,
        });
    }

    let mut order_by = Vec::new();
    for (node, column) in tree.order_by_entries() {
        let Some(&i) = positions.get(node.as_str()) else {
            return Err(PersistError::UnknownNode(node.clone()));
        };
        if !nodes[i].columns.contains(column) {
            return Err(PersistError::configuration(format!(
                "cannot order by '{}': join node '{}' does not select it",
                column, node
            )));
        }
        order_by.push(format!("{}.{}", nodes[i].alias, column));
    }

    let root_alias = nodes[0].alias.clone();
    let sql = render(&columns, &root_table, &root_alias, &joins);
    Ok(CompiledQuery {
        columns,
        root_table,
        root_alias,
        joins,
        order_by,
        nodes,
        positions,
        sql,
    })
}

fn unique_alias(base: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 1;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

fn render(
    columns: &[SelectColumn],
    root_table: &TableRef,
    root_alias: &str,
    joins: &[JoinClause],
) -> String {
    let select = if columns.is_empty() {
        "1".to_string()
    } else {
        columns
            .iter()
            .map(|c| format!("{}.{} AS {}", c.table_alias, c.column, c.alias))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut sql = format!("SELECT {} FROM {} AS {}", select, root_table.sql(), root_alias);
    for join in joins {
        let on = join
            .on
            .iter()
            .map(|(l, r)| format!("{} = {}", l, r))
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(
            " {} {} AS {} ON {}",
            join.kind.sql(),
            join.table.sql(),
            join.alias,
            on
        ));
    }
    sql
}
