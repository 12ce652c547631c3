//! Result rows and per-node column lookup.
//!
//! A [`Row`] is positional. The query compiler records, for every join node,
//! a [`ColumnIndex`] mapping the node's own column names to positions in the
//! row; a [`RowView`] pairs the two so mappings can read columns by name.

use std::collections::HashMap;

use crate::value::Value;

/// One row of a tabular result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Column name to row position, for one join node.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, position: usize) {
        self.positions.insert(column.into(), position);
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A row read through one node's column index.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    row: &'a Row,
    index: &'a ColumnIndex,
}

static NULL: Value = Value::Null;

impl<'a> RowView<'a> {
    pub fn new(row: &'a Row, index: &'a ColumnIndex) -> Self {
        RowView { row, index }
    }

    /// Value of `column`, or `NULL` when the node does not select it.
    pub fn get(&self, column: &str) -> &'a Value {
        self.index
            .position(column)
            .and_then(|p| self.row.get(p))
            .unwrap_or(&NULL)
    }

    /// Values of several columns, in the given order.
    pub fn get_all<'c>(&self, columns: impl IntoIterator<Item = &'c String>) -> Vec<Value> {
        columns.into_iter().map(|c| self.get(c).clone()).collect()
    }

    pub fn row(&self) -> &'a Row {
        self.row
    }
}
