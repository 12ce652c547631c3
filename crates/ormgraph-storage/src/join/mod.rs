//! Join trees and their compilation to SQL.

mod compile;
mod tree;

pub use compile::{CompiledNode, CompiledQuery, JoinClause, SelectColumn};
pub use tree::{
    JoinKind, JoinNode, JoinTree, KeyPair, NodeConsumer, Placement, RelationFixer, RowMerger,
    TableRef,
};
