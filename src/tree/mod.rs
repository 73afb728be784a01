//! Hierarchical file/folder tree for Tidedrive.
//!
//! This module owns the node data model and its structural invariants:
//! - One live root per owner
//! - Parent/child symmetry via parent pointers
//! - Materialized paths, eagerly recomputed on move/rename
//! - Subtree-wide soft deletion with idempotent retry

mod node;
mod query;
mod store;

pub use node::{join_path, validate_name, FileMetadata, Node, ROOT_NAME, ROOT_PATH};
pub use query::{Crumb, NodeTree, StorageStats, TreeQuery, DEFAULT_LIST_DEPTH};
pub use store::TreeStore;

pub(crate) use store::NODE_COLUMNS;
