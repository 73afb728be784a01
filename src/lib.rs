//! Tidedrive - hierarchical file drive metadata store
//!
//! A personal/collaborative drive: per-user folder trees with materialized
//! paths, soft-delete cascades, per-node sharing grants, and file content
//! held in an external Walrus blob store.

pub mod access;
pub mod blob;
pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod logging;
pub mod share;
pub mod tree;

pub use access::{effective_permission, AccessLevel, AccessResolver, SharingPolicy};
pub use blob::{BlobRef, BlobService, BlobStore, ByteStream, WalrusClient};
pub use config::Config;
pub use db::{Database, NewUser, User, UserRepository};
pub use drive::DriveService;
pub use error::{DriveError, Result};
pub use share::{
    Collaborator, CollaboratorRepository, NoopNotifier, ShareNotifier, SharingService,
};
pub use tree::{
    Crumb, FileMetadata, Node, NodeTree, StorageStats, TreeQuery, TreeStore, DEFAULT_LIST_DEPTH,
};
