//! Tree store for Tidedrive.
//!
//! Sole writer of structural node fields (`parent_id`, `path`, `is_deleted`,
//! `version`). Every mutation that touches two nodes runs inside a single
//! transaction, and structural updates are version-checked so a conflicting
//! concurrent write surfaces as `Conflict` instead of a lost update.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob::BlobRef;
use crate::{DriveError, Result};

use super::node::{join_path, validate_name, FileMetadata, Node, ROOT_NAME, ROOT_PATH};

/// Column list shared by all node SELECTs.
pub(crate) const NODE_COLUMNS: &str =
    "id, owner_id, name, path, is_file, parent_id, is_deleted, version, \
     blob_id, object_id, filename, mimetype, size, uploaded_at, created_at";

/// Upper bound on ancestor-chain walks; exceeding it means the parent
/// pointers form a cycle, which is a structural invariant violation.
const MAX_ANCESTOR_HOPS: usize = 1024;

/// Store owning the structural invariants of the node tree.
pub struct TreeStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TreeStore<'a> {
    /// Create a new TreeStore with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a node by id, including soft-deleted ones.
    ///
    /// Deleted ids stay valid for direct fetches (still-open share links).
    pub async fn get(&self, id: &str) -> Result<Node> {
        self.get_opt(id)
            .await?
            .ok_or_else(|| DriveError::NotFound("node".to_string()))
    }

    /// Get a node by id, or `None` if the id is unknown.
    pub async fn get_opt(&self, id: &str) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(node)
    }

    /// Get a live (non-deleted) node by id.
    pub async fn get_live(&self, id: &str) -> Result<Node> {
        match self.get_opt(id).await? {
            Some(node) if !node.is_deleted => Ok(node),
            _ => Err(DriveError::NotFound("node".to_string())),
        }
    }

    /// Get or create the owner's root folder.
    ///
    /// Idempotent: repeated calls return the same node. A concurrent
    /// create racing on the partial unique index is resolved by refetching.
    pub async fn create_root(&self, owner_id: i64) -> Result<Node> {
        if let Some(root) = self.find_root(owner_id).await? {
            return Ok(root);
        }

        let id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            "INSERT INTO nodes (id, owner_id, name, path, is_file, parent_id)
             VALUES (?, ?, ?, ?, 0, NULL)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(ROOT_NAME)
        .bind(ROOT_PATH)
        .execute(self.pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(owner_id, root_id = %id, "created root folder");
                self.get(&id).await
            }
            Err(e) if is_unique_violation(&e) => self
                .find_root(owner_id)
                .await?
                .ok_or_else(|| DriveError::Conflict("duplicate root".to_string())),
            Err(e) => Err(DriveError::Database(e.to_string())),
        }
    }

    async fn find_root(&self, owner_id: i64) -> Result<Option<Node>> {
        let root = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE owner_id = ? AND parent_id IS NULL AND is_deleted = 0"
        ))
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(root)
    }

    /// Create a folder under `parent_id`, or under the owner's root when
    /// `parent_id` is `None` (the root is created if absent).
    pub async fn create_folder(
        &self,
        owner_id: i64,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Node> {
        validate_name(name)?;
        let parent = self.resolve_parent(owner_id, parent_id, false).await?;

        let id = Uuid::new_v4().to_string();
        let path = join_path(&parent.path, name);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO nodes (id, owner_id, name, path, is_file, parent_id)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(name)
        .bind(&path)
        .bind(&parent.id)
        .execute(&mut *tx)
        .await?;
        bump_version(&mut tx, &parent.id).await?;
        tx.commit().await?;

        debug!(owner_id, folder_id = %id, %path, "created folder");
        self.get(&id).await
    }

    /// Create a file node under `parent_id` (or the owner's root).
    ///
    /// The blob must already be durably stored; this only records metadata.
    pub async fn create_file(
        &self,
        owner_id: i64,
        name: &str,
        parent_id: Option<&str>,
        blob: &BlobRef,
        metadata: &FileMetadata,
    ) -> Result<Node> {
        validate_name(name)?;
        let parent = self.resolve_parent(owner_id, parent_id, true).await?;

        let id = Uuid::new_v4().to_string();
        let path = join_path(&parent.path, name);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO nodes (id, owner_id, name, path, is_file, parent_id,
                                blob_id, object_id, filename, mimetype, size, uploaded_at)
             VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(name)
        .bind(&path)
        .bind(&parent.id)
        .bind(&blob.blob_id)
        .bind(&blob.object_id)
        .bind(&metadata.filename)
        .bind(&metadata.mimetype)
        .bind(metadata.size)
        .bind(&metadata.uploaded_at)
        .execute(&mut *tx)
        .await?;
        bump_version(&mut tx, &parent.id).await?;
        tx.commit().await?;

        debug!(owner_id, file_id = %id, %path, blob_id = %blob.blob_id, "created file");
        self.get(&id).await
    }

    /// Move a node under a new parent (`None` moves it under the owner's
    /// root). Paths of the moved node and its whole subtree are recomputed
    /// eagerly so reads never observe stale ancestry.
    pub async fn move_node(&self, id: &str, new_parent_id: Option<&str>) -> Result<Node> {
        let node = self.get_live(id).await?;
        self.move_fetched(&node, new_parent_id).await
    }

    /// Apply a move against an already-fetched snapshot of the node. The
    /// structural UPDATE is guarded by the snapshot's `version`, so any
    /// write that landed in between surfaces as `Conflict`.
    async fn move_fetched(&self, node: &Node, new_parent_id: Option<&str>) -> Result<Node> {
        if node.is_root() {
            return Err(DriveError::InvalidArgument(
                "the root folder cannot be moved".to_string(),
            ));
        }

        let target = match new_parent_id {
            None => self.create_root(node.owner_id).await?,
            Some(pid) => {
                let target = self.get_opt(pid).await?;
                match target {
                    Some(t) if !t.is_deleted && t.owner_id == node.owner_id => {
                        if t.is_file {
                            return Err(DriveError::InvalidArgument(
                                "a file cannot contain other nodes".to_string(),
                            ));
                        }
                        t
                    }
                    _ => return Err(DriveError::NotFound("parent folder".to_string())),
                }
            }
        };

        if target.id == node.id {
            return Err(DriveError::InvalidArgument(
                "cannot move a folder into itself".to_string(),
            ));
        }
        self.ensure_not_descendant(&node.id, &target).await?;

        let new_path = join_path(&target.path, &node.name);

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE nodes SET parent_id = ?, path = ?, version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(&target.id)
        .bind(&new_path)
        .bind(&node.id)
        .bind(node.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DriveError::Conflict(
                "node was modified concurrently".to_string(),
            ));
        }

        if let Some(old_parent) = &node.parent_id {
            bump_version(&mut tx, old_parent).await?;
        }
        bump_version(&mut tx, &target.id).await?;
        recompute_subtree_paths(&mut tx, &node.id, &new_path).await?;
        tx.commit().await?;

        debug!(node_id = %node.id, %new_path, "moved node");
        self.get(&node.id).await
    }

    /// Rename a node, recomputing its path and the paths of its subtree.
    pub async fn rename_node(&self, id: &str, new_name: &str) -> Result<Node> {
        let node = self.get_live(id).await?;
        self.rename_fetched(&node, new_name).await
    }

    /// Apply a rename against an already-fetched snapshot, version-guarded
    /// like [`TreeStore::move_fetched`].
    async fn rename_fetched(&self, node: &Node, new_name: &str) -> Result<Node> {
        validate_name(new_name)?;
        if node.is_root() {
            return Err(DriveError::InvalidArgument(
                "the root folder cannot be renamed".to_string(),
            ));
        }
        let parent_id = node
            .parent_id
            .as_deref()
            .ok_or_else(|| DriveError::Internal("non-root node without parent".to_string()))?;
        let parent = self.get(parent_id).await?;
        let new_path = join_path(&parent.path, new_name);

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE nodes SET name = ?, filename = CASE WHEN is_file = 1 THEN ? ELSE filename END,
                              path = ?, version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(new_name)
        .bind(new_name)
        .bind(&new_path)
        .bind(&node.id)
        .bind(node.version)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DriveError::Conflict(
                "node was modified concurrently".to_string(),
            ));
        }
        recompute_subtree_paths(&mut tx, &node.id, &new_path).await?;
        tx.commit().await?;

        self.get(&node.id).await
    }

    /// Soft-delete a node and every reachable descendant.
    ///
    /// The cascade runs as an explicit worklist over node ids rather than
    /// recursion, and visits children of already-deleted folders too, so an
    /// interrupted cascade converges when retried. Deleting an
    /// already-deleted node is a no-op success.
    pub async fn delete_subtree(&self, id: &str) -> Result<()> {
        let node = match self.get_opt(id).await? {
            Some(node) => node,
            None => return Err(DriveError::NotFound("node".to_string())),
        };
        if node.is_deleted {
            debug!(node_id = %id, "delete_subtree: already deleted, no-op");
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut stack = vec![node.id.clone()];
        let mut marked = 0u64;
        while let Some(current) = stack.pop() {
            sqlx::query("UPDATE nodes SET is_deleted = 1, version = version + 1 WHERE id = ?")
                .bind(&current)
                .execute(&mut *tx)
                .await?;
            marked += 1;

            // All children, deleted or not: a retried cascade must reach
            // descendants an earlier interrupted run never visited.
            let children: Vec<String> =
                sqlx::query_scalar("SELECT id FROM nodes WHERE parent_id = ?")
                    .bind(&current)
                    .fetch_all(&mut *tx)
                    .await?;
            stack.extend(children);
        }

        if let Some(parent_id) = &node.parent_id {
            bump_version(&mut tx, parent_id).await?;
        }
        tx.commit().await?;

        debug!(node_id = %id, marked, "deleted subtree");
        Ok(())
    }

    /// Live children of a node, folders before files, then by display name.
    pub async fn children_of(&self, id: &str) -> Result<Vec<Node>> {
        let children = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE parent_id = ? AND is_deleted = 0
             ORDER BY is_file ASC, LOWER(COALESCE(filename, name)) ASC"
        ))
        .bind(id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(children)
    }

    /// Resolve the parent for a create operation.
    ///
    /// `None` resolves to the owner's root (created if absent). A missing,
    /// deleted, or foreign parent is `NotFound`. A file parent is
    /// `InvalidArgument` for file creation and `NotFound` for folder
    /// creation (it does not resolve to a folder).
    async fn resolve_parent(
        &self,
        owner_id: i64,
        parent_id: Option<&str>,
        creating_file: bool,
    ) -> Result<Node> {
        let Some(pid) = parent_id else {
            return self.create_root(owner_id).await;
        };

        let parent = self.get_opt(pid).await?;
        match parent {
            Some(p) if !p.is_deleted && p.owner_id == owner_id => {
                if p.is_file {
                    if creating_file {
                        Err(DriveError::InvalidArgument(
                            "a file cannot contain other nodes".to_string(),
                        ))
                    } else {
                        Err(DriveError::NotFound("parent folder".to_string()))
                    }
                } else {
                    Ok(p)
                }
            }
            _ => Err(DriveError::NotFound("parent folder".to_string())),
        }
    }

    /// Reject moving a node under one of its own descendants.
    async fn ensure_not_descendant(&self, node_id: &str, target: &Node) -> Result<()> {
        let mut cursor = target.parent_id.clone();
        let mut hops = 0;
        while let Some(pid) = cursor {
            if pid == node_id {
                return Err(DriveError::InvalidArgument(
                    "cannot move a folder into its own subtree".to_string(),
                ));
            }
            let parent = self.get_opt(&pid).await?.ok_or_else(|| {
                warn!(parent_id = %pid, "dangling parent pointer");
                DriveError::Internal("parent/child mismatch".to_string())
            })?;
            cursor = parent.parent_id;
            hops += 1;
            if hops > MAX_ANCESTOR_HOPS {
                return Err(DriveError::Internal(
                    "ancestor chain exceeds maximum depth".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Bump the structural version of a node inside a transaction.
async fn bump_version(tx: &mut Transaction<'_, Sqlite>, id: &str) -> Result<()> {
    sqlx::query("UPDATE nodes SET version = version + 1 WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Recompute materialized paths for every descendant of `root_id`, given the
/// root's already-updated path. Runs as a worklist inside the transaction.
async fn recompute_subtree_paths(
    tx: &mut Transaction<'_, Sqlite>,
    root_id: &str,
    root_path: &str,
) -> Result<()> {
    let mut stack = vec![(root_id.to_string(), root_path.to_string())];
    while let Some((id, path)) = stack.pop() {
        let children: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM nodes WHERE parent_id = ?")
                .bind(&id)
                .fetch_all(&mut **tx)
                .await?;
        for (child_id, child_name) in children {
            let child_path = join_path(&path, &child_name);
            sqlx::query("UPDATE nodes SET path = ? WHERE id = ?")
                .bind(&child_path)
                .bind(&child_id)
                .execute(&mut **tx)
                .await?;
            stack.push((child_id, child_path));
        }
    }
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
