//! Drive service: the orchestration layer of Tidedrive.
//!
//! Every operation takes the requester's user id explicitly and authorizes
//! it through the access resolver before touching the tree, the blob store,
//! or the collaborator tables. Reads need `Read`, content mutations need
//! `Write`, and collaborator management follows the sharing policy.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::access::{AccessLevel, AccessResolver, SharingPolicy};
use crate::blob::{BlobService, BlobStore, ByteStream};
use crate::share::{Collaborator, ShareNotifier, SharingService};
use crate::tree::{
    join_path, Crumb, FileMetadata, Node, NodeTree, StorageStats, TreeQuery, TreeStore,
    DEFAULT_LIST_DEPTH,
};
use crate::{DriveError, Result};

/// Orchestrator over the tree store, access resolver, blob layer, and
/// sharing service.
pub struct DriveService<'a> {
    pool: &'a SqlitePool,
    blob_store: &'a dyn BlobStore,
    policy: SharingPolicy,
    list_depth: usize,
    notifier: Option<&'a dyn ShareNotifier>,
}

impl<'a> DriveService<'a> {
    /// Create a new DriveService with default policy and listing depth.
    pub fn new(pool: &'a SqlitePool, blob_store: &'a dyn BlobStore) -> Self {
        Self {
            pool,
            blob_store,
            policy: SharingPolicy::default(),
            list_depth: DEFAULT_LIST_DEPTH,
            notifier: None,
        }
    }

    /// Set the sharing policy.
    pub fn with_policy(mut self, policy: SharingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the default nested-listing depth.
    pub fn with_list_depth(mut self, depth: usize) -> Self {
        self.list_depth = depth;
        self
    }

    /// Attach a notifier for sharing events.
    pub fn with_notifier(mut self, notifier: &'a dyn ShareNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn tree(&self) -> TreeStore<'a> {
        TreeStore::new(self.pool)
    }

    fn query(&self) -> TreeQuery<'a> {
        TreeQuery::new(self.pool)
    }

    fn resolver(&self) -> AccessResolver<'a> {
        AccessResolver::new(self.pool)
    }

    fn sharing(&self) -> SharingService<'a> {
        let service = SharingService::new(self.pool, self.policy);
        match self.notifier {
            Some(notifier) => service.with_notifier(notifier),
            None => service,
        }
    }

    /// Get (creating if needed) the requester's root folder.
    pub async fn root(&self, requester_id: i64) -> Result<Node> {
        self.tree().create_root(requester_id).await
    }

    /// Fetch a live node the requester can read.
    pub async fn get_node(&self, requester_id: i64, node_id: &str) -> Result<Node> {
        let node = self.tree().get_live(node_id).await?;
        self.resolver()
            .require(requester_id, &node, AccessLevel::Read)
            .await?;
        Ok(node)
    }

    /// Create a folder under `parent_id`, or under the requester's root.
    pub async fn create_folder(
        &self,
        requester_id: i64,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Node> {
        let parent = self
            .authorize_parent(requester_id, parent_id, AccessLevel::Write)
            .await?;
        self.tree()
            .create_folder(parent.owner_id, name, parent_id)
            .await
    }

    /// Upload a file into `parent_id` (or the requester's root).
    ///
    /// Content goes to the blob store before any node row is written, so a
    /// store failure leaves the tree untouched. The node is owned by the
    /// parent folder's owner, which makes uploads into shared folders land
    /// in the sharer's drive.
    pub async fn upload(
        &self,
        requester_id: i64,
        parent_id: Option<&str>,
        filename: &str,
        mimetype: Option<&str>,
        content: Vec<u8>,
    ) -> Result<Node> {
        let parent = self
            .authorize_parent(requester_id, parent_id, AccessLevel::Write)
            .await?;

        let mimetype = match mimetype {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => mime_guess::from_path(filename)
                .first_or_octet_stream()
                .to_string(),
        };
        let metadata = FileMetadata {
            filename: filename.to_string(),
            mimetype,
            size: content.len() as i64,
            uploaded_at: Utc::now().to_rfc3339(),
            filepath: join_path(&parent.path, filename),
        };

        let blob = BlobService::new(self.pool, self.blob_store)
            .put_content(parent.owner_id, &metadata, content)
            .await?;

        let node = self
            .tree()
            .create_file(parent.owner_id, filename, parent_id, &blob, &metadata)
            .await?;
        info!(
            requester_id,
            node_id = %node.id,
            path = %node.path,
            size = metadata.size,
            "file uploaded"
        );
        Ok(node)
    }

    /// Download a file: its metadata plus the content stream.
    pub async fn download(
        &self,
        requester_id: i64,
        node_id: &str,
    ) -> Result<(Node, ByteStream)> {
        let node = self.get_node(requester_id, node_id).await?;
        if !node.is_file {
            return Err(DriveError::InvalidArgument(
                "cannot download a folder".to_string(),
            ));
        }
        let blob_id = node
            .blob_id
            .clone()
            .ok_or_else(|| DriveError::Internal(format!("file {} has no blob", node.id)))?;

        let stream = BlobService::new(self.pool, self.blob_store)
            .get_content(&blob_id)
            .await?;
        Ok((node, stream))
    }

    /// Soft-delete a node and its whole subtree.
    ///
    /// Deleting an already-deleted node is a no-op success for the owner,
    /// so interrupted cascades can be retried.
    pub async fn delete(&self, requester_id: i64, node_id: &str) -> Result<()> {
        let node = self.tree().get(node_id).await?;
        if node.is_deleted {
            if node.owner_id == requester_id {
                return Ok(());
            }
            return Err(DriveError::NotFound(format!("node {node_id}")));
        }
        self.resolver()
            .require(requester_id, &node, AccessLevel::Write)
            .await?;
        self.tree().delete_subtree(node_id).await?;
        info!(requester_id, node_id, path = %node.path, "subtree deleted");
        Ok(())
    }

    /// Move a node under a new parent (`None` = the owner's root).
    pub async fn move_node(
        &self,
        requester_id: i64,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node> {
        let node = self.tree().get_live(node_id).await?;
        self.resolver()
            .require(requester_id, &node, AccessLevel::Write)
            .await?;
        if let Some(parent_id) = new_parent_id {
            let parent = self.tree().get_live(parent_id).await?;
            self.resolver()
                .require(requester_id, &parent, AccessLevel::Write)
                .await?;
        }
        self.tree().move_node(node_id, new_parent_id).await
    }

    /// Rename a node.
    pub async fn rename(
        &self,
        requester_id: i64,
        node_id: &str,
        new_name: &str,
    ) -> Result<Node> {
        let node = self.tree().get_live(node_id).await?;
        self.resolver()
            .require(requester_id, &node, AccessLevel::Write)
            .await?;
        self.tree().rename_node(node_id, new_name).await
    }

    /// Nested listing of a folder, `max_depth` levels deep (default from
    /// construction).
    pub async fn list_children(
        &self,
        requester_id: i64,
        node_id: &str,
        max_depth: Option<usize>,
    ) -> Result<Vec<NodeTree>> {
        let node = self.get_node(requester_id, node_id).await?;
        self.query()
            .list_children(&node.id, max_depth.unwrap_or(self.list_depth))
            .await
    }

    /// Ancestor chain of a node, root first.
    pub async fn breadcrumb(&self, requester_id: i64, node_id: &str) -> Result<Vec<Crumb>> {
        let node = self.get_node(requester_id, node_id).await?;
        self.query().breadcrumb(&node.id).await
    }

    /// Search the requester's own drive.
    pub async fn search(&self, requester_id: i64, pattern: &str) -> Result<Vec<Node>> {
        self.query().search(requester_id, pattern).await
    }

    /// Storage statistics over the requester's live files.
    pub async fn stats(&self, requester_id: i64) -> Result<StorageStats> {
        self.query().aggregate_stats(requester_id).await
    }

    /// Grant `level` on a node to another user.
    pub async fn add_collaborator(
        &self,
        requester_id: i64,
        node_id: &str,
        target_user_id: i64,
        level: AccessLevel,
    ) -> Result<Collaborator> {
        self.sharing()
            .add_collaborator(node_id, requester_id, target_user_id, level)
            .await
    }

    /// Revoke a user's grant on a node.
    pub async fn remove_collaborator(
        &self,
        requester_id: i64,
        node_id: &str,
        target_user_id: i64,
    ) -> Result<()> {
        self.sharing()
            .remove_collaborator(node_id, requester_id, target_user_id)
            .await
    }

    /// List the grants on a node.
    pub async fn list_collaborators(
        &self,
        requester_id: i64,
        node_id: &str,
    ) -> Result<Vec<Collaborator>> {
        self.sharing()
            .list_collaborators(node_id, requester_id)
            .await
    }

    /// Live nodes other users have shared with the requester, oldest grant
    /// first.
    pub async fn shared_with_me(&self, requester_id: i64) -> Result<Vec<Node>> {
        crate::share::CollaboratorRepository::new(self.pool)
            .nodes_shared_with(requester_id)
            .await
    }

    /// Authorize creating content under `parent_id` and resolve the parent
    /// folder, whose owner the new node belongs to. A `None` parent targets
    /// the requester's own root (created on demand).
    async fn authorize_parent(
        &self,
        requester_id: i64,
        parent_id: Option<&str>,
        required: AccessLevel,
    ) -> Result<Node> {
        match parent_id {
            None => self.tree().create_root(requester_id).await,
            Some(id) => {
                let parent = self.tree().get_live(id).await?;
                self.resolver()
                    .require(requester_id, &parent, required)
                    .await?;
                Ok(parent)
            }
        }
    }
}
