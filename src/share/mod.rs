//! Sharing module for Tidedrive.
//!
//! Per-node collaborator grants: adding, removing, and listing, gated by the
//! configured sharing policy, with optional notification of the invited
//! user through an external channel (email lives outside this crate).

mod notifier;

pub use notifier::{NoopNotifier, ShareNotifier};

use sqlx::SqlitePool;
use tracing::info;

use crate::access::{AccessLevel, AccessResolver, SharingPolicy};
use crate::db::UserRepository;
use crate::tree::{Node, TreeStore, NODE_COLUMNS};
use crate::{DriveError, Result};

/// A sharing grant on a single node.
///
/// Grants are unique by user and apply to that node only (no inheritance).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Collaborator {
    /// Node the grant applies to.
    pub node_id: String,
    /// User the grant was given to.
    pub user_id: i64,
    /// Granted access level.
    #[sqlx(try_from = "String")]
    pub access_level: AccessLevel,
    /// When the grant was added.
    pub added_at: String,
}

/// Repository for collaborator rows.
pub struct CollaboratorRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CollaboratorRepository<'a> {
    /// Create a new CollaboratorRepository with the given pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// List all grants on a node, oldest first.
    pub async fn list_for_node(&self, node_id: &str) -> Result<Vec<Collaborator>> {
        let collaborators = sqlx::query_as::<_, Collaborator>(
            "SELECT node_id, user_id, access_level, added_at
             FROM collaborators WHERE node_id = ? ORDER BY added_at, user_id",
        )
        .bind(node_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(collaborators)
    }

    /// Get the grant for a specific user on a node, if any.
    pub async fn get(&self, node_id: &str, user_id: i64) -> Result<Option<Collaborator>> {
        let collaborator = sqlx::query_as::<_, Collaborator>(
            "SELECT node_id, user_id, access_level, added_at
             FROM collaborators WHERE node_id = ? AND user_id = ?",
        )
        .bind(node_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(collaborator)
    }

    /// Insert a grant. A duplicate (node, user) pair is a `Conflict`.
    pub async fn add(
        &self,
        node_id: &str,
        user_id: i64,
        level: AccessLevel,
    ) -> Result<Collaborator> {
        sqlx::query(
            "INSERT INTO collaborators (node_id, user_id, access_level) VALUES (?, ?, ?)",
        )
        .bind(node_id)
        .bind(user_id)
        .bind(level.as_str())
        .execute(self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                DriveError::Conflict("user is already a collaborator".to_string())
            }
            _ => DriveError::Database(e.to_string()),
        })?;

        self.get(node_id, user_id)
            .await?
            .ok_or_else(|| DriveError::NotFound("collaborator".to_string()))
    }

    /// Remove a grant. Returns `true` if a row was removed.
    pub async fn remove(&self, node_id: &str, user_id: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM collaborators WHERE node_id = ? AND user_id = ?")
                .bind(node_id)
                .bind(user_id)
                .execute(self.pool)
                .await
                .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// Live nodes shared with a user, oldest grant first (the "shared with
    /// me" view).
    pub async fn nodes_shared_with(&self, user_id: i64) -> Result<Vec<Node>> {
        let nodes = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             JOIN collaborators c ON c.node_id = nodes.id
             WHERE c.user_id = ? AND is_deleted = 0
             ORDER BY c.added_at, c.node_id"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(nodes)
    }
}

/// Service for managing sharing grants.
pub struct SharingService<'a> {
    pool: &'a SqlitePool,
    policy: SharingPolicy,
    notifier: Option<&'a dyn ShareNotifier>,
}

impl<'a> SharingService<'a> {
    /// Create a new SharingService with the given pool and policy.
    pub fn new(pool: &'a SqlitePool, policy: SharingPolicy) -> Self {
        Self {
            pool,
            policy,
            notifier: None,
        }
    }

    /// Attach a notifier invoked after a successful grant.
    pub fn with_notifier(mut self, notifier: &'a dyn ShareNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Get the configured sharing policy.
    pub fn policy(&self) -> SharingPolicy {
        self.policy
    }

    /// Add a collaborator to a node.
    ///
    /// Gated by the sharing policy. Fails with `NotFound` if the node or the
    /// target user is unknown, `Conflict` if the user already has a grant,
    /// and `InvalidArgument` for a `none` level or the owner as target.
    pub async fn add_collaborator(
        &self,
        node_id: &str,
        requester_id: i64,
        target_user_id: i64,
        level: AccessLevel,
    ) -> Result<Collaborator> {
        if level == AccessLevel::None {
            return Err(DriveError::InvalidArgument(
                "access level must be read, write, or admin".to_string(),
            ));
        }

        let node = self.live_node(node_id).await?;
        self.require_manage(requester_id, &node).await?;

        let target = UserRepository::new(self.pool).require(target_user_id).await?;
        if target.id == node.owner_id {
            return Err(DriveError::InvalidArgument(
                "the owner cannot be added as a collaborator".to_string(),
            ));
        }

        let added = CollaboratorRepository::new(self.pool)
            .add(&node.id, target.id, level)
            .await?;

        info!(
            node_id = %node.id,
            target_user_id = target.id,
            level = %level,
            "collaborator added"
        );
        if let Some(notifier) = self.notifier {
            notifier.collaborator_added(&node, &target, level).await;
        }

        Ok(added)
    }

    /// Remove a collaborator from a node.
    pub async fn remove_collaborator(
        &self,
        node_id: &str,
        requester_id: i64,
        target_user_id: i64,
    ) -> Result<()> {
        let node = self.live_node(node_id).await?;
        self.require_manage(requester_id, &node).await?;

        let removed = CollaboratorRepository::new(self.pool)
            .remove(&node.id, target_user_id)
            .await?;
        if !removed {
            return Err(DriveError::NotFound("collaborator".to_string()));
        }

        info!(node_id = %node.id, target_user_id, "collaborator removed");
        Ok(())
    }

    /// List the collaborators of a node. Requires at least read access.
    pub async fn list_collaborators(
        &self,
        node_id: &str,
        requester_id: i64,
    ) -> Result<Vec<Collaborator>> {
        let node = self.live_node(node_id).await?;
        AccessResolver::new(self.pool)
            .require(requester_id, &node, AccessLevel::Read)
            .await?;

        CollaboratorRepository::new(self.pool)
            .list_for_node(&node.id)
            .await
    }

    async fn live_node(&self, node_id: &str) -> Result<Node> {
        TreeStore::new(self.pool).get_live(node_id).await
    }

    /// Gate collaborator management per the configured policy.
    async fn require_manage(&self, requester_id: i64, node: &Node) -> Result<()> {
        match self.policy {
            SharingPolicy::OwnerOnly => {
                if node.owner_id != requester_id {
                    return Err(DriveError::PermissionDenied(
                        "only the owner may manage collaborators".to_string(),
                    ));
                }
            }
            SharingPolicy::AdminCollaborators => {
                AccessResolver::new(self.pool)
                    .require(requester_id, node, AccessLevel::Admin)
                    .await?;
            }
        }
        Ok(())
    }
}
