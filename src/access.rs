//! Access control resolution for Tidedrive.
//!
//! Effective permission for a (requester, node) pair is computed from
//! ownership plus the node's own collaborator list. Grants are NOT
//! inherited: sharing a folder does not share its descendants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::share::CollaboratorRepository;
use crate::tree::Node;
use crate::{DriveError, Result};

/// Access level for a node, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// No access.
    #[default]
    None = 0,
    /// May read content and listings.
    Read = 1,
    /// May modify content (upload, move, delete).
    Write = 2,
    /// May manage collaborators (policy-dependent).
    Admin = 3,
}

impl AccessLevel {
    /// Convert to the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        }
    }

    /// Check if this level satisfies the required minimum.
    pub fn allows(&self, required: AccessLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AccessLevel::None),
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            _ => Err(format!("unknown access level: {s}")),
        }
    }
}

// Used by sqlx row mapping (access_level is stored as TEXT).
impl TryFrom<String> for AccessLevel {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who may manage a node's collaborator list.
///
/// Both variants existed across the system's evolution; the policy is picked
/// once at service construction instead of being silently merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingPolicy {
    /// Collaborators whose resolved level is `Admin` may manage sharing,
    /// in addition to the owner.
    #[default]
    AdminCollaborators,
    /// Only the owner may manage sharing.
    OwnerOnly,
}

impl SharingPolicy {
    /// Convert to the configuration string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SharingPolicy::AdminCollaborators => "admin",
            SharingPolicy::OwnerOnly => "owner",
        }
    }
}

impl FromStr for SharingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(SharingPolicy::AdminCollaborators),
            "owner" => Ok(SharingPolicy::OwnerOnly),
            _ => Err(format!("unknown sharing policy: {s}")),
        }
    }
}

/// Compute the effective permission of `requester_id` on `node`.
///
/// Deleted nodes resolve to `None` for everyone but the owner-as-admin is
/// also withdrawn; the owner of a live node is always `Admin`; otherwise the
/// node's own collaborator entry decides, with no ancestor inheritance.
pub fn effective_permission(
    requester_id: i64,
    node: &Node,
    collaborators: &[crate::share::Collaborator],
) -> AccessLevel {
    if node.is_deleted {
        return AccessLevel::None;
    }
    if node.owner_id == requester_id {
        return AccessLevel::Admin;
    }
    collaborators
        .iter()
        .find(|c| c.user_id == requester_id)
        .map(|c| c.access_level)
        .unwrap_or(AccessLevel::None)
}

/// Resolver that loads a node's collaborator list and computes permissions.
pub struct AccessResolver<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccessResolver<'a> {
    /// Create a new AccessResolver with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve the effective level of `requester_id` on `node`.
    pub async fn level_for(&self, requester_id: i64, node: &Node) -> Result<AccessLevel> {
        if node.is_deleted {
            return Ok(AccessLevel::None);
        }
        if node.owner_id == requester_id {
            return Ok(AccessLevel::Admin);
        }
        let collaborators = CollaboratorRepository::new(self.pool)
            .list_for_node(&node.id)
            .await?;
        Ok(effective_permission(requester_id, node, &collaborators))
    }

    /// Require at least `required` access, returning the resolved level.
    pub async fn require(
        &self,
        requester_id: i64,
        node: &Node,
        required: AccessLevel,
    ) -> Result<AccessLevel> {
        let level = self.level_for(requester_id, node).await?;
        if !level.allows(required) {
            return Err(DriveError::PermissionDenied(format!(
                "{required} access required"
            )));
        }
        Ok(level)
    }
}
