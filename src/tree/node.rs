//! Node types for the Tidedrive tree.

use serde::{Deserialize, Serialize};

/// Display name of every per-owner root node.
pub const ROOT_NAME: &str = "Root";

/// Materialized path of every per-owner root node.
pub const ROOT_PATH: &str = "/";

/// Upload metadata carried by file nodes.
///
/// Folders never carry this. The serialized form is exactly what the blob
/// store receives in the `X-File-Metadata` header: `uploaded_at` is an
/// RFC 3339 timestamp string and `filepath` is the file's destination path
/// in the owner's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: String,
    pub filepath: String,
}

/// A file or folder entry in a user's tree.
///
/// The tree is stored as a parent-pointer arena: `parent_id` is the only
/// structural link, and child sets are derived from it, so parent/child
/// symmetry cannot drift. `path` is materialized at creation and eagerly
/// recomputed on move/rename.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Node {
    /// Opaque unique identifier (UUID v4), assigned at creation, immutable.
    pub id: String,
    /// Owning user; immutable after creation.
    pub owner_id: i64,
    /// Display name, unique among siblings (SHOULD, not enforced).
    pub name: String,
    /// Materialized slash-delimited path from the owner's root.
    pub path: String,
    /// File vs. folder; fixed at creation, never toggled.
    pub is_file: bool,
    /// Parent node id; `None` only for the per-owner root.
    pub parent_id: Option<String>,
    /// Soft-delete flag; once set the node is excluded from ordinary reads.
    pub is_deleted: bool,
    /// Structural version, bumped on every structural write.
    pub version: i64,
    /// File-only: blob locator in the external store.
    pub blob_id: Option<String>,
    /// File-only: the store's object handle.
    pub object_id: Option<String>,
    /// File-only metadata columns.
    pub filename: Option<String>,
    pub mimetype: Option<String>,
    pub size: Option<i64>,
    pub uploaded_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl Node {
    /// Whether this node is a per-owner root.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// File metadata, present iff this node is a file.
    pub fn metadata(&self) -> Option<FileMetadata> {
        match (&self.filename, &self.mimetype, self.size, &self.uploaded_at) {
            (Some(filename), Some(mimetype), Some(size), Some(uploaded_at)) => {
                Some(FileMetadata {
                    filename: filename.clone(),
                    mimetype: mimetype.clone(),
                    size,
                    uploaded_at: uploaded_at.clone(),
                    filepath: self.path.clone(),
                })
            }
            _ => None,
        }
    }

    /// Name used for listings and search ordering.
    ///
    /// Files use their upload filename, folders their display name.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(&self.name)
    }
}

/// Join a parent path and a child name into a materialized path.
///
/// The root path is `"/"`; joining avoids a doubled slash under it.
pub fn join_path(parent_path: &str, name: &str) -> String {
    if parent_path == ROOT_PATH {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

/// Validate a node display name.
///
/// Names must be non-empty, must not contain `/` (they are path segments),
/// and are capped at 255 characters.
pub fn validate_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(crate::DriveError::InvalidArgument(
            "name must not be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(crate::DriveError::InvalidArgument(
            "name must not contain '/'".to_string(),
        ));
    }
    if name.chars().count() > 255 {
        return Err(crate::DriveError::InvalidArgument(
            "name must be at most 255 characters".to_string(),
        ));
    }
    Ok(())
}
