//! Read-side projections over the node tree.
//!
//! Listings, breadcrumbs, search, and storage statistics. Reads are not
//! required to observe a single snapshot across a whole subtree; every level
//! filters soft-deleted nodes independently.

use regex::RegexBuilder;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::{DriveError, Result};

use super::node::{Node, ROOT_NAME, ROOT_PATH};
use super::store::{TreeStore, NODE_COLUMNS};

/// Default number of levels materialized by [`TreeQuery::list_children`].
pub const DEFAULT_LIST_DEPTH: usize = 3;

/// Upper bound on breadcrumb walks; exceeding it means the parent pointers
/// form a cycle.
const MAX_BREADCRUMB_HOPS: usize = 1024;

/// A node together with its (bounded-depth) live children.
#[derive(Debug, Clone, Serialize)]
pub struct NodeTree {
    #[serde(flatten)]
    pub node: Node,
    pub children: Vec<NodeTree>,
}

/// One step of a breadcrumb trail, root-to-leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub name: String,
    pub path: String,
}

/// Aggregate storage statistics for one owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub file_count: i64,
    pub total_size: i64,
    pub average_size: f64,
}

/// Read-side queries over the node tree.
pub struct TreeQuery<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TreeQuery<'a> {
    /// Create a new TreeQuery with the given database pool reference.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// List the live children of a folder, materialized down to `max_depth`
    /// levels (children are level 1). Soft-deleted nodes are filtered at
    /// every level; folders sort before files, then by display name.
    pub async fn list_children(&self, node_id: &str, max_depth: usize) -> Result<Vec<NodeTree>> {
        let store = TreeStore::new(self.pool);
        let folder = store.get_live(node_id).await?;
        if folder.is_file {
            return Err(DriveError::InvalidArgument(
                "a file has no children".to_string(),
            ));
        }
        if max_depth == 0 {
            return Ok(Vec::new());
        }

        self.subtree_level(&store, &folder.id, max_depth).await
    }

    /// Breadcrumb trail from the owner's root to `node_id`, in root-to-leaf
    /// order. The root is always labeled `"Root"`.
    pub async fn breadcrumb(&self, node_id: &str) -> Result<Vec<Crumb>> {
        let store = TreeStore::new(self.pool);
        let node = store.get_live(node_id).await?;

        let mut trail = Vec::new();
        let mut current = node;
        let mut hops = 0;
        loop {
            if current.is_root() {
                trail.push(Crumb {
                    name: ROOT_NAME.to_string(),
                    path: ROOT_PATH.to_string(),
                });
                break;
            }
            trail.push(Crumb {
                name: current.name.clone(),
                path: current.path.clone(),
            });

            let parent_id = current.parent_id.clone().ok_or_else(|| {
                DriveError::Internal("non-root node without parent".to_string())
            })?;
            current = match store.get_opt(&parent_id).await? {
                Some(parent) => parent,
                None => {
                    warn!(%parent_id, "dangling parent pointer in breadcrumb");
                    return Err(DriveError::Internal("parent/child mismatch".to_string()));
                }
            };

            hops += 1;
            if hops > MAX_BREADCRUMB_HOPS {
                return Err(DriveError::Internal(
                    "ancestor chain exceeds maximum depth".to_string(),
                ));
            }
        }

        trail.reverse();
        Ok(trail)
    }

    /// Case-insensitive regex search over filenames and paths of one owner's
    /// live nodes (the root itself is excluded). Folders sort before files,
    /// then lexicographically by display name.
    pub async fn search(&self, owner_id: i64, query: &str) -> Result<Vec<Node>> {
        let pattern = RegexBuilder::new(query)
            .case_insensitive(true)
            .build()
            .map_err(|e| DriveError::InvalidArgument(format!("invalid search pattern: {e}")))?;

        let candidates = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE owner_id = ? AND is_deleted = 0 AND parent_id IS NOT NULL"
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        let mut matches: Vec<Node> = candidates
            .into_iter()
            .filter(|node| pattern.is_match(node.display_name()) || pattern.is_match(&node.path))
            .collect();

        matches.sort_by(|a, b| {
            a.is_file
                .cmp(&b.is_file)
                .then_with(|| a.display_name().to_lowercase().cmp(&b.display_name().to_lowercase()))
        });

        Ok(matches)
    }

    /// Aggregate file count and sizes over one owner's live file nodes.
    ///
    /// `average_size` is `0` when the owner has no files.
    pub async fn aggregate_stats(&self, owner_id: i64) -> Result<StorageStats> {
        let (file_count, total_size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM nodes
             WHERE owner_id = ? AND is_file = 1 AND is_deleted = 0",
        )
        .bind(owner_id)
        .fetch_one(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        let average_size = if file_count > 0 {
            total_size as f64 / file_count as f64
        } else {
            0.0
        };

        Ok(StorageStats {
            file_count,
            total_size,
            average_size,
        })
    }

    /// Materialize one level of live children and descend while depth remains.
    ///
    /// Depth is bounded by `max_depth`, so the recursion cannot run away.
    fn subtree_level<'s>(
        &'s self,
        store: &'s TreeStore<'a>,
        folder_id: &'s str,
        depth_left: usize,
    ) -> futures::future::BoxFuture<'s, Result<Vec<NodeTree>>> {
        Box::pin(async move {
            let children = store.children_of(folder_id).await?;
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                let grandchildren = if depth_left > 1 && !child.is_file {
                    self.subtree_level(store, &child.id, depth_left - 1).await?
                } else {
                    Vec::new()
                };
                out.push(NodeTree {
                    node: child,
                    children: grandchildren,
                });
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobRef;
    use crate::db::{NewUser, UserRepository};
    use crate::tree::FileMetadata;
    use crate::Database;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    async fn create_user(db: &Database, username: &str) -> i64 {
        UserRepository::new(db.pool())
            .create(&NewUser::new(username))
            .await
            .unwrap()
            .id
    }

    fn blob(n: u32) -> BlobRef {
        BlobRef {
            blob_id: format!("blob-{n}"),
            object_id: format!("object-{n}"),
        }
    }

    fn meta(filename: &str, size: i64) -> FileMetadata {
        FileMetadata {
            filename: filename.to_string(),
            mimetype: "text/plain".to_string(),
            size,
            uploaded_at: "2024-01-01T00:00:00Z".to_string(),
            filepath: format!("/{filename}"),
        }
    }

    #[tokio::test]
    async fn test_list_children_bounded_depth() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let root = store.create_root(owner).await.unwrap();
        let l1 = store.create_folder(owner, "l1", None).await.unwrap();
        let l2 = store.create_folder(owner, "l2", Some(&l1.id)).await.unwrap();
        let l3 = store.create_folder(owner, "l3", Some(&l2.id)).await.unwrap();
        store.create_folder(owner, "l4", Some(&l3.id)).await.unwrap();

        let listing = query.list_children(&root.id, 3).await.unwrap();

        assert_eq!(listing.len(), 1);
        let l1_tree = &listing[0];
        assert_eq!(l1_tree.node.name, "l1");
        let l2_tree = &l1_tree.children[0];
        let l3_tree = &l2_tree.children[0];
        assert_eq!(l3_tree.node.name, "l3");
        // Level 4 is beyond the bound.
        assert!(l3_tree.children.is_empty());
    }

    #[tokio::test]
    async fn test_list_children_filters_deleted_at_every_level() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let root = store.create_root(owner).await.unwrap();
        let keep = store.create_folder(owner, "keep", None).await.unwrap();
        let gone = store
            .create_folder(owner, "gone", Some(&keep.id))
            .await
            .unwrap();
        store.delete_subtree(&gone.id).await.unwrap();

        let listing = query.list_children(&root.id, 3).await.unwrap();

        assert_eq!(listing.len(), 1);
        assert!(listing[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_list_children_of_file_invalid() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let file = store
            .create_file(owner, "a.txt", None, &blob(1), &meta("a.txt", 1))
            .await
            .unwrap();

        let result = query.list_children(&file.id, 3).await;
        assert!(matches!(result, Err(DriveError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_breadcrumb_root_to_leaf() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let docs = store.create_folder(owner, "docs", None).await.unwrap();
        let reports = store
            .create_folder(owner, "reports", Some(&docs.id))
            .await
            .unwrap();

        let trail = query.breadcrumb(&reports.id).await.unwrap();

        assert_eq!(
            trail,
            vec![
                Crumb {
                    name: "Root".to_string(),
                    path: "/".to_string()
                },
                Crumb {
                    name: "docs".to_string(),
                    path: "/docs".to_string()
                },
                Crumb {
                    name: "reports".to_string(),
                    path: "/docs/reports".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_breadcrumb_of_root() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let root = store.create_root(owner).await.unwrap();
        let trail = query.breadcrumb(&root.id).await.unwrap();

        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].name, "Root");
        assert_eq!(trail[0].path, "/");
    }

    #[tokio::test]
    async fn test_search_matches_filename_and_path() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let docs = store.create_folder(owner, "Reports", None).await.unwrap();
        store
            .create_file(owner, "summary.txt", Some(&docs.id), &blob(1), &meta("summary.txt", 1))
            .await
            .unwrap();
        store
            .create_file(owner, "other.bin", None, &blob(2), &meta("other.bin", 1))
            .await
            .unwrap();

        // Case-insensitive filename match.
        let hits = query.search(owner, "SUMMARY").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name(), "summary.txt");

        // Path match also catches nodes under the matching folder.
        let hits = query.search(owner, "reports").await.unwrap();
        assert_eq!(hits.len(), 2);
        // Folders sort before files.
        assert!(!hits[0].is_file);
        assert!(hits[1].is_file);
    }

    #[tokio::test]
    async fn test_search_excludes_deleted_and_foreign() {
        let db = setup_db().await;
        let alice = create_user(&db, "alice").await;
        let bob = create_user(&db, "bob").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let mine = store
            .create_file(alice, "mine.txt", None, &blob(1), &meta("mine.txt", 1))
            .await
            .unwrap();
        store
            .create_file(bob, "mine.txt", None, &blob(2), &meta("mine.txt", 1))
            .await
            .unwrap();
        store.delete_subtree(&mine.id).await.unwrap();

        let hits = query.search(alice, "mine").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_invalid_pattern() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let query = TreeQuery::new(db.pool());

        let result = query.search(owner, "[unclosed").await;
        assert!(matches!(result, Err(DriveError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_aggregate_stats() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        for (i, size) in [10i64, 20, 30].iter().enumerate() {
            store
                .create_file(
                    owner,
                    &format!("f{i}.txt"),
                    None,
                    &blob(i as u32),
                    &meta(&format!("f{i}.txt"), *size),
                )
                .await
                .unwrap();
        }

        let stats = query.aggregate_stats(owner).await.unwrap();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.total_size, 60);
        assert_eq!(stats.average_size, 20.0);
    }

    #[tokio::test]
    async fn test_aggregate_stats_empty() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let query = TreeQuery::new(db.pool());

        let stats = query.aggregate_stats(owner).await.unwrap();
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.average_size, 0.0);
    }

    #[tokio::test]
    async fn test_stats_ignore_deleted_files() {
        let db = setup_db().await;
        let owner = create_user(&db, "alice").await;
        let store = TreeStore::new(db.pool());
        let query = TreeQuery::new(db.pool());

        let keep = store
            .create_file(owner, "keep.txt", None, &blob(1), &meta("keep.txt", 40))
            .await
            .unwrap();
        let gone = store
            .create_file(owner, "gone.txt", None, &blob(2), &meta("gone.txt", 100))
            .await
            .unwrap();
        store.delete_subtree(&gone.id).await.unwrap();

        let stats = query.aggregate_stats(owner).await.unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.total_size, keep.size.unwrap());
    }
}
