//! Blob storage integration for Tidedrive.
//!
//! File content lives in an external blob store (Walrus); this crate only
//! keeps the `(blob_id, object_id)` handles on file nodes. The store is
//! reached through the [`BlobStore`] trait so tests can swap in mocks, and
//! uploads go through [`BlobService`], which applies the duplicate probe
//! before issuing a PUT.

mod walrus;

pub use walrus::WalrusClient;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::tree::FileMetadata;
use crate::{DriveError, Result};

/// Handle pair returned by the blob store for stored content.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BlobRef {
    /// Content identifier used for retrieval.
    pub blob_id: String,
    /// Storage object identifier (certification handle).
    pub object_id: String,
}

/// Streamed file content.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Abstraction over the external blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content`, returning its handles. Metadata travels alongside
    /// the bytes so the store can label the blob.
    async fn put(&self, metadata: &FileMetadata, content: Vec<u8>) -> Result<BlobRef>;

    /// Fetch the content of `blob_id` as a byte stream.
    async fn get(&self, blob_id: &str) -> Result<ByteStream>;
}

/// Upload/download front for the blob store, with the duplicate probe.
pub struct BlobService<'a> {
    pool: &'a SqlitePool,
    store: &'a dyn BlobStore,
}

impl<'a> BlobService<'a> {
    /// Create a new BlobService over the given pool and store.
    pub fn new(pool: &'a SqlitePool, store: &'a dyn BlobStore) -> Self {
        Self { pool, store }
    }

    /// Store content for `owner_id`, reusing an existing blob when possible.
    ///
    /// The probe matches any live file node of the owner with the same
    /// `(filename, size)` pair. Content is not compared, so a same-named
    /// same-sized file with different bytes reuses the older blob; this
    /// mirrors the upstream store's own duplicate detection granularity.
    pub async fn put_content(
        &self,
        owner_id: i64,
        metadata: &FileMetadata,
        content: Vec<u8>,
    ) -> Result<BlobRef> {
        if let Some(existing) = self.find_duplicate(owner_id, metadata).await? {
            debug!(
                owner_id,
                filename = %metadata.filename,
                size = metadata.size,
                blob_id = %existing.blob_id,
                "duplicate content probe hit, reusing blob"
            );
            return Ok(existing);
        }

        self.store.put(metadata, content).await
    }

    /// Fetch the content of `blob_id`, retrying a failed fetch once.
    pub async fn get_content(&self, blob_id: &str) -> Result<ByteStream> {
        match self.store.get(blob_id).await {
            Ok(stream) => Ok(stream),
            Err(first) => {
                warn!(blob_id, error = %first, "blob fetch failed, retrying once");
                self.store.get(blob_id).await
            }
        }
    }

    async fn find_duplicate(
        &self,
        owner_id: i64,
        metadata: &FileMetadata,
    ) -> Result<Option<BlobRef>> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT blob_id, object_id FROM nodes
             WHERE owner_id = ? AND is_file = 1 AND is_deleted = 0
               AND filename = ? AND size = ?
               AND blob_id IS NOT NULL AND object_id IS NOT NULL
             LIMIT 1",
        )
        .bind(owner_id)
        .bind(&metadata.filename)
        .bind(metadata.size)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| DriveError::Database(e.to_string()))?;

        Ok(row.map(|(blob_id, object_id)| BlobRef { blob_id, object_id }))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{collect_stream, MockBlobStore};
    use super::*;
    use crate::db::{NewUser, UserRepository};
    use crate::tree::TreeStore;
    use crate::Database;

    fn metadata(filename: &str, size: i64) -> FileMetadata {
        FileMetadata {
            filename: filename.to_string(),
            mimetype: "text/plain".to_string(),
            size,
            uploaded_at: "2024-01-01T00:00:00Z".to_string(),
            filepath: format!("/{filename}"),
        }
    }

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let owner = UserRepository::new(db.pool())
            .create(&NewUser::new("alice"))
            .await
            .unwrap()
            .id;
        (db, owner)
    }

    #[tokio::test]
    async fn test_put_stores_new_content() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let blob = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(store.put_count(), 1);
        let content = collect_stream(service.get_content(&blob.blob_id).await.unwrap())
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_duplicate_probe_skips_put() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let first = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();
        TreeStore::new(db.pool())
            .create_file(owner, "a.txt", None, &first, &metadata("a.txt", 5))
            .await
            .unwrap();

        // Same filename and size: the probe reuses the stored blob.
        let second = service
            .put_content(owner, &metadata("a.txt", 5), b"olleh".to_vec())
            .await
            .unwrap();

        assert_eq!(second, first);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_misses_on_different_size() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let first = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();
        TreeStore::new(db.pool())
            .create_file(owner, "a.txt", None, &first, &metadata("a.txt", 5))
            .await
            .unwrap();

        service
            .put_content(owner, &metadata("a.txt", 6), b"hello!".to_vec())
            .await
            .unwrap();

        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_probe_scoped_to_owner() {
        let (db, owner) = setup().await;
        let other = UserRepository::new(db.pool())
            .create(&NewUser::new("bob"))
            .await
            .unwrap()
            .id;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let first = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();
        TreeStore::new(db.pool())
            .create_file(owner, "a.txt", None, &first, &metadata("a.txt", 5))
            .await
            .unwrap();

        service
            .put_content(other, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_probe_ignores_deleted_files() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let first = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();
        let tree = TreeStore::new(db.pool());
        let node = tree
            .create_file(owner, "a.txt", None, &first, &metadata("a.txt", 5))
            .await
            .unwrap();
        tree.delete_subtree(&node.id).await.unwrap();

        service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_get_retries_once() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let blob = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();

        store.fail_next_gets(1);
        let content = collect_stream(service.get_content(&blob.blob_id).await.unwrap())
            .await
            .unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn test_get_gives_up_after_retry() {
        let (db, owner) = setup().await;
        let store = MockBlobStore::default();
        let service = BlobService::new(db.pool(), &store);

        let blob = service
            .put_content(owner, &metadata("a.txt", 5), b"hello".to_vec())
            .await
            .unwrap();

        store.fail_next_gets(2);
        let result = service.get_content(&blob.blob_id).await;
        assert!(matches!(result, Err(DriveError::UpstreamStorage(_))));
        assert_eq!(store.get_count(), 2);
    }
}
