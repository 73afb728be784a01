//! Walrus blob store client.
//!
//! Speaks the Walrus HTTP API: content is PUT to a publisher endpoint and
//! read back from an aggregator endpoint. The store deduplicates certified
//! blobs itself, so a PUT may come back as `alreadyCertified` instead of a
//! fresh object.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::WalrusConfig;
use crate::tree::FileMetadata;
use crate::{DriveError, Result};

use super::{BlobRef, BlobStore, ByteStream};

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout in seconds.
const READ_TIMEOUT_SECS: u64 = 60;

/// Total timeout in seconds. Uploads of large files dominate this.
const TOTAL_TIMEOUT_SECS: u64 = 120;

/// Header carrying the file metadata alongside the raw body.
const METADATA_HEADER: &str = "X-File-Metadata";

/// HTTP client for a Walrus publisher/aggregator pair.
pub struct WalrusClient {
    client: Client,
    publisher: Url,
    aggregator: Url,
    epochs: u32,
    deletable: bool,
}

/// Store response: exactly one of the two branches is present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreResponse {
    newly_created: Option<NewlyCreated>,
    already_certified: Option<AlreadyCertified>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewlyCreated {
    blob_object: BlobObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobObject {
    id: String,
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlreadyCertified {
    blob_id: String,
    #[allow(dead_code)]
    end_epoch: Option<u64>,
}

impl WalrusClient {
    /// Create a new client from the given configuration.
    pub fn new(config: &WalrusConfig) -> Result<Self> {
        let publisher = parse_base_url(&config.publisher_url)?;
        let aggregator = parse_base_url(&config.aggregator_url)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                DriveError::UpstreamStorage(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            publisher,
            aggregator,
            epochs: config.epochs,
            deletable: config.deletable,
        })
    }

    fn store_url(&self) -> Result<Url> {
        let mut url = self
            .publisher
            .join("v1/store")
            .map_err(|e| DriveError::UpstreamStorage(format!("bad publisher URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("epochs", &self.epochs.to_string())
            .append_pair("deletable", if self.deletable { "true" } else { "false" });
        Ok(url)
    }

    fn read_url(&self, blob_id: &str) -> Result<Url> {
        self.aggregator
            .join(&format!("v1/{}", blob_id))
            .map_err(|e| DriveError::UpstreamStorage(format!("bad aggregator URL: {}", e)))
    }
}

#[async_trait]
impl BlobStore for WalrusClient {
    async fn put(&self, metadata: &FileMetadata, content: Vec<u8>) -> Result<BlobRef> {
        let url = self.store_url()?;
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| DriveError::Internal(format!("metadata serialization: {}", e)))?;

        debug!(filename = %metadata.filename, size = metadata.size, "storing blob");
        let response = self
            .client
            .put(url)
            .header(METADATA_HEADER, metadata_json)
            .body(content)
            .send()
            .await
            .map_err(|e| DriveError::UpstreamStorage(format!("store request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DriveError::UpstreamStorage(format!(
                "store returned HTTP {}",
                response.status()
            )));
        }

        let parsed: StoreResponse = response
            .json()
            .await
            .map_err(|e| DriveError::UpstreamStorage(format!("bad store response: {}", e)))?;

        if let Some(created) = parsed.newly_created {
            info!(blob_id = %created.blob_object.blob_id, "blob newly created");
            return Ok(BlobRef {
                blob_id: created.blob_object.blob_id,
                object_id: created.blob_object.id,
            });
        }
        if let Some(certified) = parsed.already_certified {
            // No fresh object handle exists for a reused blob; the blob id
            // doubles as the reference.
            info!(blob_id = %certified.blob_id, "blob already certified");
            return Ok(BlobRef {
                object_id: certified.blob_id.clone(),
                blob_id: certified.blob_id,
            });
        }

        Err(DriveError::UpstreamStorage(
            "store response had neither newlyCreated nor alreadyCertified".to_string(),
        ))
    }

    async fn get(&self, blob_id: &str) -> Result<ByteStream> {
        let url = self.read_url(blob_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DriveError::UpstreamStorage(format!("read request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DriveError::UpstreamStorage(format!(
                "read returned HTTP {}",
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| DriveError::UpstreamStorage(format!("read stream: {}", e)))
            })
            .boxed();
        Ok(stream)
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    // A trailing slash keeps Url::join from dropping the last path segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| DriveError::Config(format!("invalid Walrus URL {:?}: {}", raw, e)))
}
