// S3-compatible bucket store for artifact records.

use crate::errors::StoreError;
use crate::models::ArtifactRecord;
use crate::store::{ArtifactStore, Versioned};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

/// On-bucket envelope: the record plus the revision it was written at
#[derive(Debug, Serialize, Deserialize)]
struct StoredArtifact {
    record: ArtifactRecord,
    revision: u64,
}

/// Bucket-backed artifact store. The revision check is read-then-write since
/// plain object storage has no conditional put; the deployment runs one
/// watcher process per bucket key.
#[derive(Clone)]
pub struct BucketStore {
    bucket: Arc<Bucket>,
}

impl BucketStore {
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket))]
    pub fn new(config: &BucketConfig) -> Result<Self, StoreError> {
        info!("Initializing bucket store");

        // rust-s3's custom region expects the endpoint without a scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create bucket credentials");
            StoreError::Backend(format!("failed to create credentials: {}", e))
        })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create bucket handle");
                StoreError::Backend(format!("failed to create bucket: {}", e))
            })?
            .with_path_style();

        Ok(Self {
            bucket: Arc::new(bucket),
        })
    }

    fn object_path(key: &str) -> String {
        format!("artifacts/{}.json", key)
    }
}

#[async_trait]
impl ArtifactStore for BucketStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn load(&self, key: &str) -> Result<Option<Versioned<ArtifactRecord>>, StoreError> {
        let path = Self::object_path(key);

        let response = match self.bucket.get_object(&path).await {
            Ok(response) => response,
            Err(e) => {
                let reason = e.to_string();
                if reason.contains("404") || reason.contains("NoSuchKey") {
                    debug!(path = %path, "No artifact record stored yet");
                    return Ok(None);
                }
                error!(error = %reason, path = %path, "Failed to load artifact record");
                return Err(StoreError::Backend(format!(
                    "failed to get object '{}': {}",
                    path, reason
                )));
            }
        };

        let stored: StoredArtifact = serde_json::from_slice(response.bytes())?;
        debug!(path = %path, revision = stored.revision, "Artifact record loaded");
        Ok(Some(Versioned {
            value: stored.record,
            revision: stored.revision,
        }))
    }

    #[instrument(skip(self, record), fields(key = %key, expected = ?expected))]
    async fn save(
        &self,
        key: &str,
        record: &ArtifactRecord,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let found = self.load(key).await?.map(|v| v.revision);
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        let next = found.map_or(1, |r| r + 1);
        let stored = StoredArtifact {
            record: record.clone(),
            revision: next,
        };
        let payload = serde_json::to_vec(&stored)?;

        let path = Self::object_path(key);
        self.bucket.put_object(&path, &payload).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to store artifact record");
            StoreError::Backend(format!("failed to put object '{}': {}", path, e))
        })?;

        debug!(path = %path, revision = next, "Artifact record stored");
        Ok(next)
    }
}
