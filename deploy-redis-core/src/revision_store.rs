//! Bounded revision store with an activation pointer
//!
//! Layout under a key prefix `P`:
//! - `P:{revision}`: uploaded artifact
//! - `P:revisions`: sorted set of revision keys scored by upload time (ms)
//! - `P:revision-data:{revision}`: optional JSON metadata
//! - `P:{activation suffix}`: key of the active revision
//! - `P:{active content suffix}`: optional copy of the active artifact
//!
//! Operations are plain sequences of backend calls. Nothing is rolled back if
//! a later step fails, and the duplicate check in `upload` is a read followed
//! by a write, so two deploys racing on the same key can both pass it.

use crate::clock::{Clock, SystemClock};
use crate::keys::RevisionKeys;
use crate::storage::{utf8_value, KvStore, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Revision key used when the caller does not supply one
pub const DEFAULT_REVISION_KEY: &str = "default";

/// Default activation pointer suffix
pub const DEFAULT_ACTIVATION_SUFFIX: &str = "current";

/// Default number of uploads kept in history
pub const DEFAULT_MAX_RECENT_UPLOADS: usize = 10;

/// Errors raised by revision store operations
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("Value already exists for key: {key}")]
    DuplicateRevision { key: String },

    #[error("`{revision_key}` is not a valid revision key")]
    InvalidRevision { revision_key: String },

    #[error("No artifact stored at {key}")]
    MissingArtifact { key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for revision store operations
pub type Result<T> = std::result::Result<T, RevisionError>;

/// Store-wide settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Uploads kept in history before trimming kicks in
    pub max_recent_uploads: usize,
    /// Permit replacing an existing artifact
    pub allow_overwrite: bool,
    /// Suffix used for the active pointer when none is passed explicitly
    pub activation_suffix: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_recent_uploads: DEFAULT_MAX_RECENT_UPLOADS,
            allow_overwrite: false,
            activation_suffix: DEFAULT_ACTIVATION_SUFFIX.to_string(),
        }
    }
}

/// One entry of `fetch_revisions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    pub revision: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_data: Option<serde_json::Value>,
}

/// Revision store over any [`KvStore`]
#[derive(Clone)]
pub struct RevisionStore {
    backend: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
}

impl RevisionStore {
    /// Create a store using the wall clock for history scores
    pub fn new(backend: Arc<dyn KvStore>, options: StoreOptions) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    /// Replace the clock used for history scores
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upload an artifact as `revision_key` and record it in history.
    ///
    /// Returns the artifact key. Fails with [`RevisionError::DuplicateRevision`]
    /// before writing anything if the key is already populated and overwrite
    /// is disabled. After the upload, history is trimmed to
    /// `max_recent_uploads` entries, never evicting the revision the
    /// `activation_suffix` pointer names.
    pub async fn upload(
        &self,
        key_prefix: &str,
        revision_key: Option<&str>,
        activation_suffix: Option<&str>,
        revision_metadata: Option<&serde_json::Value>,
        artifact: Bytes,
    ) -> Result<String> {
        let keys = RevisionKeys::new(key_prefix);
        let revision_key = revision_key
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_REVISION_KEY);
        let redis_key = keys.artifact(revision_key);

        self.upload_if_absent(&redis_key, artifact).await?;

        if let Some(metadata) = revision_metadata {
            let json = serde_json::to_vec(metadata)?;
            self.backend
                .set(&keys.metadata(revision_key), Bytes::from(json))
                .await?;
        }

        let score = self.clock.now_millis() as f64;
        self.backend
            .zadd(&keys.history(), score, revision_key)
            .await?;

        self.trim_history(&keys, activation_suffix).await?;

        info!("Uploaded revision {} to {}", revision_key, redis_key);
        Ok(redis_key)
    }

    /// Point the activation suffix at `revision_key`.
    ///
    /// With `active_content_suffix`, the artifact is first copied to that key
    /// so the mirror is written before the pointer moves.
    pub async fn activate(
        &self,
        key_prefix: &str,
        revision_key: &str,
        activation_suffix: Option<&str>,
        active_content_suffix: Option<&str>,
    ) -> Result<()> {
        let keys = RevisionKeys::new(key_prefix);
        let revisions = self.list_revisions(&keys).await?;

        if !revisions.iter().any(|r| r == revision_key) {
            return Err(RevisionError::InvalidRevision {
                revision_key: revision_key.to_string(),
            });
        }

        if let Some(content_suffix) = active_content_suffix {
            let revision_content_key = keys.artifact(revision_key);
            let content = self
                .backend
                .get(&revision_content_key)
                .await?
                .ok_or(RevisionError::MissingArtifact {
                    key: revision_content_key,
                })?;
            self.backend
                .set(&keys.suffixed(content_suffix), content)
                .await?;
        }

        let current_key = keys.suffixed(self.activation_suffix(activation_suffix));
        self.backend
            .set(&current_key, Bytes::from(revision_key.to_string()))
            .await?;

        debug!("{} now points at {}", current_key, revision_key);
        Ok(())
    }

    /// Revision currently marked active, if any
    pub async fn active_revision(
        &self,
        key_prefix: &str,
        activation_suffix: Option<&str>,
    ) -> Result<Option<String>> {
        let current_key =
            RevisionKeys::new(key_prefix).suffixed(self.activation_suffix(activation_suffix));

        match self.backend.get(&current_key).await? {
            Some(value) => Ok(Some(utf8_value(&current_key, value)?)),
            None => Ok(None),
        }
    }

    /// All revisions in history, newest first, with active flag and metadata
    pub async fn fetch_revisions(
        &self,
        key_prefix: &str,
        activation_suffix: Option<&str>,
    ) -> Result<Vec<RevisionRecord>> {
        let keys = RevisionKeys::new(key_prefix);
        let revisions = self.list_revisions(&keys).await?;

        let (current, revision_data) = tokio::try_join!(
            self.active_revision(key_prefix, activation_suffix),
            self.revision_data(&keys, &revisions),
        )?;

        Ok(revisions
            .into_iter()
            .zip(revision_data)
            .map(|(revision, revision_data)| RevisionRecord {
                active: current.as_deref() == Some(revision.as_str()),
                revision,
                revision_data,
            })
            .collect())
    }

    fn activation_suffix<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .filter(|s| !s.is_empty())
            .unwrap_or(self.options.activation_suffix.as_str())
    }

    async fn list_revisions(&self, keys: &RevisionKeys) -> Result<Vec<String>> {
        Ok(self.backend.zrevrange(&keys.history(), 0, -1).await?)
    }

    /// Metadata for each revision, one slot per revision
    async fn revision_data(
        &self,
        keys: &RevisionKeys,
        revisions: &[String],
    ) -> Result<Vec<Option<serde_json::Value>>> {
        if revisions.is_empty() {
            return Ok(Vec::new());
        }

        let data_keys: Vec<String> = revisions.iter().map(|r| keys.metadata(r)).collect();
        let values = self.backend.mget(&data_keys).await?;

        let mut data = Vec::with_capacity(revisions.len());
        for i in 0..revisions.len() {
            let parsed: Option<serde_json::Value> = match values.get(i).and_then(|v| v.as_ref()) {
                Some(raw) => Some(serde_json::from_slice(raw)?),
                None => None,
            };
            data.push(parsed);
        }
        Ok(data)
    }

    async fn upload_if_absent(&self, redis_key: &str, artifact: Bytes) -> Result<()> {
        let existing = self.backend.get(redis_key).await?;

        if existing.is_some_and(|v| !v.is_empty()) && !self.options.allow_overwrite {
            return Err(RevisionError::DuplicateRevision {
                key: redis_key.to_string(),
            });
        }

        self.backend.set(redis_key, artifact).await?;
        Ok(())
    }

    /// Drop everything older than the retention window except the active revision
    async fn trim_history(&self, keys: &RevisionKeys, activation_suffix: Option<&str>) -> Result<()> {
        let history_key = keys.history();
        let stop = -(self.options.max_recent_uploads as isize) - 1;

        let (candidates, current) = tokio::try_join!(
            async {
                self.backend
                    .zrange(&history_key, 0, stop)
                    .await
                    .map_err(RevisionError::from)
            },
            self.active_revision(keys.prefix(), activation_suffix),
        )?;

        for revision in candidates {
            if current.as_deref() == Some(revision.as_str()) {
                debug!("Keeping active revision {} outside retention window", revision);
                continue;
            }

            self.backend.del(&keys.artifact(&revision)).await?;
            self.backend.del(&keys.metadata(&revision)).await?;
            self.backend.zrem(&history_key, &revision).await?;
            debug!("Trimmed revision {} from {}", revision, history_key);
        }
        Ok(())
    }
}
