//! Deploy lifecycle hooks
//!
//! Maps the deploy pipeline's hooks onto [`RevisionStore`] calls:
//! - `upload`: push every matching index file under the dist dir
//! - `will_activate`: remember the revision that was live before
//! - `activate`: switch the active pointer (and content mirror)
//! - `did_deploy`: tell the user how to activate an uploaded revision
//! - `fetch_revisions` / `fetch_initial_revisions`: list history

use crate::config::{ConfigError, DeployContext, PluginConfig, ResolvedConfig, RevisionData};
use crate::redis_store::RedisStore;
use crate::revision_store::{RevisionError, RevisionRecord, RevisionStore, DEFAULT_REVISION_KEY};
use crate::storage::{KvStore, StorageError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Errors surfaced by lifecycle hooks
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("No index files found using pattern: {pattern}")]
    NoIndexFiles { pattern: String },

    #[error("Dist dir is not valid UTF-8: {}", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("{} is not inside the dist dir", path.display())]
    OutsideDistDir { path: PathBuf },

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to read {0}")]
    Glob(#[from] glob::GlobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for lifecycle hooks
pub type Result<T> = std::result::Result<T, PluginError>;

/// One uploaded index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Directory of the file relative to the dist dir (`.` for the root)
    pub path: String,
    pub redis_key: String,
}

/// Deploy plugin bound to one resolved configuration
pub struct DeployPlugin {
    config: ResolvedConfig,
    store: RevisionStore,
}

impl DeployPlugin {
    /// Resolve `config` against `context` (the configure hook)
    pub fn configure(config: &PluginConfig, context: &DeployContext) -> Result<ResolvedConfig> {
        Ok(config.resolve(context)?)
    }

    /// Plugin backed by a Redis connection built from the config
    pub async fn connect(config: ResolvedConfig) -> Result<Self> {
        let backend = RedisStore::connect(&config.connection_options()).await?;
        Ok(Self::with_store(config, Arc::new(backend)))
    }

    /// Plugin backed by any store
    pub fn with_store(config: ResolvedConfig, backend: Arc<dyn KvStore>) -> Self {
        let store = RevisionStore::new(backend, config.store_options());
        Self { config, store }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Upload every `{distDir}/**/{filePattern}` match.
    ///
    /// Files in a subdirectory `d` go under the key prefix with `:index`
    /// replaced by `:d:index`. The dist dir is matched literally, so glob
    /// metacharacters in its name are not expanded.
    pub async fn upload(&self) -> Result<Vec<UploadedFile>> {
        let dist_dir = self.config.dist_dir.value();
        let dist_dir_str = dist_dir.to_str().ok_or_else(|| PluginError::NonUtf8Path {
            path: dist_dir.clone(),
        })?;
        let pattern = format!(
            "{}/**/{}",
            glob::Pattern::escape(dist_dir_str.trim_end_matches('/')),
            self.config.file_pattern.value()
        );

        let mut file_paths = Vec::new();
        for entry in glob::glob(&pattern)? {
            file_paths.push(entry?);
        }

        if file_paths.is_empty() {
            let err = PluginError::NoIndexFiles { pattern };
            error!("{}", err);
            return Err(err);
        }

        let mut uploaded = Vec::with_capacity(file_paths.len());
        for file_path in file_paths {
            debug!("Uploading `{}`", file_path.display());
            match self.upload_file(dist_dir, &file_path).await {
                Ok(file) => {
                    info!("Uploaded with key `{}`", file.redis_key);
                    uploaded.push(file);
                }
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }
        }
        Ok(uploaded)
    }

    async fn upload_file(&self, dist_dir: &Path, file_path: &Path) -> Result<UploadedFile> {
        let contents = tokio::fs::read(file_path).await?;
        let directory = directory_name(dist_dir, file_path)?;
        let key_prefix = prefix_for_directory(self.config.key_prefix.value(), &directory);

        let redis_key = self
            .store
            .upload(
                &key_prefix,
                self.config.revision_key.value().as_deref(),
                Some(self.config.activation_suffix.value().as_str()),
                self.config.revision_data.value().as_ref(),
                Bytes::from(contents),
            )
            .await?;

        Ok(UploadedFile {
            path: directory,
            redis_key,
        })
    }

    /// Record the revision that is active before activation
    pub async fn will_activate(&self) -> Result<RevisionData> {
        let previous_revision_key = self
            .store
            .active_revision(self.config.key_prefix.value(), None)
            .await?;

        Ok(RevisionData {
            previous_revision_key,
            ..Default::default()
        })
    }

    /// Activate the configured revision
    pub async fn activate(&self) -> Result<RevisionData> {
        let revision_key = self
            .config
            .revision_key
            .value()
            .clone()
            .unwrap_or_else(|| DEFAULT_REVISION_KEY.to_string());

        debug!("Activating revision `{}`", revision_key);
        let result = self
            .store
            .activate(
                self.config.key_prefix.value(),
                &revision_key,
                Some(self.config.activation_suffix.value().as_str()),
                self.config.active_content_suffix.value().as_deref(),
            )
            .await;

        match result {
            Ok(()) => {
                info!("✔ Activated revision `{}`", revision_key);
                Ok(RevisionData {
                    activated_revision_key: Some(revision_key),
                    ..Default::default()
                })
            }
            Err(e) => {
                error!("{}", e);
                Err(e.into())
            }
        }
    }

    /// Message to show once the deploy finished, if any
    pub fn did_deploy(&self, context: &DeployContext) -> Option<String> {
        let message = self
            .config
            .did_deploy_message
            .clone()
            .or_else(|| default_did_deploy_message(context));

        if let Some(message) = &message {
            info!("{}", message);
        }
        message
    }

    /// Revisions present before the deploy started
    pub async fn fetch_initial_revisions(&self) -> Result<Vec<RevisionRecord>> {
        self.fetch().await
    }

    /// Current revision list
    pub async fn fetch_revisions(&self) -> Result<Vec<RevisionRecord>> {
        self.fetch().await
    }

    async fn fetch(&self) -> Result<Vec<RevisionRecord>> {
        let key_prefix = self.config.key_prefix.value();
        debug!("Fetching revisions for key: `{}`", key_prefix);

        self.store
            .fetch_revisions(key_prefix, Some(self.config.activation_suffix.value().as_str()))
            .await
            .map_err(|e| {
                error!("{}", e);
                e.into()
            })
    }
}

/// Hint shown when a revision was uploaded but not activated
pub fn default_did_deploy_message(context: &DeployContext) -> Option<String> {
    let data = &context.revision_data;
    match (&data.revision_key, &data.activated_revision_key) {
        (Some(revision_key), None) => Some(format!(
            "Deployed but did not activate revision {key}. \
             To activate, run: deploy-redis activate {target} --revision={key}\n",
            key = revision_key,
            target = context.deploy_target,
        )),
        _ => None,
    }
}

/// Directory of `file_path` relative to `dist_dir`, `.` for the root.
///
/// `./` components are ignored on both sides, since glob drops them from the
/// paths it yields.
fn directory_name(dist_dir: &Path, file_path: &Path) -> Result<String> {
    let dist_dir = without_cur_dir(dist_dir);
    let file_path = without_cur_dir(file_path);
    let relative = file_path
        .strip_prefix(&dist_dir)
        .map_err(|_| PluginError::OutsideDistDir {
            path: file_path.clone(),
        })?;

    Ok(match relative.parent() {
        Some(parent) if parent != Path::new("") => parent.to_string_lossy().replace('\\', "/"),
        _ => ".".to_string(),
    })
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Key prefix for files living in `directory` under the dist dir
fn prefix_for_directory(key_prefix: &str, directory: &str) -> String {
    if directory.is_empty() || directory == "." {
        key_prefix.to_string()
    } else {
        key_prefix.replacen(":index", &format!(":{}:index", directory), 1)
    }
}
