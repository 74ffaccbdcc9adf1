//! Deploy configuration
//!
//! Settings come from a TOML file (base values plus optional
//! `[targets.<name>]` overrides). Unset values fall back to defaults, some of
//! which depend on the [`DeployContext`]. Resolution happens once; the
//! resulting [`ResolvedConfig`] records where every value came from.

use crate::redis_store::{ConnectionOptions, DEFAULT_PORT};
use crate::revision_store::{
    StoreOptions, DEFAULT_ACTIVATION_SUFFIX, DEFAULT_MAX_RECENT_UPLOADS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default index file name searched under the dist dir
pub const DEFAULT_FILE_PATTERN: &str = "index.html";

/// Default suffix of the active content mirror
pub const DEFAULT_ACTIVE_CONTENT_SUFFIX: &str = "current-content";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Your Redis URL appears to be missing the \"redis://\" protocol. Update your URL to: redis://{url}"
    )]
    MissingProtocol { url: String },

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown deploy target: {0}")]
    UnknownTarget(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Plugin settings as written in the config file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub database: Option<i64>,
    pub file_pattern: Option<String>,
    pub dist_dir: Option<PathBuf>,
    pub key_prefix: Option<String>,
    pub activation_suffix: Option<String>,
    /// An empty string disables the content mirror
    pub active_content_suffix: Option<String>,
    pub revision_key: Option<String>,
    pub max_recent_uploads: Option<usize>,
    pub allow_overwrite: Option<bool>,
    pub revision_data: Option<serde_json::Value>,
    pub did_deploy_message: Option<String>,
}

/// Whole config file: base settings plus per-target overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployConfigFile {
    #[serde(flatten)]
    pub base: PluginConfig,
    #[serde(default)]
    pub targets: HashMap<String, PluginConfig>,
}

impl DeployConfigFile {
    /// Parse a config file from TOML text
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Base settings with the target's overrides applied.
    ///
    /// A file without any `[targets]` accepts every target name.
    pub fn for_target(&self, target: &str) -> Result<PluginConfig, ConfigError> {
        if self.targets.is_empty() {
            return Ok(self.base.clone());
        }
        let overrides = self
            .targets
            .get(target)
            .ok_or_else(|| ConfigError::UnknownTarget(target.to_string()))?;
        Ok(self.base.clone().merged(overrides.clone()))
    }
}

impl PluginConfig {
    /// Values from `overrides` win over `self`
    pub fn merged(self, overrides: PluginConfig) -> PluginConfig {
        PluginConfig {
            url: overrides.url.or(self.url),
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            password: overrides.password.or(self.password),
            database: overrides.database.or(self.database),
            file_pattern: overrides.file_pattern.or(self.file_pattern),
            dist_dir: overrides.dist_dir.or(self.dist_dir),
            key_prefix: overrides.key_prefix.or(self.key_prefix),
            activation_suffix: overrides.activation_suffix.or(self.activation_suffix),
            active_content_suffix: overrides.active_content_suffix.or(self.active_content_suffix),
            revision_key: overrides.revision_key.or(self.revision_key),
            max_recent_uploads: overrides.max_recent_uploads.or(self.max_recent_uploads),
            allow_overwrite: overrides.allow_overwrite.or(self.allow_overwrite),
            revision_data: overrides.revision_data.or(self.revision_data),
            did_deploy_message: overrides.did_deploy_message.or(self.did_deploy_message),
        }
    }

    /// Validate and fill in defaults against `context`
    pub fn resolve(&self, context: &DeployContext) -> Result<ResolvedConfig, ConfigError> {
        debug!("validating config");

        let (host, port) = match &self.url {
            Some(url) => {
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    return Err(ConfigError::MissingProtocol { url: url.clone() });
                }
                (None, None)
            }
            None => (
                Some(resolve("host", self.host.clone(), || "localhost".to_string())),
                Some(resolve("port", self.port, || {
                    context.tunnel_port.unwrap_or(DEFAULT_PORT)
                })),
            ),
        };

        let active_content_suffix = match &self.active_content_suffix {
            Some(suffix) => Resolved::configured(Some(suffix.clone()).filter(|s| !s.is_empty())),
            None => resolve("activeContentSuffix", None, || {
                Some(DEFAULT_ACTIVE_CONTENT_SUFFIX.to_string())
            }),
        };

        let revision_data = match &self.revision_data {
            Some(data) => Resolved::configured(Some(data.clone())),
            None => {
                let data = if context.revision_data.is_empty() {
                    None
                } else {
                    Some(serde_json::to_value(&context.revision_data)?)
                };
                resolve("revisionData", None, || data)
            }
        };

        let resolved = ResolvedConfig {
            url: self.url.clone(),
            host,
            port,
            password: self.password.clone(),
            database: self.database,
            file_pattern: resolve("filePattern", self.file_pattern.clone(), || {
                DEFAULT_FILE_PATTERN.to_string()
            }),
            dist_dir: resolve("distDir", self.dist_dir.clone(), || context.dist_dir.clone()),
            key_prefix: resolve("keyPrefix", self.key_prefix.clone(), || {
                format!("{}:index", context.project_name)
            }),
            activation_suffix: resolve("activationSuffix", self.activation_suffix.clone(), || {
                DEFAULT_ACTIVATION_SUFFIX.to_string()
            }),
            active_content_suffix,
            revision_key: match &self.revision_key {
                Some(key) => Resolved::configured(Some(key.clone())),
                None => resolve("revisionKey", None, || {
                    context
                        .command_revision
                        .clone()
                        .or_else(|| context.revision_data.revision_key.clone())
                }),
            },
            max_recent_uploads: resolve("maxRecentUploads", self.max_recent_uploads, || {
                DEFAULT_MAX_RECENT_UPLOADS
            }),
            allow_overwrite: resolve("allowOverwrite", self.allow_overwrite, || false),
            revision_data,
            did_deploy_message: self.did_deploy_message.clone(),
        };

        debug!("config ok");
        Ok(resolved)
    }
}

/// Revision bookkeeping shared between lifecycle hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_revision_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_revision_key: Option<String>,
    /// Anything else other tooling attached (build timestamp, git sha, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RevisionData {
    /// True when nothing at all has been recorded
    pub fn is_empty(&self) -> bool {
        self.revision_key.is_none()
            && self.previous_revision_key.is_none()
            && self.activated_revision_key.is_none()
            && self.extra.is_empty()
    }

    /// Fold a hook's result into this record; set fields in `other` win
    pub fn merge(&mut self, other: RevisionData) {
        if other.revision_key.is_some() {
            self.revision_key = other.revision_key;
        }
        if other.previous_revision_key.is_some() {
            self.previous_revision_key = other.previous_revision_key;
        }
        if other.activated_revision_key.is_some() {
            self.activated_revision_key = other.activated_revision_key;
        }
        self.extra.extend(other.extra);
    }
}

/// State of the deploy run that defaults are derived from
#[derive(Debug, Clone)]
pub struct DeployContext {
    pub project_name: String,
    pub dist_dir: PathBuf,
    pub deploy_target: String,
    /// `--revision` passed on the command line
    pub command_revision: Option<String>,
    /// Local port of an SSH tunnel to Redis, if one is open
    pub tunnel_port: Option<u16>,
    pub revision_data: RevisionData,
}

impl DeployContext {
    /// Context for `project_name`, building into `dist`
    pub fn new(project_name: impl Into<String>, deploy_target: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            dist_dir: PathBuf::from("dist"),
            deploy_target: deploy_target.into(),
            command_revision: None,
            tunnel_port: None,
            revision_data: RevisionData::default(),
        }
    }
}

/// Where a resolved setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Configured,
    Default,
}

/// A setting after resolution, with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    value: T,
    origin: Origin,
}

impl<T> Resolved<T> {
    /// A value taken from the config file
    pub fn configured(value: T) -> Self {
        Self {
            value,
            origin: Origin::Configured,
        }
    }

    /// A fallback value
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            origin: Origin::Default,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }
}

impl<T> Deref for Resolved<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

fn resolve<T: Debug>(name: &str, configured: Option<T>, default: impl FnOnce() -> T) -> Resolved<T> {
    match configured {
        Some(value) => Resolved::configured(value),
        None => {
            let value = default();
            debug!("Missing config: `{}`, using default: `{:?}`", name, value);
            Resolved::default_value(value)
        }
    }
}

/// Settings ready for use by the deploy plugin
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub url: Option<String>,
    /// Only resolved when no URL is configured
    pub host: Option<Resolved<String>>,
    /// Only resolved when no URL is configured
    pub port: Option<Resolved<u16>>,
    pub password: Option<String>,
    pub database: Option<i64>,
    pub file_pattern: Resolved<String>,
    pub dist_dir: Resolved<PathBuf>,
    pub key_prefix: Resolved<String>,
    pub activation_suffix: Resolved<String>,
    pub active_content_suffix: Resolved<Option<String>>,
    pub revision_key: Resolved<Option<String>>,
    pub max_recent_uploads: Resolved<usize>,
    pub allow_overwrite: Resolved<bool>,
    pub revision_data: Resolved<Option<serde_json::Value>>,
    /// Literal override for the post-deploy message
    pub did_deploy_message: Option<String>,
}

impl ResolvedConfig {
    /// How to reach Redis
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            url: self.url.clone(),
            host: self.host.as_ref().map(|h| h.value().clone()),
            port: self.port.as_ref().map(|p| *p.value()),
            password: self.password.clone(),
            database: self.database,
        }
    }

    /// Options for the revision store
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_recent_uploads: *self.max_recent_uploads,
            allow_overwrite: *self.allow_overwrite,
            activation_suffix: self.activation_suffix.value().clone(),
        }
    }
}
