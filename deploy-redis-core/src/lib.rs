//! deploy-redis Core Library
//!
//! Core functionality for deploy-redis including:
//! - Storage abstraction (`KvStore`) with Redis and in-memory backends
//! - Revision store: bounded upload history, activation pointer, metadata
//! - Deploy configuration and context-dependent defaults
//! - Deploy lifecycle hooks (upload, activate, list revisions)

pub mod clock;
pub mod config;
pub mod keys;
pub mod memory;
pub mod plugin;
pub mod redis_store;
pub mod revision_store;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConfigError, DeployConfigFile, DeployContext, Origin, PluginConfig, Resolved, ResolvedConfig,
    RevisionData,
};
pub use keys::RevisionKeys;
pub use memory::MemoryStore;
pub use plugin::{DeployPlugin, PluginError, UploadedFile};
pub use redis_store::{ConnectionOptions, RedisStore};
pub use revision_store::{RevisionError, RevisionRecord, RevisionStore, StoreOptions};
pub use storage::{KvStore, Result, StorageError};
