//! Key-space layout for one key prefix.
//!
//! Every key is `{prefix}:{suffix}`. Nothing is escaped, so a revision key
//! containing `:` can collide with another key's path. Callers are expected
//! to keep colons out of revision keys.

/// Suffix of the sorted set holding upload history
pub const HISTORY_SUFFIX: &str = "revisions";

/// Path segment of per-revision metadata keys
pub const METADATA_SEGMENT: &str = "revision-data";

/// Builds the keys used under a single prefix
#[derive(Debug, Clone)]
pub struct RevisionKeys {
    prefix: String,
}

impl RevisionKeys {
    /// Keys under `prefix`, e.g. `myapp:index`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The prefix itself
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Artifact key: `{prefix}:{revision}`
    pub fn artifact(&self, revision_key: &str) -> String {
        self.suffixed(revision_key)
    }

    /// History sorted set: `{prefix}:revisions`
    pub fn history(&self) -> String {
        self.suffixed(HISTORY_SUFFIX)
    }

    /// Metadata key: `{prefix}:revision-data:{revision}`
    pub fn metadata(&self, revision_key: &str) -> String {
        format!("{}:{}:{}", self.prefix, METADATA_SEGMENT, revision_key)
    }

    /// Any other key under the prefix (active pointer, content mirror)
    pub fn suffixed(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }
}
