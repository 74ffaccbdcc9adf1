//! In-memory store
//!
//! A `KvStore` kept entirely in process. Used for dry runs and tests; it
//! mirrors the Redis ordering rules the revision store relies on.

use crate::storage::{KvStore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Sorted set entry: (score, member)
type ScoredMember = (f64, String);

/// In-memory key/value and sorted-set store
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Plain string values
    values: Arc<RwLock<HashMap<String, Bytes>>>,

    /// Sorted sets, each kept ordered by (score, member)
    sorted_sets: Arc<RwLock<HashMap<String, Vec<ScoredMember>>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no plain keys are stored
    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    /// Score of `member` in the sorted set at `key`
    pub async fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        let sets = self.sorted_sets.read().await;
        sets.get(key)?
            .iter()
            .find(|(_, m)| m == member)
            .map(|(score, _)| *score)
    }
}

/// Redis tie-break: equal scores order by member bytes
fn compare(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.as_bytes().cmp(b.1.as_bytes()))
}

/// Resolve a Redis-style `start..=stop` range against a set of `len` items.
///
/// Negative indices count from the end and out-of-range bounds are clamped.
/// Returns `None` when the range selects nothing.
pub(crate) fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        self.sorted_sets.write().await.remove(key);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let values = self.values.read().await;
        Ok(keys.iter().map(|k| values.get(k).cloned()).collect())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut sets = self.sorted_sets.write().await;
        let set = sets.entry(key.to_string()).or_default();

        set.retain(|(_, m)| m != member);
        let entry = (score, member.to_string());
        let pos = set
            .binary_search_by(|probe| compare(probe, &entry))
            .unwrap_or_else(|p| p);
        set.insert(pos, entry);
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let sets = self.sorted_sets.read().await;
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match range_bounds(set.len(), start, stop) {
            Some((from, to)) => set[from..=to].iter().map(|(_, m)| m.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let sets = self.sorted_sets.read().await;
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match range_bounds(set.len(), start, stop) {
            Some((from, to)) => set
                .iter()
                .rev()
                .skip(from)
                .take(to - from + 1)
                .map(|(_, m)| m.clone())
                .collect(),
            None => Vec::new(),
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sorted_sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.retain(|(_, m)| m != member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }
}
