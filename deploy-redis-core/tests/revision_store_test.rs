//! Revision store integration tests against the in-memory backend

use async_trait::async_trait;
use bytes::Bytes;
use deploy_redis_core::{
    Clock, KvStore, MemoryStore, RevisionError, RevisionStore, StoreOptions,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Clock advancing one millisecond per call
struct StepClock(AtomicI64);

impl Clock for StepClock {
    fn now_millis(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn create_store(options: StoreOptions) -> (RevisionStore, MemoryStore) {
    let backend = MemoryStore::new();
    let store = RevisionStore::new(Arc::new(backend.clone()), options)
        .with_clock(Arc::new(StepClock(AtomicI64::new(1_700_000_000_000))));
    (store, backend)
}

async fn upload_all(store: &RevisionStore, prefix: &str, revisions: impl IntoIterator<Item = u32>) {
    for rev in revisions {
        let key = rev.to_string();
        store
            .upload(prefix, Some(&key), None, None, Bytes::from(format!("content {}", rev)))
            .await
            .unwrap();
    }
}

/// Records every mutating call before forwarding to an inner store
struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
        }
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, op: &str, key: &str) {
        self.writes.lock().unwrap().push(format!("{} {}", op, key));
    }
}

#[async_trait]
impl KvStore for RecordingStore {
    async fn get(&self, key: &str) -> deploy_redis_core::Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> deploy_redis_core::Result<()> {
        self.record("SET", key);
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> deploy_redis_core::Result<()> {
        self.record("DEL", key);
        self.inner.del(key).await
    }

    async fn mget(&self, keys: &[String]) -> deploy_redis_core::Result<Vec<Option<Bytes>>> {
        self.inner.mget(keys).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> deploy_redis_core::Result<()> {
        self.record("ZADD", &format!("{} {}", key, member));
        self.inner.zadd(key, score, member).await
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> deploy_redis_core::Result<Vec<String>> {
        self.inner.zrange(key, start, stop).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> deploy_redis_core::Result<Vec<String>> {
        self.inner.zrevrange(key, start, stop).await
    }

    async fn zrem(&self, key: &str, member: &str) -> deploy_redis_core::Result<()> {
        self.record("ZREM", &format!("{} {}", key, member));
        self.inner.zrem(key, member).await
    }
}

#[tokio::test]
async fn test_upload_key_construction() {
    let (store, backend) = create_store(StoreOptions::default());

    let key = store
        .upload("proj:index", Some("7"), None, None, Bytes::from("bytes"))
        .await
        .unwrap();

    assert_eq!(key, "proj:index:7");
    assert_eq!(backend.get("proj:index:7").await.unwrap().unwrap(), "bytes");
    assert_eq!(
        backend.zrange("proj:index:revisions", 0, -1).await.unwrap(),
        vec!["7"]
    );
}

#[tokio::test]
async fn test_duplicate_upload_is_rejected() {
    let (store, backend) = create_store(StoreOptions::default());

    store.upload("app", Some("1"), None, None, Bytes::from("first")).await.unwrap();
    let err = store
        .upload("app", Some("1"), None, None, Bytes::from("second"))
        .await
        .unwrap_err();

    assert!(matches!(err, RevisionError::DuplicateRevision { ref key } if key == "app:1"));
    assert_eq!(backend.get("app:1").await.unwrap().unwrap(), "first");
}

#[tokio::test]
async fn test_duplicate_upload_writes_nothing() {
    let memory = MemoryStore::new();
    memory.set("app:1", Bytes::from("first")).await.unwrap();
    let recording = Arc::new(RecordingStore::new(memory));
    let store = RevisionStore::new(recording.clone(), StoreOptions::default());

    let metadata = serde_json::json!({"a": 1});
    let result = store
        .upload("app", Some("1"), None, Some(&metadata), Bytes::from("second"))
        .await;

    assert!(result.is_err());
    assert!(recording.writes().is_empty());
}

#[tokio::test]
async fn test_overwrite_allowed() {
    let (store, backend) = create_store(StoreOptions {
        allow_overwrite: true,
        ..Default::default()
    });

    store.upload("app", Some("1"), None, None, Bytes::from("first")).await.unwrap();
    store.upload("app", Some("1"), None, None, Bytes::from("second")).await.unwrap();

    assert_eq!(backend.get("app:1").await.unwrap().unwrap(), "second");
    assert_eq!(backend.zrange("app:revisions", 0, -1).await.unwrap(), vec!["1"]);
}

#[tokio::test]
async fn test_history_growth_newest_first() {
    let (store, _) = create_store(StoreOptions::default());
    upload_all(&store, "app", 1..=6).await;

    let revisions = store.fetch_revisions("app", None).await.unwrap();
    let keys: Vec<&str> = revisions.iter().map(|r| r.revision.as_str()).collect();
    assert_eq!(keys, vec!["6", "5", "4", "3", "2", "1"]);
    assert!(revisions.iter().all(|r| !r.active));
}

#[tokio::test]
async fn test_retention_trimming() {
    let (store, backend) = create_store(StoreOptions {
        max_recent_uploads: 3,
        ..Default::default()
    });

    for rev in 1..=5u32 {
        let key = rev.to_string();
        let metadata = serde_json::json!({ "rev": rev });
        store
            .upload("app", Some(&key), None, Some(&metadata), Bytes::from("x"))
            .await
            .unwrap();
    }

    assert_eq!(
        backend.zrevrange("app:revisions", 0, -1).await.unwrap(),
        vec!["5", "4", "3"]
    );
    for trimmed in ["1", "2"] {
        assert!(backend.get(&format!("app:{}", trimmed)).await.unwrap().is_none());
        assert!(backend
            .get(&format!("app:revision-data:{}", trimmed))
            .await
            .unwrap()
            .is_none());
    }
    assert!(backend.get("app:3").await.unwrap().is_some());
    assert!(backend.get("app:revision-data:3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_default_window_keeps_ten() {
    let (store, backend) = create_store(StoreOptions::default());
    upload_all(&store, "key", 1..=12).await;

    let history = backend.zrange("key:revisions", 0, -1).await.unwrap();
    let expected: Vec<String> = (3..=12).map(|i| i.to_string()).collect();
    assert_eq!(history, expected);
}

#[tokio::test]
async fn test_active_revision_survives_trimming() {
    let (store, backend) = create_store(StoreOptions::default());
    upload_all(&store, "key", 1..=10).await;
    store.activate("key", "1", None, None).await.unwrap();
    upload_all(&store, "key", 11..=13).await;

    let history = backend.zrange("key:revisions", 0, -1).await.unwrap();
    assert_eq!(history.first().map(String::as_str), Some("1"));
    assert!(!history.contains(&"2".to_string()));
    assert!(!history.contains(&"3".to_string()));
    assert_eq!(history.len(), 11);
    assert!(backend.get("key:1").await.unwrap().is_some());
    assert!(backend.get("key:2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_trim_leaves_active_with_eleven_uploads() {
    let memory = MemoryStore::new();
    let store = RevisionStore::new(Arc::new(memory.clone()), StoreOptions::default())
        .with_clock(Arc::new(StepClock(AtomicI64::new(100))));

    // 1..11 already in history, 1 active
    for rev in 1..=11u32 {
        memory.zadd("key:revisions", rev as f64, &rev.to_string()).await.unwrap();
    }
    memory.set("key:current", Bytes::from("1")).await.unwrap();

    store.upload("key", Some("12"), None, None, Bytes::from("value")).await.unwrap();

    let history = memory.zrange("key:revisions", 0, -1).await.unwrap();
    assert_eq!(history.first().map(String::as_str), Some("1"));
    assert_eq!(history.last().map(String::as_str), Some("12"));
    assert!(!history.contains(&"2".to_string()));
    assert_eq!(history.len(), 11);
    assert!(memory.get("key:12").await.unwrap().is_some());
}

#[tokio::test]
async fn test_trim_keeps_revision_active_under_explicit_suffix() {
    let (store, backend) = create_store(StoreOptions {
        max_recent_uploads: 2,
        ..Default::default()
    });
    upload_all(&store, "p", 1..=2).await;
    store.activate("p", "1", Some("live"), None).await.unwrap();

    for rev in ["3", "4"] {
        store
            .upload("p", Some(rev), Some("live"), None, Bytes::from("content"))
            .await
            .unwrap();
    }

    let history = backend.zrange("p:revisions", 0, -1).await.unwrap();
    assert_eq!(history, vec!["1", "3", "4"]);
    assert!(backend.get("p:1").await.unwrap().is_some());
    assert!(backend.get("p:2").await.unwrap().is_none());
    assert_eq!(
        store.active_revision("p", Some("live")).await.unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_activate_sets_pointer() {
    let (store, backend) = create_store(StoreOptions::default());
    upload_all(&store, "key-prefix", 1..=3).await;

    store.activate("key-prefix", "2", None, None).await.unwrap();

    assert_eq!(backend.get("key-prefix:current").await.unwrap().unwrap(), "2");
    assert_eq!(
        store.active_revision("key-prefix", None).await.unwrap().as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn test_activate_unknown_revision_keeps_pointer() {
    let memory = MemoryStore::new();
    let recording = Arc::new(RecordingStore::new(memory.clone()));
    let store = RevisionStore::new(recording.clone(), StoreOptions::default());

    store.upload("app", Some("a"), None, None, Bytes::from("x")).await.unwrap();
    store.activate("app", "a", None, None).await.unwrap();
    let writes_before = recording.writes().len();

    let err = store
        .activate("app", "never-uploaded", None, Some("content"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RevisionError::InvalidRevision { ref revision_key } if revision_key == "never-uploaded"
    ));
    assert_eq!(recording.writes().len(), writes_before);
    assert_eq!(memory.get("app:current").await.unwrap().unwrap(), "a");
}

#[tokio::test]
async fn test_activate_mirrors_content() {
    let (store, backend) = create_store(StoreOptions::default());
    store
        .upload("prefix", Some("1"), None, None, Bytes::from("<html>one</html>"))
        .await
        .unwrap();

    store
        .activate("prefix", "1", Some("current"), Some("content"))
        .await
        .unwrap();

    assert_eq!(
        backend.get("prefix:content").await.unwrap(),
        backend.get("prefix:1").await.unwrap()
    );
    assert_eq!(backend.get("prefix:current").await.unwrap().unwrap(), "1");
}

#[tokio::test]
async fn test_mirror_written_before_pointer() {
    let memory = MemoryStore::new();
    let recording = Arc::new(RecordingStore::new(memory));
    let store = RevisionStore::new(recording.clone(), StoreOptions::default());
    store.upload("p", Some("1"), None, None, Bytes::from("x")).await.unwrap();
    let skip = recording.writes().len();

    store
        .activate("p", "1", None, Some("current-content"))
        .await
        .unwrap();

    assert_eq!(
        recording.writes()[skip..].to_vec(),
        vec!["SET p:current-content".to_string(), "SET p:current".to_string()]
    );
}

#[tokio::test]
async fn test_active_revision_none_before_activation() {
    let (store, _) = create_store(StoreOptions::default());
    upload_all(&store, "app", 1..=2).await;
    assert!(store.active_revision("app", None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_marks_single_active() {
    let (store, _) = create_store(StoreOptions::default());
    upload_all(&store, "key-prefix", 1..=3).await;
    store.activate("key-prefix", "2", None, None).await.unwrap();

    let revisions = store.fetch_revisions("key-prefix", None).await.unwrap();
    let active: Vec<&str> = revisions
        .iter()
        .filter(|r| r.active)
        .map(|r| r.revision.as_str())
        .collect();
    assert_eq!(active, vec!["2"]);
}

#[tokio::test]
async fn test_fetch_with_explicit_suffix() {
    let (store, _) = create_store(StoreOptions::default());
    upload_all(&store, "app", 1..=2).await;
    store.activate("app", "1", Some("live"), None).await.unwrap();

    let default_suffix = store.fetch_revisions("app", None).await.unwrap();
    assert!(default_suffix.iter().all(|r| !r.active));

    let live = store.fetch_revisions("app", Some("live")).await.unwrap();
    assert!(live.iter().any(|r| r.revision == "1" && r.active));
}

#[tokio::test]
async fn test_metadata_round_trip() {
    let (store, _) = create_store(StoreOptions::default());
    let metadata = serde_json::json!({"a": 1});

    store
        .upload("app", Some("with"), None, Some(&metadata), Bytes::from("x"))
        .await
        .unwrap();
    store.upload("app", Some("without"), None, None, Bytes::from("y")).await.unwrap();

    let revisions = store.fetch_revisions("app", None).await.unwrap();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].revision, "without");
    assert!(revisions[0].revision_data.is_none());
    assert_eq!(revisions[1].revision, "with");
    assert_eq!(revisions[1].revision_data, Some(metadata));
}

#[tokio::test]
async fn test_fetch_empty_history() {
    let (store, _) = create_store(StoreOptions::default());
    assert!(store.fetch_revisions("nothing", None).await.unwrap().is_empty());
}
