//! Course cache adapter.
//!
//! Persists the collect-phase output of a course in a [`CacheBackend`]:
//!
//! ```text
//! course_cache.course.<course key>              →  CourseIndex      (root, block keys, fingerprint)
//! course_cache.block.<course key>/<usage key>  →  BlockCacheEntry  (one per block)
//! ```
//!
//! Block records are written before the index, so a reader that finds an
//! index also finds its records unless they were evicted since. Whole-course
//! invalidation deletes the index; stale block records are simply never
//! read again and get overwritten by the next build.
//!
//! Concurrent builders for the same course may race. The last writer wins,
//! which is harmless because collect is a pure function of the content.
//!
//! Usage keys are only unique within a course, so block records are keyed
//! by course and usage key together. A loaded record whose parent or child
//! keys fall outside the index is treated as a miss.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entry::{BlockCacheEntries, BlockCacheEntry};
use crate::error::Result;
use crate::models::{CourseKey, UsageKey};
use crate::store::CacheBackend;

pub const DEFAULT_COURSE_PREFIX: &str = "course_cache.course.";
pub const DEFAULT_BLOCK_PREFIX: &str = "course_cache.block.";

/// Course-level record listing the blocks of a cached snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseIndex {
    pub root: UsageKey,
    pub block_keys: Vec<UsageKey>,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
}

/// Unfiltered collect-phase output of one course.
#[derive(Debug, Clone)]
pub struct CourseSnapshot {
    pub root: UsageKey,
    pub entries: BlockCacheEntries,
    pub built_at: DateTime<Utc>,
}

impl CourseSnapshot {
    pub fn new(root: UsageKey, entries: BlockCacheEntries) -> Self {
        Self {
            root,
            entries,
            built_at: Utc::now(),
        }
    }
}

pub struct CourseCache {
    backend: Arc<dyn CacheBackend>,
    course_prefix: String,
    block_prefix: String,
}

impl CourseCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_prefixes(backend, DEFAULT_COURSE_PREFIX, DEFAULT_BLOCK_PREFIX)
    }

    pub fn with_prefixes(backend: Arc<dyn CacheBackend>, course_prefix: &str, block_prefix: &str) -> Self {
        Self {
            backend,
            course_prefix: course_prefix.to_string(),
            block_prefix: block_prefix.to_string(),
        }
    }

    pub fn course_cache_key(&self, course_key: &CourseKey) -> String {
        format!("{}{}", self.course_prefix, course_key)
    }

    pub fn block_cache_key(&self, course_key: &CourseKey, usage_key: &UsageKey) -> String {
        format!("{}{}/{}", self.block_prefix, course_key, usage_key)
    }

    /// Return the cached snapshot of `course_key`, building and storing it
    /// with `builder` on a miss.
    ///
    /// A backend failure, an undecodable or incomplete record, or an index
    /// written under a different `fingerprint` counts as a miss. Failing to
    /// store the fresh snapshot is logged and otherwise ignored. An error
    /// from `builder` is returned as is and nothing is written.
    pub async fn get_or_build<F, Fut>(
        &self,
        course_key: &CourseKey,
        fingerprint: &str,
        builder: F,
    ) -> Result<CourseSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CourseSnapshot>>,
    {
        match self.read(course_key, fingerprint).await {
            Ok(Some(snapshot)) => {
                debug!(course = %course_key, blocks = snapshot.entries.len(), "course cache hit");
                return Ok(snapshot);
            }
            Ok(None) => debug!(course = %course_key, "course cache miss"),
            Err(e) => warn!(course = %course_key, error = %e, "course cache read failed; rebuilding"),
        }

        let snapshot = builder().await?;

        match self.write(course_key, fingerprint, &snapshot).await {
            Ok(()) => info!(
                course = %course_key,
                blocks = snapshot.entries.len(),
                "course cache rebuilt"
            ),
            Err(e) => warn!(course = %course_key, error = %e, "failed to store course snapshot"),
        }
        Ok(snapshot)
    }

    /// Drop the cached snapshot of `course_key`.
    pub async fn invalidate(&self, course_key: &CourseKey) -> Result<()> {
        self.backend.delete(&self.course_cache_key(course_key)).await?;
        info!(course = %course_key, "course cache invalidated");
        Ok(())
    }

    async fn read(&self, course_key: &CourseKey, fingerprint: &str) -> Result<Option<CourseSnapshot>> {
        let Some(raw) = self.backend.get(&self.course_cache_key(course_key)).await? else {
            return Ok(None);
        };
        let index: CourseIndex = serde_json::from_slice(&raw)?;
        if index.fingerprint != fingerprint {
            debug!(
                course = %course_key,
                cached = %index.fingerprint,
                current = %fingerprint,
                "cached snapshot built by a different pipeline"
            );
            return Ok(None);
        }

        let keys: Vec<String> = index
            .block_keys
            .iter()
            .map(|k| self.block_cache_key(course_key, k))
            .collect();
        let records = self.backend.get_many(&keys).await?;
        if records.len() != keys.len() {
            warn!(
                course = %course_key,
                expected = keys.len(),
                returned = records.len(),
                "cache backend returned the wrong number of block records"
            );
            return Ok(None);
        }

        let mut entries: BlockCacheEntries = HashMap::with_capacity(index.block_keys.len());
        for (usage_key, record) in index.block_keys.iter().zip(records) {
            let Some(raw) = record else {
                warn!(course = %course_key, block = %usage_key, "block record missing from cache");
                return Ok(None);
            };
            let entry: BlockCacheEntry = serde_json::from_slice(&raw)?;
            if &entry.usage_key != usage_key {
                warn!(course = %course_key, block = %usage_key, "block record does not match index");
                return Ok(None);
            }
            entries.insert(usage_key.clone(), entry);
        }

        let outside_index = entries.values().find_map(|entry| {
            entry
                .parent_keys
                .iter()
                .chain(&entry.child_keys)
                .find(|k| !entries.contains_key(*k))
                .map(|k| (&entry.usage_key, k))
        });
        if let Some((block, neighbour)) = outside_index {
            warn!(
                course = %course_key,
                block = %block,
                neighbour = %neighbour,
                "block record links outside the cached index"
            );
            return Ok(None);
        }
        if !entries.contains_key(&index.root) {
            warn!(course = %course_key, root = %index.root, "cached index does not list its root");
            return Ok(None);
        }

        Ok(Some(CourseSnapshot {
            root: index.root,
            entries,
            built_at: index.built_at,
        }))
    }

    async fn write(&self, course_key: &CourseKey, fingerprint: &str, snapshot: &CourseSnapshot) -> Result<()> {
        let mut block_keys = Vec::with_capacity(snapshot.entries.len());
        let mut records = Vec::with_capacity(snapshot.entries.len());
        for (usage_key, entry) in &snapshot.entries {
            block_keys.push(usage_key.clone());
            records.push((
                self.block_cache_key(course_key, usage_key),
                serde_json::to_vec(entry)?,
            ));
        }
        block_keys.sort();

        let index = CourseIndex {
            root: snapshot.root.clone(),
            block_keys,
            fingerprint: fingerprint.to_string(),
            built_at: snapshot.built_at,
        };

        self.backend.set_many(records).await?;
        self.backend
            .set(&self.course_cache_key(course_key), serde_json::to_vec(&index)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::InMemoryCacheBackend;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(key: &str, children: &[&str]) -> BlockCacheEntry {
        BlockCacheEntry {
            usage_key: key.into(),
            parent_keys: Vec::new(),
            child_keys: children.iter().map(|k| UsageKey::from(*k)).collect(),
            block_fields: BTreeMap::new(),
            transformation_data: BTreeMap::new(),
        }
    }

    fn snapshot() -> CourseSnapshot {
        let entries = [entry("root", &["leaf"]), entry("leaf", &[])]
            .into_iter()
            .map(|e| (e.usage_key.clone(), e))
            .collect();
        CourseSnapshot::new("root".into(), entries)
    }

    struct Harness {
        backend: Arc<InMemoryCacheBackend>,
        cache: CourseCache,
        builds: AtomicUsize,
    }

    impl Harness {
        fn new() -> Self {
            let backend = Arc::new(InMemoryCacheBackend::new());
            let cache = CourseCache::new(backend.clone());
            Self {
                backend,
                cache,
                builds: AtomicUsize::new(0),
            }
        }

        async fn get(&self, fingerprint: &str) -> Result<CourseSnapshot> {
            self.cache
                .get_or_build(&"course-v1:A+B+C".into(), fingerprint, || async {
                    self.builds.fetch_add(1, Ordering::SeqCst);
                    Ok(snapshot())
                })
                .await
        }

        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_keys_use_prefixes() {
        let h = Harness::new();
        h.get("fp").await.unwrap();
        assert!(h.backend.contains_key("course_cache.course.course-v1:A+B+C"));
        assert!(h.backend.contains_key("course_cache.block.course-v1:A+B+C/root"));
        assert!(h.backend.contains_key("course_cache.block.course-v1:A+B+C/leaf"));
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let h = Harness::new();
        let first = h.get("fp").await.unwrap();
        let second = h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 1);
        assert_eq!(first.entries, second.entries);
        assert_eq!(second.root, UsageKey::from("root"));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_rebuilds() {
        let h = Harness::new();
        h.get("v1").await.unwrap();
        h.get("v2").await.unwrap();
        h.get("v2").await.unwrap();
        assert_eq!(h.builds(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_falls_back_to_build() {
        let h = Harness::new();
        h.get("fp").await.unwrap();
        h.backend.fail_reads(true);
        let snapshot = h.get("fp").await.unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(h.builds(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let h = Harness::new();
        h.backend.fail_writes(true);
        let snapshot = h.get("fp").await.unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_builder_error_writes_nothing() {
        let h = Harness::new();
        let result = h
            .cache
            .get_or_build(&"course-v1:A+B+C".into(), "fp", || async {
                Err(Error::Configuration("collect failed".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_missing_block_record_rebuilds() {
        let h = Harness::new();
        h.get("fp").await.unwrap();
        h.backend
            .delete("course_cache.block.course-v1:A+B+C/leaf")
            .await
            .unwrap();
        h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 2);
        assert!(h.backend.contains_key("course_cache.block.course-v1:A+B+C/leaf"));
    }

    #[tokio::test]
    async fn test_corrupt_index_rebuilds() {
        let h = Harness::new();
        h.backend
            .set("course_cache.course.course-v1:A+B+C", b"not json".to_vec())
            .await
            .unwrap();
        h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 1);
        h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let h = Harness::new();
        h.get("fp").await.unwrap();
        h.cache.invalidate(&"course-v1:A+B+C".into()).await.unwrap();
        assert!(!h.backend.contains_key("course_cache.course.course-v1:A+B+C"));
        h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 2);
    }

    #[tokio::test]
    async fn test_custom_prefixes() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = CourseCache::with_prefixes(backend.clone(), "c:", "b:");
        cache
            .get_or_build(&"k".into(), "fp", || async { Ok(snapshot()) })
            .await
            .unwrap();
        assert!(backend.contains_key("c:k"));
        assert!(backend.contains_key("b:k/root"));
    }

    fn course_snapshot(children: &[&str]) -> CourseSnapshot {
        let root = entry("course", children);
        let mut entries: BlockCacheEntries = children
            .iter()
            .map(|k| {
                let mut e = entry(k, &[]);
                e.parent_keys = vec!["course".into()];
                (UsageKey::from(*k), e)
            })
            .collect();
        entries.insert("course".into(), root);
        CourseSnapshot::new("course".into(), entries)
    }

    #[tokio::test]
    async fn test_courses_sharing_usage_keys_stay_apart() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = CourseCache::new(backend.clone());
        let a: CourseKey = "course-v1:Org+A+1".into();
        let b: CourseKey = "course-v1:Org+B+1".into();

        cache
            .get_or_build(&a, "fp", || async { Ok(course_snapshot(&["ch1"])) })
            .await
            .unwrap();
        cache
            .get_or_build(&b, "fp", || async { Ok(course_snapshot(&["ch1", "ch2"])) })
            .await
            .unwrap();

        let again = cache
            .get_or_build(&a, "fp", || async {
                Err(Error::Configuration("course A should be cached".into()))
            })
            .await
            .unwrap();
        assert_eq!(again.entries.len(), 2);
        assert_eq!(again.entries["course"].child_keys, vec![UsageKey::from("ch1")]);
        assert!(backend.contains_key("course_cache.block.course-v1:Org+A+1/course"));
        assert!(backend.contains_key("course_cache.block.course-v1:Org+B+1/course"));
    }

    #[tokio::test]
    async fn test_record_linking_outside_index_rebuilds() {
        let h = Harness::new();
        h.get("fp").await.unwrap();
        let stray = entry("root", &["leaf", "elsewhere"]);
        h.backend
            .set(
                "course_cache.block.course-v1:A+B+C/root",
                serde_json::to_vec(&stray).unwrap(),
            )
            .await
            .unwrap();
        let snapshot = h.get("fp").await.unwrap();
        assert_eq!(h.builds(), 2);
        assert_eq!(snapshot.entries["root"].child_keys, vec![UsageKey::from("leaf")]);
    }

    /// Returns one slot fewer than asked for.
    struct ShortReads(InMemoryCacheBackend);

    #[async_trait::async_trait]
    impl CacheBackend for ShortReads {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }

        async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
            let mut values = self.0.get_many(keys).await?;
            values.pop();
            Ok(values)
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.0.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.0.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_short_get_many_is_a_miss() {
        let cache = CourseCache::new(Arc::new(ShortReads(InMemoryCacheBackend::new())));
        let builds = AtomicUsize::new(0);
        for _ in 0..2 {
            let snapshot = cache
                .get_or_build(&"k".into(), "fp", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(snapshot())
                })
                .await
                .unwrap();
            assert_eq!(snapshot.entries.len(), 2);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
