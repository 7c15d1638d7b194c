//! In-memory store implementations for tests and embedded use.
//!
//! Both stores keep their data in a `HashMap` behind `std::sync::RwLock`
//! and count calls so tests can tell a cache hit from a rebuild.
//! [`InMemoryCacheBackend`] can also be told to fail reads or writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{CacheBackend, ContentStore};
use crate::error::{Error, Result};
use crate::models::{CourseContent, CourseKey};

/// In-memory content store.
pub struct InMemoryContentStore {
    courses: RwLock<HashMap<CourseKey, CourseContent>>,
    loads: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            courses: RwLock::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a course.
    pub fn insert_course(&self, content: CourseContent) {
        let mut courses = self.courses.write().unwrap_or_else(PoisonError::into_inner);
        courses.insert(content.course_key.clone(), content);
    }

    /// Number of [`get_course`](ContentStore::get_course) calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get_course(&self, course_key: &CourseKey) -> Result<Option<CourseContent>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let courses = self.courses.read().unwrap_or_else(PoisonError::into_inner);
        Ok(courses.get(course_key).cloned())
    }
}

/// In-memory cache backend.
pub struct InMemoryCacheBackend {
    values: RwLock<HashMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent read fail with [`Error::Cache`].
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with [`Error::Cache`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of keys written so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Cache("read failure injected".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Cache("write failure injected".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_read()?;
        self.reads.fetch_add(keys.len(), Ordering::SeqCst);
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.iter().map(|k| values.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_write()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_many(&self, pairs: Vec<(String, Vec<u8>)>) -> Result<()> {
        self.check_write()?;
        self.writes.fetch_add(pairs.len(), Ordering::SeqCst);
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.extend(pairs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_write()?;
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}
