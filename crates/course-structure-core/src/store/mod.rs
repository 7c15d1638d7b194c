//! Storage abstractions for Course Structure.
//!
//! Two external collaborators sit at the pipeline boundary:
//!
//! - a [`ContentStore`] that hands over an immutable [`CourseContent`]
//!   snapshot for a course, and
//! - a [`CacheBackend`], a plain bytes key/value store shared by every
//!   request for a course.
//!
//! Both are async traits (via `async-trait`) so the application can plug in
//! network-backed stores. In-memory implementations live in [`memory`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CourseContent, CourseKey};

/// Source of course content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Load the full content snapshot of a course, or `None` if the course
    /// does not exist.
    async fn get_course(&self, course_key: &CourseKey) -> Result<Option<CourseContent>>;
}

/// Key/value cache backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](CacheBackend::get) | Read one value |
/// | [`get_many`](CacheBackend::get_many) | Read several values, one slot per key |
/// | [`set`](CacheBackend::set) | Write one value |
/// | [`set_many`](CacheBackend::set_many) | Write several values |
/// | [`delete`](CacheBackend::delete) | Drop one key |
///
/// Errors are reported as [`Error::Cache`](crate::error::Error::Cache);
/// callers in this crate treat them as a miss, never as a failed request.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read several keys. The default issues one [`get`](CacheBackend::get)
    /// per key.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Write several keys. The default issues one [`set`](CacheBackend::set)
    /// per pair.
    async fn set_many(&self, values: Vec<(String, Vec<u8>)>) -> Result<()> {
        for (key, value) in values {
            self.set(&key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()>;
}
