//! Per-request user information.
//!
//! The service never caches what a [`UserInfoProvider`] returns; it is
//! asked once per `get_blocks` call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_structure_core::models::{CourseKey, CourseUserInfo};
use course_structure_core::Result;

/// Resolves what the pipeline needs to know about a user in a course.
#[async_trait]
pub trait UserInfoProvider: Send + Sync {
    async fn course_user_info(&self, user_id: &str, course_key: &CourseKey)
        -> Result<CourseUserInfo>;
}

/// Provider backed by fixed staff sets.
///
/// A user is staff in a course if they are global staff or listed for that
/// course. The request time is the wall clock unless pinned with
/// [`at`](StaticUserInfoProvider::at).
#[derive(Debug, Clone, Default)]
pub struct StaticUserInfoProvider {
    global_staff: HashSet<String>,
    course_staff: HashMap<CourseKey, HashSet<String>>,
    now: Option<DateTime<Utc>>,
}

impl StaticUserInfoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_staff(mut self, user_id: &str) -> Self {
        self.global_staff.insert(user_id.to_string());
        self
    }

    pub fn with_course_staff(mut self, course_key: impl Into<CourseKey>, user_id: &str) -> Self {
        self.course_staff
            .entry(course_key.into())
            .or_default()
            .insert(user_id.to_string());
        self
    }

    /// Report `now` as the request time for every user.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn is_staff(&self, user_id: &str, course_key: &CourseKey) -> bool {
        self.global_staff.contains(user_id)
            || self
                .course_staff
                .get(course_key)
                .is_some_and(|staff| staff.contains(user_id))
    }
}

#[async_trait]
impl UserInfoProvider for StaticUserInfoProvider {
    async fn course_user_info(
        &self,
        user_id: &str,
        course_key: &CourseKey,
    ) -> Result<CourseUserInfo> {
        let staff = self.is_staff(user_id, course_key);
        Ok(CourseUserInfo::at(staff, self.now.unwrap_or_else(Utc::now)))
    }
}
