//! The `get_blocks` entry point.
//!
//! ```text
//! get_blocks(user, course, root)
//!   │
//!   ├─ CourseCache::get_or_build ── miss ──▶ ContentStore → load_block_tree → run_collect
//!   │        (shared snapshot)
//!   ├─ UserInfoProvider::course_user_info
//!   ├─ clone entries → Pipeline::run_apply       (request-local)
//!   └─ project blocks reachable from `root`      → BlockInformation
//! ```
//!
//! Apply always runs from the course root so that transformations see the
//! same hierarchy regardless of the requested subtree. The subtree is cut
//! out afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use course_structure_core::block_tree::load_block_tree;
use course_structure_core::cache::{CourseCache, CourseSnapshot};
use course_structure_core::entry::{reachable_from, BlockInformation};
use course_structure_core::models::{CourseKey, UsageKey};
use course_structure_core::pipeline::Pipeline;
use course_structure_core::store::{CacheBackend, ContentStore};
use course_structure_core::{Error, Result};
use tracing::{debug, info};

use crate::config::Config;
use crate::registry::TransformationRegistry;
use crate::users::UserInfoProvider;

pub struct CourseBlocks {
    content: Arc<dyn ContentStore>,
    users: Arc<dyn UserInfoProvider>,
    cache: CourseCache,
    pipeline: Pipeline,
    fingerprint: String,
}

impl CourseBlocks {
    pub fn new(
        content: Arc<dyn ContentStore>,
        users: Arc<dyn UserInfoProvider>,
        cache: CourseCache,
        pipeline: Pipeline,
    ) -> Self {
        let fingerprint = pipeline.fingerprint();
        Self {
            content,
            users,
            cache,
            pipeline,
            fingerprint,
        }
    }

    /// Build a service whose pipeline and cache prefixes come from `config`.
    pub fn from_config(
        config: &Config,
        registry: &TransformationRegistry,
        content: Arc<dyn ContentStore>,
        users: Arc<dyn UserInfoProvider>,
        backend: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        let pipeline = registry.build_pipeline(config)?;
        let cache = CourseCache::with_prefixes(
            backend,
            &config.cache.course_prefix,
            &config.cache.block_prefix,
        );
        Ok(Self::new(content, users, cache, pipeline))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Blocks of `course_key` under `root_block` that `user_id` may see.
    ///
    /// Every returned block's `child_keys` names only blocks that are also
    /// returned. The map is empty when `root_block` itself is pruned for
    /// this user.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the course or `root_block` does not exist.
    /// - [`Error::Structural`] if the course hierarchy is malformed.
    /// - [`Error::Transformation`] if a transformation fails.
    pub async fn get_blocks(
        &self,
        user_id: &str,
        course_key: &CourseKey,
        root_block: &UsageKey,
    ) -> Result<HashMap<UsageKey, BlockInformation>> {
        let snapshot = self
            .cache
            .get_or_build(course_key, &self.fingerprint, || {
                self.build_snapshot(course_key)
            })
            .await?;

        if !snapshot.entries.contains_key(root_block) {
            return Err(Error::NotFound(format!(
                "block {} in course {}",
                root_block, course_key
            )));
        }

        let user = self.users.course_user_info(user_id, course_key).await?;

        let mut entries = snapshot.entries.clone();
        self.pipeline.run_apply(&snapshot.root, &mut entries, &user)?;

        let visible = reachable_from(&entries, root_block);
        let blocks: HashMap<UsageKey, BlockInformation> = visible
            .into_iter()
            .filter_map(|key| {
                entries
                    .get(&key)
                    .map(|entry| (key, BlockInformation::from_cache_entry(entry)))
            })
            .collect();

        debug!(
            course = %course_key,
            root = %root_block,
            user = user_id,
            staff = user.has_staff_access,
            blocks = blocks.len(),
            "get_blocks"
        );
        Ok(blocks)
    }

    /// Drop the cached snapshot of `course_key`; the next request rebuilds it.
    pub async fn invalidate_course(&self, course_key: &CourseKey) -> Result<()> {
        self.cache.invalidate(course_key).await
    }

    async fn build_snapshot(&self, course_key: &CourseKey) -> Result<CourseSnapshot> {
        let content = self
            .content
            .get_course(course_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("course {}", course_key)))?;

        let root = content.root_block()?;
        let tree = load_block_tree(root, |block| content.get_children(block))?;
        let entries = self.pipeline.run_collect(&tree)?;

        info!(course = %course_key, blocks = entries.len(), "course snapshot built");
        Ok(CourseSnapshot::new(content.root.clone(), entries))
    }
}

impl std::fmt::Debug for CourseBlocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseBlocks")
            .field("pipeline", &self.pipeline)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
