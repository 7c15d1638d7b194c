//! The transformation pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Transformation`]s fixed when the
//! pipeline is built. It drives both phases:
//!
//! 1. [`run_collect`](Pipeline::run_collect) runs every transformation's
//!    collect over a [`BlockTree`] and assembles one [`BlockCacheEntry`] per
//!    block. The result depends only on course content and is cacheable.
//! 2. [`run_apply`](Pipeline::run_apply) runs every transformation's apply,
//!    in declared order, over a request-local copy of those entries.
//!
//! Apply order matters: a transformation sees the entries as left by the
//! ones before it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::block_tree::BlockTree;
use crate::entry::{dangling_references, BlockCacheEntries, BlockCacheEntry};
use crate::error::{Error, Phase, Result};
use crate::models::{CourseUserInfo, UsageKey};
use crate::transformations::Transformation;

pub struct Pipeline {
    transformations: Vec<Box<dyn Transformation>>,
    requested_fields: BTreeSet<String>,
}

impl Pipeline {
    /// Build a pipeline. Transformation ids must be distinct.
    pub fn new(transformations: Vec<Box<dyn Transformation>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for t in &transformations {
            if !seen.insert(t.id().to_string()) {
                return Err(Error::Configuration(format!(
                    "transformation '{}' is configured more than once",
                    t.id()
                )));
            }
        }
        Ok(Self {
            transformations,
            requested_fields: BTreeSet::new(),
        })
    }

    /// Extra raw fields to copy onto every entry, on top of the ones the
    /// transformations require.
    pub fn with_requested_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn transformation_ids(&self) -> Vec<&str> {
        self.transformations.iter().map(|t| t.id()).collect()
    }

    /// Union of requested fields and every transformation's required fields.
    pub fn required_fields(&self) -> BTreeSet<String> {
        let mut fields = self.requested_fields.clone();
        for t in &self.transformations {
            fields.extend(t.required_fields().iter().map(|f| f.to_string()));
        }
        fields
    }

    /// Stable hash of everything that shapes collected entries.
    ///
    /// Stored with a cached snapshot so that a snapshot built by a
    /// differently configured pipeline is never served.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for t in &self.transformations {
            hasher.update(t.id().as_bytes());
            hasher.update(b"\0");
            hasher.update(t.config_signature().as_bytes());
            hasher.update(b"\n");
        }
        for field in self.required_fields() {
            hasher.update(field.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(&hasher.finalize()[..16])
    }

    /// Collect phase: build one cache entry per block of `tree`.
    ///
    /// All-or-nothing: the first failing transformation aborts the run.
    pub fn run_collect(&self, tree: &BlockTree) -> Result<BlockCacheEntries> {
        let started = Instant::now();
        let fields = self.required_fields();

        let mut entries: BlockCacheEntries = tree
            .blocks()
            .map(|block| {
                let entry = BlockCacheEntry {
                    usage_key: block.usage_key.clone(),
                    parent_keys: tree.parents_of(&block.usage_key).to_vec(),
                    child_keys: tree.children_of(&block.usage_key).to_vec(),
                    block_fields: fields
                        .iter()
                        .map(|f| (f.clone(), block.field(f)))
                        .collect::<BTreeMap<_, _>>(),
                    transformation_data: BTreeMap::new(),
                };
                (block.usage_key.clone(), entry)
            })
            .collect();

        for t in &self.transformations {
            let id = t.id();
            let mut collected = t.collect(tree).map_err(|e| Error::Transformation {
                id: id.to_string(),
                phase: Phase::Collect,
                source: Box::new(e),
            })?;
            for (key, entry) in entries.iter_mut() {
                let data = collected.remove(key).ok_or_else(|| Error::Transformation {
                    id: id.to_string(),
                    phase: Phase::Collect,
                    source: Box::new(Error::Configuration(format!(
                        "no data collected for block {}",
                        key
                    ))),
                })?;
                entry.transformation_data.insert(id.to_string(), data);
            }
            debug!(transformation = id, "collected");
        }

        info!(
            root = %tree.root(),
            blocks = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collect phase complete"
        );
        Ok(entries)
    }

    /// Apply phase: prune `entries` for `user`.
    ///
    /// `entries` must be a request-local copy; the cached snapshot is never
    /// handed to this method.
    pub fn run_apply(
        &self,
        root: &UsageKey,
        entries: &mut BlockCacheEntries,
        user: &CourseUserInfo,
    ) -> Result<()> {
        let before = entries.len();
        for t in &self.transformations {
            t.apply(root, entries, user)
                .map_err(|e| Error::Transformation {
                    id: t.id().to_string(),
                    phase: Phase::Apply,
                    source: Box::new(e),
                })?;
        }
        debug_assert!(
            dangling_references(entries).is_empty(),
            "apply left dangling child references: {:?}",
            dangling_references(entries)
        );
        debug!(
            root = %root,
            staff = user.has_staff_access,
            kept = entries.len(),
            removed = before.saturating_sub(entries.len()),
            "apply phase complete"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("transformations", &self.transformation_ids())
            .field("requested_fields", &self.requested_fields)
            .finish()
    }
}
