//! TOML configuration.
//!
//! Every section is optional; an empty file yields the default pipeline
//! (`visibility` then `start_date`, both inheriting with `any`) and the
//! default cache key prefixes.
//!
//! ```toml
//! [pipeline]
//! transformations = ["visibility", "start_date"]
//! block_fields = ["display_name"]
//!
//! [visibility]
//! inheritance = "all"
//!
//! [cache]
//! course_prefix = "course_cache.course."
//! block_prefix = "course_cache.block."
//! ```
//!
//! Transformation ids are only checked for duplicates here. Whether an id
//! is known is decided by the [`TransformationRegistry`](crate::registry::TransformationRegistry)
//! that builds the pipeline, since callers may register their own.

use anyhow::{Context, Result};
use course_structure_core::cache::{DEFAULT_BLOCK_PREFIX, DEFAULT_COURSE_PREFIX};
use course_structure_core::transformations::InheritancePolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub visibility: InheritanceConfig,
    #[serde(default)]
    pub start_date: InheritanceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_transformations")]
    pub transformations: Vec<String>,
    /// Raw block fields copied onto every cache entry on top of the ones
    /// the transformations require.
    #[serde(default)]
    pub block_fields: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transformations: default_transformations(),
            block_fields: Vec::new(),
        }
    }
}

fn default_transformations() -> Vec<String> {
    vec!["visibility".to_string(), "start_date".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct InheritanceConfig {
    #[serde(default = "default_inheritance")]
    pub inheritance: String,
}

impl Default for InheritanceConfig {
    fn default() -> Self {
        Self {
            inheritance: default_inheritance(),
        }
    }
}

impl InheritanceConfig {
    pub fn policy(&self) -> course_structure_core::Result<InheritancePolicy> {
        self.inheritance.parse()
    }
}

fn default_inheritance() -> String {
    "any".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_course_prefix")]
    pub course_prefix: String,
    #[serde(default = "default_block_prefix")]
    pub block_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            course_prefix: default_course_prefix(),
            block_prefix: default_block_prefix(),
        }
    }
}

fn default_course_prefix() -> String {
    DEFAULT_COURSE_PREFIX.to_string()
}
fn default_block_prefix() -> String {
    DEFAULT_BLOCK_PREFIX.to_string()
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).with_context(|| "Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        // Validate pipeline
        if self.pipeline.transformations.is_empty() {
            anyhow::bail!("pipeline.transformations must list at least one transformation");
        }
        let mut seen = HashSet::new();
        for id in &self.pipeline.transformations {
            if id.trim().is_empty() {
                anyhow::bail!("pipeline.transformations must not contain empty ids");
            }
            if !seen.insert(id.as_str()) {
                anyhow::bail!("pipeline.transformations lists '{}' more than once", id);
            }
        }

        // Validate inheritance policies
        self.visibility
            .policy()
            .with_context(|| "Invalid visibility.inheritance")?;
        self.start_date
            .policy()
            .with_context(|| "Invalid start_date.inheritance")?;

        // Validate cache
        if self.cache.course_prefix.is_empty() || self.cache.block_prefix.is_empty() {
            anyhow::bail!("cache.course_prefix and cache.block_prefix must not be empty");
        }
        if self.cache.course_prefix == self.cache.block_prefix {
            anyhow::bail!(
                "cache.course_prefix and cache.block_prefix must differ (both are '{}')",
                self.cache.course_prefix
            );
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    content
        .parse::<Config>()
        .with_context(|| format!("Invalid config file: {}", path.display()))
}
