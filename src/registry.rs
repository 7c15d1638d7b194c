//! Transformation registry.
//!
//! Maps the ids listed in `[pipeline] transformations` to factories that
//! build [`Transformation`] trait objects from the [`Config`]. The built-in
//! `visibility` and `start_date` transformations are pre-registered by
//! [`TransformationRegistry::with_builtins`]; callers add their own with
//! [`register`](TransformationRegistry::register).
//!
//! ```text
//! ┌────────────────────────┐    build_pipeline    ┌──────────────┐
//! │ TransformationRegistry │ ───────────────────▶ │   Pipeline   │
//! │  id → factory(&Config) │   config order       │ Box<dyn ...> │
//! └────────────────────────┘                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use course_structure::config::Config;
//! use course_structure::registry::TransformationRegistry;
//!
//! let registry = TransformationRegistry::with_builtins();
//! let pipeline = registry.build_pipeline(&Config::default()).unwrap();
//! assert_eq!(pipeline.transformation_ids(), vec!["visibility", "start_date"]);
//! ```

use course_structure_core::pipeline::Pipeline;
use course_structure_core::transformations::start_date::START_DATE;
use course_structure_core::transformations::visibility::VISIBILITY;
use course_structure_core::transformations::{
    StartDateTransformation, Transformation, VisibilityTransformation,
};
use course_structure_core::{Error, Result};
use tracing::debug;

use crate::config::Config;

/// Builds one transformation from the configuration.
pub type TransformationFactory =
    Box<dyn Fn(&Config) -> Result<Box<dyn Transformation>> + Send + Sync>;

/// Registry of transformation factories keyed by id.
pub struct TransformationRegistry {
    factories: Vec<(String, TransformationFactory)>,
}

impl TransformationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Create a registry pre-loaded with `visibility` and `start_date`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(VISIBILITY, |config: &Config| {
            let policy = config.visibility.policy()?;
            Ok(Box::new(VisibilityTransformation::new(policy)) as Box<dyn Transformation>)
        });
        registry.register(START_DATE, |config: &Config| {
            let policy = config.start_date.policy()?;
            Ok(Box::new(StartDateTransformation::new(policy)) as Box<dyn Transformation>)
        });
        registry
    }

    /// Register a factory under `id`, replacing any earlier one.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&Config) -> Result<Box<dyn Transformation>> + Send + Sync + 'static,
    {
        self.factories.retain(|(existing, _)| existing != id);
        self.factories.push((id.to_string(), Box::new(factory)));
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.factories.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.iter().any(|(existing, _)| existing == id)
    }

    /// Instantiate the transformations named in `config.pipeline`, in the
    /// configured order, and assemble them into a [`Pipeline`].
    ///
    /// An id with no registered factory is a configuration error.
    pub fn build_pipeline(&self, config: &Config) -> Result<Pipeline> {
        let mut transformations = Vec::with_capacity(config.pipeline.transformations.len());
        for id in &config.pipeline.transformations {
            let (_, factory) = self
                .factories
                .iter()
                .find(|(existing, _)| existing == id)
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "Unknown transformation: '{}'. Registered: {}",
                        id,
                        self.ids().join(", ")
                    ))
                })?;
            let transformation = factory(config)?;
            if transformation.id() != id {
                return Err(Error::Configuration(format!(
                    "factory registered as '{}' built transformation '{}'",
                    id,
                    transformation.id()
                )));
            }
            transformations.push(transformation);
        }

        let pipeline = Pipeline::new(transformations)?
            .with_requested_fields(config.pipeline.block_fields.iter().cloned());
        debug!(
            transformations = ?pipeline.transformation_ids(),
            fingerprint = %pipeline.fingerprint(),
            "pipeline built"
        );
        Ok(pipeline)
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }
}

impl Default for TransformationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
