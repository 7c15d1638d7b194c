//! # Course Structure
//!
//! Per-user, access-filtered views of a course's block hierarchy.
//!
//! A course is a DAG of content blocks (course → chapter → sequential →
//! vertical → leaf). Computing what one learner may see is split in two:
//! an expensive, user-independent **collect** phase whose output is cached
//! per course, and a cheap per-request **apply** phase that prunes a
//! private copy of that output for one user.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌─────────────┐
//! │ ContentStore │──▶│ load_block_tree │──▶│ run_collect │
//! └──────────────┘   └─────────────────┘   └──────┬──────┘
//!                                                 │ snapshot
//!                                                 ▼
//!                    ┌───────────────┐     ┌──────────────┐
//!  get_blocks ──────▶│  CourseCache  │◀───▶│ CacheBackend │
//!                    └──────┬────────┘     └──────────────┘
//!                           │ clone
//!                           ▼
//!                    ┌───────────────┐
//!                    │   run_apply   │──▶ BlockInformation map
//!                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`registry`] | Transformation ids → pipeline |
//! | [`users`] | Per-request user information |
//! | [`service`] | The `get_blocks` entry point |
//!
//! The data model, traversal, pipeline, cache adapter and store traits
//! live in the `course-structure-core` crate and are re-exported here.

pub mod config;
pub mod registry;
pub mod service;
pub mod users;

pub use course_structure_core::{
    block_tree, cache, entry, error, models, pipeline, store, transformations, traversal, Error,
    Phase, Result,
};
