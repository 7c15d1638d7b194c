//! # Course Structure Core
//!
//! Shared logic for Course Structure: block models, the block tree loader,
//! traversal engine, cache entry model, transformation pipeline, store
//! abstractions, and the course cache adapter.
//!
//! This crate contains no tokio runtime, file I/O, or configuration
//! parsing. Stores are expressed as async traits so the application crate
//! can plug in whatever content store and cache backend it runs against.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ ContentStore │──▶│ Block Tree   │──▶│ Pipeline      │
//! │ (snapshot)   │   │ Loader       │   │ run_collect   │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │ entries
//!                                              ▼
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │ Pipeline     │◀──│ CourseCache   │
//!                    │ run_apply    │   │ (index+blocks)│
//!                    └──────┬───────┘   └───────────────┘
//!                           ▼
//!                   BlockInformation (per user)
//! ```

pub mod block_tree;
pub mod cache;
pub mod entry;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod transformations;
pub mod traversal;

pub use error::{Error, Phase, Result};
