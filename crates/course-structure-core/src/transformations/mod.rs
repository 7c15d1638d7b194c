//! Transformation trait and the built-in transformations.
//!
//! A transformation has two halves:
//!
//! - **collect** runs once per course snapshot, sees the whole
//!   [`BlockTree`], and returns one JSON payload per block. It never sees a
//!   user, so its output is cacheable.
//! - **apply** runs once per request over a request-local copy of the
//!   cache entries and prunes them for one user. It reads only collected
//!   payloads and the `parent_keys`/`child_keys` already on the entries.
//!
//! # Built-in transformations
//!
//! | Id | Type | Removes for non-staff users |
//! |----|------|-----------------------------|
//! | `visibility` | [`VisibilityTransformation`] | blocks visible to staff only |
//! | `start_date` | [`StartDateTransformation`] | blocks whose start is in the future |

pub mod start_date;
pub mod visibility;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::block_tree::BlockTree;
use crate::entry::BlockCacheEntries;
use crate::error::{Error, Result};
use crate::models::{CourseUserInfo, UsageKey};

pub use start_date::{StartDateData, StartDateTransformation};
pub use visibility::{VisibilityData, VisibilityTransformation};

/// A pluggable collect/apply unit in the pipeline.
///
/// Implementations must be stateless apart from their configuration.
pub trait Transformation: Send + Sync {
    /// Distinct id; collected payloads are stored under it.
    fn id(&self) -> &str;

    /// Raw block fields this transformation needs copied onto cache entries.
    fn required_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Configuration that changes collected output, folded into the
    /// pipeline fingerprint.
    fn config_signature(&self) -> String {
        String::new()
    }

    /// Compute one payload per block of `tree`.
    fn collect(&self, tree: &BlockTree) -> Result<HashMap<UsageKey, Value>>;

    /// Prune `entries` for `user`.
    ///
    /// Removal must go through [`remove_block`](crate::entry::remove_block)
    /// (or keep its guarantees) so no `child_keys` entry is left pointing at
    /// a deleted block.
    fn apply(
        &self,
        root: &UsageKey,
        entries: &mut BlockCacheEntries,
        user: &CourseUserInfo,
    ) -> Result<()>;
}

/// How a block with several parents inherits a restriction from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritancePolicy {
    /// One restricting parent is enough.
    #[default]
    Any,
    /// Every parent must restrict.
    All,
}

impl InheritancePolicy {
    /// Combine parent restrictions. A block without parents inherits nothing.
    pub fn combine<I: IntoIterator<Item = bool>>(&self, parent_flags: I) -> bool {
        let mut flags = parent_flags.into_iter().peekable();
        if flags.peek().is_none() {
            return false;
        }
        match self {
            InheritancePolicy::Any => flags.any(|f| f),
            InheritancePolicy::All => flags.all(|f| f),
        }
    }
}

impl FromStr for InheritancePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "any" => Ok(InheritancePolicy::Any),
            "all" => Ok(InheritancePolicy::All),
            other => Err(Error::Configuration(format!(
                "Unknown inheritance policy: '{}'. Must be any or all.",
                other
            ))),
        }
    }
}

impl fmt::Display for InheritancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InheritancePolicy::Any => f.write_str("any"),
            InheritancePolicy::All => f.write_str("all"),
        }
    }
}

/// Look up an already-collected parent value during a topological walk.
pub(crate) fn collected_parent<'a, T>(
    collected: &'a HashMap<UsageKey, T>,
    child: &UsageKey,
    parent: &UsageKey,
) -> Result<&'a T> {
    collected.get(parent).ok_or_else(|| {
        Error::structural(
            child,
            format!("parent {} was not visited before its child", parent),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_no_parents() {
        assert!(!InheritancePolicy::Any.combine(std::iter::empty()));
        assert!(!InheritancePolicy::All.combine(std::iter::empty()));
    }

    #[test]
    fn test_combine_single_parent_agrees() {
        for flag in [true, false] {
            assert_eq!(
                InheritancePolicy::Any.combine([flag]),
                InheritancePolicy::All.combine([flag])
            );
        }
    }

    #[test]
    fn test_combine_mixed_parents() {
        assert!(InheritancePolicy::Any.combine([true, false]));
        assert!(!InheritancePolicy::All.combine([true, false]));
        assert!(InheritancePolicy::All.combine([true, true]));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("any".parse::<InheritancePolicy>().unwrap(), InheritancePolicy::Any);
        assert_eq!("all".parse::<InheritancePolicy>().unwrap(), InheritancePolicy::All);
        assert!(matches!(
            "most".parse::<InheritancePolicy>(),
            Err(Error::Configuration(_))
        ));
    }
}
