//! Start-date gating.
//!
//! Each block may declare a `start` (RFC 3339). Its effective start is the
//! later of its own start and the start inherited from its parents. Under
//! [`InheritancePolicy::Any`] a block opens as soon as one parent path is
//! open (earliest parent start); under [`InheritancePolicy::All`] it waits
//! for every parent (latest parent start). A block without a start and
//! without restricting parents is always open.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{collected_parent, InheritancePolicy, Transformation};
use crate::block_tree::BlockTree;
use crate::entry::{remove_block, BlockCacheEntries};
use crate::error::{Error, Result};
use crate::models::{Block, CourseUserInfo, UsageKey};

pub const START_DATE: &str = "start_date";

const START_FIELD: &str = "start";

/// Payload collected per block. `None` means no start restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDateData {
    pub effective_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct StartDateTransformation {
    policy: InheritancePolicy,
}

impl StartDateTransformation {
    pub fn new(policy: InheritancePolicy) -> Self {
        Self { policy }
    }

    fn own_start(block: &Block) -> Result<Option<DateTime<Utc>>> {
        match block.fields.get(START_FIELD) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| {
                    Error::structural(&block.usage_key, format!("invalid start '{}': {}", s, e))
                }),
            Some(other) => Err(Error::structural(
                &block.usage_key,
                format!("start must be an RFC 3339 string, got {}", other),
            )),
        }
    }

    // `None` sorts before every date, so it stands for "open" in min/max.
    fn inherited(&self, parent_starts: Vec<Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
        let combined = match self.policy {
            InheritancePolicy::Any => parent_starts.into_iter().min(),
            InheritancePolicy::All => parent_starts.into_iter().max(),
        };
        combined.flatten()
    }
}

impl Transformation for StartDateTransformation {
    fn id(&self) -> &str {
        START_DATE
    }

    fn required_fields(&self) -> &[&'static str] {
        &[START_FIELD]
    }

    fn config_signature(&self) -> String {
        format!("inheritance={}", self.policy)
    }

    fn collect(&self, tree: &BlockTree) -> Result<HashMap<UsageKey, Value>> {
        let mut starts: HashMap<UsageKey, Option<DateTime<Utc>>> =
            HashMap::with_capacity(tree.len());
        for key in tree.topological() {
            let block = tree
                .get(&key)
                .ok_or_else(|| Error::structural(&key, "block missing from tree"))?;
            let parent_starts = tree
                .parents_of(&key)
                .iter()
                .map(|p| collected_parent(&starts, &key, p).copied())
                .collect::<Result<Vec<_>>>()?;
            let effective = std::cmp::max(Self::own_start(block)?, self.inherited(parent_starts));
            starts.insert(key, effective);
        }

        starts
            .into_iter()
            .map(|(key, effective_start)| -> Result<(UsageKey, Value)> {
                Ok((key, serde_json::to_value(StartDateData { effective_start })?))
            })
            .collect()
    }

    fn apply(
        &self,
        root: &UsageKey,
        entries: &mut BlockCacheEntries,
        user: &CourseUserInfo,
    ) -> Result<()> {
        if user.has_staff_access {
            return Ok(());
        }

        let keys: Vec<UsageKey> = entries.keys().cloned().collect();
        let mut removed = 0usize;
        for key in keys {
            if &key == root {
                continue;
            }
            let Some(entry) = entries.get(&key) else {
                continue;
            };
            let data: StartDateData = entry.transformation_data(START_DATE)?;
            let not_started = data
                .effective_start
                .map_or(false, |start| start > user.request_time);
            if not_started && remove_block(entries, &key) {
                removed += 1;
            }
        }
        debug!(removed, at = %user.request_time, "pruned blocks not yet started");
        Ok(())
    }
}
