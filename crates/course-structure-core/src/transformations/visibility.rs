//! Staff-only visibility.
//!
//! A block is visible to staff only when its own `visible_to_staff_only`
//! field is set or when it inherits the restriction from its parents. With
//! several parents the [`InheritancePolicy`] decides: `any` restricts as
//! soon as one parent does, `all` only when every parent does.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{collected_parent, InheritancePolicy, Transformation};
use crate::block_tree::BlockTree;
use crate::entry::{remove_block, BlockCacheEntries};
use crate::error::{Error, Result};
use crate::models::{CourseUserInfo, UsageKey};

pub const VISIBILITY: &str = "visibility";

const STAFF_ONLY_FIELD: &str = "visible_to_staff_only";

/// Payload collected per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityData {
    pub visible_to_staff_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityTransformation {
    policy: InheritancePolicy,
}

impl VisibilityTransformation {
    pub fn new(policy: InheritancePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> InheritancePolicy {
        self.policy
    }
}

impl Transformation for VisibilityTransformation {
    fn id(&self) -> &str {
        VISIBILITY
    }

    fn required_fields(&self) -> &[&'static str] {
        &[STAFF_ONLY_FIELD]
    }

    fn config_signature(&self) -> String {
        format!("inheritance={}", self.policy)
    }

    fn collect(&self, tree: &BlockTree) -> Result<HashMap<UsageKey, Value>> {
        let mut staff_only: HashMap<UsageKey, bool> = HashMap::with_capacity(tree.len());
        for key in tree.topological() {
            let block = tree
                .get(&key)
                .ok_or_else(|| Error::structural(&key, "block missing from tree"))?;
            let parent_flags = tree
                .parents_of(&key)
                .iter()
                .map(|p| collected_parent(&staff_only, &key, p).copied())
                .collect::<Result<Vec<bool>>>()?;
            let restricted = block.bool_field(STAFF_ONLY_FIELD)? || self.policy.combine(parent_flags);
            staff_only.insert(key, restricted);
        }

        staff_only
            .into_iter()
            .map(|(key, visible_to_staff_only)| -> Result<(UsageKey, Value)> {
                let data = serde_json::to_value(VisibilityData {
                    visible_to_staff_only,
                })?;
                Ok((key, data))
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
            let data: VisibilityData = entry.transformation_data(VISIBILITY)?;
            if data.visible_to_staff_only && remove_block(entries, &key) {
                removed += 1;
            }
        }
        debug!(removed, "pruned staff-only blocks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_tree::load_block_tree;
    use crate::models::{Block, CourseContent};
    use crate::pipeline::Pipeline;
    use serde_json::json;

    fn staff_only(block: Block) -> Block {
        block.with_field(STAFF_ONLY_FIELD, json!(true))
    }

    fn collect(content: &CourseContent, policy: InheritancePolicy) -> BlockCacheEntries {
        let tree = load_block_tree(content.root_block().unwrap(), |b| content.get_children(b)).unwrap();
        let pipeline =
            Pipeline::new(vec![Box::new(VisibilityTransformation::new(policy))]).unwrap();
        pipeline.run_collect(&tree).unwrap()
    }

    fn flag(entries: &BlockCacheEntries, key: &str) -> bool {
        entries[key]
            .transformation_data::<VisibilityData>(VISIBILITY)
            .unwrap()
            .visible_to_staff_only
    }

    fn chain() -> CourseContent {
        CourseContent::new(
            "course-v1:Org+Chain+Run",
            "a",
            vec![
                staff_only(Block::new("a", "course")).with_children(["b"]),
                Block::new("b", "chapter").with_children(["c"]),
                Block::new("c", "sequential"),
            ],
        )
    }

    fn diamond() -> CourseContent {
        CourseContent::new(
            "course-v1:Org+Diamond+Run",
            "a",
            vec![
                Block::new("a", "course").with_children(["b", "c"]),
                staff_only(Block::new("b", "chapter")).with_children(["d"]),
                Block::new("c", "chapter").with_children(["d"]),
                Block::new("d", "html"),
            ],
        )
    }

    #[test]
    fn test_chain_inherits_under_both_policies() {
        for policy in [InheritancePolicy::Any, InheritancePolicy::All] {
            let entries = collect(&chain(), policy);
            assert!(flag(&entries, "a"));
            assert!(flag(&entries, "b"), "{} policy", policy);
            assert!(flag(&entries, "c"), "{} policy", policy);
        }
    }

    #[test]
    fn test_chain_apply_non_staff() {
        let mut entries = collect(&chain(), InheritancePolicy::Any);
        let transformation = VisibilityTransformation::default();
        transformation
            .apply(&"a".into(), &mut entries, &CourseUserInfo::new(false))
            .unwrap();
        assert_eq!(entries.len(), 1, "the root is kept, b and c are pruned");
        assert!(entries["a"].child_keys.is_empty());
    }

    #[test]
    fn test_chain_apply_staff_keeps_everything() {
        let mut entries = collect(&chain(), InheritancePolicy::Any);
        let before = entries.clone();
        VisibilityTransformation::default()
            .apply(&"a".into(), &mut entries, &CourseUserInfo::new(true))
            .unwrap();
        assert_eq!(entries, before);
    }

    #[test]
    fn test_diamond_any_restricts_shared_child() {
        let entries = collect(&diamond(), InheritancePolicy::Any);
        assert!(flag(&entries, "b"));
        assert!(!flag(&entries, "c"));
        assert!(flag(&entries, "d"));
    }

    #[test]
    fn test_diamond_all_keeps_shared_child() {
        let entries = collect(&diamond(), InheritancePolicy::All);
        assert!(flag(&entries, "b"));
        assert!(!flag(&entries, "c"));
        assert!(!flag(&entries, "d"));
    }

    #[test]
    fn test_diamond_all_apply_relinks_shared_child() {
        let mut entries = collect(&diamond(), InheritancePolicy::All);
        VisibilityTransformation::new(InheritancePolicy::All)
            .apply(&"a".into(), &mut entries, &CourseUserInfo::new(false))
            .unwrap();
        assert!(!entries.contains_key("b"));
        assert_eq!(entries["a"].child_keys, vec![UsageKey::from("c")]);
        assert_eq!(entries["d"].parent_keys, vec![UsageKey::from("c")]);
    }

    #[test]
    fn test_apply_without_collected_data_is_configuration_error() {
        let mut entries = collect(&chain(), InheritancePolicy::Any);
        for entry in entries.values_mut() {
            entry.transformation_data.clear();
        }
        let err = VisibilityTransformation::default()
            .apply(&"a".into(), &mut entries, &CourseUserInfo::new(false))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_trees_agree_across_policies() {
        let content = CourseContent::new(
            "course-v1:Org+Tree+Run",
            "course",
            vec![
                Block::new("course", "course").with_children(["a", "b"]),
                staff_only(Block::new("a", "chapter")).with_children(["a1", "a2"]),
                Block::new("b", "chapter").with_children(["b1"]),
                Block::new("a1", "sequential"),
                Block::new("a2", "sequential"),
                staff_only(Block::new("b1", "sequential")),
            ],
        );
        let any = collect(&content, InheritancePolicy::Any);
        let all = collect(&content, InheritancePolicy::All);
        for key in any.keys() {
            assert_eq!(
                flag(&any, key.as_str()),
                flag(&all, key.as_str()),
                "policies disagree on {}",
                key
            );
        }
    }

    #[test]
    fn test_generated_trees_agree_across_policies() {
        // Deterministic pseudo-random trees: every node but the root has
        // exactly one parent with a lower id.
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for _ in 0..25 {
            let n = 2 + (next() % 40) as usize;
            let mut children: Vec<Vec<String>> = vec![Vec::new(); n];
            for id in 1..n {
                let parent = (next() % id as u64) as usize;
                children[parent].push(format!("b{}", id));
            }
            let blocks: Vec<Block> = children
                .into_iter()
                .enumerate()
                .map(|(id, kids)| {
                    let block = Block::new(format!("b{}", id), "vertical").with_children(kids);
                    if next() % 4 == 0 {
                        staff_only(block)
                    } else {
                        block
                    }
                })
                .collect();
            let content = CourseContent::new("course-v1:Org+Gen+Run", "b0", blocks);

            let any = collect(&content, InheritancePolicy::Any);
            let all = collect(&content, InheritancePolicy::All);
            assert_eq!(any.len(), n);
            for key in any.keys() {
                assert_eq!(flag(&any, key.as_str()), flag(&all, key.as_str()), "{}", key);
            }
        }
    }

    #[test]
    fn test_non_boolean_flag_fails_collect() {
        let content = CourseContent::new(
            "course-v1:Org+Typed+Run",
            "course",
            vec![
                Block::new("course", "course").with_children(["exam"]),
                Block::new("exam", "sequential").with_field(STAFF_ONLY_FIELD, json!("true")),
            ],
        );
        let tree =
            load_block_tree(content.root_block().unwrap(), |b| content.get_children(b)).unwrap();
        let err = VisibilityTransformation::default().collect(&tree).unwrap_err();
        match err {
            Error::Structural { usage_key, .. } => assert_eq!(usage_key.as_str(), "exam"),
            other => panic!("expected structural error, got {:?}", other),
        }
    }
}
