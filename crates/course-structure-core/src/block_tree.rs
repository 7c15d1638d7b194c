//! Block tree loader.
//!
//! Walks a course hierarchy from its root and records every reachable
//! block together with its forward (child) and backward (parent) edges.
//! The hierarchy is a DAG: a block shared by several parents is loaded
//! once, but each in-edge is kept in its parent list.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Block, UsageKey};
use crate::traversal::{allow_all, traverse_topological};

/// Flattened view of a course hierarchy produced by [`load_block_tree`].
#[derive(Debug, Clone)]
pub struct BlockTree {
    root: UsageKey,
    blocks: HashMap<UsageKey, Block>,
    parents: HashMap<UsageKey, Vec<UsageKey>>,
    children: HashMap<UsageKey, Vec<UsageKey>>,
}

impl BlockTree {
    pub fn root(&self) -> &UsageKey {
        &self.root
    }

    pub fn get(&self, key: &UsageKey) -> Option<&Block> {
        self.blocks.get(key)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &UsageKey> {
        self.blocks.keys()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Child keys of `key` in declared order; empty for unknown keys.
    pub fn children_of(&self, key: &UsageKey) -> &[UsageKey] {
        self.children.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent keys of `key` in discovery order; empty for the root.
    pub fn parents_of(&self, key: &UsageKey) -> &[UsageKey] {
        self.parents.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every block in topological order, starting at the root.
    pub fn topological(&self) -> impl Iterator<Item = UsageKey> + '_ {
        traverse_topological(
            self.root.clone(),
            move |k: &UsageKey| self.parents_of(k).to_vec(),
            move |k: &UsageKey| self.children_of(k).to_vec(),
            allow_all,
        )
    }
}

struct Frame<'a> {
    block: &'a Block,
    children: std::vec::IntoIter<&'a Block>,
}

/// Load every block reachable from `root`.
///
/// `get_children` returns a block's declared children in order. An edge
/// that leads back to a block on the current path (a cycle, including a
/// self-loop) fails with [`Error::Structural`] naming that block.
pub fn load_block_tree<'a, F>(root: &'a Block, mut get_children: F) -> Result<BlockTree>
where
    F: FnMut(&'a Block) -> Result<Vec<&'a Block>>,
{
    let root_key = root.usage_key.clone();
    let mut blocks = HashMap::new();
    let mut parents: HashMap<UsageKey, Vec<UsageKey>> = HashMap::new();
    let mut children: HashMap<UsageKey, Vec<UsageKey>> = HashMap::new();
    let mut on_path: HashSet<UsageKey> = HashSet::new();

    blocks.insert(root_key.clone(), root.clone());
    parents.insert(root_key.clone(), Vec::new());
    children.insert(root_key.clone(), Vec::new());
    on_path.insert(root_key.clone());

    let mut stack = vec![Frame {
        block: root,
        children: get_children(root)?.into_iter(),
    }];

    while let Some(frame) = stack.last_mut() {
        let parent_key = frame.block.usage_key.clone();
        let Some(child) = frame.children.next() else {
            on_path.remove(&parent_key);
            stack.pop();
            continue;
        };
        let child_key = &child.usage_key;

        if on_path.contains(child_key) {
            return Err(Error::structural(
                child_key,
                format!("cycle detected: reached again from {}", parent_key),
            ));
        }

        children
            .entry(parent_key.clone())
            .or_default()
            .push(child_key.clone());
        parents
            .entry(child_key.clone())
            .or_default()
            .push(parent_key);

        if blocks.contains_key(child_key) {
            continue;
        }
        blocks.insert(child_key.clone(), child.clone());
        children.insert(child_key.clone(), Vec::new());
        on_path.insert(child_key.clone());
        let grandchildren = get_children(child)?;
        stack.push(Frame {
            block: child,
            children: grandchildren.into_iter(),
        });
    }

    debug!(root = %root_key, blocks = blocks.len(), "loaded block tree");

    Ok(BlockTree {
        root: root_key,
        blocks,
        parents,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CourseContent;

    fn content(blocks: Vec<Block>) -> CourseContent {
        CourseContent::new("course-v1:Org+Num+Run", "course", blocks)
    }

    fn load(content: &CourseContent) -> Result<BlockTree> {
        load_block_tree(content.root_block()?, |b| content.get_children(b))
    }

    fn keys(ks: &[UsageKey]) -> Vec<&str> {
        ks.iter().map(UsageKey::as_str).collect()
    }

    #[test]
    fn test_load_tree() {
        let c = content(vec![
            Block::new("course", "course").with_children(["ch1", "ch2"]),
            Block::new("ch1", "chapter").with_children(["seq1"]),
            Block::new("ch2", "chapter"),
            Block::new("seq1", "sequential"),
            Block::new("orphan", "html"),
        ]);
        let tree = load(&c).unwrap();
        assert_eq!(tree.len(), 4, "unreachable blocks are not loaded");
        assert_eq!(keys(tree.children_of(&"course".into())), vec!["ch1", "ch2"]);
        assert_eq!(keys(tree.parents_of(&"seq1".into())), vec!["ch1"]);
        assert!(tree.parents_of(&"course".into()).is_empty());
        assert!(tree.get(&"orphan".into()).is_none());
    }

    #[test]
    fn test_load_dag_records_every_in_edge() {
        let c = content(vec![
            Block::new("course", "course").with_children(["a", "b"]),
            Block::new("a", "chapter").with_children(["shared"]),
            Block::new("b", "chapter").with_children(["shared"]),
            Block::new("shared", "html"),
        ]);
        let tree = load(&c).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(keys(tree.parents_of(&"shared".into())), vec!["a", "b"]);
        assert_eq!(keys(tree.children_of(&"b".into())), vec!["shared"]);
    }

    #[test]
    fn test_load_cycle_fails() {
        let c = content(vec![
            Block::new("course", "course").with_children(["a"]),
            Block::new("a", "chapter").with_children(["b"]),
            Block::new("b", "sequential").with_children(["a"]),
        ]);
        match load(&c) {
            Err(Error::Structural { usage_key, .. }) => assert_eq!(usage_key.as_str(), "a"),
            other => panic!("expected structural error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_self_loop_fails() {
        let c = content(vec![Block::new("course", "course").with_children(["course"])]);
        assert!(matches!(load(&c), Err(Error::Structural { .. })));
    }

    #[test]
    fn test_load_propagates_accessor_error() {
        let c = content(vec![Block::new("course", "course").with_children(["missing"])]);
        assert!(matches!(load(&c), Err(Error::Structural { .. })));
    }

    #[test]
    fn test_topological_over_tree() {
        let c = content(vec![
            Block::new("course", "course").with_children(["a", "b"]),
            Block::new("a", "chapter").with_children(["d"]),
            Block::new("b", "chapter").with_children(["c"]),
            Block::new("c", "sequential").with_children(["d"]),
            Block::new("d", "html"),
        ]);
        let tree = load(&c).unwrap();
        let order: Vec<String> = tree.topological().map(|k| k.to_string()).collect();
        assert_eq!(order, vec!["course", "a", "b", "c", "d"]);
    }
}
