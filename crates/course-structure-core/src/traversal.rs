//! Traversal engine over a block hierarchy.
//!
//! Both traversals are generic over the key type and driven entirely by
//! caller-supplied closures, so they work equally over a [`BlockTree`]
//! (see [`crate::block_tree`]), cached entries, or a test fixture.
//!
//! # Modes
//!
//! | Function | Order | DAG behaviour |
//! |----------|-------|---------------|
//! | [`traverse_pre_order`] | root first, children in declared order | shared blocks yielded once per path |
//! | [`traverse_topological`] | every block after all of its parents | each block yielded exactly once |
//!
//! An access checker that rejects a block prunes its whole subtree: nothing
//! below it is ever asked for its children.
//!
//! [`BlockTree`]: crate::block_tree::BlockTree

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Access checker that admits every block.
pub fn allow_all<K>(_: &K) -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════
// Pre-order
// ═══════════════════════════════════════════════════════════════════════

/// Stack-based depth-first iterator. Created by [`traverse_pre_order`].
pub struct PreOrder<K, C, A> {
    stack: Vec<K>,
    get_children: C,
    access_checker: A,
}

/// Walk `start` and its descendants in pre-order.
///
/// A block failing `access_checker` is skipped along with its entire
/// subtree.
pub fn traverse_pre_order<K, C, I, A>(start: K, get_children: C, access_checker: A) -> PreOrder<K, C, A>
where
    C: FnMut(&K) -> I,
    I: IntoIterator<Item = K>,
    A: FnMut(&K) -> bool,
{
    PreOrder {
        stack: vec![start],
        get_children,
        access_checker,
    }
}

impl<K, C, I, A> Iterator for PreOrder<K, C, A>
where
    C: FnMut(&K) -> I,
    I: IntoIterator<Item = K>,
    A: FnMut(&K) -> bool,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        while let Some(key) = self.stack.pop() {
            if !(self.access_checker)(&key) {
                continue;
            }
            let children: Vec<K> = (self.get_children)(&key).into_iter().collect();
            self.stack.extend(children.into_iter().rev());
            return Some(key);
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Topological
// ═══════════════════════════════════════════════════════════════════════

/// Single-pass topological iterator. Created by [`traverse_topological`].
///
/// Not `Clone`: walking the hierarchy again means building a new one.
pub struct Topological<K, C> {
    ready: Vec<K>,
    pending: HashMap<K, usize>,
    get_children: C,
}

/// Walk every block reachable from `start` so that each one is yielded
/// exactly once and only after all of its parents.
///
/// The walked set is every block reachable from `start` through children
/// admitted by `access_checker`. A block's in-degree counts the parents
/// returned by `get_parents` that belong to that set; parents outside it
/// (rejected, or above `start`) do not hold the block back. `start` itself
/// is always the seed.
///
/// Reachability and in-degrees are computed up front; blocks are then
/// released lazily as the iterator is driven (Kahn's algorithm, LIFO ready
/// stack with children pushed in reverse so the order stays close to
/// pre-order).
pub fn traverse_topological<K, P, PI, C, CI, A>(
    start: K,
    mut get_parents: P,
    mut get_children: C,
    mut access_checker: A,
) -> Topological<K, C>
where
    K: Clone + Eq + Hash,
    P: FnMut(&K) -> PI,
    PI: IntoIterator<Item = K>,
    C: FnMut(&K) -> CI,
    CI: IntoIterator<Item = K>,
    A: FnMut(&K) -> bool,
{
    if !access_checker(&start) {
        return Topological {
            ready: Vec::new(),
            pending: HashMap::new(),
            get_children,
        };
    }

    let mut reachable: HashSet<K> = HashSet::new();
    let mut stack = vec![start.clone()];
    while let Some(key) = stack.pop() {
        if !reachable.insert(key.clone()) {
            continue;
        }
        for child in get_children(&key) {
            if !reachable.contains(&child) && access_checker(&child) {
                stack.push(child);
            }
        }
    }

    let pending = reachable
        .iter()
        .map(|key| {
            let in_degree = if *key == start {
                0
            } else {
                get_parents(key)
                    .into_iter()
                    .filter(|p| reachable.contains(p))
                    .count()
            };
            (key.clone(), in_degree)
        })
        .collect();

    Topological {
        ready: vec![start],
        pending,
        get_children,
    }
}

impl<K, C, CI> Iterator for Topological<K, C>
where
    K: Clone + Eq + Hash,
    C: FnMut(&K) -> CI,
    CI: IntoIterator<Item = K>,
{
    type Item = K;

    fn next(&mut self) -> Option<K> {
        let key = self.ready.pop()?;
        let mut released = Vec::new();
        for child in (self.get_children)(&key) {
            if let Some(remaining) = self.pending.get_mut(&child) {
                if *remaining > 0 {
                    *remaining -= 1;
                    if *remaining == 0 {
                        released.push(child);
                    }
                }
            }
        }
        self.ready.extend(released.into_iter().rev());
        Some(key)
    }
}
