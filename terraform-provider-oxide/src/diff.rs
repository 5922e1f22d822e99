//! Set difference over ordered sequences
//!
//! Every child-collection reconciler works from two lists: what the plan
//! wants and what state last recorded. Additions are `slice_diff(plan, state)`
//! and removals are `slice_diff(state, plan)`.

use std::collections::HashSet;
use std::hash::Hash;

/// Elements of `a` that do not appear in `b`, in `a`'s order.
///
/// Duplicates in `a` are all kept when absent from `b`.
pub fn slice_diff<T>(a: &[T], b: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    slice_diff_by(a, b, |item| item.clone())
}

/// Like [`slice_diff`], comparing elements through `key`.
pub fn slice_diff_by<T, K, F>(a: &[T], b: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let present: HashSet<K> = b.iter().map(&key).collect();
    a.iter()
        .filter(|item| !present.contains(&key(*item)))
        .cloned()
        .collect()
}
