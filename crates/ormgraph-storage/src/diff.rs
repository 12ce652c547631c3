//! Collection differencing.
//!
//! Elements are matched by identifier. [`diff_set`] treats both sides as
//! sets: the first occurrence of an id wins. [`diff_list`] keeps positions and
//! pairs duplicates positionally, the k-th occurrence of an id before with
//! the k-th occurrence after. Elements without an id never match anything.
//!
//! Output order is the after-side order for `Added` and `Held`, followed by
//! the `Removed` elements in before-side order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Outcome for one element of an unordered collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff<T> {
    Added(T),
    Held { original: T, replacement: T },
    Removed(T),
}

/// Outcome for one element of an ordered collection.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexedDiff<T> {
    Added {
        replacement: T,
        index: usize,
    },
    Held {
        original: T,
        replacement: T,
        original_index: usize,
        new_index: usize,
    },
    Removed {
        original: T,
        index: usize,
    },
}

impl<T> IndexedDiff<T> {
    /// Held at a different position.
    pub fn is_reindexed(&self) -> bool {
        matches!(
            self,
            IndexedDiff::Held { original_index, new_index, .. } if original_index != new_index
        )
    }
}

pub fn diff_set<T, K, F>(before: &[T], after: &[T], id: F) -> Vec<Diff<T>>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut originals: HashMap<K, usize> = HashMap::new();
    let mut removed: Vec<usize> = Vec::new();
    for (i, element) in before.iter().enumerate() {
        match id(element) {
            Some(key) => {
                originals.entry(key).or_insert(i);
            }
            None => removed.push(i),
        }
    }

    let mut matched = vec![false; before.len()];
    let mut seen_after: HashSet<K> = HashSet::new();
    let mut out = Vec::with_capacity(after.len());
    for element in after {
        let Some(key) = id(element) else {
            out.push(Diff::Added(element.clone()));
            continue;
        };
        if seen_after.contains(&key) {
            continue;
        }
        match originals.get(&key) {
            Some(&i) => {
                matched[i] = true;
                out.push(Diff::Held {
                    original: before[i].clone(),
                    replacement: element.clone(),
                });
            }
            None => out.push(Diff::Added(element.clone())),
        }
        seen_after.insert(key);
    }

    for &i in originals.values() {
        if !matched[i] {
            removed.push(i);
        }
    }
    removed.sort_unstable();
    out.extend(removed.into_iter().map(|i| Diff::Removed(before[i].clone())));
    out
}

pub fn diff_list<T, K, F>(before: &[T], after: &[T], id: F) -> Vec<IndexedDiff<T>>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut occurrences: HashMap<K, VecDeque<usize>> = HashMap::new();
    for (i, element) in before.iter().enumerate() {
        if let Some(key) = id(element) {
            occurrences.entry(key).or_default().push_back(i);
        }
    }

    let mut matched = vec![false; before.len()];
    let mut out = Vec::with_capacity(after.len());
    for (j, element) in after.iter().enumerate() {
        let original = id(element)
            .and_then(|key| occurrences.get_mut(&key))
            .and_then(VecDeque::pop_front);
        match original {
            Some(i) => {
                matched[i] = true;
                out.push(IndexedDiff::Held {
                    original: before[i].clone(),
                    replacement: element.clone(),
                    original_index: i,
                    new_index: j,
                });
            }
            None => out.push(IndexedDiff::Added {
                replacement: element.clone(),
                index: j,
            }),
        }
    }

    for (i, element) in before.iter().enumerate() {
        if !matched[i] {
            out.push(IndexedDiff::Removed {
                original: element.clone(),
                index: i,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ident(x: &Option<u8>) -> Option<u8> {
        *x
    }

    #[test]
    fn set_added_held_removed() {
        let before = [Some(10), Some(12)];
        let after = [Some(10), Some(11)];
        let diffs = diff_set(&before, &after, ident);
        assert_eq!(
            diffs,
            vec![
                Diff::Held {
                    original: Some(10),
                    replacement: Some(10)
                },
                Diff::Added(Some(11)),
                Diff::Removed(Some(12)),
            ]
        );
    }

    #[test]
    fn set_first_occurrence_wins() {
        let diffs = diff_set(&[Some(1), Some(1)], &[Some(1), Some(1)], ident);
        assert_eq!(diffs.len(), 1);
    }

    #[test]
    fn elements_without_id_never_match() {
        let diffs = diff_set(&[None], &[None], ident);
        assert_eq!(diffs, vec![Diff::Added(None), Diff::Removed(None)]);
        let diffs = diff_list(&[None], &[None], ident);
        assert_eq!(
            diffs,
            vec![
                IndexedDiff::Added {
                    replacement: None,
                    index: 0
                },
                IndexedDiff::Removed {
                    original: None,
                    index: 0
                },
            ]
        );
    }

    #[test]
    fn list_matches_duplicates_positionally() {
        let before = [Some(1), Some(2), Some(1)];
        let after = [Some(1), Some(1)];
        let diffs = diff_list(&before, &after, ident);
        assert_eq!(
            diffs,
            vec![
                IndexedDiff::Held {
                    original: Some(1),
                    replacement: Some(1),
                    original_index: 0,
                    new_index: 0
                },
                IndexedDiff::Held {
                    original: Some(1),
                    replacement: Some(1),
                    original_index: 2,
                    new_index: 1
                },
                IndexedDiff::Removed {
                    original: Some(2),
                    index: 1
                },
            ]
        );
        assert!(diffs[1].is_reindexed());
        assert!(!diffs[0].is_reindexed());
    }

    fn ids() -> impl Strategy<Value = Vec<Option<u8>>> {
        prop::collection::vec(prop::option::weighted(0.9, 0u8..20), 0..12)
    }

    proptest! {
        #[test]
        fn list_accounts_for_every_element(before in ids(), after in ids()) {
            let diffs = diff_list(&before, &after, ident);
            let added = diffs.iter().filter(|d| matches!(d, IndexedDiff::Added { .. })).count();
            let held = diffs.iter().filter(|d| matches!(d, IndexedDiff::Held { .. })).count();
            let removed = diffs.iter().filter(|d| matches!(d, IndexedDiff::Removed { .. })).count();
            prop_assert_eq!(added + held, after.len());
            prop_assert_eq!(removed + held, before.len());
        }

        #[test]
        fn identical_lists_are_all_held_in_place(before in ids()) {
            let keyed: Vec<Option<u8>> = before.into_iter().flatten().map(Some).collect();
            let diffs = diff_list(&keyed, &keyed, ident);
            prop_assert_eq!(diffs.len(), keyed.len());
            for d in &diffs {
                let held = matches!(d, IndexedDiff::Held { .. });
                prop_assert!(held);
                prop_assert!(!d.is_reindexed());
            }
        }

        #[test]
        fn disjoint_sets_share_nothing(before in prop::collection::hash_set(0u8..10, 0..8),
                                       after in prop::collection::hash_set(10u8..20, 0..8)) {
            let before: Vec<Option<u8>> = before.into_iter().map(Some).collect();
            let after: Vec<Option<u8>> = after.into_iter().map(Some).collect();
            let diffs = diff_set(&before, &after, ident);
            let none_held = diffs.iter().all(|d| !matches!(d, Diff::Held { .. }));
            prop_assert!(none_held);
            prop_assert_eq!(diffs.len(), before.len() + after.len());
        }

        #[test]
        fn reversal_reindexes_every_moved_element(set in prop::collection::hash_set(0u8..50, 2..10)) {
            let before: Vec<Option<u8>> = set.into_iter().map(Some).collect();
            let after: Vec<Option<u8>> = before.iter().rev().cloned().collect();
            let diffs = diff_list(&before, &after, ident);
            let n = before.len();
            for d in &diffs {
                match d {
                    IndexedDiff::Held { original_index, new_index, .. } => {
                        prop_assert_eq!(*new_index, n - 1 - *original_index);
                        prop_assert_eq!(d.is_reindexed(), *original_index != *new_index);
                    }
                    other => prop_assert!(false, "unexpected {:?}", other),
                }
            }
        }

        #[test]
        fn set_output_follows_after_order(before in ids(), after in ids()) {
            let diffs = diff_set(&before, &after, ident);
            let first_removed = diffs.iter().position(|d| matches!(d, Diff::Removed(_))).unwrap_or(diffs.len());
            prop_assert!(diffs[first_removed..].iter().all(|d| matches!(d, Diff::Removed(_))));
        }
    }
}
