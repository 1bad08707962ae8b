//! Ordered-sequence and text merge.
//!
//! Each side is diffed against the ancestor (Myers, via `similar`) and every
//! ancestor position is classified as kept, deleted or replaced. Insertions
//! are anchored to the ancestor position they precede. The merge then walks
//! the ancestor once:
//!
//! 1. Emit the insertions anchored here, left side first
//! 2. Emit the ancestor element if neither side removed it
//!
//! Identical insertions at the same anchor are emitted once. A replaced run
//! is dropped when the opposite side deleted any element of it.

use crate::merge::{MergeStrategy, Mergeable};
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffOp};
use std::hash::Hash;
use std::ops::Range;

/// An ordered list merged three-way against its ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence<T> {
    items: Vec<T>,
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Sequence<T> {
    /// Create a sequence from items.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Borrow the items.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Mutable access for arbitrary edits.
    pub fn items_mut(&mut self) -> &mut Vec<T> {
        &mut self.items
    }

    /// Append an item.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Get the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consume into the underlying vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for Sequence<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T: Clone + Ord + Hash> Mergeable for Sequence<T> {
    const STRATEGY: MergeStrategy = MergeStrategy::Sequence;

    fn merge(ancestor: &Self, left: &Self, right: &Self) -> Self {
        Self::new(merge_slices(&ancestor.items, &left.items, &right.items))
    }
}

/// Text merged character by character as a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Text {
    content: String,
}

impl Text {
    /// Create text from a string.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Borrow the content.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Mutable access to the content.
    pub fn content_mut(&mut self) -> &mut String {
        &mut self.content
    }
}

impl Mergeable for Text {
    const STRATEGY: MergeStrategy = MergeStrategy::Text;

    fn merge(ancestor: &Self, left: &Self, right: &Self) -> Self {
        let chars = |t: &Text| t.content.chars().collect::<Vec<_>>();
        let merged = merge_slices(&chars(ancestor), &chars(left), &chars(right));
        Self {
            content: merged.into_iter().collect(),
        }
    }
}

/// Three-way merge of ordered slices.
///
/// Not commutative when both sides insert different content at the same
/// anchor: the left run is placed first. Callers that need a
/// direction-independent result must order the sides canonically.
///
/// Identical sides return that side unchanged, so the same run inserted
/// concurrently on both sides appears once in the result.
#[must_use]
pub fn merge_slices<T: Clone + Ord + Hash>(ancestor: &[T], left: &[T], right: &[T]) -> Vec<T> {
    if left == right || right == ancestor {
        return left.to_vec();
    }
    if left == ancestor {
        return right.to_vec();
    }

    let left_edits = SideEdits::analyze(ancestor, left);
    let right_edits = SideEdits::analyze(ancestor, right);

    let mut merged = Vec::with_capacity(left.len().max(right.len()));
    for anchor in 0..=ancestor.len() {
        let from_left = left_edits.surviving_insertion(anchor, &right_edits);
        let from_right = right_edits.surviving_insertion(anchor, &left_edits);
        match (from_left, from_right) {
            (Some(l), Some(r)) if l == r => merged.extend_from_slice(l),
            (l, r) => {
                for run in [l, r].into_iter().flatten() {
                    merged.extend_from_slice(run);
                }
            }
        }

        if anchor < ancestor.len()
            && left_edits.fates[anchor] == Fate::Kept
            && right_edits.fates[anchor] == Fate::Kept
        {
            merged.push(ancestor[anchor].clone());
        }
    }

    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Kept,
    Deleted,
    Replaced,
}

struct Insertion<'a, T> {
    items: &'a [T],
    /// Ancestor range this run replaced, `None` for a pure insertion
    replaces: Option<Range<usize>>,
}

/// One side's changes relative to the ancestor.
struct SideEdits<'a, T> {
    fates: Vec<Fate>,
    /// Indexed by anchor: the run inserted before ancestor position `i`
    insertions: Vec<Option<Insertion<'a, T>>>,
}

impl<'a, T: Ord + Hash> SideEdits<'a, T> {
    fn analyze(ancestor: &[T], side: &'a [T]) -> Self {
        let mut fates = vec![Fate::Kept; ancestor.len()];
        let mut insertions: Vec<Option<Insertion<'a, T>>> =
            std::iter::repeat_with(|| None).take(ancestor.len() + 1).collect();

        for op in capture_diff_slices(Algorithm::Myers, ancestor, side) {
            match op {
                DiffOp::Equal { .. } => {}
                DiffOp::Delete {
                    old_index, old_len, ..
                } => {
                    fates[old_index..old_index + old_len].fill(Fate::Deleted);
                }
                DiffOp::Insert {
                    old_index,
                    new_index,
                    new_len,
                } => {
                    insertions[old_index] = Some(Insertion {
                        items: &side[new_index..new_index + new_len],
                        replaces: None,
                    });
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    fates[old_index..old_index + old_len].fill(Fate::Replaced);
                    insertions[old_index] = Some(Insertion {
                        items: &side[new_index..new_index + new_len],
                        replaces: Some(old_index..old_index + old_len),
                    });
                }
            }
        }

        Self { fates, insertions }
    }

    /// The run inserted at `anchor`, unless the other side deleted what it replaced.
    fn surviving_insertion(&self, anchor: usize, other: &SideEdits<'_, T>) -> Option<&'a [T]> {
        let insertion = self.insertions[anchor].as_ref()?;
        if let Some(range) = &insertion.replaces {
            if other.fates[range.clone()].contains(&Fate::Deleted) {
                return None;
            }
        }
        Some(insertion.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(ancestor: &str, left: &str, right: &str) -> String {
        Text::merge(&Text::new(ancestor), &Text::new(left), &Text::new(right))
            .as_str()
            .to_string()
    }

    #[test]
    fn delete_and_anchored_insert() {
        // left deletes B, right inserts X after B
        assert_eq!(merge("ABC", "AC", "ABXC"), "AXC");
    }

    #[test]
    fn independent_edits_both_kept() {
        assert_eq!(merge("ABCD", "xABCD", "ABCDy"), "xABCDy");
        assert_eq!(merge("ABCD", "ACD", "ABC"), "AC");
    }

    #[test]
    fn concurrent_inserts_at_same_anchor_left_first() {
        assert_eq!(merge("AC", "AXC", "AYC"), "AXYC");
        assert_eq!(merge("AC", "AYC", "AXC"), "AYXC");
    }

    #[test]
    fn identical_sides_are_returned_unchanged() {
        let ancestor = [1, 2];
        let side = [1, 7, 7, 2];
        assert_eq!(merge_slices(&ancestor, &side, &side), side.to_vec());
    }

    #[test]
    fn identical_inserts_kept_once() {
        assert_eq!(merge("AC", "AXC", "AXC"), "AXC");
        assert_eq!(merge("AC", "AXYC", "AXYC"), "AXYC");
    }

    #[test]
    fn modified_versus_deleted_deletion_wins() {
        assert_eq!(merge("ABC", "AQC", "AC"), "AC");
        assert_eq!(merge("ABC", "AC", "AQC"), "AC");
    }

    #[test]
    fn both_modified_keeps_both_runs() {
        assert_eq!(merge("ABC", "APC", "AQC"), "APQC");
    }

    #[test]
    fn one_side_unchanged_returns_other() {
        assert_eq!(merge("hello", "hello", "Hello, world"), "Hello, world");
        assert_eq!(merge("hello", "help", "hello"), "help");
    }

    #[test]
    fn text_edits_at_both_ends() {
        assert_eq!(merge("hello", "hello world", "Hello"), "Hello world");
    }

    #[test]
    fn generic_sequence_merge() {
        let ancestor = Sequence::new(vec![1, 2, 3]);
        let left = Sequence::new(vec![1, 3]);
        let right = Sequence::new(vec![1, 2, 9, 3]);
        assert_eq!(
            Sequence::merge(&ancestor, &left, &right).into_vec(),
            vec![1, 9, 3]
        );
    }

    #[test]
    fn empty_ancestor() {
        let merged = merge_slices(&[], &[1, 2], &[3]);
        assert_eq!(merged, vec![1, 2, 3]);
    }
}
