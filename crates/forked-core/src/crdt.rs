//! Mergeable field wrappers: registers, observed-remove sets and counters.
//!
//! Every wrapper implements [`Mergeable`], a three-way merge given the most
//! recent common ancestor state and the two diverged states.

use crate::clock::LogicalClock;
use crate::merge::{MergeStrategy, Mergeable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A Last-Writer-Wins register holding a value with the clock of its last write.
///
/// Merge takes the side with the greater stamp; the ancestor is not needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register<T> {
    /// The stored value
    pub value: T,
    /// Clock at the moment `value` was last set
    pub stamp: LogicalClock,
}

impl<T> Register<T> {
    /// Create a new register with an initial value.
    #[must_use]
    pub fn new(value: T, stamp: LogicalClock) -> Self {
        Self { value, stamp }
    }

    /// Replace value and stamp together if the new stamp is higher.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, stamp: LogicalClock) -> bool {
        if stamp > self.stamp {
            self.value = value;
            self.stamp = stamp;
            true
        } else {
            false
        }
    }

    /// Borrow the current value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: Default> Default for Register<T> {
    fn default() -> Self {
        Self::new(T::default(), LogicalClock::zero())
    }
}

impl<T: Clone> Mergeable for Register<T> {
    const STRATEGY: MergeStrategy = MergeStrategy::Register;

    fn merge(_ancestor: &Self, left: &Self, right: &Self) -> Self {
        // Equal stamps mean identical provenance, so either side will do.
        if left.stamp >= right.stamp {
            left.clone()
        } else {
            right.clone()
        }
    }
}

/// An observed-remove set merged relative to its ancestor.
///
/// An element removed on one side and untouched on the other stays removed;
/// an element added independently on both sides appears once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrSet<T: Ord> {
    elements: BTreeSet<T>,
}

impl<T: Ord> Default for OrSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> OrSet<T> {
    /// Create a new empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: BTreeSet::new(),
        }
    }

    /// Add an element. Returns `true` if it was not already present.
    pub fn insert(&mut self, element: T) -> bool {
        self.elements.insert(element)
    }

    /// Remove an element. Returns `true` if it was present.
    pub fn remove(&mut self, element: &T) -> bool {
        self.elements.remove(element)
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.elements.contains(element)
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    /// Get the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: Ord> FromIterator<T> for OrSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl<T: Ord + Clone> Mergeable for OrSet<T> {
    const STRATEGY: MergeStrategy = MergeStrategy::Set;

    fn merge(ancestor: &Self, left: &Self, right: &Self) -> Self {
        let base = &ancestor.elements;
        // Elements an ancestor had but a side dropped act as tombstones.
        let removed: BTreeSet<&T> = base
            .difference(&left.elements)
            .chain(base.difference(&right.elements))
            .collect();

        let elements = base
            .iter()
            .chain(left.elements.difference(base))
            .chain(right.elements.difference(base))
            .filter(|e| !removed.contains(e))
            .cloned()
            .collect();

        Self { elements }
    }
}

/// A counter merged by summing each side's delta from the ancestor.
///
/// Equal concurrent deltas both count: `merge(0, 1, 1)` is 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter {
    value: i64,
}

impl Counter {
    /// Create a counter with an initial value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self { value }
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Add `delta` (may be negative) and return the new value.
    pub fn increment(&mut self, delta: i64) -> i64 {
        self.value = self.value.wrapping_add(delta);
        self.value
    }
}

impl Mergeable for Counter {
    const STRATEGY: MergeStrategy = MergeStrategy::Counter;

    fn merge(ancestor: &Self, left: &Self, right: &Self) -> Self {
        let left_delta = left.value.wrapping_sub(ancestor.value);
        let right_delta = right.value.wrapping_sub(ancestor.value);
        Self::new(
            ancestor
                .value
                .wrapping_add(left_delta)
                .wrapping_add(right_delta),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stamp(counter: u64, token: u8) -> LogicalClock {
        LogicalClock {
            counter,
            token: Uuid::from_bytes([token; 16]),
        }
    }

    fn set(items: &[&str]) -> OrSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn register_higher_stamp_wins() {
        let mut reg = Register::new(10, stamp(1, 0));
        assert!(reg.set(20, stamp(2, 0)));
        assert_eq!(reg.value, 20);

        // Earlier stamp should not update
        assert!(!reg.set(5, stamp(1, 0)));
        assert_eq!(reg.value, 20);
    }

    #[test]
    fn register_merge_takes_newer_side() {
        let ancestor = Register::new("a", stamp(1, 0));
        let left = Register::new("b", stamp(2, 1));
        let right = ancestor.clone();

        assert_eq!(Register::merge(&ancestor, &left, &right), left);
        assert_eq!(Register::merge(&ancestor, &right, &left), left);
    }

    #[test]
    fn register_concurrent_writes_tie_break_on_token() {
        let ancestor = Register::new(0, stamp(1, 0));
        let left = Register::new(1, stamp(2, 9));
        let right = Register::new(2, stamp(2, 3));

        assert_eq!(Register::merge(&ancestor, &left, &right).value, 1);
        assert_eq!(Register::merge(&ancestor, &right, &left).value, 1);
    }

    #[test]
    fn set_keeps_adds_and_honours_removes() {
        let ancestor = set(&["a", "b", "c"]);
        let left = set(&["a", "c", "x"]); // removed b, added x
        let right = set(&["a", "b", "c", "y"]); // added y

        let merged = OrSet::merge(&ancestor, &left, &right);
        assert_eq!(merged, set(&["a", "c", "x", "y"]));
    }

    #[test]
    fn set_same_add_on_both_sides_appears_once() {
        let ancestor = set(&[]);
        let left = set(&["z"]);
        let right = set(&["z"]);

        let merged = OrSet::merge(&ancestor, &left, &right);
        assert_eq!(merged.len(), 1);
        assert!(merged.contains(&"z".to_string()));
    }

    #[test]
    fn counter_sums_deltas() {
        let ancestor = Counter::new(0);
        let left = Counter::new(3);
        let right = Counter::new(5);
        assert_eq!(Counter::merge(&ancestor, &left, &right).value(), 8);
    }

    #[test]
    fn counter_equal_concurrent_deltas_both_count() {
        let ancestor = Counter::new(1);
        let side = Counter::new(4);
        assert_eq!(Counter::merge(&ancestor, &side, &side).value(), 7);
        assert_eq!(Counter::merge(&ancestor, &ancestor, &ancestor), ancestor);
    }

    #[test]
    fn counter_handles_decrements() {
        let ancestor = Counter::new(10);
        let mut left = ancestor;
        left.increment(-4);
        let mut right = ancestor;
        right.increment(2);
        assert_eq!(Counter::merge(&ancestor, &left, &right).value(), 8);
    }
}
