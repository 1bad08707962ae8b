//! Per-field merge strategies and the aggregate merger.
//!
//! Each field of an aggregate declares one strategy from a closed set.
//! Dispatch is a registry lookup keyed by that tag.
//!
//! # Merge Rules
//!
//! | Strategy | Rule |
//! |----------|------|
//! | Register | Last-writer-wins by logical clock (counter, then token) |
//! | Set | Ancestor plus both sides' additions, minus both sides' removals |
//! | Sequence | Three-way list merge anchored on the common subsequence |
//! | Counter | Ancestor plus the sum of both sides' deltas |
//! | Text | Sequence merge over characters |

use crate::aggregate::{Aggregate, Field, FieldSlot, Schema};
use crate::atom::Atom;
use crate::clock::LogicalClock;
use crate::crdt::{Counter, OrSet, Register};
use crate::history::Commit;
use crate::sequence::{Sequence, Text};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// Merge strategy declared for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Last-Writer-Wins cell
    Register,
    /// Observed-remove set
    Set,
    /// Ordered list
    Sequence,
    /// Delta-summing counter
    Counter,
    /// Character sequence
    Text,
}

impl MergeStrategy {
    /// Every strategy, in declaration order.
    pub const ALL: [MergeStrategy; 5] = [
        MergeStrategy::Register,
        MergeStrategy::Set,
        MergeStrategy::Sequence,
        MergeStrategy::Counter,
        MergeStrategy::Text,
    ];

    /// The lowercase tag used in configuration and schemas.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Register => "register",
            MergeStrategy::Set => "set",
            MergeStrategy::Sequence => "sequence",
            MergeStrategy::Counter => "counter",
            MergeStrategy::Text => "text",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == tag)
            .ok_or_else(|| ParseStrategyError(s.to_string()))
    }
}

/// Unrecognised strategy tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge strategy: {0}")]
pub struct ParseStrategyError(pub String);

/// A value with a three-way merge.
///
/// Implementations must satisfy `merge(a, l, l) == l`.
pub trait Mergeable: Clone {
    /// The strategy tag this type implements.
    const STRATEGY: MergeStrategy;

    /// Merge two diverged states given their most recent common ancestor.
    #[must_use]
    fn merge(ancestor: &Self, left: &Self, right: &Self) -> Self;
}

/// Merges one field of an aggregate.
pub trait FieldMerger: Send + Sync {
    /// The strategy this merger implements.
    fn strategy(&self) -> MergeStrategy;

    /// Merge the three states of `field`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::SchemaMismatch`] if any state is not of this
    /// merger's strategy.
    fn merge(
        &self,
        field: &str,
        ancestor: &Field,
        left: &Field,
        right: &Field,
    ) -> Result<Field, MergeError>;
}

/// [`FieldMerger`] for a built-in [`Mergeable`] field type.
pub struct StrategyMerger<M>(PhantomData<fn() -> M>);

impl<M> StrategyMerger<M> {
    /// Create the merger.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<M> Default for StrategyMerger<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: FieldSlot> FieldMerger for StrategyMerger<M> {
    fn strategy(&self) -> MergeStrategy {
        M::STRATEGY
    }

    fn merge(
        &self,
        field: &str,
        ancestor: &Field,
        left: &Field,
        right: &Field,
    ) -> Result<Field, MergeError> {
        let merged = M::merge(
            field_state(field, "ancestor", ancestor)?,
            field_state(field, "left", left)?,
            field_state(field, "right", right)?,
        );
        Ok(merged.into_field())
    }
}

fn field_state<'f, M: FieldSlot>(
    field: &str,
    role: &str,
    value: &'f Field,
) -> Result<&'f M, MergeError> {
    M::from_field(value).ok_or_else(|| MergeError::SchemaMismatch {
        field: field.to_string(),
        reason: format!(
            "{role} holds {} state, expected {}",
            value.strategy(),
            M::STRATEGY
        ),
    })
}

fn field_of<'a>(aggregate: &'a Aggregate, name: &str) -> Result<&'a Field, MergeError> {
    aggregate.get(name).ok_or_else(|| MergeError::SchemaMismatch {
        field: name.to_string(),
        reason: "field missing".to_string(),
    })
}

/// Merges whole aggregates field by field.
///
/// Holds one [`FieldMerger`] per supported strategy. A field whose declared
/// strategy has no registered merger fails with
/// [`MergeError::UnsupportedFieldType`].
pub struct AggregateMerger {
    mergers: BTreeMap<MergeStrategy, Box<dyn FieldMerger>>,
}

impl Default for AggregateMerger {
    fn default() -> Self {
        Self::with_strategies(MergeStrategy::ALL)
    }
}

impl fmt::Debug for AggregateMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateMerger")
            .field("strategies", &self.mergers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AggregateMerger {
    /// A merger with no strategies registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mergers: BTreeMap::new(),
        }
    }

    /// A merger with the built-in implementation of each given strategy.
    #[must_use]
    pub fn with_strategies(strategies: impl IntoIterator<Item = MergeStrategy>) -> Self {
        let mut merger = Self::empty();
        for strategy in strategies {
            merger.register(builtin(strategy));
        }
        merger
    }

    /// Register a field merger, replacing any previous one for its strategy.
    pub fn register(&mut self, merger: Box<dyn FieldMerger>) -> Option<Box<dyn FieldMerger>> {
        self.mergers.insert(merger.strategy(), merger)
    }

    /// Check whether a strategy has a registered implementation.
    #[must_use]
    pub fn supports(&self, strategy: MergeStrategy) -> bool {
        self.mergers.contains_key(&strategy)
    }

    /// Registered strategies in order.
    pub fn strategies(&self) -> impl Iterator<Item = MergeStrategy> + '_ {
        self.mergers.keys().copied()
    }

    /// Merge three aggregate values field by field.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::SchemaMismatch`] if any aggregate deviates from
    /// `schema`, or [`MergeError::UnsupportedFieldType`] if a declared
    /// strategy is not registered. Nothing is merged on error.
    pub fn merge_values(
        &self,
        schema: &Schema,
        ancestor: &Aggregate,
        left: &Aggregate,
        right: &Aggregate,
    ) -> Result<Aggregate, MergeError> {
        schema.check(ancestor)?;
        schema.check(left)?;
        schema.check(right)?;

        let mut fields = BTreeMap::new();
        for (name, strategy) in schema.fields() {
            let merger = self
                .mergers
                .get(&strategy)
                .ok_or_else(|| MergeError::UnsupportedFieldType {
                    field: name.to_string(),
                    strategy,
                })?;

            let merged = merger.merge(
                name,
                field_of(ancestor, name)?,
                field_of(left, name)?,
                field_of(right, name)?,
            )?;
            fields.insert(name.to_string(), merged);
        }

        Ok(Aggregate::from_fields(fields))
    }

    /// Merge two commits against an ancestor value into a two-parent commit.
    ///
    /// The merged clock strictly succeeds both parents' clocks.
    ///
    /// # Errors
    ///
    /// Same as [`AggregateMerger::merge_values`].
    pub fn merge(
        &self,
        schema: &Schema,
        ancestor: &Aggregate,
        left: &Commit,
        right: &Commit,
    ) -> Result<Commit, MergeError> {
        let value = self.merge_values(schema, ancestor, &left.value, &right.value)?;
        let clock = LogicalClock::merged(&left.clock, &right.clock);

        tracing::debug!(
            left = %left.id,
            right = %right.id,
            %clock,
            fields = value.len(),
            "Merged commits"
        );

        Ok(Commit::new(value, clock, vec![left.id, right.id]))
    }
}

/// The built-in merger for a strategy.
#[must_use]
pub fn builtin(strategy: MergeStrategy) -> Box<dyn FieldMerger> {
    match strategy {
        MergeStrategy::Register => Box::new(StrategyMerger::<Register<Atom>>::new()),
        MergeStrategy::Set => Box::new(StrategyMerger::<OrSet<Atom>>::new()),
        MergeStrategy::Sequence => Box::new(StrategyMerger::<Sequence<Atom>>::new()),
        MergeStrategy::Counter => Box::new(StrategyMerger::<Counter>::new()),
        MergeStrategy::Text => Box::new(StrategyMerger::<Text>::new()),
    }
}

/// Errors that can occur while merging aggregates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Aggregates do not share the declared field schema
    #[error("schema mismatch on field '{field}': {reason}")]
    SchemaMismatch {
        /// Offending field
        field: String,
        /// What differs
        reason: String,
    },
    /// No merger registered for the field's declared strategy
    #[error("no merger registered for {strategy} field '{field}'")]
    UnsupportedFieldType {
        /// Offending field
        field: String,
        /// Declared strategy
        strategy: MergeStrategy,
    },
}
