//! Structured values made of mergeable fields.
//!
//! An aggregate maps field names to mergeable wrappers:
//! - The [`Schema`] declares each field's [`MergeStrategy`] once, up front
//! - [`Field`] is the closed set of wrapper states a field can hold
//! - [`Edit`] is the mutation surface handed to edit closures

use crate::atom::Atom;
use crate::clock::LogicalClock;
use crate::crdt::{Counter, OrSet, Register};
use crate::merge::{MergeError, MergeStrategy, Mergeable};
use crate::sequence::{Sequence, Text};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared field layout of an aggregate: field name -> merge strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: BTreeMap<String, MergeStrategy>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.fields.insert(name.into(), strategy);
        self
    }

    /// Declared strategy of a field.
    #[must_use]
    pub fn strategy(&self, name: &str) -> Option<MergeStrategy> {
        self.fields.get(name).copied()
    }

    /// Iterate declared fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, MergeStrategy)> {
        self.fields.iter().map(|(name, s)| (name.as_str(), *s))
    }

    /// Get the number of declared fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no fields are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The aggregate whose every field holds its strategy's identity element.
    ///
    /// New forks start from this value, and it stands in as the ancestor
    /// when two histories share no commit.
    #[must_use]
    pub fn identity(&self) -> Aggregate {
        Aggregate::from_fields(
            self.fields
                .iter()
                .map(|(name, strategy)| (name.clone(), Field::identity(*strategy)))
                .collect(),
        )
    }

    /// Verify that an aggregate has exactly the declared fields and strategies.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::SchemaMismatch`] naming the first offending field.
    pub fn check(&self, aggregate: &Aggregate) -> Result<(), MergeError> {
        for (name, strategy) in self.fields() {
            let Some(field) = aggregate.get(name) else {
                return Err(MergeError::SchemaMismatch {
                    field: name.to_string(),
                    reason: "field missing".to_string(),
                });
            };
            if field.strategy() != strategy {
                return Err(MergeError::SchemaMismatch {
                    field: name.to_string(),
                    reason: format!("declared {strategy}, found {}", field.strategy()),
                });
            }
        }

        if let Some((name, _)) = aggregate
            .fields()
            .find(|(name, _)| !self.fields.contains_key(*name))
        {
            return Err(MergeError::SchemaMismatch {
                field: name.to_string(),
                reason: "field not declared".to_string(),
            });
        }

        Ok(())
    }
}

/// The state of one aggregate field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "state", rename_all = "lowercase")]
pub enum Field {
    /// Last-Writer-Wins cell
    Register(Register<Atom>),
    /// Observed-remove set
    Set(OrSet<Atom>),
    /// Ordered list
    Sequence(Sequence<Atom>),
    /// Delta-summing counter
    Counter(Counter),
    /// Character sequence
    Text(Text),
}

impl Field {
    /// The identity element of a strategy.
    ///
    /// Unset register, empty set, empty sequence, zero counter, empty text.
    #[must_use]
    pub fn identity(strategy: MergeStrategy) -> Self {
        match strategy {
            MergeStrategy::Register => Field::Register(Register::default()),
            MergeStrategy::Set => Field::Set(OrSet::new()),
            MergeStrategy::Sequence => Field::Sequence(Sequence::default()),
            MergeStrategy::Counter => Field::Counter(Counter::default()),
            MergeStrategy::Text => Field::Text(Text::default()),
        }
    }

    /// The strategy this state belongs to.
    #[must_use]
    pub fn strategy(&self) -> MergeStrategy {
        match self {
            Field::Register(_) => MergeStrategy::Register,
            Field::Set(_) => MergeStrategy::Set,
            Field::Sequence(_) => MergeStrategy::Sequence,
            Field::Counter(_) => MergeStrategy::Counter,
            Field::Text(_) => MergeStrategy::Text,
        }
    }

    /// Plain JSON projection of the current value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Field::Register(reg) => serde_json::Value::from(&reg.value),
            Field::Set(set) => set.iter().map(serde_json::Value::from).collect(),
            Field::Sequence(seq) => seq.as_slice().iter().map(serde_json::Value::from).collect(),
            Field::Counter(counter) => serde_json::Value::from(counter.value()),
            Field::Text(text) => serde_json::Value::from(text.as_str()),
        }
    }
}

/// A mergeable wrapper that can be stored in a [`Field`].
pub trait FieldSlot: Mergeable {
    /// Borrow the wrapper out of a field of the matching strategy.
    fn from_field(field: &Field) -> Option<&Self>;

    /// Mutably borrow the wrapper out of a field of the matching strategy.
    fn from_field_mut(field: &mut Field) -> Option<&mut Self>;

    /// Wrap into a field.
    fn into_field(self) -> Field;
}

macro_rules! field_slot {
    ($ty:ty, $variant:ident) => {
        impl FieldSlot for $ty {
            fn from_field(field: &Field) -> Option<&Self> {
                match field {
                    Field::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_field_mut(field: &mut Field) -> Option<&mut Self> {
                match field {
                    Field::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_field(self) -> Field {
                Field::$variant(self)
            }
        }
    };
}

field_slot!(Register<Atom>, Register);
field_slot!(OrSet<Atom>, Set);
field_slot!(Sequence<Atom>, Sequence);
field_slot!(Counter, Counter);
field_slot!(Text, Text);

/// A structured value: field name -> field state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aggregate {
    fields: BTreeMap<String, Field>,
}

impl Aggregate {
    /// Create an aggregate from field states.
    #[must_use]
    pub fn from_fields(fields: BTreeMap<String, Field>) -> Self {
        Self { fields }
    }

    /// Set a field's state directly, returning the previous state.
    pub fn insert(&mut self, name: impl Into<String>, field: Field) -> Option<Field> {
        self.fields.insert(name.into(), field)
    }

    /// Get a field's state.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Strategy of a field's current state.
    #[must_use]
    pub fn strategy_of(&self, name: &str) -> Option<MergeStrategy> {
        self.get(name).map(Field::strategy)
    }

    /// Iterate fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, f)| (name.as_str(), f))
    }

    /// Get the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the aggregate has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of a register field.
    #[must_use]
    pub fn register(&self, name: &str) -> Option<&Atom> {
        self.slot::<Register<Atom>>(name).map(Register::get)
    }

    /// A set field.
    #[must_use]
    pub fn set(&self, name: &str) -> Option<&OrSet<Atom>> {
        self.slot(name)
    }

    /// Items of a sequence field.
    #[must_use]
    pub fn sequence(&self, name: &str) -> Option<&[Atom]> {
        self.slot::<Sequence<Atom>>(name).map(Sequence::as_slice)
    }

    /// Value of a counter field.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.slot::<Counter>(name).map(Counter::value)
    }

    /// Content of a text field.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.slot::<Text>(name).map(Text::as_str)
    }

    /// Plain JSON object of every field's current value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.to_json()))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn slot<M: FieldSlot>(&self, name: &str) -> Option<&M> {
        self.get(name).and_then(M::from_field)
    }
}

/// Mutation surface for one edit.
///
/// Every register written through the same `Edit` is stamped with the clock
/// of the commit the edit will produce.
pub struct Edit<'a> {
    aggregate: &'a mut Aggregate,
    stamp: LogicalClock,
}

impl<'a> Edit<'a> {
    /// Start an edit of `aggregate` stamped with `stamp`.
    pub fn new(aggregate: &'a mut Aggregate, stamp: LogicalClock) -> Self {
        Self { aggregate, stamp }
    }

    /// Clock stamped onto register writes.
    #[must_use]
    pub fn stamp(&self) -> LogicalClock {
        self.stamp
    }

    /// Read-only view of the value being edited.
    #[must_use]
    pub fn value(&self) -> &Aggregate {
        &*self.aggregate
    }

    /// Write a register field.
    ///
    /// The last write to a field within one edit is the one kept.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not a register.
    pub fn set(&mut self, name: &str, value: impl Into<Atom>) -> Result<(), EditError> {
        let stamp = self.stamp;
        let register = self.slot::<Register<Atom>>(name)?;
        // The edit stamp already succeeds every stamp in the value.
        register.value = value.into();
        register.stamp = stamp;
        Ok(())
    }

    /// Add an element to a set field. Returns `true` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not a set.
    pub fn insert(&mut self, name: &str, element: impl Into<Atom>) -> Result<bool, EditError> {
        Ok(self.slot::<OrSet<Atom>>(name)?.insert(element.into()))
    }

    /// Remove an element from a set field. Returns `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not a set.
    pub fn remove(&mut self, name: &str, element: &Atom) -> Result<bool, EditError> {
        Ok(self.slot::<OrSet<Atom>>(name)?.remove(element))
    }

    /// Add `delta` to a counter field and return the new value.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not a counter.
    pub fn increment(&mut self, name: &str, delta: i64) -> Result<i64, EditError> {
        Ok(self.slot::<Counter>(name)?.increment(delta))
    }

    /// Mutable items of a sequence field.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not a sequence.
    pub fn sequence(&mut self, name: &str) -> Result<&mut Vec<Atom>, EditError> {
        Ok(self.slot::<Sequence<Atom>>(name)?.items_mut())
    }

    /// Mutable content of a text field.
    ///
    /// # Errors
    ///
    /// Returns error if the field is unknown or not text.
    pub fn text(&mut self, name: &str) -> Result<&mut String, EditError> {
        Ok(self.slot::<Text>(name)?.content_mut())
    }

    fn slot<M: FieldSlot>(&mut self, name: &str) -> Result<&mut M, EditError> {
        let field = self
            .aggregate
            .fields
            .get_mut(name)
            .ok_or_else(|| EditError::UnknownField(name.to_string()))?;
        let actual = field.strategy();
        M::from_field_mut(field).ok_or_else(|| EditError::WrongStrategy {
            field: name.to_string(),
            expected: M::STRATEGY,
            actual,
        })
    }
}

/// Errors raised by edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// Field is not part of the aggregate
    #[error("unknown field '{0}'")]
    UnknownField(String),
    /// Operation does not match the field's strategy
    #[error("field '{field}' is a {actual} field, operation needs {expected}")]
    WrongStrategy {
        /// Field name
        field: String,
        /// Strategy the operation needs
        expected: MergeStrategy,
        /// Strategy the field has
        actual: MergeStrategy,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .with_field("body", MergeStrategy::Text)
            .with_field("count", MergeStrategy::Counter)
            .with_field("items", MergeStrategy::Sequence)
            .with_field("tags", MergeStrategy::Set)
            .with_field("title", MergeStrategy::Register)
    }

    #[test]
    fn identity_matches_schema() {
        let schema = schema();
        let value = schema.identity();
        assert!(schema.check(&value).is_ok());
        assert_eq!(value.len(), 5);
        assert_eq!(value.register("title"), Some(&Atom::Null));
        assert_eq!(value.counter("count"), Some(0));
        assert_eq!(value.text("body"), Some(""));
    }

    #[test]
    fn check_rejects_missing_and_extra_fields() {
        let schema = schema();

        let mut extra = schema.identity();
        extra.insert("bogus", Field::Counter(Counter::default()));
        assert!(matches!(
            schema.check(&extra),
            Err(MergeError::SchemaMismatch { ref field, .. }) if field == "bogus"
        ));

        let missing = Schema::new()
            .with_field("count", MergeStrategy::Counter)
            .identity();
        assert!(matches!(
            schema.check(&missing),
            Err(MergeError::SchemaMismatch { ref field, .. }) if field == "body"
        ));
    }

    #[test]
    fn edit_operations() {
        let mut value = schema().identity();
        let stamp = LogicalClock::new().advance();
        let mut edit = Edit::new(&mut value, stamp);

        edit.set("title", "hello").unwrap();
        assert!(edit.insert("tags", "red").unwrap());
        assert!(!edit.insert("tags", "red").unwrap());
        assert_eq!(edit.increment("count", 4).unwrap(), 4);
        edit.sequence("items").unwrap().push(Atom::Int(1));
        edit.text("body").unwrap().push_str("hi");

        let Some(Field::Register(title)) = value.get("title") else {
            panic!("title should be a register");
        };
        assert_eq!(title.stamp, stamp);
        assert_eq!(
            value.to_json(),
            json!({
                "body": "hi",
                "count": 4,
                "items": [1],
                "tags": ["red"],
                "title": "hello",
            })
        );
    }

    #[test]
    fn repeated_set_in_one_edit_keeps_last_write() {
        let mut value = schema().identity();
        let stamp = LogicalClock::new().advance();
        let mut edit = Edit::new(&mut value, stamp);

        edit.set("title", "first").unwrap();
        edit.set("title", "second").unwrap();

        assert_eq!(value.register("title"), Some(&Atom::from("second")));
    }

    #[test]
    fn edit_errors() {
        let mut value = schema().identity();
        let mut edit = Edit::new(&mut value, LogicalClock::new());

        assert_eq!(
            edit.increment("missing", 1),
            Err(EditError::UnknownField("missing".to_string()))
        );
        assert_eq!(
            edit.set("count", 1),
            Err(EditError::WrongStrategy {
                field: "count".to_string(),
                expected: MergeStrategy::Register,
                actual: MergeStrategy::Counter,
            })
        );
    }

    #[test]
    fn field_serde_is_tagged() {
        let field = Field::Counter(Counter::new(3));
        let encoded = serde_json::to_value(&field).unwrap();
        assert_eq!(encoded, json!({"strategy": "counter", "state": 3}));
        let decoded: Field = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, field);
    }
}
