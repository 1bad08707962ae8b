//! # Forked Core
//!
//! Fork/merge engine for structured values edited concurrently and offline.
//!
//! This crate provides:
//! - Lamport logical clocks with random tie-break tokens
//! - Mergeable field types (registers, sets, sequences, counters, text)
//! - Aggregates described by a per-field merge strategy schema
//! - An immutable commit graph with common-ancestor resolution
//! - Named forks with edit and merge operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod atom;
pub mod clock;
pub mod crdt;
pub mod history;
pub mod merge;
pub mod repository;
pub mod sequence;

pub use aggregate::{Aggregate, Edit, EditError, Field, FieldSlot, Schema};
pub use atom::{Atom, AtomError};
pub use clock::{ClockError, LogicalClock};
pub use crdt::{Counter, OrSet, Register};
pub use history::{Commit, CommitGraph, CommitId, HistoryError};
pub use merge::{AggregateMerger, FieldMerger, MergeError, MergeStrategy, Mergeable};
pub use repository::{Fork, MergeOutcome, MergePolicy, Repository, DEFAULT_FORK};
pub use sequence::{Sequence, Text};
