//! Immutable commits and the commit graph.
//!
//! Commits live in an arena keyed by [`CommitId`]; parents are referenced by
//! id, so forks can share ancestors without owning them.
//!
//! # Invariants
//!
//! - Every parent reference resolves to a commit already in the graph.
//! - A commit's clock strictly succeeds each parent's clock.
//! - Commits are never mutated once inserted.

use crate::aggregate::{Aggregate, EditError};
use crate::clock::LogicalClock;
use crate::merge::MergeError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a commit. Survives serialization unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, for logs.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An immutable snapshot: value, clock and parent links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit identifier
    pub id: CommitId,
    /// Aggregate value at this commit
    pub value: Aggregate,
    /// Logical clock of this commit
    pub clock: LogicalClock,
    /// Zero parents for a root, one for an edit, two for a merge
    pub parents: Vec<CommitId>,
}

impl Commit {
    /// Create a commit with a fresh id.
    #[must_use]
    pub fn new(value: Aggregate, clock: LogicalClock, parents: Vec<CommitId>) -> Self {
        Self {
            id: CommitId::new(),
            value,
            clock,
            parents,
        }
    }

    /// Create a parentless commit.
    #[must_use]
    pub fn root(value: Aggregate, clock: LogicalClock) -> Self {
        Self::new(value, clock, Vec::new())
    }

    /// Returns `true` if this commit has no parents.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns `true` if this commit records a merge.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Arena of commits with ancestor queries.
#[derive(Debug, Clone, Default)]
pub struct CommitGraph {
    commits: HashMap<CommitId, Commit>,
}

impl CommitGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of commits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Returns `true` if the graph has no commits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Add a commit.
    ///
    /// # Errors
    ///
    /// Returns error if the id already exists, a parent is missing, or the
    /// commit's clock does not succeed a parent's clock.
    pub fn insert(&mut self, commit: Commit) -> Result<CommitId, HistoryError> {
        if self.commits.contains_key(&commit.id) {
            return Err(HistoryError::DuplicateCommit(commit.id));
        }

        for parent_id in &commit.parents {
            let parent = self
                .commits
                .get(parent_id)
                .ok_or(HistoryError::DanglingParent {
                    commit: commit.id,
                    parent: *parent_id,
                })?;
            if parent.clock >= commit.clock {
                return Err(HistoryError::ClockRegression {
                    commit: commit.id,
                    parent: *parent_id,
                });
            }
        }

        let id = commit.id;
        tracing::trace!(commit = %id.short(), clock = %commit.clock, "Inserted commit");
        self.commits.insert(id, commit);
        Ok(id)
    }

    /// Add a fresh root commit holding `value` with a new clock.
    ///
    /// # Errors
    ///
    /// Same as [`CommitGraph::insert`].
    pub fn insert_root(&mut self, value: Aggregate) -> Result<CommitId, HistoryError> {
        self.insert(Commit::root(value, LogicalClock::new()))
    }

    /// Retrieve a commit.
    #[must_use]
    pub fn get(&self, id: &CommitId) -> Option<&Commit> {
        self.commits.get(id)
    }

    /// Retrieve a commit that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownCommit`] if it is absent.
    pub fn commit(&self, id: &CommitId) -> Result<&Commit, HistoryError> {
        self.get(id).ok_or(HistoryError::UnknownCommit(*id))
    }

    /// Returns `true` if the commit is in the graph.
    #[must_use]
    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    /// Iterate all commits in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Commit> {
        self.commits.values()
    }

    /// Every commit reachable from `id`, including `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: &CommitId) -> HashSet<CommitId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if self.contains(id) {
            visited.insert(*id);
            queue.push_back(*id);
        }

        while let Some(current) = queue.pop_front() {
            if let Some(commit) = self.commits.get(&current) {
                for parent in &commit.parents {
                    if visited.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }

        visited
    }

    /// Returns `true` if `ancestor` is reachable from `descendant` (or equal).
    #[must_use]
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> bool {
        self.ancestors(descendant).contains(ancestor)
    }

    /// The nearest commit reachable from both `a` and `b`.
    ///
    /// Among common ancestors the one with the greatest clock is chosen;
    /// since clocks grow along every edge it is never an ancestor of another
    /// common ancestor, and the choice is deterministic for criss-cross
    /// histories.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownCommit`] if either id is absent, or
    /// [`HistoryError::NoCommonHistory`] if the histories are disjoint.
    pub fn common_ancestor(&self, a: &CommitId, b: &CommitId) -> Result<&Commit, HistoryError> {
        let left = self.commit(a)?;
        self.commit(b)?;
        if a == b {
            return Ok(left);
        }

        let ancestors_a = self.ancestors(a);
        let ancestors_b = self.ancestors(b);

        ancestors_a
            .intersection(&ancestors_b)
            .filter_map(|id| self.commits.get(id))
            .max_by_key(|commit| commit.clock)
            .ok_or(HistoryError::NoCommonHistory {
                left: *a,
                right: *b,
            })
    }

    /// Commits reachable from `head`, newest first.
    #[must_use]
    pub fn log(&self, head: &CommitId) -> Vec<&Commit> {
        let mut commits: Vec<&Commit> = self
            .ancestors(head)
            .iter()
            .filter_map(|id| self.commits.get(id))
            .collect();
        commits.sort_by(|a, b| b.clock.cmp(&a.clock));
        commits
    }
}

/// Errors raised by history and fork operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The two heads share no commit
    #[error("commits {left} and {right} share no history")]
    NoCommonHistory {
        /// First head
        left: CommitId,
        /// Second head
        right: CommitId,
    },
    /// No fork with this name
    #[error("unknown fork: {0}")]
    UnknownFork(String),
    /// A fork with this name already exists
    #[error("fork already exists: {0}")]
    DuplicateFork(String),
    /// No commit with this id
    #[error("unknown commit: {0}")]
    UnknownCommit(CommitId),
    /// A commit with this id already exists
    #[error("duplicate commit: {0}")]
    DuplicateCommit(CommitId),
    /// A parent reference points to a missing commit
    #[error("commit {commit} references missing parent {parent}")]
    DanglingParent {
        /// The commit containing the bad reference
        commit: CommitId,
        /// The missing parent
        parent: CommitId,
    },
    /// A commit's clock does not succeed its parent's
    #[error("commit {commit} does not advance past parent {parent}")]
    ClockRegression {
        /// The offending commit
        commit: CommitId,
        /// The parent it fails to succeed
        parent: CommitId,
    },
    /// Merging failed
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// An edit was rejected
    #[error(transparent)]
    Edit(#[from] EditError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(graph: &mut CommitGraph, parents: &[CommitId]) -> CommitId {
        let clock = parents
            .iter()
            .map(|p| graph.commit(p).unwrap().clock)
            .reduce(|a, b| LogicalClock::merged(&a, &b))
            .map_or_else(LogicalClock::new, |c| c.advance());
        graph
            .insert(Commit::new(Aggregate::default(), clock, parents.to_vec()))
            .unwrap()
    }

    /// root -> a -> b, root -> c, merge(b, c) -> d
    fn build_graph() -> (CommitGraph, [CommitId; 5]) {
        let mut graph = CommitGraph::new();
        let root = child(&mut graph, &[]);
        let a = child(&mut graph, &[root]);
        let b = child(&mut graph, &[a]);
        let c = child(&mut graph, &[root]);
        let d = child(&mut graph, &[b, c]);
        (graph, [root, a, b, c, d])
    }

    #[test]
    fn duplicate_commit_is_rejected() {
        let mut graph = CommitGraph::new();
        let commit = Commit::root(Aggregate::default(), LogicalClock::new());
        graph.insert(commit.clone()).unwrap();
        assert_eq!(
            graph.insert(commit.clone()),
            Err(HistoryError::DuplicateCommit(commit.id))
        );
    }

    #[test]
    fn insert_root_is_validated_like_insert() {
        let mut graph = CommitGraph::new();
        let id = graph.insert_root(Aggregate::default()).unwrap();
        let root = graph.commit(&id).unwrap().clone();
        assert!(root.is_root());
        assert_eq!(graph.insert(root), Err(HistoryError::DuplicateCommit(id)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let mut graph = CommitGraph::new();
        let missing = CommitId::new();
        let commit = Commit::new(Aggregate::default(), LogicalClock::new(), vec![missing]);
        assert!(matches!(
            graph.insert(commit),
            Err(HistoryError::DanglingParent { parent, .. }) if parent == missing
        ));
    }

    #[test]
    fn clock_regression_is_rejected() {
        let mut graph = CommitGraph::new();
        let root_clock = LogicalClock::new().advance();
        let root = graph
            .insert(Commit::root(Aggregate::default(), root_clock))
            .unwrap();
        let stale = Commit::new(Aggregate::default(), LogicalClock::new(), vec![root]);
        assert!(matches!(
            graph.insert(stale),
            Err(HistoryError::ClockRegression { .. })
        ));
    }

    #[test]
    fn common_ancestor_linear() {
        let (graph, [_, a, b, ..]) = build_graph();
        assert_eq!(graph.common_ancestor(&a, &b).unwrap().id, a);
        assert_eq!(graph.common_ancestor(&b, &b).unwrap().id, b);
    }

    #[test]
    fn common_ancestor_across_branches() {
        let (graph, [root, _, b, c, d]) = build_graph();
        assert_eq!(graph.common_ancestor(&b, &c).unwrap().id, root);
        // Both sides of the merge are reachable from d
        assert_eq!(graph.common_ancestor(&d, &c).unwrap().id, c);
        assert_eq!(graph.common_ancestor(&d, &b).unwrap().id, b);
    }

    #[test]
    fn disjoint_histories() {
        let (mut graph, [root, ..]) = build_graph();
        let other = child(&mut graph, &[]);
        assert_eq!(
            graph.common_ancestor(&root, &other).unwrap_err(),
            HistoryError::NoCommonHistory {
                left: root,
                right: other
            }
        );
    }

    #[test]
    fn log_is_newest_first() {
        let (graph, [root, a, b, c, d]) = build_graph();
        let log: Vec<CommitId> = graph.log(&d).iter().map(|c| c.id).collect();
        assert_eq!(log.len(), 5);
        assert_eq!(log[0], d);
        assert_eq!(*log.last().unwrap(), root);
        assert!(graph.is_ancestor(&a, &d));
        assert!(!graph.is_ancestor(&c, &b));
        assert!(graph.log(&d).windows(2).all(|w| w[0].clock > w[1].clock));
        assert!(graph.get(&d).unwrap().is_merge());
    }

    #[test]
    fn commit_id_parses_display_form() {
        let id = CommitId::new();
        assert_eq!(id.to_string().parse::<CommitId>().unwrap(), id);
    }
}
