//! Named forks over a shared commit graph.
//!
//! A [`Repository`] owns the commit arena and the fork table. Each fork is a
//! name pointing at a head commit; forks share ancestor commits by id.
//!
//! # Merging
//!
//! [`Repository::merge_into`] resolves the heads' common ancestor and asks the
//! [`AggregateMerger`] for a two-parent commit:
//!
//! - If the source head is already reachable from the target, nothing happens
//! - If the target head is reachable from the source, the target fast-forwards
//! - Otherwise a merge commit is appended to the target
//!
//! Sides are passed to the merger ordered by fork name, so merging X into Y
//! and Y into X compute the same value.

use crate::aggregate::{Aggregate, Edit, EditError, Schema};
use crate::history::{Commit, CommitGraph, CommitId, HistoryError};
use crate::merge::AggregateMerger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the fork every new repository starts with.
pub const DEFAULT_FORK: &str = "main";

/// Whether a merge also moves the source fork.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Only the target fork receives the merge commit
    #[default]
    Pull,
    /// Both forks end at the merge commit
    Symmetric,
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::Pull => f.write_str("pull"),
            MergePolicy::Symmetric => f.write_str("symmetric"),
        }
    }
}

impl FromStr for MergePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(MergePolicy::Pull),
            "symmetric" => Ok(MergePolicy::Symmetric),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Unrecognised merge policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge policy: {0} (expected pull or symmetric)")]
pub struct ParsePolicyError(pub String);

/// A named, independently editable line of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fork {
    /// Fork name
    pub name: String,
    /// Current head commit
    pub head: CommitId,
}

/// What a merge did to the target fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Target already contained the source
    UpToDate,
    /// Target moved to the source head
    FastForward,
    /// A new merge commit was appended
    Merged,
}

/// Schema, commit graph and forks of one logical aggregate.
#[derive(Debug)]
pub struct Repository {
    schema: Schema,
    graph: CommitGraph,
    forks: BTreeMap<String, Fork>,
    merger: AggregateMerger,
    policy: MergePolicy,
}

impl Repository {
    /// Create a repository with a single [`DEFAULT_FORK`] at the schema's identity.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let mut repo = Self::empty(schema);
        // A root inserted into an empty graph has nothing to conflict with.
        if let Ok(head) = repo.graph.insert_root(repo.schema.identity()) {
            repo.attach(DEFAULT_FORK, head);
        }
        repo
    }

    fn empty(schema: Schema) -> Self {
        Self {
            schema,
            graph: CommitGraph::new(),
            forks: BTreeMap::new(),
            merger: AggregateMerger::default(),
            policy: MergePolicy::default(),
        }
    }

    /// Rebuild a repository from stored commits and fork heads.
    ///
    /// Commits may arrive in any order; they are inserted by clock so parents
    /// precede children.
    ///
    /// # Errors
    ///
    /// Returns error if a commit does not match `schema`, the graph is
    /// inconsistent, a fork is named twice, or a fork head is missing.
    pub fn from_parts(
        schema: Schema,
        mut commits: Vec<Commit>,
        forks: impl IntoIterator<Item = Fork>,
    ) -> Result<Self, HistoryError> {
        let mut repo = Self::empty(schema);

        commits.sort_by_key(|commit| commit.clock);
        for commit in commits {
            repo.schema.check(&commit.value)?;
            repo.graph.insert(commit)?;
        }

        for fork in forks {
            repo.graph.commit(&fork.head)?;
            if repo.forks.contains_key(&fork.name) {
                return Err(HistoryError::DuplicateFork(fork.name));
            }
            repo.forks.insert(fork.name.clone(), fork);
        }

        tracing::debug!(
            commits = repo.graph.len(),
            forks = repo.forks.len(),
            "Rebuilt repository"
        );
        Ok(repo)
    }

    /// Replace the merger registry.
    #[must_use]
    pub fn with_merger(mut self, merger: AggregateMerger) -> Self {
        self.merger = merger;
        self
    }

    /// Set the merge policy.
    #[must_use]
    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current merge policy.
    #[must_use]
    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// The aggregate schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The commit graph.
    #[must_use]
    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    /// All commits, in arbitrary order.
    pub fn commits(&self) -> impl Iterator<Item = &Commit> {
        self.graph.iter()
    }

    /// Create a fork with its own root commit at the schema's identity.
    ///
    /// The new fork shares no history with existing forks.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::DuplicateFork`] if the name is taken.
    pub fn create_fork(&mut self, name: &str) -> Result<&Fork, HistoryError> {
        self.ensure_free(name)?;
        let head = self.graph.insert_root(self.schema.identity())?;
        tracing::debug!(fork = name, commit = %head.short(), "Created fork");
        Ok(self.attach(name, head))
    }

    /// Create a fork whose head is the current head of `from`.
    ///
    /// # Errors
    ///
    /// Returns error if `from` is unknown or `name` is taken.
    pub fn branch(&mut self, from: &str, name: &str) -> Result<&Fork, HistoryError> {
        let head = self.fork(from)?.head;
        self.ensure_free(name)?;
        tracing::debug!(fork = name, from, commit = %head.short(), "Branched fork");
        Ok(self.attach(name, head))
    }

    /// Look up a fork.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownFork`] if there is no such fork.
    pub fn fork(&self, name: &str) -> Result<&Fork, HistoryError> {
        self.forks
            .get(name)
            .ok_or_else(|| HistoryError::UnknownFork(name.to_string()))
    }

    /// Iterate forks in name order.
    pub fn forks(&self) -> impl Iterator<Item = &Fork> {
        self.forks.values()
    }

    /// Head commit of a fork.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownFork`] if there is no such fork.
    pub fn head(&self, fork: &str) -> Result<&Commit, HistoryError> {
        let head = self.fork(fork)?.head;
        self.graph.commit(&head)
    }

    /// Current value of a fork.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownFork`] if there is no such fork.
    pub fn value(&self, fork: &str) -> Result<&Aggregate, HistoryError> {
        Ok(&self.head(fork)?.value)
    }

    /// Commits reachable from a fork's head, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::UnknownFork`] if there is no such fork.
    pub fn log(&self, fork: &str) -> Result<Vec<&Commit>, HistoryError> {
        let head = self.fork(fork)?.head;
        Ok(self.graph.log(&head))
    }

    /// Apply a mutation to a fork, producing one new commit.
    ///
    /// The mutation runs against a copy of the head value; if it fails the
    /// fork is left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the fork is unknown or the mutation fails.
    pub fn edit<F>(&mut self, fork: &str, mutation: F) -> Result<&Commit, HistoryError>
    where
        F: FnOnce(&mut Edit<'_>) -> Result<(), EditError>,
    {
        let head = self.head(fork)?;
        let parent = head.id;
        let clock = head.clock.advance();
        let mut value = head.value.clone();

        mutation(&mut Edit::new(&mut value, clock))?;

        let id = self.graph.insert(Commit::new(value, clock, vec![parent]))?;
        self.move_head(fork, id)?;
        tracing::debug!(fork, commit = %id.short(), %clock, "Committed edit");
        self.graph.commit(&id)
    }

    /// Nearest commit reachable from both forks' heads.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoCommonHistory`] if the forks never shared a
    /// commit, or [`HistoryError::UnknownFork`].
    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<&Commit, HistoryError> {
        let a = self.fork(a)?.head;
        let b = self.fork(b)?.head;
        self.graph.common_ancestor(&a, &b)
    }

    /// Merge `source` into `target` and return the target's new head.
    ///
    /// Forks without common history are merged against the schema's
    /// identity value. Under [`MergePolicy::Symmetric`] the source fork also
    /// moves to the result.
    ///
    /// # Errors
    ///
    /// Returns error if either fork is unknown or the merger fails. No fork
    /// moves on error.
    pub fn merge_into(&mut self, source: &str, target: &str) -> Result<&Commit, HistoryError> {
        let (head, _) = self.merge_into_with_outcome(source, target)?;
        self.graph.commit(&head)
    }

    /// Like [`Repository::merge_into`], also reporting what happened.
    ///
    /// # Errors
    ///
    /// Same as [`Repository::merge_into`].
    pub fn merge_into_with_outcome(
        &mut self,
        source: &str,
        target: &str,
    ) -> Result<(CommitId, MergeOutcome), HistoryError> {
        let source_head = self.fork(source)?.head;
        let target_head = self.fork(target)?.head;

        if self.graph.is_ancestor(&source_head, &target_head) {
            if self.policy == MergePolicy::Symmetric {
                self.move_head(source, target_head)?;
            }
            tracing::debug!(source, target, "Already up to date");
            return Ok((target_head, MergeOutcome::UpToDate));
        }

        if self.graph.is_ancestor(&target_head, &source_head) {
            self.move_head(target, source_head)?;
            tracing::debug!(source, target, commit = %source_head.short(), "Fast-forwarded");
            return Ok((source_head, MergeOutcome::FastForward));
        }

        let (left, right) = if source < target {
            (source_head, target_head)
        } else {
            (target_head, source_head)
        };

        let identity;
        let ancestor = match self.graph.common_ancestor(&left, &right) {
            Ok(commit) => &commit.value,
            Err(HistoryError::NoCommonHistory { .. }) => {
                tracing::warn!(
                    source,
                    target,
                    "Forks share no history, merging against identity value"
                );
                identity = self.schema.identity();
                &identity
            }
            Err(e) => return Err(e),
        };

        let merged = self.merger.merge(
            &self.schema,
            ancestor,
            self.graph.commit(&left)?,
            self.graph.commit(&right)?,
        )?;
        let id = self.graph.insert(merged)?;

        self.move_head(target, id)?;
        if self.policy == MergePolicy::Symmetric {
            self.move_head(source, id)?;
        }

        tracing::debug!(
            source,
            target,
            commit = %id.short(),
            policy = %self.policy,
            "Merged forks"
        );
        Ok((id, MergeOutcome::Merged))
    }

    /// Merge every fork into one result and move every fork to it.
    ///
    /// Returns the shared head, or `None` if there are no forks.
    ///
    /// # Errors
    ///
    /// Returns the first merge error. Forks merged before the error keep
    /// their new heads.
    pub fn merge_all(&mut self) -> Result<Option<CommitId>, HistoryError> {
        let names: Vec<String> = self.forks.keys().cloned().collect();
        let Some((first, rest)) = names.split_first() else {
            return Ok(None);
        };

        for name in rest {
            self.merge_into(name, first)?;
        }
        for name in rest {
            self.merge_into(first, name)?;
        }

        let head = self.fork(first)?.head;
        tracing::info!(forks = names.len(), commit = %head.short(), "All forks converged");
        Ok(Some(head))
    }

    fn ensure_free(&self, name: &str) -> Result<(), HistoryError> {
        if self.forks.contains_key(name) {
            return Err(HistoryError::DuplicateFork(name.to_string()));
        }
        Ok(())
    }

    fn attach(&mut self, name: &str, head: CommitId) -> &Fork {
        self.forks
            .entry(name.to_string())
            .or_insert_with(|| Fork {
                name: name.to_string(),
                head,
            })
    }

    fn move_head(&mut self, fork: &str, head: CommitId) -> Result<(), HistoryError> {
        let entry = self
            .forks
            .get_mut(fork)
            .ok_or_else(|| HistoryError::UnknownFork(fork.to_string()))?;
        entry.head = head;
        Ok(())
    }
}
