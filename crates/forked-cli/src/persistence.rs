//! `SQLite` persistence of schema, commits and fork heads.
//!
//! Commits are immutable, so saving is append-only for the `commits` table;
//! only fork heads are rewritten.

use forked_core::{
    ClockError, Commit, CommitId, Fork, HistoryError, LogicalClock, Repository, Schema,
};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

const SCHEMA_KEY: &str = "schema";

/// Errors raised by the commit store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// `SQLite` failure
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The store holds no schema yet
    #[error("store is not initialized, run `forked init <schema-json>` first")]
    NotInitialized,
    /// The store already holds a schema
    #[error("store is already initialized")]
    AlreadyInitialized,
    /// Schema could not be encoded or decoded
    #[error("invalid stored schema: {0}")]
    Schema(#[from] serde_json::Error),
    /// Commit could not be encoded
    #[error("failed to encode commit {id}: {reason}")]
    Encode {
        /// Commit id
        id: CommitId,
        /// Encoder message
        reason: String,
    },
    /// A stored row could not be decoded
    #[error("corrupt row {row}: {reason}")]
    Corrupt {
        /// Row key
        row: String,
        /// What is wrong
        reason: String,
    },
    /// Stored clock bytes are malformed
    #[error(transparent)]
    Clock(#[from] ClockError),
    /// Stored history is inconsistent
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// `SQLite`-backed commit store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            r"
            -- Repository-wide settings, currently just the schema
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Immutable commits
            CREATE TABLE IF NOT EXISTS commits (
                id TEXT PRIMARY KEY,
                counter INTEGER NOT NULL,
                clock BLOB NOT NULL,
                commit_bytes BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_commits_counter ON commits(counter);

            -- Fork heads
            CREATE TABLE IF NOT EXISTS forks (
                name TEXT PRIMARY KEY,
                head TEXT NOT NULL REFERENCES commits(id)
            );
            ",
        )?;

        Ok(())
    }

    /// Store the schema of a new repository.
    ///
    /// # Errors
    ///
    /// Returns error if a schema is already stored.
    pub fn initialize(&self, schema: &Schema) -> Result<(), PersistenceError> {
        if self.schema()?.is_some() {
            return Err(PersistenceError::AlreadyInitialized);
        }
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)",
            (SCHEMA_KEY, serde_json::to_string(schema)?),
        )?;
        Ok(())
    }

    /// The stored schema, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or the schema is malformed.
    pub fn schema(&self) -> Result<Option<Schema>, PersistenceError> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [SCHEMA_KEY], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Write every commit not yet stored, then replace the fork table.
    ///
    /// Runs in one transaction; a failure leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or any write fails.
    pub fn save_repository(&self, repo: &Repository) -> Result<usize, PersistenceError> {
        let tx = self.conn.unchecked_transaction()?;
        let now = chrono::Utc::now().timestamp();
        let mut written = 0;

        {
            let mut insert = tx.prepare(
                r"
                INSERT OR IGNORE INTO commits (id, counter, clock, commit_bytes, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )?;
            for commit in repo.commits() {
                let counter = i64::try_from(commit.clock.counter).map_err(|e| {
                    PersistenceError::Encode {
                        id: commit.id,
                        reason: e.to_string(),
                    }
                })?;
                written += insert.execute((
                    commit.id.to_string(),
                    counter,
                    commit.clock.to_bytes().as_slice(),
                    encode_commit(commit)?,
                    now,
                ))?;
            }
        }

        tx.execute("DELETE FROM forks", [])?;
        for fork in repo.forks() {
            tx.execute(
                "INSERT INTO forks (name, head) VALUES (?1, ?2)",
                (&fork.name, fork.head.to_string()),
            )?;
        }

        tx.commit()?;
        tracing::debug!(written, forks = repo.forks().count(), "Saved repository");
        Ok(written)
    }

    /// Rebuild the stored repository.
    ///
    /// # Errors
    ///
    /// Returns error if the store is uninitialized or any row is corrupt.
    pub fn load_repository(&self) -> Result<Repository, PersistenceError> {
        let schema = self.schema()?.ok_or(PersistenceError::NotInitialized)?;

        let mut stmt = self
            .conn
            .prepare("SELECT id, clock, commit_bytes FROM commits ORDER BY counter ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut commits = Vec::with_capacity(rows.len());
        for (id, clock, bytes) in rows {
            let commit = decode_commit(&id, &bytes)?;
            if commit.id.to_string() != id || LogicalClock::from_bytes(&clock)? != commit.clock {
                return Err(PersistenceError::Corrupt {
                    row: id,
                    reason: "indexed id or clock disagrees with commit body".to_string(),
                });
            }
            commits.push(commit);
        }

        let mut stmt = self.conn.prepare("SELECT name, head FROM forks")?;
        let forks = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(name, head)| -> Result<Fork, PersistenceError> {
                let head = head.parse::<CommitId>().map_err(|e| PersistenceError::Corrupt {
                    row: name.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Fork { name, head })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        tracing::debug!(commits = commits.len(), forks = forks.len(), "Loaded repository");
        Ok(Repository::from_parts(schema, commits, forks)?)
    }
}

fn encode_commit(commit: &Commit) -> Result<Vec<u8>, PersistenceError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(commit, &mut bytes).map_err(|e| PersistenceError::Encode {
        id: commit.id,
        reason: e.to_string(),
    })?;
    Ok(bytes)
}

fn decode_commit(id: &str, bytes: &[u8]) -> Result<Commit, PersistenceError> {
    ciborium::from_reader(bytes).map_err(|e| PersistenceError::Corrupt {
        row: id.to_string(),
        reason: e.to_string(),
    })
}
