//! CLI configuration.

use anyhow::{Context, Result};
use forked_core::{AggregateMerger, MergePolicy, MergeStrategy};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// `SQLite` database path
    pub db_path: PathBuf,

    /// Whether merges also move the source fork
    pub policy: MergePolicy,

    /// Strategies with a registered merger
    pub strategies: Vec<MergeStrategy>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./forked.db"),
            policy: MergePolicy::Pull,
            strategies: MergeStrategy::ALL.to_vec(),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORKED_DB_PATH`: `SQLite` database path
    /// - `FORKED_MERGE_POLICY`: "pull" or "symmetric"
    /// - `FORKED_STRATEGIES`: comma-separated strategy tags to enable
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("FORKED_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(policy) = lookup("FORKED_MERGE_POLICY") {
            config.policy = policy.parse().context("Invalid FORKED_MERGE_POLICY")?;
        }

        if let Some(list) = lookup("FORKED_STRATEGIES") {
            config.strategies = list
                .split(',')
                .filter(|tag| !tag.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()
                .context("Invalid FORKED_STRATEGIES")?;
        }

        Ok(config)
    }

    /// Merger registry holding the enabled strategies.
    #[must_use]
    pub fn merger(&self) -> AggregateMerger {
        AggregateMerger::with_strategies(self.strategies.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<CliConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CliConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(MergeStrategy::ALL
            .iter()
            .all(|s| config.merger().supports(*s)));
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("FORKED_DB_PATH", "/tmp/x.db"),
            ("FORKED_MERGE_POLICY", "symmetric"),
            ("FORKED_STRATEGIES", "counter, set"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.policy, MergePolicy::Symmetric);
        assert_eq!(
            config.strategies,
            vec![MergeStrategy::Counter, MergeStrategy::Set]
        );
        assert!(!config.merger().supports(MergeStrategy::Text));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("FORKED_MERGE_POLICY", "both")]).is_err());
        assert!(load(&[("FORKED_STRATEGIES", "counter,lww")]).is_err());
    }
}
