//! Engine configuration.
//!
//! Provides the tunables shared by the queue, metadata store, resolver and
//! coordinator. Durations are stored as milliseconds so the struct round-trips
//! through the CLI's JSON config file unchanged.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{EntityRegistry, MergeStrategy, DEFAULT_ENTITY_TYPES};
use crate::sync::BackoffPolicy;
use crate::util::normalize_text_option;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_MAX_SYNC_ATTEMPTS: u32 = 3;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SYNC_INTERVAL_MS: u64 = 60_000;

/// How divergence between local and remote copies is recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDetection {
    /// Compare revision numbers and honor remote precondition failures
    #[default]
    Version,
    /// Version comparison, plus flag records that exhaust their sync attempts
    RetryHeuristic,
}

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts before a queue entry becomes `failed`
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub base_backoff_ms: u64,
    /// Growth factor applied per additional failure
    pub backoff_multiplier: f64,
    /// Upper bound for a single backoff delay
    pub max_backoff_ms: u64,
    /// Attempts before a metadata record becomes `failed`
    pub max_sync_attempts: u32,
    /// Deadline for a single remote call
    pub remote_timeout_ms: u64,
    /// Auto-sync loop period
    pub sync_interval_ms: u64,
    /// Entity types synchronized by a full pass, in order
    pub entity_types: Vec<String>,
    pub conflict_detection: ConflictDetection,
    /// Merge policy used by the `merge` resolution strategy
    pub merge_strategy: MergeStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_sync_attempts: DEFAULT_MAX_SYNC_ATTEMPTS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            entity_types: DEFAULT_ENTITY_TYPES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            conflict_detection: ConflictDetection::default(),
            merge_strategy: MergeStrategy::default(),
        }
    }
}

impl EngineConfig {
    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.max_sync_attempts == 0 {
            return Err(Error::Config("max_sync_attempts must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(Error::Config(
                "max_backoff_ms must not be smaller than base_backoff_ms".into(),
            ));
        }
        if i64::try_from(self.max_backoff_ms).is_err() {
            return Err(Error::Config(format!(
                "max_backoff_ms must not exceed {}",
                i64::MAX
            )));
        }
        if self.sync_interval_ms == 0 {
            return Err(Error::Config("sync_interval_ms must be positive".into()));
        }
        if self.remote_timeout_ms == 0 {
            return Err(Error::Config("remote_timeout_ms must be positive".into()));
        }
        self.registry().map(|_| ())
    }

    /// Validated entity registry for the configured types
    pub fn registry(&self) -> Result<EntityRegistry> {
        EntityRegistry::new(self.entity_types.iter().cloned())
            .map_err(|error| Error::Config(error.to_string()))
    }

    /// Backoff schedule for queue retries
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_backoff_ms),
            self.backoff_multiplier,
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Apply `FIELDSYNC_*` environment overrides on top of this config
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment, test maps)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| normalize_text_option(lookup(name));

        if let Some(value) = read("FIELDSYNC_MAX_RETRIES") {
            self.max_retries = parse_number("FIELDSYNC_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_BASE_BACKOFF_MS") {
            self.base_backoff_ms = parse_number("FIELDSYNC_BASE_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_BACKOFF_MULTIPLIER") {
            self.backoff_multiplier = parse_number("FIELDSYNC_BACKOFF_MULTIPLIER", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_number("FIELDSYNC_MAX_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_MAX_SYNC_ATTEMPTS") {
            self.max_sync_attempts = parse_number("FIELDSYNC_MAX_SYNC_ATTEMPTS", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_REMOTE_TIMEOUT_MS") {
            self.remote_timeout_ms = parse_number("FIELDSYNC_REMOTE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_SYNC_INTERVAL_MS") {
            self.sync_interval_ms = parse_number("FIELDSYNC_SYNC_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read("FIELDSYNC_ENTITY_TYPES") {
            self.entity_types = value
                .split(',')
                .filter_map(|name| normalize_text_option(Some(name.to_string())))
                .collect();
        }

        self.validate()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name} has invalid value '{value}'")))
}
