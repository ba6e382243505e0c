//! Per-entity sync metadata model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::entity::EntityKey;
use super::sync_conflict::{ConflictRecord, ResolutionStrategy};
use crate::error::Error;

/// Remote-sync state of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStatus {
    Idle,
    Syncing,
    Pending,
    Synced,
    Failed,
}

impl MetadataStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MetadataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!("Unknown sync status: {other}"))),
        }
    }
}

/// Synchronization state tracked for one `(entity_type, entity_id)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub key: EntityKey,
    pub sync_status: MetadataStatus,
    /// Last time a sync attempt started (Unix ms)
    pub last_sync_attempt: Option<i64>,
    /// Last successful sync (Unix ms)
    pub last_sync_success: Option<i64>,
    pub sync_attempts: u32,
    pub max_sync_attempts: u32,
    /// Set when local and remote diverged; cleared only by resolution
    pub has_conflict: bool,
    /// Name of the strategy that resolved the last conflict
    pub conflict_resolution: Option<String>,
    /// When the current conflict was flagged (Unix ms)
    pub conflict_detected_at: Option<i64>,
    /// Revision of the local copy
    pub local_version: i64,
    /// Last remote revision this client agreed on or observed
    pub remote_version: i64,
    pub sync_error: Option<String>,
}

impl SyncMetadata {
    /// Fresh record for an entity seen for the first time
    #[must_use]
    pub const fn new(key: EntityKey, max_sync_attempts: u32) -> Self {
        Self {
            key,
            sync_status: MetadataStatus::Idle,
            last_sync_attempt: None,
            last_sync_success: None,
            sync_attempts: 0,
            max_sync_attempts,
            has_conflict: false,
            conflict_resolution: None,
            conflict_detected_at: None,
            local_version: 0,
            remote_version: 0,
            sync_error: None,
        }
    }

    /// Local copy carries changes the remote has not acknowledged
    #[must_use]
    pub const fn has_unpushed_changes(&self) -> bool {
        self.local_version > self.remote_version
    }

    /// Entity has never been acknowledged by the remote
    #[must_use]
    pub const fn is_new_remotely(&self) -> bool {
        self.remote_version == 0 && self.last_sync_success.is_none()
    }

    /// Derived conflict view, if this record is flagged
    #[must_use]
    pub fn conflict_record(&self) -> Option<ConflictRecord> {
        self.has_conflict.then(|| ConflictRecord {
            entity_type: self.key.entity_type.clone(),
            entity_id: self.key.entity_id.clone(),
            local_version: self.local_version,
            remote_version: self.remote_version,
            detected_at: self
                .conflict_detected_at
                .or(self.last_sync_attempt)
                .unwrap_or_default(),
        })
    }

    /// A local write happened; the record needs pushing again
    pub fn stage_local_change(&mut self) {
        self.local_version = self.local_version.max(self.remote_version) + 1;
        self.sync_attempts = 0;
        self.sync_error = None;
        self.sync_status = MetadataStatus::Pending;
    }

    /// A sync attempt started at `now`
    pub fn begin_attempt(&mut self, now: i64) {
        self.sync_status = MetadataStatus::Syncing;
        self.last_sync_attempt = Some(now);
        self.sync_attempts = self.sync_attempts.saturating_add(1);
    }

    /// The remote acknowledged the local copy at `remote_version`
    pub fn complete(&mut self, remote_version: i64, now: i64) {
        self.sync_status = MetadataStatus::Synced;
        self.last_sync_success = Some(now);
        self.sync_attempts = 0;
        self.sync_error = None;
        self.has_conflict = false;
        self.conflict_detected_at = None;
        self.remote_version = remote_version;
        self.local_version = remote_version;
    }

    /// The remote acknowledged local revision `pushed_version` at `remote_version`
    ///
    /// Settles the record only if no local change landed after the push was
    /// read; otherwise the newer revision stays pending. Returns whether it settled.
    pub fn acknowledge(&mut self, pushed_version: i64, remote_version: i64, now: i64) -> bool {
        if self.local_version == pushed_version {
            self.complete(remote_version, now);
            return true;
        }
        self.last_sync_success = Some(now);
        self.sync_error = None;
        self.remote_version = self.remote_version.max(remote_version);
        self.local_version = self.local_version.max(self.remote_version + 1);
        self.sync_status = MetadataStatus::Pending;
        false
    }

    /// An attempt failed; `failed` once the attempt budget is spent
    ///
    /// With `flag_exhausted` set, exhausting the budget also flags a conflict.
    pub fn fail_attempt(&mut self, error: &str, flag_exhausted: bool, now: i64) {
        self.sync_error = Some(error.to_string());
        if self.sync_attempts >= self.max_sync_attempts {
            self.sync_status = MetadataStatus::Failed;
            if flag_exhausted && !self.has_conflict {
                self.has_conflict = true;
                self.conflict_detected_at = Some(now);
            }
        } else {
            self.sync_status = MetadataStatus::Pending;
        }
    }

    /// The queue gave up on a mutation of this entity
    pub fn fail_permanently(&mut self, error: &str) {
        self.sync_error = Some(error.to_string());
        self.sync_status = MetadataStatus::Failed;
    }

    /// Undo `begin_attempt` for an attempt that was cancelled
    pub fn release_attempt(&mut self) {
        self.sync_status = MetadataStatus::Pending;
        self.sync_attempts = self.sync_attempts.saturating_sub(1);
    }

    /// Local and remote diverged; the remote is now at `remote_version`
    pub fn flag_conflict(&mut self, remote_version: i64, now: i64) {
        self.has_conflict = true;
        self.conflict_detected_at = Some(now);
        self.remote_version = self.remote_version.max(remote_version);
        self.sync_status = MetadataStatus::Pending;
    }

    /// Record a remote revision seen outside a push
    ///
    /// Returns `true` when it collides with unpushed local changes.
    pub fn observe_remote(&mut self, remote_version: i64, now: i64) -> bool {
        if remote_version <= self.remote_version {
            return false;
        }
        if self.has_unpushed_changes() {
            self.flag_conflict(remote_version, now);
            true
        } else {
            self.remote_version = remote_version;
            false
        }
    }

    /// A queued mutation was acknowledged at `remote_version`
    ///
    /// `settled` is false while later mutations of the entity are still queued.
    pub fn advance_remote(&mut self, remote_version: i64, settled: bool, now: i64) {
        if settled && !self.has_conflict {
            self.complete(remote_version, now);
            return;
        }
        self.remote_version = remote_version;
        self.local_version = self.local_version.max(remote_version + 1);
        if !self.has_conflict {
            self.sync_status = MetadataStatus::Pending;
        }
    }

    /// Conflict settled with `strategy`; both sides now agree on `remote_version`
    pub fn resolve(&mut self, strategy: ResolutionStrategy) {
        self.has_conflict = false;
        self.conflict_resolution = Some(strategy.as_str().to_string());
        self.conflict_detected_at = None;
        self.sync_status = MetadataStatus::Synced;
        self.sync_attempts = 0;
        self.sync_error = None;
        self.local_version = self.remote_version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, EntityType};

    fn key() -> EntityKey {
        EntityKey::new(
            EntityType::new("projects").unwrap(),
            EntityId::new("p-1").unwrap(),
        )
    }

    #[test]
    fn new_record_is_idle_and_unflagged() {
        let record = SyncMetadata::new(key(), 3);
        assert_eq!(record.sync_status, MetadataStatus::Idle);
        assert!(!record.has_conflict);
        assert!(record.is_new_remotely());
        assert!(record.conflict_record().is_none());
    }

    #[test]
    fn conflict_record_carries_versions() {
        let mut record = SyncMetadata::new(key(), 3);
        record.has_conflict = true;
        record.local_version = 2;
        record.remote_version = 3;
        record.conflict_detected_at = Some(42);

        let conflict = record.conflict_record().unwrap();
        assert_eq!(conflict.local_version, 2);
        assert_eq!(conflict.remote_version, 3);
        assert_eq!(conflict.detected_at, 42);
        assert_eq!(conflict.entity_id.as_str(), "p-1");
    }

    #[test]
    fn attempt_lifecycle_fails_after_budget() {
        let mut record = SyncMetadata::new(key(), 2);
        record.stage_local_change();
        assert_eq!(record.local_version, 1);
        assert_eq!(record.sync_status, MetadataStatus::Pending);

        record.begin_attempt(10);
        assert_eq!(record.sync_status, MetadataStatus::Syncing);
        record.fail_attempt("offline", false, 11);
        assert_eq!(record.sync_status, MetadataStatus::Pending);

        record.begin_attempt(20);
        record.fail_attempt("offline", false, 21);
        assert_eq!(record.sync_status, MetadataStatus::Failed);
        assert!(!record.has_conflict);
        assert_eq!(record.sync_error.as_deref(), Some("offline"));
    }

    #[test]
    fn exhausted_attempts_flag_conflict_when_requested() {
        let mut record = SyncMetadata::new(key(), 1);
        record.begin_attempt(10);
        record.fail_attempt("precondition failed", true, 11);
        assert!(record.has_conflict);
        assert_eq!(record.conflict_detected_at, Some(11));
        assert_ne!(record.sync_status, MetadataStatus::Synced);
    }

    #[test]
    fn complete_aligns_versions_and_clears_state() {
        let mut record = SyncMetadata::new(key(), 3);
        record.stage_local_change();
        record.begin_attempt(5);
        record.complete(7, 6);

        assert_eq!(record.sync_status, MetadataStatus::Synced);
        assert_eq!(record.local_version, 7);
        assert_eq!(record.remote_version, 7);
        assert_eq!(record.sync_attempts, 0);
        assert_eq!(record.last_sync_success, Some(6));
    }

    #[test]
    fn observe_remote_flags_only_with_unpushed_changes() {
        let mut clean = SyncMetadata::new(key(), 3);
        clean.complete(2, 1);
        assert!(!clean.observe_remote(3, 5));
        assert_eq!(clean.remote_version, 3);
        assert!(!clean.has_conflict);

        let mut dirty = SyncMetadata::new(key(), 3);
        dirty.complete(2, 1);
        dirty.stage_local_change();
        assert!(!dirty.observe_remote(2, 5));
        assert!(dirty.observe_remote(3, 5));
        assert!(dirty.has_conflict);
        assert_eq!(dirty.remote_version, 3);
    }

    #[test]
    fn resolve_clears_conflict_and_records_strategy() {
        let mut record = SyncMetadata::new(key(), 3);
        record.local_version = 2;
        record.flag_conflict(3, 9);

        record.resolve(ResolutionStrategy::ServerWins);
        assert!(!record.has_conflict);
        assert_eq!(record.conflict_resolution.as_deref(), Some("server_wins"));
        assert_eq!(record.sync_status, MetadataStatus::Synced);
        assert_eq!(record.local_version, 3);
    }

    #[test]
    fn acknowledge_keeps_newer_local_change_pending() {
        let mut record = SyncMetadata::new(key(), 3);
        record.stage_local_change();
        let pushed = record.local_version;
        record.begin_attempt(10);
        record.stage_local_change();

        assert!(!record.acknowledge(pushed, 1, 20));
        assert_eq!(record.sync_status, MetadataStatus::Pending);
        assert_eq!(record.remote_version, 1);
        assert!(record.has_unpushed_changes());
        assert!(!record.is_new_remotely());

        let pushed = record.local_version;
        assert!(record.acknowledge(pushed, 2, 30));
        assert_eq!(record.sync_status, MetadataStatus::Synced);
        assert_eq!(record.local_version, 2);
    }

    #[test]
    fn advance_remote_keeps_pending_until_settled() {
        let mut record = SyncMetadata::new(key(), 3);
        record.stage_local_change();
        record.stage_local_change();

        record.advance_remote(1, false, 10);
        assert_eq!(record.sync_status, MetadataStatus::Pending);
        assert!(record.has_unpushed_changes());

        record.advance_remote(2, true, 11);
        assert_eq!(record.sync_status, MetadataStatus::Synced);
        assert_eq!(record.local_version, 2);
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            MetadataStatus::Idle,
            MetadataStatus::Syncing,
            MetadataStatus::Pending,
            MetadataStatus::Synced,
            MetadataStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MetadataStatus>().unwrap(), status);
        }
    }
}
