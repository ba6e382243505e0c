//! Sync pass outcome models

use serde::{Deserialize, Serialize};

/// Error returned when a second sync is requested while one is running
pub const SYNC_IN_PROGRESS: &str = "Sync already in progress";

/// Outcome of one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperationResult {
    pub success: bool,
    pub error: Option<String>,
    pub items_synced: usize,
    /// Completion timestamp (Unix ms)
    pub timestamp: i64,
}

impl SyncOperationResult {
    #[must_use]
    pub const fn succeeded(items_synced: usize, timestamp: i64) -> Self {
        Self {
            success: true,
            error: None,
            items_synced,
            timestamp,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, items_synced: usize, timestamp: i64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            items_synced,
            timestamp,
        }
    }

    /// Result handed to a caller that lost the race for the sync guard
    #[must_use]
    pub fn already_in_progress(timestamp: i64) -> Self {
        Self::failed(SYNC_IN_PROGRESS, 0, timestamp)
    }

    /// Fold several per-type results into one.
    ///
    /// Counts are summed and error messages joined, never overwritten.
    #[must_use]
    pub fn aggregate<I>(results: I, timestamp: i64) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let mut items_synced = 0;
        let mut errors = Vec::new();
        for result in results {
            items_synced += result.items_synced;
            if !result.success {
                errors.push(
                    result
                        .error
                        .unwrap_or_else(|| "Unknown sync error".to_string()),
                );
            }
        }

        if errors.is_empty() {
            Self::succeeded(items_synced, timestamp)
        } else {
            Self::failed(errors.join("; "), items_synced, timestamp)
        }
    }
}

/// Snapshot of engine state for status indicators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    pub is_syncing: bool,
    /// Last completed sync (Unix ms)
    pub last_sync_time: Option<i64>,
    pub pending_items_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aggregate_sums_counts_and_joins_errors() {
        let combined = SyncOperationResult::aggregate(
            [
                SyncOperationResult::succeeded(2, 1),
                SyncOperationResult::failed("Projects: offline", 1, 1),
                SyncOperationResult::failed("Captures: timeout", 0, 1),
            ],
            10,
        );

        assert_eq!(
            combined,
            SyncOperationResult {
                success: false,
                error: Some("Projects: offline; Captures: timeout".to_string()),
                items_synced: 3,
                timestamp: 10,
            }
        );
    }

    #[test]
    fn aggregate_of_successes_is_success() {
        let combined = SyncOperationResult::aggregate(
            [
                SyncOperationResult::succeeded(1, 1),
                SyncOperationResult::succeeded(4, 1),
            ],
            5,
        );
        assert!(combined.success);
        assert_eq!(combined.items_synced, 5);
        assert!(combined.error.is_none());
    }

    #[test]
    fn already_in_progress_has_fixed_message() {
        let result = SyncOperationResult::already_in_progress(0);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(SYNC_IN_PROGRESS));
    }
}
