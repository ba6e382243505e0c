//! Database layer for fieldsync

mod connection;
mod metadata_repository;
mod migrations;
mod queue_repository;
mod rows;
mod snapshot_repository;
mod state_repository;

pub use connection::Database;
pub use metadata_repository::{MetadataRepository, SqliteMetadataRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use snapshot_repository::{SnapshotRepository, SqliteSnapshotRepository};
pub use state_repository::{SqliteStateRepository, StateRepository, LAST_SYNC_TIME_KEY};
