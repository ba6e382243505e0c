//! Data models for fieldsync

mod entity;
mod queue_entry;
mod sync_conflict;
mod sync_metadata;
mod sync_result;

pub use entity::{
    EntityId, EntityKey, EntityRegistry, EntitySnapshot, EntityType, DEFAULT_ENTITY_TYPES,
};
pub use queue_entry::{OperationType, QueueEntry, QueueEntryId, QueueStatus};
pub use sync_conflict::{
    ConflictRecord, ConflictResolutionInfo, MergeStrategy, ResolutionStrategy, SyncConflict,
};
pub use sync_metadata::{MetadataStatus, SyncMetadata};
pub use sync_result::{SyncOperationResult, SyncStatusSnapshot, SYNC_IN_PROGRESS};
