//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the offline-first synchronization engine shared by all
//! fieldsync clients: the durable sync queue, per-entity sync metadata, the
//! conflict resolver, and the coordinator that drives full sync passes.
//!
//! Domain records are opaque `(entity_type, entity_id, payload)` tuples; the
//! engine never interprets payloads beyond the optional merge helpers.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{ConflictDetection, EngineConfig};
pub use error::{Error, Result};
pub use models::{
    ConflictRecord, ConflictResolutionInfo, EntityId, EntityKey, EntityRegistry, EntitySnapshot,
    EntityType, MergeStrategy, MetadataStatus, OperationType, QueueEntry, QueueEntryId,
    QueueStatus, ResolutionStrategy, SyncMetadata, SyncOperationResult, SyncStatusSnapshot,
};
pub use services::SyncStore;
pub use sync::{
    merge_versions, Clock, ConflictResolver, LocalEntityStore, RemoteAck, RemoteError,
    RemoteOperation, RemoteTransport, SqliteEntityStore, SyncCoordinator, SyncMetadataStore,
    SyncQueue, SystemClock,
};
