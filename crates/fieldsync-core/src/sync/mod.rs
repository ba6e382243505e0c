//! Sync engine: queue, metadata, conflict resolution and orchestration

mod backoff;
mod clock;
mod coordinator;
mod local;
mod metadata;
mod queue;
mod remote;
mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::SyncCoordinator;
pub use local::{LocalEntityStore, SqliteEntityStore};
pub use metadata::SyncMetadataStore;
pub use queue::SyncQueue;
pub use remote::{guarded, RemoteAck, RemoteError, RemoteOperation, RemoteTransport};
pub use resolver::{merge_versions, ConflictResolver};
