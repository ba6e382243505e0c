//! Services shared across fieldsync clients

mod store;

pub use store::SyncStore;
