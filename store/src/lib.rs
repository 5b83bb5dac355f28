//! Sharded key/value store.
//!
//! Keys route to a (shard, bucket, sub-map) triple by pure hashing; each
//! sub-map carries its own reader/writer lock so no operation ever holds two
//! locks at once. Reads go through the adaptive cache; writes update the
//! cache and then the sub-map. Values are optionally lz4-compressed at rest,
//! and shards can be persisted to and reloaded from disk.

pub mod compress;
pub mod error;
mod persist;
pub mod routing;
pub mod store;

pub use error::StoreError;
pub use store::{DataStore, StoreOptions};
