//! Local cache store, cross-process locking and the cache engine
//!
//! This crate implements the stateful side of recache:
//! - scoped, crash-safe file locks shared across build processes
//! - the sharded content-addressed store on the local filesystem,
//!   with approximate-LRU eviction and per-shard statistics
//! - the direct-mode manifest sub-store
//! - the engine that orchestrates the two-tier lookup/insert pipeline
//!   over the local store and an optional remote backend

mod direct;
mod engine;
mod error;
mod local;
mod lock;
mod stats;

pub use direct::DirectManifest;
pub use engine::{CacheEngine, LookupOptions};
pub use error::{Error, Result};
pub use local::{LocalCache, NUM_SHARDS};
pub use lock::{LockScope, ScopedLock};
pub use stats::CacheStats;
