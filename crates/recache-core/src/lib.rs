//! Core types and utilities for recache
//!
//! This crate provides the pieces shared by the local store, the remote
//! backend and the CLI:
//! - content fingerprinting (`Hash`, `Hasher`)
//! - the cache entry data model (`CacheEntry`, `ExpectedFile`)
//! - the on-disk entry metadata codec and payload compression helpers
//! - configuration loading, persistence and size parsing

mod error;

pub mod codec;
pub mod config;
pub mod entry;
pub mod hash;

pub use config::{format_size, parse_size, Config};
pub use entry::{CacheEntry, CompressionMode, ExpectedFile};
pub use error::{Error, Result};
pub use hash::{Hash, Hasher, HASH_LEN};
