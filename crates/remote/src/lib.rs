//! Remote cache backend for recache
//!
//! The remote cache mirrors the local cache's logical interface minus
//! eviction: entries are looked up, fetched and inserted by hash. It is
//! strictly best-effort — connection failures degrade the build to
//! local-only operation and insert failures are warnings, never build
//! errors.

pub mod config;
pub mod error;
pub mod retry;

mod backend;
mod http;

pub use backend::{RemoteBackend, RemoteCache};
pub use config::{RemoteConfig, RetryConfig};
pub use error::{RemoteError, Result};
pub use http::HttpBackend;
