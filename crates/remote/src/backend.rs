//! Remote backend trait and the engine-facing wrapper

use crate::config::RemoteConfig;
use crate::error::Result;
use crate::http::HttpBackend;
use recache_core::{CacheEntry, Config, ExpectedFile, Hash};
use std::path::Path;
use tracing::warn;

/// The operations a remote cache must provide.
///
/// The surface mirrors the local cache minus eviction. Implementations
/// own their transport; the engine issues one operation at a time and
/// treats every error as a miss (lookups) or a warning (inserts).
pub trait RemoteBackend: Send {
    /// Establish the connection if not already established. Idempotent
    /// and lazy; returning `Ok(false)` degrades the build to local-only
    /// operation without an error.
    fn connect(&mut self) -> Result<bool>;

    /// Whether a previous [`RemoteBackend::connect`] succeeded.
    fn is_connected(&self) -> bool;

    /// Fetch an entry's metadata record.
    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>>;

    /// Upload an entry: payload files are read from the expected target
    /// paths (where the tool just wrote them), the metadata record goes
    /// last so a concurrent reader never sees a partial entry.
    fn add(&self, hash: &Hash, entry: &CacheEntry, expected_files: &[ExpectedFile]) -> Result<()>;

    /// Materialize one cached file at `target_path`, decompressing if
    /// the entry's payloads are compressed.
    fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
    ) -> Result<()>;
}

/// The engine's handle on a configured remote cache.
pub struct RemoteCache {
    backend: Box<dyn RemoteBackend>,
    read_only: bool,
}

impl RemoteCache {
    pub fn new(backend: Box<dyn RemoteBackend>, read_only: bool) -> Self {
        Self { backend, read_only }
    }

    /// Select a backend from the configured remote URL. `None` when no
    /// remote is configured or the URL scheme is not supported.
    pub fn from_config(config: &Config) -> Option<Self> {
        let remote_config = RemoteConfig::from_core(config)?;
        let read_only = remote_config.read_only;
        if remote_config.url.starts_with("http://") || remote_config.url.starts_with("https://") {
            return Some(Self::new(
                Box::new(HttpBackend::new(remote_config)),
                read_only,
            ));
        }
        warn!(url = %remote_config.url, "Unsupported remote cache URL scheme; remote disabled");
        None
    }

    /// Whether inserts are suppressed by configuration.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn connect(&mut self) -> Result<bool> {
        self.backend.connect()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    pub fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>> {
        self.backend.lookup(hash)
    }

    pub fn add(
        &self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
    ) -> Result<()> {
        self.backend.add(hash, entry, expected_files)
    }

    pub fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
    ) -> Result<()> {
        self.backend.get_file(hash, file_id, target_path, is_compressed)
    }
}
