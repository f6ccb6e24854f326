//! The two-tier cache engine
//!
//! The engine orchestrates one invocation's path through the cache:
//! direct-mode shortcut, local lookup, remote lookup with promotion,
//! and the insert pipeline with size admission.
//!
//! Lookup and insert never propagate errors to the wrapper. A failed
//! lookup is a miss (the tool runs and the result can be re-inserted
//! over a corrupt entry); a failed insert is a warning. A broken cache
//! can at worst cost an extra tool run, never a wrong build.

use crate::direct::DirectManifest;
use crate::error::{Error, Result};
use crate::local::LocalCache;
use crate::stats::CacheStats;
use recache_core::{CacheEntry, CompressionMode, Config, ExpectedFile, Hash};
use recache_remote::RemoteCache;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Per-invocation retrieval options.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookupOptions {
    /// Hard-link cached files into place where possible.
    pub allow_hard_links: bool,
    /// Create missing parent directories of target paths.
    pub create_target_dirs: bool,
}

/// The cache engine.
pub struct CacheEngine {
    config: Config,
    local: LocalCache,
    remote: Option<RemoteCache>,
}

impl CacheEngine {
    /// Open the engine with the remote backend selected by the
    /// configuration (if any).
    pub fn new(config: Config) -> Result<Self> {
        let remote = RemoteCache::from_config(&config);
        Self::with_remote(config, remote)
    }

    /// Open the engine with an explicit remote cache.
    pub fn with_remote(config: Config, remote: Option<RemoteCache>) -> Result<Self> {
        let local = LocalCache::new(&config)?;
        Ok(Self {
            config,
            local,
            remote,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Try the direct-mode shortcut: consult the manifest for
    /// `direct_hash`, re-validate the recorded implicit inputs, and on a
    /// full match run a regular lookup with the recorded preprocessor
    /// hash. Returns the exit code on a hit.
    pub fn lookup_direct(
        &mut self,
        direct_hash: &Hash,
        expected_files: &[ExpectedFile],
        opts: &LookupOptions,
    ) -> Option<i32> {
        let manifest = match self.local.lookup_direct(direct_hash) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(%direct_hash, error = %e, "Direct mode lookup failed");
                None
            }
        };
        let hash = manifest.and_then(|manifest| {
            if !manifest.matches_current_inputs() {
                debug!(%direct_hash, "Implicit inputs changed");
                return None;
            }
            manifest.preprocessor_hash().ok()
        });

        let Some(hash) = hash else {
            debug!(%direct_hash, "Direct mode cache miss");
            bump_stats(&self.local, direct_hash, CacheStats::direct_miss());
            return None;
        };
        info!(%direct_hash, %hash, "Direct mode cache hit");
        bump_stats(&self.local, direct_hash, CacheStats::direct_hit());
        self.lookup(&hash, expected_files, opts)
    }

    /// Two-tier lookup. On a hit, the expected files are materialized,
    /// the captured streams are replayed and the recorded exit code is
    /// returned.
    pub fn lookup(
        &mut self,
        hash: &Hash,
        expected_files: &[ExpectedFile],
        opts: &LookupOptions,
    ) -> Option<i32> {
        match self.lookup_in_local(hash, expected_files, opts) {
            Ok(Some(return_code)) => return Some(return_code),
            Ok(None) => {}
            Err(e) => warn!(%hash, error = %e, "Local lookup failed"),
        }
        match self.lookup_in_remote(hash, expected_files, opts) {
            Ok(result) => result,
            Err(e) => {
                warn!(%hash, error = %e, "Remote lookup failed");
                None
            }
        }
    }

    /// Insert a verified result (the tool exited 0) into both tiers,
    /// subject to per-entry size admission. Insert failures are
    /// warnings; the build has already succeeded.
    pub fn add(
        &mut self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
        opts: &LookupOptions,
    ) {
        let size = match total_entry_size(entry, expected_files) {
            Ok(size) => size,
            Err(e) => {
                warn!(%hash, error = %e, "Skipping cache insert");
                return;
            }
        };

        if admitted(size, self.config.max_local_entry_size) {
            if let Err(e) = self
                .local
                .add(hash, entry, expected_files, opts.allow_hard_links)
            {
                warn!(%hash, error = %e, "Local cache insert failed");
            }
        } else {
            warn!(%hash, size, "Cache entry too large for the local cache");
        }

        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        if remote.is_read_only() {
            return;
        }
        match remote.connect() {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "Remote cache error");
                return;
            }
        }
        if admitted(size, self.config.max_remote_entry_size) {
            // Entries always travel compressed.
            let remote_entry = entry.with_compression(CompressionMode::All);
            if let Err(e) = remote.add(hash, &remote_entry, expected_files) {
                warn!(%hash, error = %e, "Remote cache error");
            }
        } else {
            warn!(%hash, size, "Cache entry too large for the remote cache");
        }
    }

    /// Record a direct-mode manifest: hash the implicit inputs now and
    /// associate them (plus the preprocessor hash) with `direct_hash`.
    pub fn add_direct(
        &mut self,
        direct_hash: &Hash,
        preprocessor_hash: &Hash,
        implicit_inputs: &[PathBuf],
    ) {
        let result = DirectManifest::from_inputs(preprocessor_hash, implicit_inputs)
            .and_then(|manifest| self.local.add_direct(direct_hash, &manifest));
        if let Err(e) = result {
            error!(%direct_hash, error = %e, "Creation of direct mode entry failed");
        }
    }

    /// Remove all cached data, keeping the configuration.
    pub fn clear(&self) -> Result<()> {
        self.local.clear()
    }

    /// Counters aggregated across all shards.
    pub fn stats(&self) -> Result<CacheStats> {
        self.local.stats()
    }

    /// Bytes currently occupied by the local store.
    pub fn occupied_size(&self) -> Result<u64> {
        self.local.occupied_size()
    }

    fn lookup_in_local(
        &mut self,
        hash: &Hash,
        expected_files: &[ExpectedFile],
        opts: &LookupOptions,
    ) -> Result<Option<i32>> {
        // The lookup hands back the held shard lock; keeping it across
        // materialization stops eviction from deleting payloads mid-read.
        let Some((entry, lock)) = self.local.lookup(hash)? else {
            return Ok(None);
        };

        for file_id in &entry.file_ids {
            let expected = expected_files
                .iter()
                .find(|f| &f.id == file_id)
                .ok_or_else(|| Error::mismatch(file_id.clone()))?;
            debug!(%hash, file_id, target = %expected.path.display(), "Local cache hit");
            self.local.get_file(
                hash,
                file_id,
                &expected.path,
                entry.compression_mode.is_compressed(),
                opts.allow_hard_links,
                opts.create_target_dirs,
            )?;
        }
        drop(lock);

        bump_stats(&self.local, hash, CacheStats::local_hit());
        emit_streams(&entry);
        Ok(Some(entry.return_code))
    }

    fn lookup_in_remote(
        &mut self,
        hash: &Hash,
        expected_files: &[ExpectedFile],
        opts: &LookupOptions,
    ) -> Result<Option<i32>> {
        let Some(remote) = self.remote.as_mut() else {
            return Ok(None);
        };
        if !remote.connect()? {
            return Ok(None);
        }

        let Some(entry) = remote.lookup(hash)? else {
            bump_stats(&self.local, hash, CacheStats::remote_miss());
            return Ok(None);
        };

        for file_id in &entry.file_ids {
            let expected = expected_files
                .iter()
                .find(|f| &f.id == file_id)
                .ok_or_else(|| Error::mismatch(file_id.clone()))?;
            debug!(%hash, file_id, target = %expected.path.display(), "Remote cache hit");
            remote.get_file(
                hash,
                file_id,
                &expected.path,
                entry.compression_mode.is_compressed(),
            )?;
        }

        emit_streams(&entry);
        let return_code = entry.return_code;

        // Promote into the local cache so the next build skips the
        // network. Idempotent: a concurrent insert of the same hash is
        // simply overwritten.
        match total_entry_size(&entry, expected_files) {
            Ok(size) if admitted(size, self.config.max_local_entry_size) => {
                let mode = if self.config.compress {
                    CompressionMode::All
                } else {
                    CompressionMode::None
                };
                let promoted = entry.with_compression(mode);
                match self
                    .local
                    .add(hash, &promoted, expected_files, opts.allow_hard_links)
                {
                    Ok(()) => bump_stats(&self.local, hash, CacheStats::remote_hit()),
                    Err(e) => {
                        error!(%hash, error = %e, "Unable to add remote entry to the local cache");
                    }
                }
            }
            Ok(size) => {
                warn!(%hash, size, "Cache entry too large for the local cache");
            }
            Err(e) => {
                error!(%hash, error = %e, "Unable to add remote entry to the local cache");
            }
        }

        Ok(Some(return_code))
    }
}

/// Total uncompressed size of an entry: captured streams plus the
/// expected files as they exist on disk. Missing non-required files
/// contribute zero; a missing required file is an error.
fn total_entry_size(entry: &CacheEntry, expected_files: &[ExpectedFile]) -> Result<u64> {
    let mut total = entry.stdout.len() as u64 + entry.stderr.len() as u64;
    for expected in expected_files {
        match std::fs::metadata(&expected.path) {
            Ok(meta) => total += meta.len(),
            Err(_) if !expected.required => {}
            Err(e) => return Err(Error::io(e, &expected.path, "stat")),
        }
    }
    Ok(total)
}

fn admitted(size: u64, limit: u64) -> bool {
    limit == 0 || size < limit
}

/// Replay the cached streams onto the real stdout/stderr.
fn emit_streams(entry: &CacheEntry) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(&entry.stdout);
    let _ = stdout.flush();
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(&entry.stderr);
    let _ = stderr.flush();
}

fn bump_stats(local: &LocalCache, hash: &Hash, delta: CacheStats) {
    if let Err(e) = local.update_stats(hash, &delta) {
        warn!(%hash, error = %e, "Failed to update statistics");
    }
}
