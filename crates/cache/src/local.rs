//! Sharded content-addressed store on the local filesystem
//!
//! Layout under the cache root:
//!
//! ```text
//! root/config                      configuration (preserved by clear)
//! root/<shard>/.lock               scoped lock target for the shard
//! root/<shard>/stats               JSON hit/miss counters
//! root/<shard>/<rest-of-hash>/     one directory per entry:
//!     meta                         binary metadata record
//!     <file_id>[.zst]              payload files
//! root/direct/<shard>/<rest>       JSON direct-mode manifests
//! ```
//!
//! `<shard>` is the first two hex characters of the hash. Every mutation
//! of a shard happens under that shard's lock; entries become visible
//! atomically by renaming a scratch directory into place.

use crate::direct::DirectManifest;
use crate::error::{Error, Result};
use crate::lock::{LockScope, ScopedLock};
use crate::stats::CacheStats;
use recache_core::codec::{self, MAX_STREAM_LEN};
use recache_core::{CacheEntry, Config, ExpectedFile, Hash};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Number of top-level shards (two hex characters).
pub const NUM_SHARDS: u64 = 256;

const META_FILE_NAME: &str = "meta";
const STATS_FILE_NAME: &str = "stats";
const LOCK_FILE_NAME: &str = ".lock";
const DIRECT_DIR_NAME: &str = "direct";
const COMPRESSED_SUFFIX: &str = "zst";
const SCRATCH_PREFIX: &str = ".tmp.";

/// Reading a metadata record never allocates more than this.
const MAX_META_LEN: u64 = 2 * MAX_STREAM_LEN + 1024 * 1024;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The local cache store.
pub struct LocalCache {
    root: PathBuf,
    max_cache_size: u64,
    lock_scope: LockScope,
}

impl LocalCache {
    /// Open (creating if needed) the store rooted at the configured
    /// cache directory.
    pub fn new(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)
            .map_err(|e| Error::io(e, &config.cache_dir, "create_dir_all"))?;
        Ok(Self {
            root: config.cache_dir.clone(),
            max_cache_size: config.max_cache_size,
            // Lock files live on the filesystem they protect, so the
            // store stays consistent even on network shares.
            lock_scope: LockScope::Remote,
        })
    }

    /// Override the lock namespace. Only safe when every process using
    /// this cache directory picks the same scope.
    pub fn with_lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up an entry. On presence, the returned [`ScopedLock`] is the
    /// held shard lock; holding it for the duration of file retrieval
    /// keeps eviction from deleting payloads mid-read. On absence no
    /// lock is returned.
    pub fn lookup(&self, hash: &Hash) -> Result<Option<(CacheEntry, ScopedLock)>> {
        let shard_dir = self.shard_dir(hash);
        let entry_dir = self.entry_dir(hash);
        let lock = self.lock_shard(&shard_dir)?;

        let meta_path = entry_dir.join(META_FILE_NAME);
        if !meta_path.exists() {
            return Ok(None);
        }

        match self.read_entry(&entry_dir, &meta_path) {
            Ok(entry) => Ok(Some((entry, lock))),
            Err(e) if e.is_corrupt_entry() => {
                tracing::warn!(hash = %hash, error = %e, "Removing corrupt cache entry");
                let _ = fs::remove_dir_all(&entry_dir);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read_entry(&self, entry_dir: &Path, meta_path: &Path) -> Result<CacheEntry> {
        let meta_len = fs::metadata(meta_path)
            .map_err(|e| Error::io(e, meta_path, "stat"))?
            .len();
        if meta_len > MAX_META_LEN {
            return Err(recache_core::Error::corrupt("metadata record too large").into());
        }
        let bytes = fs::read(meta_path).map_err(|e| Error::io(e, meta_path, "read"))?;
        let entry = codec::decode_meta(&bytes)?;

        // Every declared payload must be present, or the entry is unusable.
        for id in &entry.file_ids {
            let payload = entry_dir.join(payload_name(id, entry.compression_mode.is_compressed()));
            if !payload.exists() {
                return Err(recache_core::Error::corrupt(format!(
                    "declared payload missing: {id}"
                ))
                .into());
            }
        }
        Ok(entry)
    }

    /// Install an entry under the shard lock.
    ///
    /// Payload files are taken from the expected target paths (where the
    /// tool just wrote them), staged in a scratch directory and renamed
    /// into place, so concurrent readers see either no entry or the
    /// complete entry. Re-inserting an existing hash overwrites it.
    pub fn add(
        &self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
        allow_hard_links: bool,
    ) -> Result<()> {
        let shard_dir = self.shard_dir(hash);
        let entry_dir = self.entry_dir(hash);
        let lock = self.lock_shard(&shard_dir)?;

        let scratch = shard_dir.join(format!(
            "{SCRATCH_PREFIX}{}.{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&scratch).map_err(|e| Error::io(e, &scratch, "create_dir_all"))?;

        let result = self.install_into(&scratch, entry, expected_files, allow_hard_links);
        let result = result.and_then(|()| {
            if entry_dir.exists() {
                // Concurrent inserts of one hash are idempotent: last
                // writer wins with a complete image.
                fs::remove_dir_all(&entry_dir)
                    .map_err(|e| Error::io(e, &entry_dir, "remove_dir_all"))?;
            }
            fs::rename(&scratch, &entry_dir).map_err(|e| Error::io(e, &entry_dir, "rename"))
        });
        if result.is_err() {
            let _ = fs::remove_dir_all(&scratch);
            return result;
        }

        let evicted = self.evict_shard(&shard_dir, &hash.rest())?;
        if evicted > 0 {
            tracing::debug!(shard = %hash.shard(), evicted, "Evicted entries over shard budget");
            self.bump_stats_locked(&shard_dir, &CacheStats::evicted(evicted));
        }
        drop(lock);
        Ok(())
    }

    fn install_into(
        &self,
        scratch: &Path,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
        allow_hard_links: bool,
    ) -> Result<()> {
        let compressed = entry.compression_mode.is_compressed();
        let mut stored_ids = Vec::with_capacity(entry.file_ids.len());
        for id in &entry.file_ids {
            validate_file_id(id)?;
            let expected = expected_files
                .iter()
                .find(|f| &f.id == id)
                .ok_or_else(|| Error::mismatch(id.clone()))?;
            if !expected.path.exists() {
                if expected.required {
                    return Err(Error::io(
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "required output file missing",
                        ),
                        &expected.path,
                        "stat",
                    ));
                }
                continue;
            }
            let dst = scratch.join(payload_name(id, compressed));
            if compressed {
                codec::compress_file(&expected.path, &dst)?;
            } else if allow_hard_links {
                link_or_copy(&expected.path, &dst)?;
            } else {
                codec::copy_file(&expected.path, &dst)?;
            }
            stored_ids.push(id.clone());
        }

        // The record lists only the ids actually installed, so absent
        // optional files do not read back as corruption.
        let stored = CacheEntry {
            file_ids: stored_ids,
            ..entry.clone()
        };
        let meta_path = scratch.join(META_FILE_NAME);
        fs::write(&meta_path, codec::encode_meta(&stored))
            .map_err(|e| Error::io(e, &meta_path, "write"))?;
        Ok(())
    }

    /// Materialize one cached file at `target_path`.
    ///
    /// The caller must still hold the shard lock returned by
    /// [`LocalCache::lookup`].
    pub fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
        allow_hard_links: bool,
        create_target_dirs: bool,
    ) -> Result<()> {
        let src = self
            .entry_dir(hash)
            .join(payload_name(file_id, is_compressed));
        if create_target_dirs {
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
        }
        if is_compressed {
            codec::decompress_file(&src, target_path)?;
        } else if allow_hard_links {
            link_or_copy(&src, target_path)?;
        } else {
            codec::copy_file(&src, target_path)?;
        }
        Ok(())
    }

    /// Look up a direct-mode manifest. Unparseable manifests are
    /// removed and read as absent.
    pub fn lookup_direct(&self, direct_hash: &Hash) -> Result<Option<DirectManifest>> {
        let shard_dir = self.direct_shard_dir(direct_hash);
        let path = shard_dir.join(direct_hash.rest());
        let _lock = self.lock_shard(&shard_dir)?;

        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::warn!(direct_hash = %direct_hash, error = %e, "Removing corrupt manifest");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Write (or overwrite) a direct-mode manifest.
    pub fn add_direct(&self, direct_hash: &Hash, manifest: &DirectManifest) -> Result<()> {
        let shard_dir = self.direct_shard_dir(direct_hash);
        let path = shard_dir.join(direct_hash.rest());
        let _lock = self.lock_shard(&shard_dir)?;
        let json = serde_json::to_vec(manifest)?;
        atomic_write(&path, &json)
    }

    /// Merge a statistics delta into the shard of `hash`.
    pub fn update_stats(&self, hash: &Hash, delta: &CacheStats) -> Result<()> {
        let shard_dir = self.shard_dir(hash);
        let _lock = self.lock_shard(&shard_dir)?;
        self.bump_stats_locked(&shard_dir, delta);
        Ok(())
    }

    /// Sum the counters of every shard.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut total = CacheStats::default();
        for shard_dir in self.shard_dirs()? {
            let _lock = self.lock_shard(&shard_dir)?;
            total.merge(&read_stats(&shard_dir));
        }
        Ok(total)
    }

    /// Total size in bytes of everything stored (entries, manifests,
    /// counters), excluding the configuration file.
    pub fn occupied_size(&self) -> Result<u64> {
        let mut total = 0u64;
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir"))?;
            if entry.file_name() == recache_core::config::CONFIG_FILE_NAME {
                continue;
            }
            total += dir_size(&entry.path());
        }
        Ok(total)
    }

    /// Remove every cache entry, manifest and counter, preserving the
    /// configuration file.
    pub fn clear(&self) -> Result<()> {
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir"))?;
            let path = entry.path();
            let name = entry.file_name();
            if name == recache_core::config::CONFIG_FILE_NAME {
                continue;
            }
            if name == DIRECT_DIR_NAME {
                let subdirs =
                    fs::read_dir(&path).map_err(|e| Error::io(e, &path, "read_dir"))?;
                for sub in subdirs {
                    let sub = sub.map_err(|e| Error::io(e, &path, "read_dir"))?;
                    if sub.path().is_dir() {
                        self.clear_shard(&sub.path())?;
                    }
                }
                let _ = fs::remove_dir(&path);
            } else if path.is_dir() && is_shard_name(&name.to_string_lossy()) {
                self.clear_shard(&path)?;
            }
        }
        Ok(())
    }

    fn clear_shard(&self, shard_dir: &Path) -> Result<()> {
        {
            let _lock = self.lock_shard(shard_dir)?;
            let entries =
                fs::read_dir(shard_dir).map_err(|e| Error::io(e, shard_dir, "read_dir"))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io(e, shard_dir, "read_dir"))?;
                if entry.file_name() == LOCK_FILE_NAME {
                    continue;
                }
                let path = entry.path();
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                removed.map_err(|e| Error::io(e, &path, "remove"))?;
            }
        }
        // The lock file and the now-empty shard go last, after release.
        let _ = fs::remove_file(shard_dir.join(LOCK_FILE_NAME));
        let _ = fs::remove_dir(shard_dir);
        Ok(())
    }

    /// Remove least-recently-used entries until the shard is back under
    /// its share of the global budget. The entry named by `protect` (the
    /// one being inserted) is never evicted by its own insert.
    fn evict_shard(&self, shard_dir: &Path, protect: &str) -> Result<u64> {
        if self.max_cache_size == 0 {
            return Ok(0);
        }
        let budget = self.max_cache_size / NUM_SHARDS;

        let mut entries: Vec<(SystemTime, String, u64)> = Vec::new();
        let mut total = 0u64;
        let dir = fs::read_dir(shard_dir).map_err(|e| Error::io(e, shard_dir, "read_dir"))?;
        for item in dir {
            let item = item.map_err(|e| Error::io(e, shard_dir, "read_dir"))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if !item.path().is_dir() || name.starts_with(SCRATCH_PREFIX) {
                continue;
            }
            let size = dir_size(&item.path());
            let mtime = item
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            total += size;
            entries.push((mtime, name, size));
        }
        if total <= budget {
            return Ok(0);
        }

        // Approximate LRU; the name tie-break keeps eviction order
        // deterministic when mtimes collide.
        entries.sort();
        let mut evicted = 0u64;
        for (_, name, size) in entries {
            if total <= budget {
                break;
            }
            if name == protect {
                continue;
            }
            let path = shard_dir.join(&name);
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    evicted += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Eviction failed");
                }
            }
        }
        Ok(evicted)
    }

    fn bump_stats_locked(&self, shard_dir: &Path, delta: &CacheStats) {
        let mut stats = read_stats(shard_dir);
        stats.merge(delta);
        let path = shard_dir.join(STATS_FILE_NAME);
        match serde_json::to_vec(&stats) {
            Ok(json) => {
                if let Err(e) = atomic_write(&path, &json) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to update statistics");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize statistics");
            }
        }
    }

    /// Existing shard directories, in stable order.
    fn shard_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir"))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && is_shard_name(&name) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn lock_shard(&self, shard_dir: &Path) -> Result<ScopedLock> {
        ScopedLock::acquire(&shard_dir.join(LOCK_FILE_NAME), self.lock_scope)
    }

    fn shard_dir(&self, hash: &Hash) -> PathBuf {
        self.root.join(hash.shard())
    }

    fn entry_dir(&self, hash: &Hash) -> PathBuf {
        self.shard_dir(hash).join(hash.rest())
    }

    fn direct_shard_dir(&self, direct_hash: &Hash) -> PathBuf {
        self.root.join(DIRECT_DIR_NAME).join(direct_hash.shard())
    }
}

fn payload_name(file_id: &str, compressed: bool) -> String {
    if compressed {
        format!("{file_id}.{COMPRESSED_SUFFIX}")
    } else {
        file_id.to_string()
    }
}

fn validate_file_id(id: &str) -> Result<()> {
    let reserved = id == META_FILE_NAME || id == STATS_FILE_NAME || id == LOCK_FILE_NAME;
    if id.is_empty() || reserved || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(recache_core::Error::configuration(format!("invalid file id: {id:?}")).into());
    }
    Ok(())
}

fn is_shard_name(name: &str) -> bool {
    name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit())
}

fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_file(dst).map_err(|e| Error::io(e, dst, "remove"))?;
    }
    if fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    // Different filesystem or a filesystem without hard links.
    codec::copy_file(src, dst)?;
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| recache_core::Error::configuration("path has no parent"))?;
    fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    let tmp = parent.join(format!(
        "{SCRATCH_PREFIX}{}.{}",
        std::process::id(),
        SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, bytes).map_err(|e| Error::io(e, &tmp, "write"))?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(Error::io(e, path, "rename"))
        }
    }
}

fn read_stats(shard_dir: &Path) -> CacheStats {
    let path = shard_dir.join(STATS_FILE_NAME);
    fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

fn dir_size(path: &Path) -> u64 {
    if path.is_file() {
        return fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
