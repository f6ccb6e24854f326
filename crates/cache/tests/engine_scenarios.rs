//! End-to-end engine scenarios: cold miss / hot hit, direct mode,
//! remote promotion, admission control and the mismatch policy.

use recache_cache::{CacheEngine, LookupOptions};
use recache_core::{codec, CacheEntry, CompressionMode, Config, ExpectedFile, Hash, Hasher};
use recache_remote::{RemoteBackend, RemoteCache, Result as RemoteResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Shared state of the in-memory remote backend, inspectable from the
/// tests after the engine has taken ownership of the backend.
#[derive(Default)]
struct RemoteState {
    entries: HashMap<String, CacheEntry>,
    files: HashMap<(String, String), Vec<u8>>,
}

struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    reachable: bool,
    connected: bool,
}

impl MemoryRemote {
    fn new(state: Arc<Mutex<RemoteState>>) -> Self {
        Self {
            state,
            reachable: true,
            connected: false,
        }
    }
}

impl RemoteBackend for MemoryRemote {
    fn connect(&mut self) -> RemoteResult<bool> {
        if self.reachable {
            self.connected = true;
        }
        Ok(self.reachable)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn lookup(&self, hash: &Hash) -> RemoteResult<Option<CacheEntry>> {
        Ok(self.state.lock().unwrap().entries.get(&hash.to_hex()).cloned())
    }

    fn add(
        &self,
        hash: &Hash,
        entry: &CacheEntry,
        expected_files: &[ExpectedFile],
    ) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        let mut stored_ids = Vec::new();
        for id in &entry.file_ids {
            let expected = expected_files.iter().find(|f| &f.id == id).unwrap();
            if !expected.path.exists() {
                continue;
            }
            let raw = fs::read(&expected.path).unwrap();
            let bytes = if entry.compression_mode.is_compressed() {
                codec::compress_to_vec(&raw[..]).unwrap()
            } else {
                raw
            };
            state.files.insert((hash.to_hex(), id.clone()), bytes);
            stored_ids.push(id.clone());
        }
        state.entries.insert(
            hash.to_hex(),
            CacheEntry {
                file_ids: stored_ids,
                ..entry.clone()
            },
        );
        Ok(())
    }

    fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
    ) -> RemoteResult<()> {
        let state = self.state.lock().unwrap();
        let bytes = state
            .files
            .get(&(hash.to_hex(), file_id.to_string()))
            .cloned()
            .ok_or_else(|| recache_core::Error::corrupt("payload missing"))?;
        let bytes = if is_compressed {
            codec::decompress_to_vec(&bytes)?
        } else {
            bytes
        };
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|e| recache_core::Error::io(e, parent, "mkdir"))?;
        }
        fs::write(target_path, bytes)
            .map_err(|e| recache_core::Error::io(e, target_path, "write"))?;
        Ok(())
    }
}

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::defaults(dir.path().join("cache"));
    config.max_cache_size = 1 << 20;
    config
}

fn local_engine(dir: &TempDir) -> CacheEngine {
    CacheEngine::with_remote(config_in(dir), None).unwrap()
}

fn remote_engine(config: Config, read_only: bool) -> (CacheEngine, Arc<Mutex<RemoteState>>) {
    let state = Arc::new(Mutex::new(RemoteState::default()));
    let remote = RemoteCache::new(Box::new(MemoryRemote::new(state.clone())), read_only);
    let engine = CacheEngine::with_remote(config, Some(remote)).unwrap();
    (engine, state)
}

fn preproc_hash() -> Hash {
    let mut hasher = Hasher::new();
    hasher.absorb(b"int main(){return 0;}\n");
    hasher.absorb_str("-O2 -c");
    hasher.finalize()
}

fn object_payload() -> Vec<u8> {
    (0..1024u32)
        .flat_map(|_| [0xAB, 0xCD])
        .take(1024)
        .collect()
}

fn write_object(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("out.o");
    fs::write(&path, object_payload()).unwrap();
    path
}

fn entry_for(out: &Path, mode: CompressionMode) -> (CacheEntry, Vec<ExpectedFile>) {
    let entry = CacheEntry::new(
        vec!["object".to_string()],
        mode,
        Vec::new(),
        Vec::new(),
        0,
    );
    let expected = vec![ExpectedFile::required("object", out)];
    (entry, expected)
}

#[test]
fn cold_miss_then_hot_hit() {
    let dir = TempDir::new().unwrap();
    let mut engine = local_engine(&dir);
    let hash = preproc_hash();
    let opts = LookupOptions::default();

    let out = dir.path().join("out.o");
    let (entry, expected) = entry_for(&out, CompressionMode::None);

    // First invocation: miss, "the tool runs", insert.
    assert_eq!(engine.lookup(&hash, &expected, &opts), None);
    fs::write(&out, object_payload()).unwrap();
    engine.add(&hash, &entry, &expected, &opts);

    // Second invocation: local hit materializes the object byte-identically.
    fs::remove_file(&out).unwrap();
    assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));
    assert_eq!(fs::read(&out).unwrap(), object_payload());

    let stats = engine.stats().unwrap();
    assert_eq!(stats.local_hits, 1);
}

#[test]
fn direct_mode_shortcut_and_invalidation() {
    let dir = TempDir::new().unwrap();
    let mut engine = local_engine(&dir);
    let opts = LookupOptions::default();

    let hdr = dir.path().join("hdr.h");
    fs::write(&hdr, "#define X 1\n").unwrap();

    let direct_hash = Hasher::hash_bytes(b"raw source + flags");
    let hash = preproc_hash();
    let out = write_object(&dir);
    let (entry, expected) = entry_for(&out, CompressionMode::None);

    // Nothing recorded yet: direct miss.
    assert_eq!(engine.lookup_direct(&direct_hash, &expected, &opts), None);

    // Miss path: insert the entry, then record the manifest.
    engine.add(&hash, &entry, &expected, &opts);
    engine.add_direct(&direct_hash, &hash, &[hdr.clone()]);

    // Direct hit avoids preprocessing and serves the entry.
    fs::remove_file(&out).unwrap();
    assert_eq!(engine.lookup_direct(&direct_hash, &expected, &opts), Some(0));
    assert_eq!(fs::read(&out).unwrap(), object_payload());

    // Touching the implicit input invalidates direct mode.
    fs::write(&hdr, "#define X 2\n").unwrap();
    assert_eq!(engine.lookup_direct(&direct_hash, &expected, &opts), None);

    // The changed header produces a new preprocessor hash, which must
    // miss; after the re-run a new manifest takes over.
    let new_hash = Hasher::hash_bytes(b"preprocessed with X=2");
    assert_eq!(engine.lookup(&new_hash, &expected, &opts), None);
    fs::write(&out, object_payload()).unwrap();
    engine.add(&new_hash, &entry, &expected, &opts);
    engine.add_direct(&direct_hash, &new_hash, &[hdr.clone()]);
    assert_eq!(engine.lookup_direct(&direct_hash, &expected, &opts), Some(0));

    let stats = engine.stats().unwrap();
    assert_eq!(stats.direct_hits, 2);
    assert_eq!(stats.direct_misses, 2);
}

#[test]
fn remote_promotion() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let (mut engine, state) = remote_engine(config.clone(), false);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = dir.path().join("out.o");
    let (_, expected) = entry_for(&out, CompressionMode::All);

    // Pre-populate the remote with a compressed entry.
    {
        let mut state = state.lock().unwrap();
        state.entries.insert(
            hash.to_hex(),
            CacheEntry::new(
                vec!["object".to_string()],
                CompressionMode::All,
                b"remote stdout".to_vec(),
                Vec::new(),
                0,
            ),
        );
        state.files.insert(
            (hash.to_hex(), "object".to_string()),
            codec::compress_to_vec(&object_payload()[..]).unwrap(),
        );
    }

    // Local miss, remote hit: files arrive and the entry is promoted.
    assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));
    assert_eq!(fs::read(&out).unwrap(), object_payload());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.remote_hits, 1);

    // A fresh engine over the same directory with no remote at all now
    // hits locally.
    let mut local_only = CacheEngine::with_remote(config, None).unwrap();
    fs::remove_file(&out).unwrap();
    assert_eq!(local_only.lookup(&hash, &expected, &opts), Some(0));
    assert_eq!(fs::read(&out).unwrap(), object_payload());
}

#[test]
fn remote_miss_is_counted() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _state) = remote_engine(config_in(&dir), false);
    let opts = LookupOptions::default();
    let out = dir.path().join("out.o");
    let (_, expected) = entry_for(&out, CompressionMode::None);

    assert_eq!(engine.lookup(&preproc_hash(), &expected, &opts), None);
    assert_eq!(engine.stats().unwrap().remote_misses, 1);
}

#[test]
fn oversize_entry_skips_local_but_reaches_remote() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.max_local_entry_size = 64;
    let (mut engine, state) = remote_engine(config.clone(), false);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = dir.path().join("out.o");
    fs::write(&out, vec![0u8; 128]).unwrap();
    let (entry, expected) = entry_for(&out, CompressionMode::None);

    engine.add(&hash, &entry, &expected, &opts);

    // The remote received it; the local tier did not.
    assert!(state.lock().unwrap().entries.contains_key(&hash.to_hex()));
    let mut local_only = CacheEngine::with_remote(config, None).unwrap();
    fs::remove_file(&out).unwrap();
    assert_eq!(local_only.lookup(&hash, &expected, &opts), None);
}

#[test]
fn read_only_remote_suppresses_inserts() {
    let dir = TempDir::new().unwrap();
    let (mut engine, state) = remote_engine(config_in(&dir), true);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = write_object(&dir);
    let (entry, expected) = entry_for(&out, CompressionMode::None);

    engine.add(&hash, &entry, &expected, &opts);

    assert!(state.lock().unwrap().entries.is_empty());
    // The local insert still happened.
    fs::remove_file(&out).unwrap();
    assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));
}

#[test]
fn mismatched_expectations_read_as_miss_without_deleting() {
    let dir = TempDir::new().unwrap();
    let mut engine = local_engine(&dir);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = write_object(&dir);
    let (entry, expected) = entry_for(&out, CompressionMode::None);
    engine.add(&hash, &entry, &expected, &opts);

    // A caller that does not expect "object" cannot use the entry.
    let other = vec![ExpectedFile::required("executable", dir.path().join("a.out"))];
    assert_eq!(engine.lookup(&hash, &other, &opts), None);

    // The entry survives for callers with the right expectations.
    fs::remove_file(&out).unwrap();
    assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));
}

#[test]
fn compressed_and_uncompressed_retrievals_are_byte_identical() {
    let opts = LookupOptions::default();
    let mut restored = Vec::new();
    for mode in [CompressionMode::None, CompressionMode::All] {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.compress = mode.is_compressed();
        let mut engine = CacheEngine::with_remote(config, None).unwrap();

        let hash = preproc_hash();
        let out = write_object(&dir);
        let (entry, expected) = entry_for(&out, mode);
        engine.add(&hash, &entry, &expected, &opts);

        fs::remove_file(&out).unwrap();
        assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));
        restored.push(fs::read(&out).unwrap());
    }
    assert_eq!(restored[0], restored[1]);
    assert_eq!(restored[0], object_payload());
}

#[test]
fn lookup_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let mut engine = local_engine(&dir);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = write_object(&dir);
    let (entry, expected) = entry_for(&out, CompressionMode::None);
    engine.add(&hash, &entry, &expected, &opts);

    let first = engine.lookup(&hash, &expected, &opts);
    let first_bytes = fs::read(&out).unwrap();
    let second = engine.lookup(&hash, &expected, &opts);
    assert_eq!(first, second);
    assert_eq!(first_bytes, fs::read(&out).unwrap());
}

#[test]
fn clear_resets_entries_and_counters() {
    let dir = TempDir::new().unwrap();
    let mut engine = local_engine(&dir);
    let opts = LookupOptions::default();

    let hash = preproc_hash();
    let out = write_object(&dir);
    let (entry, expected) = entry_for(&out, CompressionMode::None);
    engine.add(&hash, &entry, &expected, &opts);
    assert_eq!(engine.lookup(&hash, &expected, &opts), Some(0));

    engine.clear().unwrap();
    assert_eq!(engine.stats().unwrap().local_hits, 0);
    assert_eq!(engine.lookup(&hash, &expected, &opts), None);
    assert_eq!(engine.occupied_size().unwrap(), 0);
}
