//! HTTP remote cache backend
//!
//! Entries are stored as plain objects under the configured base URL:
//!
//! ```text
//! <base>/<shard>/<rest-of-hash>.meta         metadata record
//! <base>/<shard>/<rest-of-hash>.<file_id>    payload files
//! ```
//!
//! Any server that answers GET/PUT (nginx with dav enabled, an object
//! store front, a plain file server for read-only use) works. The
//! metadata record is uploaded last so a concurrent reader never
//! observes a partial entry.

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::retry::retry_with_backoff;
use crate::RemoteBackend;
use recache_core::codec;
use recache_core::{CacheEntry, Error as CoreError, ExpectedFile, Hash};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Reading a remote metadata record never allocates more than this.
const MAX_META_LEN: u64 = 2 * codec::MAX_STREAM_LEN + 1024 * 1024;

pub struct HttpBackend {
    config: RemoteConfig,
    base_url: String,
    agent: ureq::Agent,
    connected: bool,
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let base_url = config.url.trim_end_matches('/').to_string();
        Self {
            config,
            base_url,
            agent,
            connected: false,
        }
    }

    fn object_url(&self, hash: &Hash, suffix: &str) -> String {
        format!("{}/{}/{}.{}", self.base_url, hash.shard(), hash.rest(), suffix)
    }

    /// GET an object; `Ok(None)` on 404.
    fn get_object(&self, url: &str, operation: &str) -> Result<Option<ureq::Response>> {
        match self.agent.get(url).call() {
            Ok(response) => Ok(Some(response)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(RemoteError::protocol(
                operation,
                format!("unexpected status {code} for {url}"),
            )),
            Err(ureq::Error::Transport(t)) => {
                Err(RemoteError::unreachable(&self.base_url, t.to_string()))
            }
        }
    }

    fn put_object(&self, url: &str, operation: &str, bytes: &[u8]) -> Result<()> {
        match self.agent.put(url).send_bytes(bytes) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(RemoteError::protocol(
                operation,
                format!("unexpected status {code} for {url}"),
            )),
            Err(ureq::Error::Transport(t)) => {
                Err(RemoteError::unreachable(&self.base_url, t.to_string()))
            }
        }
    }

    /// Payload bytes for one expected file, compressed per the entry's
    /// mode. `Ok(None)` when a non-required file is absent.
    fn payload_bytes(entry: &CacheEntry, expected: &ExpectedFile) -> Result<Option<Vec<u8>>> {
        if !expected.path.exists() {
            if expected.required {
                return Err(CoreError::io(
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "required output file missing",
                    ),
                    &expected.path,
                    "stat",
                )
                .into());
            }
            return Ok(None);
        }
        if entry.compression_mode.is_compressed() {
            let file = fs::File::open(&expected.path)
                .map_err(|e| CoreError::io(e, &expected.path, "open"))?;
            Ok(Some(codec::compress_to_vec(file)?))
        } else {
            let bytes =
                fs::read(&expected.path).map_err(|e| CoreError::io(e, &expected.path, "read"))?;
            Ok(Some(bytes))
        }
    }
}

impl RemoteBackend for HttpBackend {
    fn connect(&mut self) -> Result<bool> {
        if self.connected {
            return Ok(true);
        }
        // A reachability probe, not a health check: any HTTP answer
        // (404 included) proves there is a server to talk to.
        match self.agent.get(&self.base_url).call() {
            Ok(_) | Err(ureq::Error::Status(_, _)) => {
                debug!(url = %self.base_url, "Connected to remote cache");
                self.connected = true;
                Ok(true)
            }
            Err(ureq::Error::Transport(t)) => {
                warn!(url = %self.base_url, error = %t, "Remote cache unreachable; continuing local-only");
                Ok(false)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn lookup(&self, hash: &Hash) -> Result<Option<CacheEntry>> {
        let url = self.object_url(hash, "meta");
        let response = retry_with_backoff(&self.config.retry, "lookup", || {
            self.get_object(&url, "lookup")
        })?;
        let Some(response) = response else {
            return Ok(None);
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_META_LEN + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| RemoteError::protocol("lookup", e.to_string()))?;
        if bytes.len() as u64 > MAX_META_LEN {
            return Err(CoreError::corrupt("remote metadata record too large").into());
        }
        Ok(Some(codec::decode_meta(&bytes)?))
    }

    fn add(&self, hash: &Hash, entry: &CacheEntry, expected_files: &[ExpectedFile]) -> Result<()> {
        let mut stored_ids = Vec::with_capacity(entry.file_ids.len());
        for id in &entry.file_ids {
            let expected = expected_files
                .iter()
                .find(|f| &f.id == id)
                .ok_or_else(|| RemoteError::protocol("add", format!("unexpected file id {id}")))?;
            let Some(bytes) = Self::payload_bytes(entry, expected)? else {
                continue;
            };
            let url = self.object_url(hash, id);
            retry_with_backoff(&self.config.retry, "add", || {
                self.put_object(&url, "add", &bytes)
            })?;
            stored_ids.push(id.clone());
        }

        // The record goes last and lists only what was uploaded.
        let stored = CacheEntry {
            file_ids: stored_ids,
            ..entry.clone()
        };
        let meta = codec::encode_meta(&stored);
        let url = self.object_url(hash, "meta");
        retry_with_backoff(&self.config.retry, "add", || {
            self.put_object(&url, "add", &meta)
        })
    }

    fn get_file(
        &self,
        hash: &Hash,
        file_id: &str,
        target_path: &Path,
        is_compressed: bool,
    ) -> Result<()> {
        let url = self.object_url(hash, file_id);
        let response = retry_with_backoff(&self.config.retry, "get_file", || {
            self.get_object(&url, "get_file")
        })?;
        let Some(response) = response else {
            // The metadata record declared this payload.
            return Err(CoreError::corrupt(format!("remote payload missing: {file_id}")).into());
        };

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::io(e, parent, "create_dir_all"))?;
        }
        let mut writer = fs::File::create(target_path)
            .map_err(|e| CoreError::io(e, target_path, "create"))?;
        let reader = response.into_reader();
        if is_compressed {
            let mut decoder = zstd_decoder(reader)?;
            std::io::copy(&mut decoder, &mut writer)
                .map_err(|e| CoreError::corrupt(format!("zstd stream for {file_id}: {e}")))?;
        } else {
            let mut reader = reader;
            std::io::copy(&mut reader, &mut writer)
                .map_err(|e| CoreError::io(e, target_path, "copy"))?;
        }
        Ok(())
    }
}

fn zstd_decoder<R: Read>(reader: R) -> Result<zstd::stream::read::Decoder<'static, std::io::BufReader<R>>> {
    zstd::stream::read::Decoder::new(reader)
        .map_err(|e| CoreError::corrupt(format!("zstd stream: {e}")).into())
}
