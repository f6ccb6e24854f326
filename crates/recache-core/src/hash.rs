//! Invocation fingerprinting
//!
//! Every cache key is a SHA-256 digest over the inputs that determine a
//! tool invocation's outputs. The [`Hasher`] accumulator does not know
//! what semantic pieces are fed to it; ordering and delimiting are the
//! caller's responsibility.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Width of a digest in bytes.
pub const HASH_LEN: usize = 32;

/// A content digest identifying one cache entry.
///
/// The canonical string form is lowercase hex; it doubles as the
/// filesystem key (first two characters select the shard).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap a raw digest.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the canonical lowercase-hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHash {
            input: s.to_string(),
        })?;
        let bytes: [u8; HASH_LEN] = bytes.try_into().map_err(|_| Error::InvalidHash {
            input: s.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// The canonical lowercase-hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// The shard prefix (first two hex characters).
    pub fn shard(&self) -> String {
        self.to_hex()[..2].to_string()
    }

    /// The remainder of the hex form after the shard prefix; names the
    /// entry inside the shard directory.
    pub fn rest(&self) -> String {
        self.to_hex()[2..].to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Streaming fingerprint accumulator.
///
/// `absorb` is associative over chunk boundaries: feeding one buffer or
/// the same bytes split across calls produces the same digest. Callers
/// that absorb multiple logical fields must add their own separators;
/// [`Hasher::absorb_map`] does this for key/value pairs.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Absorb a chunk of bytes into the running input.
    pub fn absorb(&mut self, bytes: impl AsRef<[u8]>) {
        self.inner.update(bytes.as_ref());
    }

    /// Absorb a string field followed by a separator byte, so that
    /// adjacent fields cannot run into each other.
    pub fn absorb_str(&mut self, s: &str) {
        self.inner.update(s.as_bytes());
        self.inner.update([0u8]);
    }

    /// Absorb a map as sorted, delimited `key=value` pairs.
    pub fn absorb_map(&mut self, map: &BTreeMap<String, String>) {
        for (key, value) in map {
            self.inner.update(key.as_bytes());
            self.inner.update([b'=']);
            self.inner.update(value.as_bytes());
            self.inner.update([0u8]);
        }
    }

    /// Absorb a file's entire contents, streamed in fixed-size chunks.
    pub fn absorb_file(&mut self, path: &Path) -> Result<()> {
        let mut file =
            fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::io(e, path, "read"))?;
            if n == 0 {
                break;
            }
            self.inner.update(&buf[..n]);
        }
        Ok(())
    }

    /// Finish the accumulation and produce the digest.
    pub fn finalize(self) -> Hash {
        Hash(self.inner.finalize().into())
    }

    /// Digest of a byte slice.
    pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> Hash {
        let mut hasher = Self::new();
        hasher.absorb(bytes);
        hasher.finalize()
    }

    /// Digest of a file's contents.
    pub fn hash_file(path: &Path) -> Result<Hash> {
        let mut hasher = Self::new();
        hasher.absorb_file(path)?;
        Ok(hasher.finalize())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
