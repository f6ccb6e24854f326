//! Direct-mode manifests
//!
//! A manifest records, for one direct hash (raw source + flags), the
//! implicit input files observed on a previous successful run together
//! with their content hashes, plus the preprocessor hash that run
//! produced. When every implicit input still hashes to its recorded
//! value, the recorded preprocessor hash can be used for a regular
//! lookup without running the preprocessor.

use crate::error::Result;
use recache_core::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Serialized as JSON under `direct/<shard>/<rest-of-direct-hash>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectManifest {
    /// Preprocessor-mode hash produced by the recorded run.
    pub hash: String,
    /// Implicit input path mapped to its content hash at run time.
    pub files: BTreeMap<String, String>,
}

impl DirectManifest {
    pub fn new(preprocessor_hash: &Hash, files: BTreeMap<String, String>) -> Self {
        Self {
            hash: preprocessor_hash.to_hex(),
            files,
        }
    }

    /// Build a manifest by hashing the given implicit input files now.
    pub fn from_inputs(preprocessor_hash: &Hash, inputs: &[impl AsRef<Path>]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for input in inputs {
            let path = input.as_ref();
            let digest = Hasher::hash_file(path).map_err(crate::error::Error::from)?;
            files.insert(path.to_string_lossy().into_owned(), digest.to_hex());
        }
        Ok(Self::new(preprocessor_hash, files))
    }

    /// The recorded preprocessor hash.
    pub fn preprocessor_hash(&self) -> Result<Hash> {
        Ok(Hash::from_hex(&self.hash).map_err(crate::error::Error::from)?)
    }

    /// A manifest matches iff every listed implicit file still hashes
    /// to the recorded value. A file that disappeared or cannot be read
    /// is a mismatch, not an error.
    pub fn matches_current_inputs(&self) -> bool {
        self.files.iter().all(|(path, recorded)| {
            match Hasher::hash_file(Path::new(path)) {
                Ok(current) => current.to_hex() == *recorded,
                Err(_) => false,
            }
        })
    }
}
