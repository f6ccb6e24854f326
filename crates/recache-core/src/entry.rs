//! Cache entry data model

use std::path::{Path, PathBuf};

/// Compression applied to the payload files of a cache entry.
///
/// With [`CompressionMode::All`], every payload file on disk is an
/// independently decompressible zstd stream. Captured stdout/stderr are
/// stored verbatim in the metadata record regardless of this mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMode {
    None,
    All,
}

impl CompressionMode {
    pub fn is_compressed(self) -> bool {
        matches!(self, CompressionMode::All)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            CompressionMode::None => 0,
            CompressionMode::All => 1,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CompressionMode::None),
            1 => Some(CompressionMode::All),
            _ => None,
        }
    }
}

/// A declared output of the wrapped tool.
///
/// `id` is the stable logical name (e.g. `"object"`, `"depfile"`) under
/// which the file is stored; `path` is where the tool writes it and where
/// a cache hit materializes it. Absence of a non-required file is
/// tolerated at insert time; absence of a required file is an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedFile {
    pub id: String,
    pub path: PathBuf,
    pub required: bool,
}

impl ExpectedFile {
    pub fn required(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
            required: true,
        }
    }

    pub fn optional(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
            required: false,
        }
    }
}

/// An immutable cached invocation result.
///
/// Holds the observable effects of one successful tool run: the set of
/// produced file ids (the bytes live next to the metadata record), the
/// captured standard streams and the exit code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub file_ids: Vec<String>,
    pub compression_mode: CompressionMode,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub return_code: i32,
}

impl CacheEntry {
    pub fn new(
        file_ids: Vec<String>,
        compression_mode: CompressionMode,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        return_code: i32,
    ) -> Self {
        Self {
            file_ids,
            compression_mode,
            stdout,
            stderr,
            return_code,
        }
    }

    /// The same entry with a different payload compression mode. Used
    /// when moving entries between tiers (remote inserts are always
    /// compressed; promotion re-encodes per the local policy).
    pub fn with_compression(&self, mode: CompressionMode) -> Self {
        Self {
            file_ids: self.file_ids.clone(),
            compression_mode: mode,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            return_code: self.return_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_mode_byte_round_trip() {
        for mode in [CompressionMode::None, CompressionMode::All] {
            assert_eq!(CompressionMode::from_byte(mode.to_byte()), Some(mode));
        }
        assert_eq!(CompressionMode::from_byte(7), None);
    }

    #[test]
    fn with_compression_changes_only_the_mode() {
        let entry = CacheEntry::new(
            vec!["object".to_string()],
            CompressionMode::None,
            b"out".to_vec(),
            b"err".to_vec(),
            0,
        );
        let compressed = entry.with_compression(CompressionMode::All);
        assert_eq!(compressed.compression_mode, CompressionMode::All);
        assert_eq!(compressed.file_ids, entry.file_ids);
        assert_eq!(compressed.stdout, entry.stdout);
        assert_eq!(compressed.stderr, entry.stderr);
        assert_eq!(compressed.return_code, entry.return_code);
    }

    #[test]
    fn expected_file_constructors() {
        let req = ExpectedFile::required("object", "/tmp/out.o");
        assert!(req.required);
        assert_eq!(req.id, "object");
        let opt = ExpectedFile::optional("depfile", "/tmp/out.d");
        assert!(!opt.required);
    }
}
