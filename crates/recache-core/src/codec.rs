//! On-disk cache entry codec
//!
//! The metadata record is a versioned little-endian binary layout:
//!
//! ```text
//! magic "RCAC" | version u32 | compression_mode u8 | return_code i32 |
//! stdout_len u64 | stdout | stderr_len u64 | stderr |
//! n_files u32 | (file_id_len u32 | file_id utf8)*
//! ```
//!
//! A reader that encounters a bad magic, an unknown version, a truncated
//! record or an oversized declared length treats the entry as corrupt;
//! corruption degrades to a cache miss, never to a huge allocation or a
//! wrong build.
//!
//! Payload files are stored next to the record, either verbatim or as
//! independent zstd streams; the helpers here stream through a fixed
//! buffer so memory stays bounded by the buffer, not the file.

use crate::entry::{CacheEntry, CompressionMode};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;

pub const META_MAGIC: [u8; 4] = *b"RCAC";
pub const META_VERSION: u32 = 1;

/// Upper bound for a captured stream declared in a metadata record.
/// Corrupted length prefixes must not be able to request enormous
/// allocations.
pub const MAX_STREAM_LEN: u64 = 64 * 1024 * 1024;
/// Upper bound for a declared file id length.
pub const MAX_FILE_ID_LEN: u32 = 4096;
/// Upper bound for the declared file count.
pub const MAX_FILE_COUNT: u32 = 4096;

/// zstd level used for payload files; matches the level used for
/// remote transfers.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Serialize an entry's metadata record.
pub fn encode_meta(entry: &CacheEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        4 + 4 + 1 + 4 + 8 + entry.stdout.len() + 8 + entry.stderr.len() + 4,
    );
    out.extend_from_slice(&META_MAGIC);
    out.extend_from_slice(&META_VERSION.to_le_bytes());
    out.push(entry.compression_mode.to_byte());
    out.extend_from_slice(&entry.return_code.to_le_bytes());
    out.extend_from_slice(&(entry.stdout.len() as u64).to_le_bytes());
    out.extend_from_slice(&entry.stdout);
    out.extend_from_slice(&(entry.stderr.len() as u64).to_le_bytes());
    out.extend_from_slice(&entry.stderr);
    out.extend_from_slice(&(entry.file_ids.len() as u32).to_le_bytes());
    for id in &entry.file_ids {
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    out
}

/// Parse a metadata record. Any malformation is a [`Error::CorruptEntry`].
pub fn decode_meta(bytes: &[u8]) -> Result<CacheEntry> {
    let mut reader = ByteReader::new(bytes);

    let magic = reader.take(4)?;
    if magic != META_MAGIC {
        return Err(Error::corrupt("bad magic"));
    }
    let version = reader.read_u32()?;
    if version != META_VERSION {
        return Err(Error::corrupt(format!("unknown version {version}")));
    }
    let compression_mode = CompressionMode::from_byte(reader.read_u8()?)
        .ok_or_else(|| Error::corrupt("invalid compression mode"))?;
    let return_code = reader.read_i32()?;

    let stdout_len = reader.read_u64()?;
    if stdout_len > MAX_STREAM_LEN {
        return Err(Error::corrupt("stdout length exceeds limit"));
    }
    let stdout = reader.take(stdout_len as usize)?.to_vec();

    let stderr_len = reader.read_u64()?;
    if stderr_len > MAX_STREAM_LEN {
        return Err(Error::corrupt("stderr length exceeds limit"));
    }
    let stderr = reader.take(stderr_len as usize)?.to_vec();

    let n_files = reader.read_u32()?;
    if n_files > MAX_FILE_COUNT {
        return Err(Error::corrupt("file count exceeds limit"));
    }
    let mut file_ids = Vec::with_capacity(n_files as usize);
    for _ in 0..n_files {
        let id_len = reader.read_u32()?;
        if id_len > MAX_FILE_ID_LEN {
            return Err(Error::corrupt("file id length exceeds limit"));
        }
        let id = std::str::from_utf8(reader.take(id_len as usize)?)
            .map_err(|_| Error::corrupt("file id is not valid UTF-8"))?;
        file_ids.push(id.to_string());
    }

    if !reader.is_empty() {
        return Err(Error::corrupt("trailing bytes after record"));
    }

    Ok(CacheEntry {
        file_ids,
        compression_mode,
        stdout,
        stderr,
        return_code,
    })
}

/// Copy a file verbatim through a fixed-size buffer.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let mut reader = fs::File::open(src).map_err(|e| Error::io(e, src, "open"))?;
    let mut writer = fs::File::create(dst).map_err(|e| Error::io(e, dst, "create"))?;
    io::copy(&mut reader, &mut writer).map_err(|e| Error::io(e, dst, "copy"))
}

/// Compress `src` into a standalone zstd stream at `dst`.
pub fn compress_file(src: &Path, dst: &Path) -> Result<()> {
    let mut reader = fs::File::open(src).map_err(|e| Error::io(e, src, "open"))?;
    let writer = fs::File::create(dst).map_err(|e| Error::io(e, dst, "create"))?;
    let mut encoder = zstd::Encoder::new(writer, COMPRESSION_LEVEL)
        .map_err(|e| Error::io(e, dst, "compress"))?;
    io::copy(&mut reader, &mut encoder).map_err(|e| Error::io(e, dst, "compress"))?;
    encoder
        .finish()
        .map_err(|e| Error::io(e, dst, "compress"))?;
    Ok(())
}

/// Decompress the zstd stream at `src` into `dst`.
///
/// A malformed stream is reported as a corrupt entry, not an I/O error,
/// so the caller can treat it as a miss and drop the entry.
pub fn decompress_file(src: &Path, dst: &Path) -> Result<()> {
    let reader = fs::File::open(src).map_err(|e| Error::io(e, src, "open"))?;
    let mut decoder = zstd::Decoder::new(reader)
        .map_err(|e| Error::corrupt(format!("zstd stream at {}: {e}", src.display())))?;
    let mut writer = fs::File::create(dst).map_err(|e| Error::io(e, dst, "create"))?;
    match io::copy(&mut decoder, &mut writer) {
        Ok(_) => Ok(()),
        Err(e) => Err(Error::corrupt(format!(
            "zstd stream at {}: {e}",
            src.display()
        ))),
    }
}

/// Compress a reader into an in-memory zstd stream (used for remote
/// uploads, which are size-admitted before this point).
pub fn compress_to_vec(reader: impl io::Read) -> Result<Vec<u8>> {
    zstd::stream::encode_all(reader, COMPRESSION_LEVEL)
        .map_err(|e| Error::io_no_path(e, "compress"))
}

/// Decompress an in-memory zstd stream.
pub fn decompress_to_vec(bytes: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(bytes).map_err(|e| Error::corrupt(format!("zstd stream: {e}")))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::corrupt("truncated record"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> CacheEntry {
        CacheEntry::new(
            vec!["object".to_string(), "depfile".to_string()],
            CompressionMode::All,
            b"compiled ok\n".to_vec(),
            b"warning: unused variable\n".to_vec(),
            0,
        )
    }

    #[test]
    fn meta_round_trip() {
        let entry = sample_entry();
        let decoded = decode_meta(&encode_meta(&entry)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn meta_round_trip_empty_entry() {
        let entry = CacheEntry::new(Vec::new(), CompressionMode::None, Vec::new(), Vec::new(), 0);
        assert_eq!(decode_meta(&encode_meta(&entry)).unwrap(), entry);
    }

    #[test]
    fn meta_layout_is_little_endian() {
        let entry = CacheEntry::new(Vec::new(), CompressionMode::None, Vec::new(), Vec::new(), 3);
        let bytes = encode_meta(&entry);
        assert_eq!(&bytes[..4], b"RCAC");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(bytes[8], 0);
        assert_eq!(&bytes[9..13], &3i32.to_le_bytes());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = encode_meta(&sample_entry());
        bytes[0] = b'X';
        assert!(matches!(
            decode_meta(&bytes),
            Err(Error::CorruptEntry { .. })
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut bytes = encode_meta(&sample_entry());
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode_meta(&bytes),
            Err(Error::CorruptEntry { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncation() {
        let bytes = encode_meta(&sample_entry());
        for len in [0, 3, 8, 12, bytes.len() - 1] {
            assert!(
                matches!(decode_meta(&bytes[..len]), Err(Error::CorruptEntry { .. })),
                "truncation at {len} not detected"
            );
        }
    }

    #[test]
    fn decode_rejects_oversized_stream_length() {
        let entry = CacheEntry::new(Vec::new(), CompressionMode::None, Vec::new(), Vec::new(), 0);
        let mut bytes = encode_meta(&entry);
        // Stamp a stdout length far beyond the record without providing bytes.
        bytes[13..21].copy_from_slice(&(MAX_STREAM_LEN + 1).to_le_bytes());
        assert!(matches!(
            decode_meta(&bytes),
            Err(Error::CorruptEntry { .. })
        ));
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        let mut bytes = encode_meta(&sample_entry());
        bytes.push(0);
        assert!(matches!(
            decode_meta(&bytes),
            Err(Error::CorruptEntry { .. })
        ));
    }

    #[test]
    fn compress_decompress_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let packed = dir.path().join("src.zst");
        let restored = dir.path().join("restored.bin");

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&src, &payload).unwrap();

        compress_file(&src, &packed).unwrap();
        assert!(fs::metadata(&packed).unwrap().len() < payload.len() as u64);
        decompress_file(&packed, &restored).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), payload);
    }

    #[test]
    fn decompress_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("garbage.zst");
        fs::write(&src, b"definitely not zstd").unwrap();
        let err = decompress_file(&src, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::CorruptEntry { .. }));
    }

    #[test]
    fn vec_round_trip() {
        let payload = vec![0xABu8; 4096];
        let packed = compress_to_vec(&payload[..]).unwrap();
        assert_eq!(decompress_to_vec(&packed).unwrap(), payload);
    }
}
