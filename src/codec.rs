//! Chunk compression codec
//!
//! Thin adapter over zstd block (de)compression. Chunks are compressed
//! independently so they can be loaded and decompressed in isolation; the
//! effort-level vocabulary is the archive's, the mapping onto zstd levels
//! is private to this module.

use crate::error::CodecError;

/// Compression effort, trading wall-clock time for ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    Faster,
    #[default]
    Default,
    Better,
    Uber,
}

impl CompressionLevel {
    /// Map the archive-level vocabulary onto zstd effort.
    fn zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Faster => 3,
            CompressionLevel::Default => 9,
            CompressionLevel::Better => 15,
            CompressionLevel::Uber => 19,
        }
    }
}

/// How a chunk's bytes are stored in its pack block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Raw bytes, no compression (used when compression would not shrink).
    None,
    /// zstd-compressed bytes.
    Compressed,
}

/// Compress a buffer at the given effort level.
///
/// Safe to call concurrently from multiple threads with independent buffers.
pub fn compress(buf: &[u8], level: CompressionLevel) -> Result<Vec<u8>, CodecError> {
    zstd::bulk::compress(buf, level.zstd_level())
        .map_err(|e| CodecError::Corrupt(format!("zstd compress: {}", e)))
}

/// Decompress a buffer, verifying it expands to exactly `expected_len` bytes.
pub fn decompress(buf: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    let out = zstd::bulk::decompress(buf, expected_len)
        .map_err(|e| CodecError::Corrupt(format!("zstd decompress: {}", e)))?;

    if out.len() != expected_len {
        return Err(CodecError::Corrupt(format!(
            "decompressed to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data, CompressionLevel::Default).unwrap();
        assert!(compressed.len() < data.len());
        let restored = decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_round_trip_all_levels() {
        let data = b"abcdefgh".repeat(512);
        for level in [
            CompressionLevel::Fastest,
            CompressionLevel::Faster,
            CompressionLevel::Default,
            CompressionLevel::Better,
            CompressionLevel::Uber,
        ] {
            let compressed = compress(&data, level).unwrap();
            assert_eq!(decompress(&compressed, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let garbage = vec![0xA5u8; 128];
        assert!(decompress(&garbage, 1024).is_err());
    }

    #[test]
    fn test_decompress_wrong_expected_len_fails() {
        let data = b"hello world, hello world, hello world".to_vec();
        let compressed = compress(&data, CompressionLevel::Faster).unwrap();
        assert!(decompress(&compressed, data.len() + 1).is_err());
    }
}
