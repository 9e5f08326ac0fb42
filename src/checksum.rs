//! CRC32 integrity checksums
//!
//! Every archived entry stores the CRC32 of its full uncompressed contents;
//! unpack recomputes it over the reassembled bytes before writing the file.

/// Compute the CRC32 of a byte buffer. Never fails, including for empty input.
pub fn crc32(buf: &[u8]) -> u32 {
    crc32fast::hash(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_known_value() {
        // IEEE CRC32 check value for "123456789"
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_crc32_differs_on_flip() {
        let mut data = vec![0u8; 64];
        let base = crc32(&data);
        data[10] ^= 0x01;
        assert_ne!(crc32(&data), base);
    }
}
