//! VPK directory (manifest) model and its on-disk format
//!
//! The directory file indexes every archived entry: a fixed header, then a
//! tree keyed by extension, directory path and file name (grouping same-type
//! assets for sequential scans), with one leaf per entry holding its CRC,
//! chunk descriptors and inline preload bytes. All integers little-endian,
//! strings NUL-terminated UTF-8.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::codec::CompressionMethod;
use crate::error::{Error, FormatError, Result};
use crate::naming::VpkPair;

/// Directory file signature.
pub const DIR_MAGIC: u32 = 0x55AA1234;
pub const DIR_MAJOR_VERSION: u16 = 2;
pub const DIR_MINOR_VERSION: u16 = 3;

/// Closes a leaf's chunk-record list; doubles as the "no block" index.
pub const ENTRY_TERMINATOR: u16 = 0xFFFF;

/// Upper bound on pack blocks, imposed by the three-digit block naming.
pub const MAX_PACK_BLOCKS: u16 = 1000;

/// Default load hints serialized with each chunk record.
pub const LOAD_VISIBLE: u32 = 1 << 0;
pub const LOAD_CACHE: u32 = 1 << 8;
pub const TEXTURE_DEFAULT: u16 = 1 << 3;

/// One physically contiguous, independently compressed unit of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub pack_block_index: u16,
    pub load_flags: u32,
    pub texture_flags: u16,
    pub offset_in_block: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl ChunkDescriptor {
    /// Raw chunks are exactly as large as their payload; anything smaller
    /// is compressed. The builder never stores a grown chunk, so the two
    /// sizes fully determine the method.
    pub fn method(&self) -> CompressionMethod {
        if self.compressed_size == self.uncompressed_size {
            CompressionMethod::None
        } else {
            CompressionMethod::Compressed
        }
    }
}

/// One logical file in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpkEntry {
    /// Archive-relative path: forward slashes, lowercase, no drive letters.
    pub path: String,
    /// CRC32 of the full uncompressed file contents.
    pub crc32: u32,
    /// Prefix of the file stored inline in the directory.
    pub preload: Vec<u8>,
    /// In file-offset order; preload ++ decompressed chunks == file bytes.
    pub chunks: Vec<ChunkDescriptor>,
}

impl VpkEntry {
    /// Total uncompressed size of the file.
    pub fn uncompressed_len(&self) -> u64 {
        self.preload.len() as u64
            + self
                .chunks
                .iter()
                .map(|c| c.uncompressed_size as u64)
                .sum::<u64>()
    }

    /// Bytes this entry occupies on disk (preload + stored chunk bytes).
    pub fn stored_len(&self) -> u64 {
        self.preload.len() as u64
            + self
                .chunks
                .iter()
                .map(|c| c.compressed_size as u64)
                .sum::<u64>()
    }
}

/// In-memory directory: header metadata plus every entry.
///
/// Built fresh in enumeration order while packing, or parsed from an
/// existing directory file for unpacking. Never mutated concurrently; all
/// mutation happens on the calling thread.
#[derive(Debug)]
pub struct VpkDirectory {
    pub pair: VpkPair,
    pub block_count: u16,
    entries: Vec<VpkEntry>,
    by_path: HashMap<String, usize>,
}

impl VpkDirectory {
    pub fn new(pair: VpkPair) -> Self {
        VpkDirectory {
            pair,
            block_count: 0,
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn entries(&self) -> &[VpkEntry] {
        &self.entries
    }

    pub fn find_entry(&self, path: &str) -> Option<&VpkEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Append an entry; the path must be unique within the directory.
    pub fn push_entry(&mut self, entry: VpkEntry) -> Result<()> {
        if self.by_path.contains_key(&entry.path) {
            return Err(Error::DuplicateEntry(entry.path));
        }
        self.by_path.insert(entry.path.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Replace an entry with the same path in place, or append a new one.
    /// Used when layering a patch over a base directory.
    pub fn upsert_entry(&mut self, entry: VpkEntry) {
        match self.by_path.get(&entry.path) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.by_path.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Serialize the directory to its on-disk byte layout.
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        // Group entries extension -> directory -> (stem, entry); extensions
        // and directories sort, file names keep entry order.
        let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<(&str, &VpkEntry)>>> = BTreeMap::new();
        for entry in &self.entries {
            let (ext, dir, stem) = split_path(&entry.path);
            grouped
                .entry(ext)
                .or_default()
                .entry(dir)
                .or_default()
                .push((stem, entry));
        }

        let mut tree = Vec::new();
        for (ext, dirs) in &grouped {
            write_cstr(&mut tree, ext)?;
            for (dir, files) in dirs {
                write_cstr(&mut tree, dir)?;
                for (stem, entry) in files {
                    write_cstr(&mut tree, stem)?;
                    write_leaf(&mut tree, entry)?;
                }
                write_cstr(&mut tree, "")?;
            }
            write_cstr(&mut tree, "")?;
        }
        write_cstr(&mut tree, "")?;

        let tree_size = u32::try_from(tree.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "directory tree exceeds the u32 size field",
            )
        })?;

        let mut out = Vec::with_capacity(tree.len() + 64);
        out.write_u32::<LittleEndian>(DIR_MAGIC)?;
        out.write_u16::<LittleEndian>(DIR_MAJOR_VERSION)?;
        out.write_u16::<LittleEndian>(DIR_MINOR_VERSION)?;
        out.write_u32::<LittleEndian>(tree_size)?;
        write_cstr(&mut out, &self.pair.locale)?;
        write_cstr(&mut out, &self.pair.context)?;
        write_cstr(&mut out, &self.pair.level_name)?;
        out.write_u16::<LittleEndian>(self.block_count)?;
        out.extend_from_slice(&tree);
        Ok(out)
    }

    /// Parse a directory file, rejecting any structural damage.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, FormatError> {
        let mut reader = ByteReader::new(bytes);

        let magic = reader.read_u32("magic")?;
        if magic != DIR_MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let major = reader.read_u16("major version")?;
        let minor = reader.read_u16("minor version")?;
        if major != DIR_MAJOR_VERSION || minor != DIR_MINOR_VERSION {
            return Err(FormatError::UnsupportedVersion(major, minor));
        }
        let tree_size = reader.read_u32("tree size")? as usize;
        let locale = reader.read_cstr("locale")?;
        let context = reader.read_cstr("context")?;
        let level_name = reader.read_cstr("level name")?;
        let block_count = reader.read_u16("pack block count")?;

        if reader.remaining() < tree_size {
            return Err(FormatError::Truncated("directory tree"));
        }
        if reader.remaining() > tree_size {
            return Err(FormatError::TrailingData(reader.remaining() - tree_size));
        }

        let mut dir = VpkDirectory::new(VpkPair {
            locale,
            context,
            level_name,
        });
        dir.block_count = block_count;

        loop {
            if reader.remaining() == 0 {
                return Err(FormatError::MissingTerminator("extension list"));
            }
            let ext = reader.read_cstr("extension")?;
            if ext.is_empty() {
                break;
            }
            loop {
                if reader.remaining() == 0 {
                    return Err(FormatError::MissingTerminator("directory list"));
                }
                let path = reader.read_cstr("directory path")?;
                if path.is_empty() {
                    break;
                }
                loop {
                    if reader.remaining() == 0 {
                        return Err(FormatError::MissingTerminator("file name list"));
                    }
                    let stem = reader.read_cstr("file name")?;
                    if stem.is_empty() {
                        break;
                    }
                    let full_path = join_path(&ext, &path, &stem);
                    let entry = read_leaf(&mut reader, &full_path, block_count)?;
                    if dir.push_entry(entry).is_err() {
                        return Err(FormatError::InvalidEntry {
                            path: full_path,
                            reason: "duplicate path".to_string(),
                        });
                    }
                }
            }
        }

        if reader.remaining() != 0 {
            return Err(FormatError::TrailingData(reader.remaining()));
        }
        Ok(dir)
    }
}

/// Split an archive path into the (extension, directory, stem) triple the
/// tree is keyed by. Levels with no natural value use the `" "` sentinel.
fn split_path(path: &str) -> (&str, &str, &str) {
    let (dir, file) = match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (" ", path),
    };
    // Only a dot past the first character starts an extension, so dotfiles
    // keep their whole name as the stem.
    match file.rfind('.') {
        Some(i) if i > 0 => (&file[i + 1..], dir, &file[..i]),
        _ => (" ", dir, file),
    }
}

/// Reassemble an archive path from its tree keys.
fn join_path(ext: &str, dir: &str, stem: &str) -> String {
    let base = if ext == " " {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    };
    if dir == " " {
        base
    } else {
        format!("{}/{}", dir, base)
    }
}

fn write_cstr(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    out.write_all(s.as_bytes())?;
    out.write_u8(0)?;
    Ok(())
}

fn write_leaf(out: &mut Vec<u8>, entry: &VpkEntry) -> io::Result<()> {
    out.write_u32::<LittleEndian>(entry.crc32)?;
    out.write_u16::<LittleEndian>(entry.preload.len() as u16)?;
    for chunk in &entry.chunks {
        out.write_u16::<LittleEndian>(chunk.pack_block_index)?;
        out.write_u32::<LittleEndian>(chunk.load_flags)?;
        out.write_u16::<LittleEndian>(chunk.texture_flags)?;
        out.write_u64::<LittleEndian>(chunk.offset_in_block)?;
        out.write_u32::<LittleEndian>(chunk.compressed_size)?;
        out.write_u32::<LittleEndian>(chunk.uncompressed_size)?;
    }
    out.write_u16::<LittleEndian>(ENTRY_TERMINATOR)?;
    out.write_all(&entry.preload)?;
    Ok(())
}

fn read_leaf(
    reader: &mut ByteReader<'_>,
    path: &str,
    block_count: u16,
) -> std::result::Result<VpkEntry, FormatError> {
    let crc32 = reader.read_u32("entry crc32")?;
    let preload_len = reader.read_u16("preload length")? as usize;

    let mut chunks = Vec::new();
    loop {
        if reader.remaining() == 0 {
            return Err(FormatError::MissingTerminator("entry chunk records"));
        }
        let index = reader.read_u16("chunk block index")?;
        if index == ENTRY_TERMINATOR {
            break;
        }
        let load_flags = reader.read_u32("chunk load flags")?;
        let texture_flags = reader.read_u16("chunk texture flags")?;
        let offset_in_block = reader.read_u64("chunk offset")?;
        let compressed_size = reader.read_u32("chunk compressed size")?;
        let uncompressed_size = reader.read_u32("chunk uncompressed size")?;

        if index >= block_count {
            return Err(FormatError::InvalidEntry {
                path: path.to_string(),
                reason: format!("block index {} out of range ({})", index, block_count),
            });
        }
        if compressed_size == 0 || uncompressed_size == 0 {
            return Err(FormatError::InvalidEntry {
                path: path.to_string(),
                reason: "zero-size chunk".to_string(),
            });
        }
        if compressed_size > uncompressed_size {
            return Err(FormatError::InvalidEntry {
                path: path.to_string(),
                reason: format!(
                    "chunk grew under compression ({} > {})",
                    compressed_size, uncompressed_size
                ),
            });
        }

        chunks.push(ChunkDescriptor {
            pack_block_index: index,
            load_flags,
            texture_flags,
            offset_in_block,
            compressed_size,
            uncompressed_size,
        });
    }

    let preload = reader.take(preload_len, "preload bytes")?.to_vec();
    Ok(VpkEntry {
        path: path.to_string(),
        crc32,
        preload,
        chunks,
    })
}

/// Bounds-checked little-endian reader over the directory bytes.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(
        &mut self,
        n: usize,
        what: &'static str,
    ) -> std::result::Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::Truncated(what));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self, what: &'static str) -> std::result::Result<u16, FormatError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, what: &'static str) -> std::result::Result<u32, FormatError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self, what: &'static str) -> std::result::Result<u64, FormatError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_cstr(&mut self, what: &'static str) -> std::result::Result<String, FormatError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::Truncated(what))?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| FormatError::MalformedString)?;
        self.pos += nul + 1;
        Ok(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pair() -> VpkPair {
        VpkPair::new("english", "server", "mp_test")
    }

    fn chunk(index: u16, offset: u64, csize: u32, usize_: u32) -> ChunkDescriptor {
        ChunkDescriptor {
            pack_block_index: index,
            load_flags: LOAD_VISIBLE | LOAD_CACHE,
            texture_flags: TEXTURE_DEFAULT,
            offset_in_block: offset,
            compressed_size: csize,
            uncompressed_size: usize_,
        }
    }

    fn sample_directory() -> VpkDirectory {
        let mut dir = VpkDirectory::new(sample_pair());
        dir.block_count = 2;
        dir.push_entry(VpkEntry {
            path: "scripts/weapons/smg.txt".to_string(),
            crc32: 0xDEADBEEF,
            preload: b"preload!".to_vec(),
            chunks: vec![chunk(0, 0, 100, 400), chunk(1, 0, 50, 200)],
        })
        .unwrap();
        dir.push_entry(VpkEntry {
            path: "scripts/aimap.txt".to_string(),
            crc32: 1,
            preload: Vec::new(),
            chunks: vec![chunk(0, 100, 300, 300)],
        })
        .unwrap();
        dir.push_entry(VpkEntry {
            path: "rootfile".to_string(),
            crc32: 2,
            preload: b"tiny".to_vec(),
            chunks: Vec::new(),
        })
        .unwrap();
        dir
    }

    #[test]
    fn test_split_and_join_path() {
        assert_eq!(split_path("a/b/c.txt"), ("txt", "a/b", "c"));
        assert_eq!(split_path("c.txt"), ("txt", " ", "c"));
        assert_eq!(split_path("noext"), (" ", " ", "noext"));
        assert_eq!(split_path("dir/.hidden"), (" ", "dir", ".hidden"));
        for path in ["a/b/c.txt", "c.txt", "noext", "dir/.hidden"] {
            let (ext, dir, stem) = split_path(path);
            assert_eq!(join_path(ext, dir, stem), path);
        }
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let dir = sample_directory();
        let bytes = dir.serialize().unwrap();
        let parsed = VpkDirectory::parse(&bytes).unwrap();

        assert_eq!(parsed.pair, dir.pair);
        assert_eq!(parsed.block_count, 2);
        assert_eq!(parsed.entries().len(), 3);
        for entry in dir.entries() {
            assert_eq!(parsed.find_entry(&entry.path), Some(entry));
        }
    }

    #[test]
    fn test_zero_chunk_entry_round_trips() {
        let mut dir = VpkDirectory::new(sample_pair());
        dir.push_entry(VpkEntry {
            path: "empty.bin".to_string(),
            crc32: 0,
            preload: Vec::new(),
            chunks: Vec::new(),
        })
        .unwrap();
        let parsed = VpkDirectory::parse(&dir.serialize().unwrap()).unwrap();
        let entry = parsed.find_entry("empty.bin").unwrap();
        assert!(entry.chunks.is_empty());
        assert!(entry.preload.is_empty());
        assert_eq!(entry.uncompressed_len(), 0);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = sample_directory().serialize().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            VpkDirectory::parse(&bytes),
            Err(FormatError::BadMagic(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut bytes = sample_directory().serialize().unwrap();
        bytes[4] = 99;
        assert!(matches!(
            VpkDirectory::parse(&bytes),
            Err(FormatError::UnsupportedVersion(99, DIR_MINOR_VERSION))
        ));
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let bytes = sample_directory().serialize().unwrap();
        for len in [3, 10, bytes.len() / 2, bytes.len() - 1] {
            let result = VpkDirectory::parse(&bytes[..len]);
            assert!(result.is_err(), "accepted truncation to {} bytes", len);
        }
    }

    #[test]
    fn test_parse_rejects_trailing_data() {
        let mut bytes = sample_directory().serialize().unwrap();
        bytes.extend_from_slice(b"junk");
        assert!(matches!(
            VpkDirectory::parse(&bytes),
            Err(FormatError::TrailingData(4))
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range_block_index() {
        let mut dir = VpkDirectory::new(sample_pair());
        dir.block_count = 1;
        dir.push_entry(VpkEntry {
            path: "f.bin".to_string(),
            crc32: 0,
            preload: Vec::new(),
            chunks: vec![chunk(5, 0, 10, 10)],
        })
        .unwrap();
        assert!(matches!(
            VpkDirectory::parse(&dir.serialize().unwrap()),
            Err(FormatError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_push_entry_rejects_duplicates() {
        let mut dir = VpkDirectory::new(sample_pair());
        let entry = VpkEntry {
            path: "dup.txt".to_string(),
            crc32: 0,
            preload: Vec::new(),
            chunks: Vec::new(),
        };
        dir.push_entry(entry.clone()).unwrap();
        assert!(matches!(
            dir.push_entry(entry),
            Err(Error::DuplicateEntry(_))
        ));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut dir = sample_directory();
        let original_pos = dir
            .entries()
            .iter()
            .position(|e| e.path == "scripts/aimap.txt")
            .unwrap();
        dir.upsert_entry(VpkEntry {
            path: "scripts/aimap.txt".to_string(),
            crc32: 42,
            preload: Vec::new(),
            chunks: Vec::new(),
        });
        assert_eq!(dir.entries().len(), 3);
        assert_eq!(dir.entries()[original_pos].crc32, 42);
    }

    #[test]
    fn test_chunk_method_derivation() {
        assert_eq!(chunk(0, 0, 100, 100).method(), CompressionMethod::None);
        assert_eq!(chunk(0, 0, 50, 100).method(), CompressionMethod::Compressed);
    }
}
