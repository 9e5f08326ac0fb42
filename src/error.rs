//! Error types for revpk

use std::path::PathBuf;
use thiserror::Error;

/// Structural problems found while parsing a directory file. Always fatal:
/// nothing can be extracted from a directory that does not parse.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("directory file truncated while reading {0}")]
    Truncated(&'static str),

    #[error("bad directory magic: 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported directory version: {0}.{1}")]
    UnsupportedVersion(u16, u16),

    #[error("missing terminator for {0}")]
    MissingTerminator(&'static str),

    #[error("{0} trailing bytes after directory tree")]
    TrailingData(usize),

    #[error("malformed string in directory tree")]
    MalformedString,

    #[error("invalid entry '{path}': {reason}")]
    InvalidEntry { path: String, reason: String },
}

/// Compression/decompression failures for a single chunk.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("corrupt chunk: {0}")]
    Corrupt(String),
}

/// Per-entry verification failure during unpack. Recoverable: the entry is
/// skipped and extraction continues with the remaining entries.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("corrupt chunk data: {0}")]
    ChunkCorrupt(#[from] CodecError),
}

/// Fatal error type for packed-store operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("directory format error: {0}")]
    Format(#[from] FormatError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("unable to read source file {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error("invalid archive path: {0}")]
    InvalidPath(String),

    #[error("pack block limit of {0} exceeded")]
    BlockLimit(u16),

    #[error("no directory file found for '{0}'")]
    DirectoryNotFound(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

/// Result type alias for packed-store operations
pub type Result<T> = std::result::Result<T, Error>;
