//! # revpk
//!
//! A Rust library for building, patching and extracting VPK packed-store
//! archives: a chunked, compressed archive format with a separate directory
//! (manifest) file and one or more numbered pack-block files.
//!
//! ## Overview
//!
//! An archive is a directory file (`*.pak000_dir.vpk`) indexing entries
//! whose payloads are split into independently compressed chunks stored in
//! numbered pack blocks (`*.pak000_NNN.vpk`). This library provides:
//!
//! - Packing a workspace into an archive under multi-threaded compression
//! - Extracting archives with per-entry CRC32 verification
//! - Incremental patches layered over an existing archive
//! - Chunk deduplication and inline preload prefixes for small/critical data
//! - Deterministic, byte-reproducible output for any worker thread count
//!
//! ## Example - Packing
//!
//! ```rust,no_run
//! use std::path::Path;
//! use revpk::{BuildOptions, PackedStoreBuilder, SourceFile, StdFileSystem, VpkPair};
//!
//! fn main() -> revpk::Result<()> {
//!     let fs = StdFileSystem;
//!     let pair = VpkPair::new("english", "server", "mp_rr_box");
//!     let sources = vec![SourceFile::new("scripts/weapons/smg.txt")];
//!
//!     let summary = PackedStoreBuilder::new(&fs).pack(
//!         &pair,
//!         Path::new("ship"),
//!         Path::new("build"),
//!         &sources,
//!         &BuildOptions::default(),
//!     )?;
//!     println!("{} entries packed", summary.entry_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Example - Extracting
//!
//! ```rust,no_run
//! use std::path::Path;
//! use revpk::{PackedStoreBuilder, StdFileSystem, UnpackOptions};
//!
//! fn main() -> revpk::Result<()> {
//!     let fs = StdFileSystem;
//!     let report = PackedStoreBuilder::new(&fs).unpack(
//!         Path::new("build/english_server_mp_rr_box.pak000_dir.vpk"),
//!         Path::new("out"),
//!         &UnpackOptions::default(),
//!     )?;
//!     for (path, err) in &report.failed {
//!         eprintln!("{} failed: {}", path, err);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod codec;
pub mod directory;
pub mod error;
pub mod fs;
pub mod naming;
pub mod ops;
pub mod packedstore;
pub mod planner;
pub mod utils;
pub mod worker;

pub use codec::{CompressionLevel, CompressionMethod};
pub use directory::{ChunkDescriptor, VpkDirectory, VpkEntry};
pub use error::{CodecError, Error, FormatError, IntegrityError, Result};
pub use fs::{FileSystem, MemoryFileSystem, StdFileSystem};
pub use naming::VpkPair;
pub use packedstore::{
    BuildOptions, PackSummary, PackedStoreBuilder, SourceFile, UnpackOptions, UnpackReport,
};
