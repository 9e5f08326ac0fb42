//! Packed-store builder: pack, unpack and patch operations
//!
//! The builder owns the worker pool and codec configuration for one call,
//! drives the chunk planner and directory model, and verifies integrity on
//! unpack. All file access goes through the injected [`FileSystem`]; all
//! archive state is mutated on the calling thread, strictly after the pool
//! drains, so results merge back in deterministic sequence order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checksum::crc32;
use crate::codec::{CompressionLevel, CompressionMethod};
use crate::directory::{
    ChunkDescriptor, VpkDirectory, VpkEntry, LOAD_CACHE, LOAD_VISIBLE, TEXTURE_DEFAULT,
};
use crate::error::{CodecError, Error, IntegrityError, Result};
use crate::fs::FileSystem;
use crate::naming::{self, VpkPair};
use crate::planner::{
    plan_chunks, BlockAllocator, DEFAULT_MAX_BLOCK, DEFAULT_MAX_CHUNK, DEFAULT_PRELOAD_CAP,
};
use crate::worker::{JobKind, WorkItem, WorkResult, WorkerPool};

/// Knobs for pack and patch.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub level: CompressionLevel,
    /// Worker threads; 0 means hardware concurrency.
    pub threads: usize,
    /// Bytes of each file kept inline in the directory.
    pub preload_cap: usize,
    /// Maximum uncompressed chunk length.
    pub max_chunk_size: usize,
    /// Maximum pack-block file size.
    pub max_block_size: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            level: CompressionLevel::Default,
            threads: 0,
            preload_cap: DEFAULT_PRELOAD_CAP,
            max_chunk_size: DEFAULT_MAX_CHUNK,
            max_block_size: DEFAULT_MAX_BLOCK,
        }
    }
}

impl BuildOptions {
    fn validate(&self) -> Result<()> {
        if self.preload_cap > u16::MAX as usize {
            return Err(Error::InvalidOptions(format!(
                "preload cap {} does not fit the directory format (max {})",
                self.preload_cap,
                u16::MAX
            )));
        }
        if self.max_chunk_size == 0 || self.max_chunk_size > u32::MAX as usize {
            return Err(Error::InvalidOptions(format!(
                "max chunk size {} out of range",
                self.max_chunk_size
            )));
        }
        if self.max_block_size < self.max_chunk_size as u64 {
            return Err(Error::InvalidOptions(format!(
                "max block size {} is smaller than max chunk size {}",
                self.max_block_size, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

/// Knobs for unpack.
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Worker threads; 0 means hardware concurrency.
    pub threads: usize,
    /// Locate pack blocks from the on-disk directory file name instead of
    /// the tuple embedded in its header. Useful after archives are renamed.
    pub derive_name_from_data: bool,
}

/// One file to pack, with its per-source options.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Workspace-relative path.
    pub path: String,
    /// Store chunks raw when false.
    pub use_compression: bool,
    /// Reuse identical chunks already placed during this build.
    pub deduplicate: bool,
}

impl SourceFile {
    pub fn new(path: impl Into<String>) -> Self {
        SourceFile {
            path: path.into(),
            use_compression: true,
            deduplicate: true,
        }
    }

    pub fn with_compression(mut self, use_compression: bool) -> Self {
        self.use_compression = use_compression;
        self
    }

    pub fn with_deduplication(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }
}

/// What a pack/patch call produced.
#[derive(Debug)]
pub struct PackSummary {
    pub directory_file: PathBuf,
    pub entry_count: usize,
    pub block_count: u16,
    pub uncompressed: u64,
    pub stored: u64,
}

/// Per-entry outcome of an unpack call. Success only when nothing failed.
#[derive(Debug, Default)]
pub struct UnpackReport {
    pub written: Vec<String>,
    pub failed: Vec<(String, IntegrityError)>,
}

impl UnpackReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A chunk waiting for its compression result.
struct PendingChunk {
    raw_len: u32,
    hash: [u8; 32],
    deduplicate: bool,
}

/// An entry whose chunks are in flight.
struct PendingEntry {
    path: String,
    crc32: u32,
    preload: Vec<u8>,
    chunks: Vec<PendingChunk>,
}

/// Per-entry decompression schedule for one unpack call.
enum EntryPlan {
    /// Failed validation before any work was submitted.
    Failed(IntegrityError),
    /// Number of decompress jobs submitted for this entry.
    Chunks(usize),
}

/// Top-level archive engine over an injected filesystem.
pub struct PackedStoreBuilder<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> PackedStoreBuilder<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        PackedStoreBuilder { fs }
    }

    /// Pack `sources` from `workspace` into a fresh archive under
    /// `build_path`. Fully succeeds or fully fails: outputs are written to
    /// temporary names and renamed into place only when everything is ready.
    pub fn pack(
        &self,
        pair: &VpkPair,
        workspace: &Path,
        build_path: &Path,
        sources: &[SourceFile],
        options: &BuildOptions,
    ) -> Result<PackSummary> {
        options.validate()?;
        let mut pool = WorkerPool::new(options.threads);
        info!(
            "Packing {} sources into '{}' with {} threads",
            sources.len(),
            pair.directory_file_name(),
            pool.thread_count()
        );

        let (pending, results) = self.compress_sources(workspace, sources, options, &mut pool)?;

        let mut alloc = BlockAllocator::new(options.max_block_size);
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let entries = assemble_entries(pending, results, &mut alloc, 0, &mut blocks)?;

        let mut dir = VpkDirectory::new(pair.clone());
        dir.block_count = alloc.block_count();
        for entry in entries {
            dir.push_entry(entry)?;
        }

        let mut outputs: Vec<(String, Vec<u8>)> = blocks
            .into_iter()
            .enumerate()
            .map(|(i, data)| (pair.block_file_name(i as u16), data))
            .collect();
        let dir_name = pair.directory_file_name();
        let dir_bytes = dir.serialize().map_err(|e| Error::IoFailure {
            path: build_path.join(&dir_name),
            source: e,
        })?;
        outputs.push((dir_name.clone(), dir_bytes));
        self.publish(build_path, &outputs)?;

        let summary = summarize(&dir, build_path.join(&dir_name));
        info!(
            "Packed {} entries into {} blocks ({} -> {} bytes)",
            summary.entry_count, summary.block_count, summary.uncompressed, summary.stored
        );
        Ok(summary)
    }

    /// Layer `sources` over an existing archive. New chunk data lands only
    /// in new, higher-numbered blocks; existing blocks are never rewritten.
    pub fn patch(
        &self,
        dir_file: &Path,
        workspace: &Path,
        build_path: &Path,
        sources: &[SourceFile],
        options: &BuildOptions,
    ) -> Result<PackSummary> {
        options.validate()?;
        let dir_path = naming::resolve_directory_path(self.fs, dir_file)?;
        let dir_bytes = self.fs.read_file(&dir_path).map_err(|e| Error::IoFailure {
            path: dir_path.clone(),
            source: e,
        })?;
        let mut dir = VpkDirectory::parse(&dir_bytes)?;
        let base_blocks = dir.block_count;

        let mut pool = WorkerPool::new(options.threads);
        info!(
            "Patching '{}' ({} base blocks) with {} sources",
            dir.pair.directory_file_name(),
            base_blocks,
            sources.len()
        );

        let (pending, results) = self.compress_sources(workspace, sources, options, &mut pool)?;

        let mut alloc = BlockAllocator::starting_at(base_blocks, options.max_block_size);
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let entries = assemble_entries(pending, results, &mut alloc, base_blocks, &mut blocks)?;
        for entry in entries {
            dir.upsert_entry(entry);
        }
        dir.block_count = alloc.block_count();

        let pair = dir.pair.clone();
        let mut outputs: Vec<(String, Vec<u8>)> = blocks
            .into_iter()
            .enumerate()
            .map(|(i, data)| (pair.block_file_name(base_blocks + i as u16), data))
            .collect();
        let dir_name = pair.directory_file_name();
        let serialized = dir.serialize().map_err(|e| Error::IoFailure {
            path: build_path.join(&dir_name),
            source: e,
        })?;
        outputs.push((dir_name.clone(), serialized));
        self.publish(build_path, &outputs)?;

        let summary = summarize(&dir, build_path.join(&dir_name));
        info!(
            "Patched to {} entries across {} blocks",
            summary.entry_count, summary.block_count
        );
        Ok(summary)
    }

    /// Extract an archive under `out_root`, verifying each entry's CRC32.
    /// Per-entry corruption is recorded and skipped; everything else is
    /// still extracted.
    pub fn unpack(
        &self,
        dir_file: &Path,
        out_root: &Path,
        options: &UnpackOptions,
    ) -> Result<UnpackReport> {
        let dir_path = naming::resolve_directory_path(self.fs, dir_file)?;
        let dir_bytes = self.fs.read_file(&dir_path).map_err(|e| Error::IoFailure {
            path: dir_path.clone(),
            source: e,
        })?;
        let dir = VpkDirectory::parse(&dir_bytes)?;
        let base_dir = dir_path.parent().unwrap_or_else(|| Path::new(""));
        let on_disk_name = dir_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let use_derived = if options.derive_name_from_data {
            let parses = naming::block_name_from_dir_name(on_disk_name, 0).is_some();
            if !parses {
                warn!(
                    "Directory name '{}' does not follow the naming convention; \
                     falling back to the embedded name",
                    on_disk_name
                );
            }
            parses
        } else {
            false
        };
        let block_name = |index: u16| {
            if use_derived {
                naming::block_name_from_dir_name(on_disk_name, index)
                    .unwrap_or_else(|| dir.pair.block_file_name(index))
            } else {
                dir.pair.block_file_name(index)
            }
        };

        info!(
            "Unpacking {} entries from '{}'",
            dir.entries().len(),
            dir_path.display()
        );

        let mut pool = WorkerPool::new(options.threads);
        let mut block_cache: HashMap<u16, Vec<u8>> = HashMap::new();
        let mut plans: Vec<EntryPlan> = Vec::with_capacity(dir.entries().len());
        let mut seq = 0u64;

        for entry in dir.entries() {
            // Blocks are required inputs; a missing one is fatal.
            for chunk in &entry.chunks {
                if !block_cache.contains_key(&chunk.pack_block_index) {
                    let path = base_dir.join(block_name(chunk.pack_block_index));
                    let data = self.fs.read_file(&path).map_err(|e| Error::IoFailure {
                        path: path.clone(),
                        source: e,
                    })?;
                    block_cache.insert(chunk.pack_block_index, data);
                }
            }

            // Offsets come straight from the directory file; an overflowing
            // or out-of-range chunk fails the entry, never the process.
            let out_of_range = entry.chunks.iter().find(|chunk| {
                let block_len = block_cache[&chunk.pack_block_index].len() as u64;
                chunk
                    .offset_in_block
                    .checked_add(chunk.compressed_size as u64)
                    .map_or(true, |end| end > block_len)
            });
            if let Some(chunk) = out_of_range {
                plans.push(EntryPlan::Failed(IntegrityError::ChunkCorrupt(
                    CodecError::Corrupt(format!(
                        "chunk at offset {} ({} bytes) exceeds pack block {}",
                        chunk.offset_in_block, chunk.compressed_size, chunk.pack_block_index
                    )),
                )));
                continue;
            }

            for chunk in &entry.chunks {
                let block = &block_cache[&chunk.pack_block_index];
                // The range check above bounds both by block.len(), so these
                // casts cannot truncate.
                let start = chunk.offset_in_block as usize;
                let end = start + chunk.compressed_size as usize;
                pool.submit(WorkItem {
                    seq,
                    payload: block[start..end].to_vec(),
                    job: JobKind::Decompress {
                        method: chunk.method(),
                        expected_len: chunk.uncompressed_size as usize,
                    },
                });
                seq += 1;
            }
            plans.push(EntryPlan::Chunks(entry.chunks.len()));
        }

        let results = pool.drain();
        let mut results_iter = results.into_iter();
        let mut report = UnpackReport::default();

        for (entry, plan) in dir.entries().iter().zip(plans) {
            let failure = match plan {
                EntryPlan::Failed(err) => Some(err),
                EntryPlan::Chunks(count) => {
                    self.reassemble_entry(entry, count, &mut results_iter, out_root, &mut report)?
                }
            };
            if let Some(err) = failure {
                warn!("Skipping '{}': {}", entry.path, err);
                report.failed.push((entry.path.clone(), err));
            }
        }

        info!(
            "Unpacked {} entries, {} failed",
            report.written.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Rebuild one entry from its drained chunk results and write it out.
    /// Returns the per-entry failure, if any; IO errors stay fatal.
    fn reassemble_entry(
        &self,
        entry: &VpkEntry,
        chunk_count: usize,
        results: &mut std::vec::IntoIter<WorkResult>,
        out_root: &Path,
        report: &mut UnpackReport,
    ) -> Result<Option<IntegrityError>> {
        let mut data = entry.preload.clone();
        for consumed in 0..chunk_count {
            let result = results
                .next()
                .ok_or_else(|| Error::Codec(CodecError::Corrupt("missing work result".into())))?;
            match result.outcome {
                Ok(payload) => data.extend_from_slice(&payload.bytes),
                Err(err) => {
                    // Consume this entry's remaining results so the cursor
                    // stays aligned with the next entry.
                    for _ in consumed + 1..chunk_count {
                        let _ = results.next();
                    }
                    return Ok(Some(IntegrityError::ChunkCorrupt(err)));
                }
            }
        }

        let computed = crc32(&data);
        if computed != entry.crc32 {
            return Ok(Some(IntegrityError::ChecksumMismatch {
                expected: entry.crc32,
                computed,
            }));
        }

        let out_path = out_root.join(&entry.path);
        if let Some(parent) = out_path.parent() {
            self.fs
                .create_dir_all(parent)
                .map_err(|e| Error::IoFailure {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        self.fs
            .write_file(&out_path, &data)
            .map_err(|e| Error::IoFailure {
                path: out_path,
                source: e,
            })?;
        debug!("Wrote '{}' ({} bytes)", entry.path, data.len());
        report.written.push(entry.path.clone());
        Ok(None)
    }

    /// Read, plan and submit every source's chunks, then drain the pool.
    /// An unreadable source aborts; already-submitted jobs finish when the
    /// pool drops.
    fn compress_sources(
        &self,
        workspace: &Path,
        sources: &[SourceFile],
        options: &BuildOptions,
        pool: &mut WorkerPool,
    ) -> Result<(Vec<PendingEntry>, Vec<WorkResult>)> {
        let mut seq = 0u64;
        let mut pending = Vec::with_capacity(sources.len());

        for source in sources {
            let archive_path = normalize_path(&source.path)?;
            let abs = workspace.join(&source.path);
            let data = self
                .fs
                .read_file(&abs)
                .map_err(|e| Error::SourceUnreadable {
                    path: abs,
                    source: e,
                })?;

            let file_crc = crc32(&data);
            let plan = plan_chunks(data.len(), options.preload_cap, options.max_chunk_size);
            let preload = data[..plan.preload_len].to_vec();

            let mut chunks = Vec::with_capacity(plan.spans.len());
            for (offset, len) in &plan.spans {
                let slice = &data[*offset..*offset + *len];
                chunks.push(PendingChunk {
                    raw_len: *len as u32,
                    hash: *blake3::hash(slice).as_bytes(),
                    deduplicate: source.deduplicate,
                });
                pool.submit(WorkItem {
                    seq,
                    payload: slice.to_vec(),
                    job: JobKind::Compress {
                        level: options.level,
                        allow_compression: source.use_compression,
                    },
                });
                seq += 1;
            }
            debug!(
                "Planned '{}': {} preload bytes, {} chunks",
                archive_path,
                preload.len(),
                chunks.len()
            );
            pending.push(PendingEntry {
                path: archive_path,
                crc32: file_crc,
                preload,
                chunks,
            });
        }

        Ok((pending, pool.drain()))
    }

    /// Write every output to a temporary name, then rename them into place.
    /// On any failure all temporaries and already-renamed outputs are
    /// removed, so a partial archive is never left behind.
    fn publish(&self, build_path: &Path, outputs: &[(String, Vec<u8>)]) -> Result<()> {
        self.fs
            .create_dir_all(build_path)
            .map_err(|e| Error::IoFailure {
                path: build_path.to_path_buf(),
                source: e,
            })?;

        let mut temps: Vec<PathBuf> = Vec::new();
        for (name, data) in outputs {
            let temp = build_path.join(format!("{}.tmp", name));
            if let Err(e) = self.fs.write_file(&temp, data) {
                self.discard(&temps);
                return Err(Error::IoFailure {
                    path: temp,
                    source: e,
                });
            }
            temps.push(temp);
        }

        let mut renamed: Vec<PathBuf> = Vec::new();
        for ((name, _), temp) in outputs.iter().zip(&temps) {
            let final_path = build_path.join(name);
            if let Err(e) = self.fs.rename(temp, &final_path) {
                self.discard(&temps[renamed.len()..]);
                self.discard(&renamed);
                return Err(Error::IoFailure {
                    path: final_path,
                    source: e,
                });
            }
            renamed.push(final_path);
        }
        Ok(())
    }

    fn discard(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = self.fs.remove_file(path) {
                warn!("Could not remove '{}': {}", path.display(), e);
            }
        }
    }
}

/// Merge drained compression results back into entries in sequence order,
/// placing stored chunk bytes through the running block allocator. Identical
/// chunks (same raw hash, same resulting method) reuse the first placement.
fn assemble_entries(
    pending: Vec<PendingEntry>,
    results: Vec<WorkResult>,
    alloc: &mut BlockAllocator,
    first_block: u16,
    blocks: &mut Vec<Vec<u8>>,
) -> Result<Vec<VpkEntry>> {
    let mut dedup: HashMap<([u8; 32], CompressionMethod), ChunkDescriptor> = HashMap::new();
    let mut results_iter = results.into_iter();
    let mut entries = Vec::with_capacity(pending.len());

    for item in pending {
        let mut chunks = Vec::with_capacity(item.chunks.len());
        for chunk in &item.chunks {
            let result = results_iter
                .next()
                .ok_or_else(|| Error::Codec(CodecError::Corrupt("missing work result".into())))?;
            let payload = result.outcome.map_err(Error::Codec)?;

            let key = (chunk.hash, payload.method);
            if chunk.deduplicate {
                if let Some(existing) = dedup.get(&key) {
                    debug!(
                        "Mapped a chunk of '{}' to existing data at block {} offset {}",
                        item.path, existing.pack_block_index, existing.offset_in_block
                    );
                    chunks.push(existing.clone());
                    continue;
                }
            }

            let (block_index, offset) = alloc.place(payload.bytes.len() as u64)?;
            let local = (block_index - first_block) as usize;
            if local == blocks.len() {
                blocks.push(Vec::new());
            }
            blocks[local].extend_from_slice(&payload.bytes);

            let descriptor = ChunkDescriptor {
                pack_block_index: block_index,
                load_flags: LOAD_VISIBLE | LOAD_CACHE,
                texture_flags: TEXTURE_DEFAULT,
                offset_in_block: offset,
                compressed_size: payload.bytes.len() as u32,
                uncompressed_size: chunk.raw_len,
            };
            if chunk.deduplicate {
                dedup.insert(key, descriptor.clone());
            }
            chunks.push(descriptor);
        }
        entries.push(VpkEntry {
            path: item.path,
            crc32: item.crc32,
            preload: item.preload,
            chunks,
        });
    }
    Ok(entries)
}

fn summarize(dir: &VpkDirectory, directory_file: PathBuf) -> PackSummary {
    PackSummary {
        directory_file,
        entry_count: dir.entries().len(),
        block_count: dir.block_count,
        uncompressed: dir.entries().iter().map(|e| e.uncompressed_len()).sum(),
        stored: dir.entries().iter().map(|e| e.stored_len()).sum(),
    }
}

/// Canonicalize an archive path: forward slashes, lowercase, no drive
/// letters, no relative components.
fn normalize_path(input: &str) -> Result<String> {
    let lowered = input.replace('\\', "/").to_ascii_lowercase();
    if lowered.is_empty() || lowered.contains(':') {
        return Err(Error::InvalidPath(input.to_string()));
    }
    for part in lowered.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(Error::InvalidPath(input.to_string()));
        }
    }
    Ok(lowered)
}
