//! Command-line operations
//!
//! Thin wrappers over the packed-store engine: workspace enumeration,
//! progress display and result tables. Everything here runs against the
//! real filesystem.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::codec::{CompressionLevel, CompressionMethod};
use crate::directory::VpkDirectory;
use crate::fs::{FileSystem, StdFileSystem};
use crate::naming::{resolve_directory_path, VpkPair};
use crate::packedstore::{BuildOptions, PackedStoreBuilder, SourceFile, UnpackOptions};
use crate::utils::{
    collect_workspace_files, create_glob_matcher, format_size, load_ignore_globs, matches_filter,
    prune_ignored,
};

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {msg}",
    )?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Pack a workspace into a fresh archive under `build_path`.
pub fn pack_archive(
    locale: &str,
    context: &str,
    level_name: &str,
    workspace: &Path,
    build_path: &Path,
    threads: usize,
    level: CompressionLevel,
) -> Result<()> {
    let pair = VpkPair::new(locale, context, level_name);
    let sources = gather_sources(workspace)?;
    if sources.is_empty() {
        anyhow::bail!("No files to pack under {}", workspace.display());
    }
    println!(
        "Packing {} files from {} into {}...",
        sources.len(),
        workspace.display(),
        pair.directory_file_name()
    );

    let options = BuildOptions {
        level,
        threads,
        ..BuildOptions::default()
    };
    let fs = StdFileSystem;
    let started = Instant::now();
    let pb = spinner("Compressing...".to_string())?;
    let summary = PackedStoreBuilder::new(&fs)
        .pack(&pair, workspace, build_path, &sources, &options)
        .with_context(|| format!("Failed to pack {}", workspace.display()))?;
    pb.finish_and_clear();

    println!(
        "Packed {} entries into {} blocks in {:.2?}",
        summary.entry_count,
        summary.block_count,
        started.elapsed()
    );
    println!(
        "  {} -> {} ({:.1}%)",
        format_size(summary.uncompressed),
        format_size(summary.stored),
        ratio(summary.stored, summary.uncompressed)
    );
    println!("  Directory: {}", summary.directory_file.display());
    Ok(())
}

/// Layer a patch workspace over an existing archive.
pub fn patch_archive(
    dir_file: &Path,
    workspace: &Path,
    build_path: &Path,
    threads: usize,
    level: CompressionLevel,
) -> Result<()> {
    let sources = gather_sources(workspace)?;
    if sources.is_empty() {
        anyhow::bail!("No files to patch under {}", workspace.display());
    }
    println!(
        "Patching {} with {} files from {}...",
        dir_file.display(),
        sources.len(),
        workspace.display()
    );

    let options = BuildOptions {
        level,
        threads,
        ..BuildOptions::default()
    };
    let fs = StdFileSystem;
    let started = Instant::now();
    let pb = spinner("Compressing...".to_string())?;
    let summary = PackedStoreBuilder::new(&fs)
        .patch(dir_file, workspace, build_path, &sources, &options)
        .with_context(|| format!("Failed to patch {}", dir_file.display()))?;
    pb.finish_and_clear();

    println!(
        "Patched to {} entries across {} blocks in {:.2?}",
        summary.entry_count,
        summary.block_count,
        started.elapsed()
    );
    Ok(())
}

/// Extract an archive. Returns `true` only when every entry was written
/// and verified.
pub fn unpack_archive(file: &Path, output: &Path, threads: usize, sanitize: bool) -> Result<bool> {
    println!("Unpacking {} to {}...", file.display(), output.display());

    let options = UnpackOptions {
        threads,
        derive_name_from_data: sanitize,
    };
    let fs = StdFileSystem;
    let started = Instant::now();
    let pb = spinner("Extracting...".to_string())?;
    let report = PackedStoreBuilder::new(&fs)
        .unpack(file, output, &options)
        .with_context(|| format!("Failed to unpack {}", file.display()))?;
    pb.finish_and_clear();

    println!(
        "Extracted {} files in {:.2?}",
        report.written.len(),
        started.elapsed()
    );
    if !report.is_success() {
        println!("{} entries failed verification:", report.failed.len());
        for (path, err) in &report.failed {
            println!("  {}: {}", path, err);
        }
    }
    Ok(report.is_success())
}

/// List archive entries, optionally filtered by a glob pattern.
pub fn list_entries(file: &Path, filter: Option<&str>) -> Result<()> {
    let dir = open_directory(file)?;
    let matcher = filter.map(create_glob_matcher).transpose()?;

    let mut count = 0u64;
    let mut total_size = 0u64;
    let mut stored_size = 0u64;

    for entry in dir.entries() {
        if !matches_filter(&entry.path, matcher.as_ref()) {
            continue;
        }
        let method = if entry
            .chunks
            .iter()
            .any(|c| c.method() == CompressionMethod::Compressed)
        {
            "Compressed"
        } else {
            "Stored"
        };
        println!(
            "{:>10} {:>10} {:>10} {:>3} {}",
            format_size(entry.uncompressed_len()),
            format_size(entry.stored_len()),
            method,
            entry.chunks.len(),
            entry.path
        );
        count += 1;
        total_size += entry.uncompressed_len();
        stored_size += entry.stored_len();
    }

    println!();
    println!(
        "Total: {} files, {} ({} stored)",
        count,
        format_size(total_size),
        format_size(stored_size)
    );
    Ok(())
}

/// Print archive header fields and aggregate statistics.
pub fn show_info(file: &Path) -> Result<()> {
    let dir = open_directory(file)?;

    let chunk_count: usize = dir.entries().iter().map(|e| e.chunks.len()).sum();
    let uncompressed: u64 = dir.entries().iter().map(|e| e.uncompressed_len()).sum();
    let stored: u64 = dir.entries().iter().map(|e| e.stored_len()).sum();

    println!("Archive: {}", dir.pair.directory_file_name());
    println!("  Locale:       {}", dir.pair.locale);
    println!("  Context:      {}", dir.pair.context);
    println!("  Level:        {}", dir.pair.level_name);
    println!("  Entries:      {}", dir.entries().len());
    println!("  Pack blocks:  {}", dir.block_count);
    println!("  Chunks:       {}", chunk_count);
    println!(
        "  Size:         {} -> {} ({:.1}%)",
        format_size(uncompressed),
        format_size(stored),
        ratio(stored, uncompressed)
    );
    Ok(())
}

fn gather_sources(workspace: &Path) -> Result<Vec<SourceFile>> {
    let files = collect_workspace_files(workspace)?;
    let ignore = load_ignore_globs(workspace)?;
    Ok(prune_ignored(files, ignore.as_ref())
        .into_iter()
        .map(SourceFile::new)
        .collect())
}

fn open_directory(file: &Path) -> Result<VpkDirectory> {
    let fs = StdFileSystem;
    let path = resolve_directory_path(&fs, file)
        .with_context(|| format!("Failed to locate directory file for {}", file.display()))?;
    let bytes = fs
        .read_file(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    VpkDirectory::parse(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn ratio(stored: u64, uncompressed: u64) -> f64 {
    if uncompressed == 0 {
        100.0
    } else {
        stored as f64 / uncompressed as f64 * 100.0
    }
}
