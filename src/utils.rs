//! General utility functions for revpk
//!
//! Workspace enumeration, ignore-file handling and small display helpers
//! shared by the command-line operations.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-workspace ignore file.
pub const IGNORE_FILE: &str = ".vpkignore";

/// Format a file size in human-readable form (B, KB, MB, GB)
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}

/// Create a glob matcher from a pattern string
///
/// Handles common patterns:
/// - `*.ext` becomes `**/*.ext` (match in any directory)
/// - Plain text without wildcards becomes `**/*text*` (substring search)
pub fn create_glob_matcher(pattern: &str) -> Result<GlobMatcher> {
    let pattern = if pattern.starts_with("*.") {
        format!("**/{}", pattern)
    } else if !pattern.contains('*') && !pattern.contains('?') {
        format!("**/*{}*", pattern)
    } else {
        pattern.to_string()
    };

    let glob = Glob::new(&pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
    Ok(glob.compile_matcher())
}

/// Check if a name matches the optional filter
pub fn matches_filter(name: &str, matcher: Option<&GlobMatcher>) -> bool {
    match matcher {
        Some(m) => m.is_match(name),
        None => true,
    }
}

/// Enumerate every file under `workspace` as sorted, workspace-relative,
/// forward-slash paths. The ignore file itself is always skipped; sorting
/// keeps the build list (and therefore the archive) deterministic.
pub fn collect_workspace_files(workspace: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    collect_recursive(workspace, workspace, &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn collect_recursive(root: &Path, dir: &Path, paths: &mut Vec<String>) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(root, &path, paths)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let relative = path_to_forward_slashes(relative);
            if relative != IGNORE_FILE {
                paths.push(relative);
            }
        }
    }
    Ok(())
}

fn path_to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Load the workspace's `.vpkignore` globs, if the file exists. One pattern
/// per line; blank lines and comment lines (containing `//`) are skipped.
pub fn load_ignore_globs(workspace: &Path) -> Result<Option<GlobSet>> {
    let ignore_path = workspace.join(IGNORE_FILE);
    let contents = match fs::read_to_string(&ignore_path) {
        Ok(contents) => contents,
        Err(_) => return Ok(None),
    };

    let mut builder = GlobSetBuilder::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("//") {
            continue;
        }
        builder.add(
            Glob::new(line)
                .with_context(|| format!("Invalid pattern '{}' in {}", line, ignore_path.display()))?,
        );
    }
    Ok(Some(builder.build()?))
}

/// Drop paths matched by the ignore set.
pub fn prune_ignored(paths: Vec<String>, ignore: Option<&GlobSet>) -> Vec<String> {
    match ignore {
        Some(set) => paths.into_iter().filter(|p| !set.is_match(p)).collect(),
        None => paths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_glob_matcher_patterns() {
        let m = create_glob_matcher("*.txt").unwrap();
        assert!(m.is_match("a/b/c.txt"));
        assert!(!m.is_match("a/b/c.bin"));

        let m = create_glob_matcher("weapon").unwrap();
        assert!(m.is_match("scripts/weapon_smg.txt"));
    }

    #[test]
    fn test_collect_workspace_files_sorted_relative() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/inner")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("sub/inner/a.bin"), b"a").unwrap();
        fs::write(dir.path().join(IGNORE_FILE), b"*.log\n").unwrap();

        let files = collect_workspace_files(dir.path()).unwrap();
        assert_eq!(files, vec!["b.txt".to_string(), "sub/inner/a.bin".to_string()]);
    }

    #[test]
    fn test_ignore_globs_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(IGNORE_FILE),
            b"// editor leftovers\n\n*.log\ntemp/**\n",
        )
        .unwrap();

        let globs = load_ignore_globs(dir.path()).unwrap().unwrap();
        let paths = vec![
            "keep.txt".to_string(),
            "debug.log".to_string(),
            "temp/scratch.bin".to_string(),
        ];
        assert_eq!(
            prune_ignored(paths, Some(&globs)),
            vec!["keep.txt".to_string()]
        );
    }

    #[test]
    fn test_missing_ignore_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_ignore_globs(dir.path()).unwrap().is_none());
    }
}
