//! Archive file naming
//!
//! A (locale, context, level name) tuple deterministically derives the
//! directory file name and the family of numbered pack-block file names:
//!
//! - `<locale>_<context>_<level>.pak000_dir.vpk` — directory file
//! - `<context>_<level>.pak000_<idx>.vpk` -------- pack block
//!
//! Pack blocks carry no locale prefix: localized archives share the same
//! data blocks and differ only in their directory files.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Locales with a known localized directory file; the first is the default.
pub const KNOWN_LOCALES: [&str; 12] = [
    "english",
    "french",
    "german",
    "italian",
    "japanese",
    "korean",
    "polish",
    "portuguese",
    "russian",
    "schinese",
    "spanish",
    "tchinese",
];

/// Build contexts an archive can target; the first is the default.
pub const KNOWN_CONTEXTS: [&str; 2] = ["server", "client"];

/// Suffix of every directory file name.
pub const DIR_SUFFIX: &str = ".pak000_dir.vpk";

fn block_index_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"pak000_([0-9]{3})").expect("static pattern"))
}

/// The naming tuple: identifies an archive's file family, nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpkPair {
    pub locale: String,
    pub context: String,
    pub level_name: String,
}

impl VpkPair {
    /// Build a pair, falling back to default locale/context (with a warning)
    /// when the supplied components are not recognized.
    pub fn new(locale: &str, context: &str, level_name: &str) -> Self {
        let locale = if KNOWN_LOCALES.contains(&locale) {
            locale
        } else {
            warn!(
                "Locale '{}' not supported; using default '{}'",
                locale, KNOWN_LOCALES[0]
            );
            KNOWN_LOCALES[0]
        };
        let context = if KNOWN_CONTEXTS.contains(&context) {
            context
        } else {
            warn!(
                "Context '{}' not supported; using default '{}'",
                context, KNOWN_CONTEXTS[0]
            );
            KNOWN_CONTEXTS[0]
        };
        VpkPair {
            locale: locale.to_string(),
            context: context.to_string(),
            level_name: level_name.to_string(),
        }
    }

    /// Name of the archive's directory file.
    pub fn directory_file_name(&self) -> String {
        format!(
            "{}_{}_{}{}",
            self.locale, self.context, self.level_name, DIR_SUFFIX
        )
    }

    /// Name of pack block `index` (locale-neutral, three-digit index).
    pub fn block_file_name(&self, index: u16) -> String {
        format!(
            "{}_{}.pak000_{:03}.vpk",
            self.context, self.level_name, index
        )
    }
}

/// Derive a pack-block file name from the on-disk directory file name,
/// ignoring the tuple embedded in the directory header. Used when archives
/// have been renamed after building. Returns `None` when the name does not
/// follow the directory naming convention.
pub fn block_name_from_dir_name(dir_file_name: &str, index: u16) -> Option<String> {
    if !dir_file_name.contains("pak000_dir") {
        return None;
    }
    let stem = KNOWN_LOCALES
        .iter()
        .find_map(|locale| {
            let prefix = format!("{}_", locale);
            dir_file_name.strip_prefix(prefix.as_str())
        })
        .unwrap_or(dir_file_name);
    Some(stem.replace("pak000_dir", &format!("pak000_{:03}", index)))
}

/// Resolve a user-supplied archive path to the directory file to parse.
///
/// Accepts either the directory file itself or one of its pack-block files:
/// a `pak000_NNN` name is rewritten to `pak000_dir`, and when the rewritten
/// name lacks a locale prefix the known locales are probed until one exists
/// on disk.
pub fn resolve_directory_path(fs: &dyn FileSystem, path: &Path) -> Result<PathBuf> {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Err(Error::DirectoryNotFound(path.display().to_string())),
    };

    let dir_name = block_index_regex()
        .replace(file_name, "pak000_dir")
        .into_owned();
    let candidate = path.with_file_name(&dir_name);
    if fs.file_exists(&candidate) {
        return Ok(candidate);
    }

    // A block file name has no locale prefix; probe known localizations.
    if !KNOWN_LOCALES
        .iter()
        .any(|locale| dir_name.starts_with(&format!("{}_", locale)))
    {
        for locale in KNOWN_LOCALES {
            let probed = path.with_file_name(format!("{}_{}", locale, dir_name));
            if fs.file_exists(&probed) {
                return Ok(probed);
            }
        }
    }

    Err(Error::DirectoryNotFound(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    #[test]
    fn test_derived_file_names() {
        let pair = VpkPair::new("english", "server", "mp_rr_box");
        assert_eq!(
            pair.directory_file_name(),
            "english_server_mp_rr_box.pak000_dir.vpk"
        );
        assert_eq!(pair.block_file_name(0), "server_mp_rr_box.pak000_000.vpk");
        assert_eq!(pair.block_file_name(12), "server_mp_rr_box.pak000_012.vpk");
    }

    #[test]
    fn test_unknown_components_fall_back() {
        let pair = VpkPair::new("klingon", "toaster", "lvl");
        assert_eq!(pair.locale, "english");
        assert_eq!(pair.context, "server");
        assert_eq!(pair.level_name, "lvl");
    }

    #[test]
    fn test_block_name_from_dir_name() {
        assert_eq!(
            block_name_from_dir_name("german_client_hub.pak000_dir.vpk", 3),
            Some("client_hub.pak000_003.vpk".to_string())
        );
        assert_eq!(
            block_name_from_dir_name("renamed_archive.pak000_dir.vpk", 0),
            Some("renamed_archive.pak000_000.vpk".to_string())
        );
        assert_eq!(block_name_from_dir_name("not_an_archive.vpk", 0), None);
    }

    #[test]
    fn test_resolve_directory_from_dir_path() {
        let fs = MemoryFileSystem::new();
        fs.insert("build/english_server_hub.pak000_dir.vpk", b"x".to_vec());
        let resolved = resolve_directory_path(
            &fs,
            Path::new("build/english_server_hub.pak000_dir.vpk"),
        )
        .unwrap();
        assert_eq!(
            resolved,
            Path::new("build/english_server_hub.pak000_dir.vpk")
        );
    }

    #[test]
    fn test_resolve_directory_from_block_path() {
        let fs = MemoryFileSystem::new();
        fs.insert("build/english_server_hub.pak000_dir.vpk", b"x".to_vec());
        // Block files carry no locale; resolution must rewrite the index and
        // probe locales.
        let resolved =
            resolve_directory_path(&fs, Path::new("build/server_hub.pak000_007.vpk")).unwrap();
        assert_eq!(
            resolved,
            Path::new("build/english_server_hub.pak000_dir.vpk")
        );
    }

    #[test]
    fn test_resolve_directory_missing() {
        let fs = MemoryFileSystem::new();
        let err =
            resolve_directory_path(&fs, Path::new("build/server_hub.pak000_000.vpk")).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound(_)));
    }
}
