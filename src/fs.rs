//! Filesystem collaborator
//!
//! The engine never touches `std::fs` directly; all file access goes through
//! this trait so the whole pack/unpack pipeline can run against an in-memory
//! provider in tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File access contract used by the packed-store engine.
pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn file_exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Real filesystem backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        std::fs::write(path, data)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// In-memory filesystem for hermetic engine tests.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating it directly without going through the trait.
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.lock().insert(path.into(), data.into());
    }

    /// Snapshot of every stored path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        // Directories are implicit in the path map.
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.lock();
        let data = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.display().to_string()))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fs_round_trip() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("dir/file.bin");
        assert!(!fs.file_exists(path));
        fs.write_file(path, b"payload").unwrap();
        assert!(fs.file_exists(path));
        assert_eq!(fs.read_file(path).unwrap(), b"payload");
    }

    #[test]
    fn test_memory_fs_rename_and_remove() {
        let fs = MemoryFileSystem::new();
        fs.write_file(Path::new("a.tmp"), b"x").unwrap();
        fs.rename(Path::new("a.tmp"), Path::new("a")).unwrap();
        assert!(!fs.file_exists(Path::new("a.tmp")));
        assert_eq!(fs.read_file(Path::new("a")).unwrap(), b"x");
        fs.remove_file(Path::new("a")).unwrap();
        assert!(fs.remove_file(Path::new("a")).is_err());
    }

    #[test]
    fn test_memory_fs_missing_read() {
        let fs = MemoryFileSystem::new();
        let err = fs.read_file(Path::new("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_std_fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;
        let nested = dir.path().join("a/b");
        fs.create_dir_all(&nested).unwrap();
        let file = nested.join("f.bin");
        fs.write_file(&file, b"data").unwrap();
        assert!(fs.file_exists(&file));
        assert_eq!(fs.read_file(&file).unwrap(), b"data");
        let renamed = nested.join("g.bin");
        fs.rename(&file, &renamed).unwrap();
        assert!(!fs.file_exists(&file));
        fs.remove_file(&renamed).unwrap();
    }
}
