use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::ArchiveError;

/// A storage location addressed by relative, `/` separated paths.
pub trait Disk: fmt::Debug + Send + Sync {
    /// Stable identity of the underlying location. Two disks with the same
    /// identity share files.
    fn identity(&self) -> String;

    fn exists(&self, path: &str) -> Result<bool, ArchiveError>;

    fn reader(&self, path: &str) -> Result<Box<dyn Read + Send>, ArchiveError>;

    /// Stores everything `source` yields at `path`, replacing any previous
    /// file only once the new content is complete.
    fn write_stream(&self, path: &str, source: &mut dyn Read) -> Result<(), ArchiveError>;

    /// Removes `path`. A missing file is not an error.
    fn delete(&self, path: &str) -> Result<(), ArchiveError>;

    fn get(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut bytes = Vec::new();
        self.reader(path)?
            .read_to_end(&mut bytes)
            .map_err(|err| ArchiveError::io(err, path))?;
        Ok(bytes)
    }
}

/// A disk rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory every relative path is resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `path` on this disk.
    pub fn path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

/// Resolves `root` to a comparable form: canonical when it exists,
/// otherwise absolute with `.` and `..` folded.
pub fn normalize_root(root: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(root) {
        return canonical;
    }
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl Disk for LocalDisk {
    fn identity(&self) -> String {
        normalize_root(&self.root).display().to_string()
    }

    fn exists(&self, path: &str) -> Result<bool, ArchiveError> {
        Ok(self.path(path).is_file())
    }

    fn reader(&self, path: &str) -> Result<Box<dyn Read + Send>, ArchiveError> {
        let full = self.path(path);
        let file = File::open(&full).map_err(|err| ArchiveError::io(err, full.display().to_string()))?;
        Ok(Box::new(file))
    }

    fn write_stream(&self, path: &str, source: &mut dyn Read) -> Result<(), ArchiveError> {
        let full = self.path(path);
        let dir = full.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|_| ArchiveError::CreateFolder(dir.clone()))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|err| ArchiveError::io(err, dir.display().to_string()))?;
        io::copy(source, &mut tmp).map_err(|err| ArchiveError::io(err, path))?;
        tmp.as_file()
            .sync_all()
            .map_err(|err| ArchiveError::io(err, path))?;
        tmp.persist(&full)
            .map_err(|err| ArchiveError::io(err.error, full.display().to_string()))?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), ArchiveError> {
        let full = self.path(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ArchiveError::io(err, full.display().to_string())),
        }
    }
}
