//! General purpose single-archive toolbox over the `zip` crate.
//!
//! Changes made through an open [`Zip`] are staged in memory and written
//! when [`Zip::close`] is called: the archive is rebuilt into a temp file
//! next to the target and renamed over it, so a failed close leaves the
//! previous archive intact.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ArchiveError, ArchiveErrorCode};

/// Default permission mask for folders created during extraction.
pub const DEFAULT_MASK: u32 = 0o777;

/// Which entries are skipped when walking directories or extracting
/// everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipMode {
    #[default]
    None,
    /// Names starting with `.`
    Hidden,
    /// Names starting with `._` (resource forks)
    Zanysoft,
    /// Both of the above.
    All,
}

impl SkipMode {
    /// Whether an entry named `name` is left out.
    pub fn skips(self, name: &str) -> bool {
        let hidden = name.starts_with('.');
        let zanysoft = name.starts_with("._");
        match self {
            SkipMode::None => false,
            SkipMode::Hidden => hidden,
            SkipMode::Zanysoft => zanysoft,
            SkipMode::All => hidden || zanysoft,
        }
    }

    /// Mode name as accepted by [`Zip::set_skipped`].
    pub fn as_str(self) -> &'static str {
        match self {
            SkipMode::None => "NONE",
            SkipMode::Hidden => "HIDDEN",
            SkipMode::Zanysoft => "ZANYSOFT",
            SkipMode::All => "ALL",
        }
    }
}

impl FromStr for SkipMode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(SkipMode::None),
            "HIDDEN" => Ok(SkipMode::Hidden),
            "ZANYSOFT" => Ok(SkipMode::Zanysoft),
            "ALL" => Ok(SkipMode::All),
            _ => Err(ArchiveError::UnsupportedSkipMode(s.to_string())),
        }
    }
}

impl fmt::Display for SkipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Bytes(Vec<u8>),
    File(PathBuf),
    Dir,
}

#[derive(Debug)]
struct OpenArchive {
    path: PathBuf,
    /// Entry names present in the file on disk, in archive order.
    on_disk: Vec<String>,
    removed: HashSet<String>,
    staged: IndexMap<String, Staged>,
    /// Write the archive on close even without staged entries.
    rewrite: bool,
}

impl OpenArchive {
    fn dirty(&self) -> bool {
        self.rewrite || !self.removed.is_empty() || !self.staged.is_empty()
    }

    fn kept_on_disk(&self) -> impl Iterator<Item = &String> {
        self.on_disk
            .iter()
            .filter(|name| !self.removed.contains(*name) && !self.staged.contains_key(*name))
    }

    fn names(&self) -> Vec<String> {
        self.kept_on_disk()
            .cloned()
            .chain(self.staged.keys().cloned())
            .collect()
    }
}

type Result<T> = std::result::Result<T, ArchiveError>;

/// Archive toolbox bound to at most one archive file at a time.
#[derive(Debug)]
pub struct Zip {
    archive: Option<OpenArchive>,
    skip: SkipMode,
    mask: u32,
    base: Option<PathBuf>,
}

impl Default for Zip {
    fn default() -> Self {
        Self {
            archive: None,
            skip: SkipMode::None,
            mask: DEFAULT_MASK,
            base: None,
        }
    }
}

impl Zip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an existing archive.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let on_disk = read_names(path)?;
        self.archive = Some(OpenArchive {
            path: path.to_path_buf(),
            on_disk,
            removed: HashSet::new(),
            staged: IndexMap::new(),
            rewrite: false,
        });
        Ok(self)
    }

    /// Opens `path` for writing, creating it if needed.
    ///
    /// With `overwrite`, an existing archive is replaced, but only when it
    /// passes [`Zip::check`]; otherwise its entries are kept.
    pub fn create(&mut self, path: impl AsRef<Path>, overwrite: bool) -> Result<&mut Self> {
        let path = path.as_ref();
        let overwrite = overwrite && Self::check(path);
        let on_disk = if overwrite || !path.exists() {
            Vec::new()
        } else {
            read_names(path)?
        };
        self.archive = Some(OpenArchive {
            path: path.to_path_buf(),
            on_disk,
            removed: HashSet::new(),
            staged: IndexMap::new(),
            rewrite: overwrite,
        });
        Ok(self)
    }

    /// True when `path` is a readable archive whose entries all pass their CRC.
    pub fn check(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match verify(path) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "archive check failed");
                false
            }
        }
    }

    /// Parses `NONE`, `HIDDEN`, `ZANYSOFT` or `ALL`.
    pub fn set_skipped(&mut self, mode: &str) -> Result<&mut Self> {
        self.skip = mode.parse()?;
        Ok(self)
    }

    pub fn skipped(&self) -> SkipMode {
        self.skip
    }

    /// Base folder prepended to relative paths given to [`Zip::add`].
    pub fn set_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ArchiveError::MissingPath(path.to_path_buf()));
        }
        self.base = Some(path.to_path_buf());
        Ok(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    /// Folder mode for created extraction folders; out of range falls back
    /// to `0o777`.
    pub fn set_mask(&mut self, mask: u32) -> &mut Self {
        self.mask = if mask > 0 && mask <= 0o777 {
            mask
        } else {
            DEFAULT_MASK
        };
        self
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_open(&self) -> bool {
        self.archive.is_some()
    }

    fn current(&self) -> Result<&OpenArchive> {
        self.archive.as_ref().ok_or(ArchiveError::NotOpen)
    }

    fn current_mut(&mut self) -> Result<&mut OpenArchive> {
        self.archive.as_mut().ok_or(ArchiveError::NotOpen)
    }

    /// Entry names, including staged changes.
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.current()?.names())
    }

    /// Whether the open archive holds `name`, staged changes included.
    pub fn has(&self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Err(ArchiveError::InvalidFile);
        }
        let archive = self.current()?;
        Ok(archive.staged.contains_key(name) || archive.kept_on_disk().any(|entry| entry == name))
    }

    /// Stages an in-memory entry, replacing any entry of the same name.
    pub fn add_from_string(&mut self, name: &str, content: impl AsRef<[u8]>) -> Result<&mut Self> {
        if name.is_empty() {
            return Err(ArchiveError::InvalidFile);
        }
        let archive = self.current_mut()?;
        archive
            .staged
            .insert(name.to_string(), Staged::Bytes(content.as_ref().to_vec()));
        Ok(self)
    }

    /// Stages files or directories from the filesystem.
    ///
    /// Directories are walked recursively. With `flatroot` a directory's
    /// children land at the archive root instead of under the directory name.
    pub fn add<P: AsRef<Path>>(&mut self, paths: &[P], flatroot: bool) -> Result<&mut Self> {
        if paths.is_empty() {
            return Err(ArchiveError::engine(ArchiveErrorCode::NoEnt, "nothing to add"));
        }
        let mut staged = Vec::new();
        for path in paths {
            let path = self.resolve(path.as_ref());
            if !path.exists() {
                return Err(ArchiveError::engine(
                    ArchiveErrorCode::NoEnt,
                    path.display().to_string(),
                ));
            }
            self.collect(&path, flatroot, None, &mut staged)?;
        }
        let archive = self.current_mut()?;
        for (name, item) in staged {
            archive.staged.insert(name, item);
        }
        Ok(self)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base {
            Some(base) if !path.starts_with(base) => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn collect(
        &self,
        path: &Path,
        flatroot: bool,
        prefix: Option<&str>,
        out: &mut Vec<(String, Staged)>,
    ) -> Result<()> {
        let real = fs::canonicalize(path)
            .map_err(|err| ArchiveError::io(err, path.display().to_string()))?;
        let name = real
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if prefix.is_some() && self.skip.skips(&name) {
            return Ok(());
        }
        let target = format!("{}{name}", prefix.unwrap_or(""));

        if real.is_dir() {
            let child_prefix = if flatroot {
                None
            } else {
                out.push((format!("{target}/"), Staged::Dir));
                Some(format!("{target}/"))
            };
            let mut children: Vec<PathBuf> = fs::read_dir(&real)
                .map_err(|err| ArchiveError::io(err, real.display().to_string()))?
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<io::Result<_>>()
                .map_err(|err| ArchiveError::io(err, real.display().to_string()))?;
            children.sort();
            for child in children {
                self.collect(&child, false, Some(child_prefix.as_deref().unwrap_or("")), out)?;
            }
        } else if real.is_file() {
            out.push((target, Staged::File(real)));
        }
        Ok(())
    }

    /// Removes entries by name; every name must exist.
    pub fn delete(&mut self, names: &[&str]) -> Result<&mut Self> {
        if names.is_empty() {
            return Err(ArchiveError::engine(ArchiveErrorCode::NoEnt, "nothing to delete"));
        }
        let archive = self.current_mut()?;
        for name in names {
            let staged = archive.staged.shift_remove(*name).is_some();
            let on_disk = archive.on_disk.iter().any(|entry| entry == name);
            if !staged && (!on_disk || archive.removed.contains(*name)) {
                return Err(ArchiveError::engine(ArchiveErrorCode::NoEnt, *name));
            }
            if on_disk {
                archive.removed.insert(name.to_string());
            }
        }
        Ok(self)
    }

    /// Extracts `files`, or every entry not excluded by the skip mode, under
    /// `destination`.
    pub fn extract(&self, destination: impl AsRef<Path>, files: Option<&[&str]>) -> Result<()> {
        let destination = destination.as_ref();
        if destination.as_os_str().is_empty() {
            return Err(ArchiveError::InvalidDestination);
        }
        let archive = self.current()?;
        self.prepare_destination(destination)?;

        let wanted: Vec<String> = match files {
            Some(files) if !files.is_empty() => files.iter().map(|name| name.to_string()).collect(),
            _ => archive
                .names()
                .into_iter()
                .filter(|name| !self.skip.skips(name))
                .collect(),
        };

        let mut reader = if archive.kept_on_disk().next().is_some() {
            Some(open_reader(&archive.path)?)
        } else {
            None
        };

        for name in &wanted {
            let target = enclosed(destination, name)?;
            if let Some(item) = archive.staged.get(name) {
                write_staged(item, &target)?;
                continue;
            }
            let present = archive.kept_on_disk().any(|entry| entry == name);
            let Some(reader) = reader.as_mut().filter(|_| present) else {
                return Err(ArchiveError::engine(ArchiveErrorCode::NoEnt, name.as_str()));
            };
            let mut entry = reader.by_name(name)?;
            if entry.is_dir() {
                create_dir(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            let mut out = File::create(&target)
                .map_err(|err| ArchiveError::io(err, target.display().to_string()))?;
            io::copy(&mut entry, &mut out).map_err(|err| crc_or_io(err, name))?;
        }
        tracing::debug!(
            archive = %archive.path.display(),
            destination = %destination.display(),
            entries = wanted.len(),
            "extracted"
        );
        Ok(())
    }

    fn prepare_destination(&self, destination: &Path) -> Result<()> {
        if !destination.exists() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(self.mask);
            }
            builder
                .create(destination)
                .map_err(|_| ArchiveError::CreateFolder(destination.to_path_buf()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(destination, fs::Permissions::from_mode(self.mask))
                    .map_err(|_| ArchiveError::CreateFolder(destination.to_path_buf()))?;
            }
        }
        if tempfile::tempfile_in(destination).is_err() {
            return Err(ArchiveError::NotWritable(destination.to_path_buf()));
        }
        Ok(())
    }

    /// Writes staged changes and releases the archive.
    pub fn close(&mut self) -> Result<()> {
        let archive = self.archive.take().ok_or(ArchiveError::NotOpen)?;
        if !archive.dirty() {
            return Ok(());
        }
        write_archive(&archive)?;
        tracing::debug!(
            archive = %archive.path.display(),
            entries = archive.names().len(),
            "archive written"
        );
        Ok(())
    }
}

fn open_reader(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|err| ArchiveError::io(err, path.display().to_string()))?;
    Ok(ZipArchive::new(file)?)
}

fn read_names(path: &Path) -> Result<Vec<String>> {
    let mut archive = open_reader(path)?;
    let mut names = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        names.push(archive.by_index_raw(idx)?.name().to_string());
    }
    Ok(names)
}

fn verify(path: &Path) -> Result<()> {
    let mut archive = open_reader(path)?;
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx)?;
        let name = entry.name().to_string();
        io::copy(&mut entry, &mut io::sink()).map_err(|err| crc_or_io(err, &name))?;
    }
    Ok(())
}

fn crc_or_io(err: io::Error, name: &str) -> ArchiveError {
    if err.kind() == io::ErrorKind::InvalidData || err.to_string().contains("checksum") {
        ArchiveError::engine(ArchiveErrorCode::Crc, name)
    } else {
        ArchiveError::io(err, name)
    }
}

/// Joins an entry name under `root`, rejecting names that escape it.
fn enclosed(root: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || !safe {
        return Err(ArchiveError::engine(ArchiveErrorCode::Inval, name));
    }
    Ok(root.join(relative))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|_| ArchiveError::CreateFolder(path.to_path_buf()))
}

fn write_staged(item: &Staged, target: &Path) -> Result<()> {
    if let Staged::Dir = item {
        return create_dir(target);
    }
    if let Some(parent) = target.parent() {
        create_dir(parent)?;
    }
    let written = match item {
        Staged::Bytes(bytes) => fs::write(target, bytes),
        Staged::File(source) => fs::copy(source, target).map(|_| ()),
        Staged::Dir => Ok(()),
    };
    written.map_err(|err| ArchiveError::io(err, target.display().to_string()))
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn write_archive(archive: &OpenArchive) -> Result<()> {
    let dir = match archive.path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = NamedTempFile::new_in(&dir)
        .map_err(|err| ArchiveError::engine(ArchiveErrorCode::TmpOpen, err.to_string()))?;
    let handle = tmp
        .reopen()
        .map_err(|err| ArchiveError::engine(ArchiveErrorCode::TmpOpen, err.to_string()))?;
    let mut writer = ZipWriter::new(handle);

    let kept: Vec<&String> = archive.kept_on_disk().collect();
    if !kept.is_empty() {
        let mut source = open_reader(&archive.path)?;
        for name in kept {
            let entry = source.by_name(name)?;
            writer.raw_copy_file(entry)?;
        }
    }

    for (name, item) in &archive.staged {
        match item {
            Staged::Dir => {
                writer.add_directory(name.as_str(), file_options())?;
            }
            Staged::Bytes(bytes) => {
                writer.start_file(name.as_str(), file_options())?;
                writer
                    .write_all(bytes)
                    .map_err(|err| ArchiveError::engine(ArchiveErrorCode::Write, err.to_string()))?;
            }
            Staged::File(source) => {
                writer.start_file(name.as_str(), file_options())?;
                let mut input =
                    File::open(source).map_err(|err| ArchiveError::io(err, source.display().to_string()))?;
                io::copy(&mut input, &mut writer)
                    .map_err(|err| ArchiveError::engine(ArchiveErrorCode::Write, err.to_string()))?;
            }
        }
    }

    let mut file = writer.finish()?;
    file.flush()
        .and_then(|()| file.sync_all())
        .map_err(|err| ArchiveError::engine(ArchiveErrorCode::Close, err.to_string()))?;
    tmp.persist(&archive.path)
        .map_err(|err| ArchiveError::engine(ArchiveErrorCode::Rename, err.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = open_reader(path).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn skip_modes_parse_case_insensitively() {
        assert_eq!("hidden".parse::<SkipMode>().unwrap(), SkipMode::Hidden);
        assert_eq!("ALL".parse::<SkipMode>().unwrap(), SkipMode::All);
        assert!(matches!(
            "system".parse::<SkipMode>(),
            Err(ArchiveError::UnsupportedSkipMode(_))
        ));
        assert!(SkipMode::Hidden.skips(".env"));
        assert!(!SkipMode::Zanysoft.skips(".env"));
        assert!(SkipMode::Zanysoft.skips("._icon"));
        assert!(!SkipMode::None.skips("._icon"));
    }

    #[test]
    fn mask_out_of_range_falls_back() {
        let mut zip = Zip::new();
        assert_eq!(zip.set_mask(0o755).mask(), 0o755);
        assert_eq!(zip.set_mask(0).mask(), DEFAULT_MASK);
        assert_eq!(zip.set_mask(0o1777).mask(), DEFAULT_MASK);
    }

    #[test]
    fn create_add_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bucket.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("2026/10/16_7.txt", "first").unwrap();
        zip.close().unwrap();

        zip.create(&path, false).unwrap();
        zip.add_from_string("2026/10/16_8.txt", "second").unwrap();
        assert!(zip.has("2026/10/16_7.txt").unwrap());
        zip.close().unwrap();

        zip.open(&path).unwrap();
        assert_eq!(
            zip.list_files().unwrap(),
            vec!["2026/10/16_7.txt", "2026/10/16_8.txt"]
        );
        zip.close().unwrap();
        assert_eq!(read_entry(&path, "2026/10/16_7.txt"), "first");
        assert!(Zip::check(&path));
    }

    #[test]
    fn add_from_string_replaces_same_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("entry.txt", "old").unwrap();
        zip.close().unwrap();
        zip.create(&path, false).unwrap();
        zip.add_from_string("entry.txt", "new").unwrap();
        zip.close().unwrap();

        zip.open(&path).unwrap();
        assert_eq!(zip.list_files().unwrap(), vec!["entry.txt"]);
        assert_eq!(read_entry(&path, "entry.txt"), "new");
    }

    #[test]
    fn overwrite_requires_a_valid_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("old.txt", "x").unwrap();
        zip.close().unwrap();

        zip.create(&path, true).unwrap();
        zip.add_from_string("new.txt", "y").unwrap();
        zip.close().unwrap();
        zip.open(&path).unwrap();
        assert_eq!(zip.list_files().unwrap(), vec!["new.txt"]);

        let garbage = dir.path().join("garbage.zip");
        fs::write(&garbage, b"not a zip").unwrap();
        assert!(!Zip::check(&garbage));
        let err = zip.create(&garbage, true).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::NoZip));
    }

    #[test]
    fn open_missing_archive_is_noent() {
        let dir = TempDir::new().unwrap();
        let err = Zip::new().open(dir.path().join("nope.zip")).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::NoEnt));
    }

    #[test]
    fn add_walks_directories_with_skip_mode() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("logs");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join(".secret"), "s").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();

        let path = dir.path().join("out.zip");
        let mut zip = Zip::new();
        zip.set_skipped("hidden").unwrap();
        zip.create(&path, false).unwrap();
        zip.add(&[&src], false).unwrap();
        let names = zip.list_files().unwrap();
        assert_eq!(
            names,
            vec!["logs/", "logs/a.txt", "logs/nested/", "logs/nested/b.txt"]
        );
        zip.close().unwrap();

        let flat = dir.path().join("flat.zip");
        zip.create(&flat, false).unwrap();
        zip.set_path(dir.path()).unwrap();
        zip.add(&["logs"], true).unwrap();
        assert_eq!(
            zip.list_files().unwrap(),
            vec!["a.txt", "nested/", "nested/b.txt"]
        );
        zip.close().unwrap();
    }

    #[test]
    fn add_missing_path_is_noent() {
        let dir = TempDir::new().unwrap();
        let mut zip = Zip::new();
        zip.create(dir.path().join("a.zip"), false).unwrap();
        let err = zip.add(&[dir.path().join("ghost")], false).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::NoEnt));
    }

    #[test]
    fn delete_requires_existing_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("keep.txt", "k").unwrap();
        zip.add_from_string("drop.txt", "d").unwrap();
        zip.close().unwrap();

        zip.open(&path).unwrap();
        zip.delete(&["drop.txt"]).unwrap();
        let err = zip.delete(&["drop.txt"]).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::NoEnt));
        zip.close().unwrap();

        zip.open(&path).unwrap();
        assert_eq!(zip.list_files().unwrap(), vec!["keep.txt"]);
    }

    #[test]
    fn extract_subset_creates_destination() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("2026/10/16_1.txt", "one").unwrap();
        zip.add_from_string("2026/10/16_2.txt", "two").unwrap();
        zip.add_from_string(".hidden", "h").unwrap();
        zip.close().unwrap();

        let dest = dir.path().join("out/deeper");
        zip.open(&path).unwrap();
        zip.set_mask(0o750);
        zip.extract(&dest, Some(&["2026/10/16_2.txt"])).unwrap();
        assert_eq!(fs::read_to_string(dest.join("2026/10/16_2.txt")).unwrap(), "two");
        assert!(!dest.join("2026/10/16_1.txt").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o750);
        }

        let all = dir.path().join("all");
        zip.set_skipped("all").unwrap();
        zip.extract(&all, None).unwrap();
        assert!(all.join("2026/10/16_1.txt").exists());
        assert!(!all.join(".hidden").exists());
    }

    #[test]
    fn extract_rejects_escaping_and_unknown_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        let mut zip = Zip::new();
        zip.create(&path, false).unwrap();
        zip.add_from_string("ok.txt", "ok").unwrap();
        zip.close().unwrap();
        zip.open(&path).unwrap();

        let err = zip.extract(dir.path(), Some(&["../evil.txt"])).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::Inval));
        let err = zip.extract(dir.path(), Some(&["missing.txt"])).unwrap_err();
        assert_eq!(err.code(), Some(ArchiveErrorCode::NoEnt));
        assert!(matches!(
            zip.extract("", None),
            Err(ArchiveError::InvalidDestination)
        ));
    }

    #[test]
    fn operations_need_an_open_archive() {
        let mut zip = Zip::new();
        assert!(matches!(zip.list_files(), Err(ArchiveError::NotOpen)));
        assert!(matches!(zip.close(), Err(ArchiveError::NotOpen)));
        assert!(matches!(
            zip.add_from_string("a", "b"),
            Err(ArchiveError::NotOpen)
        ));
    }
}
