//! JSON snapshot persistence for [`MemoryStore`].
//!
//! The whole store is rewritten after every mutation made outside a
//! transaction and after every outermost commit. Writes go to a temp file in
//! the same directory, are fsynced, then renamed over the snapshot so a
//! reader always sees either the old or the new state.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{MemoryStore, NewRecord, RecordFilter, RecordQuery, RecordRow, StatusQuery, Store};
use crate::error::StoreError;
use crate::ledger::{NewStatus, OwnerRef, RecordId, StatusId, StatusRecord};

/// Current snapshot schema. Increment on breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    store: MemoryStore,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    schema_version: u32,
    store: &'a MemoryStore,
}

/// A [`MemoryStore`] mirrored to a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens the snapshot at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let inner = match std::fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|err| persist_error(&path, err))?;
                if snapshot.schema_version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        got: snapshot.schema_version,
                    });
                }
                snapshot.store
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => MemoryStore::new(),
            Err(err) => return Err(persist_error(&path, err)),
        };
        tracing::debug!(path = %path.display(), "opened store snapshot");
        Ok(Self { path, inner })
    }

    /// Snapshot file written after every committed change.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory tables backing the snapshot.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn flush(&self) -> Result<(), StoreError> {
        if self.inner.depth() > 0 {
            return Ok(());
        }
        write_atomic(&self.path, &self.inner).map_err(|err| persist_error(&self.path, err))
    }
}

fn persist_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Persist {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn write_atomic(path: &Path, store: &MemoryStore) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let bytes = serde_json::to_vec_pretty(&SnapshotRef {
        schema_version: SCHEMA_VERSION,
        store,
    })?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    // Directory fsync makes the rename durable; not supported everywhere.
    if let Ok(handle) = File::open(&dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

impl Store for FileStore {
    fn begin(&mut self) {
        self.inner.begin();
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()?;
        self.flush()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }

    fn insert_record(&mut self, record: NewRecord) -> Result<RecordRow, StoreError> {
        let row = self.inner.insert_record(record)?;
        self.flush()?;
        Ok(row)
    }

    fn find_record(&self, kind: &str, id: RecordId) -> Result<Option<RecordRow>, StoreError> {
        self.inner.find_record(kind, id)
    }

    fn update_record(&mut self, row: &RecordRow) -> Result<(), StoreError> {
        self.inner.update_record(row)?;
        self.flush()
    }

    fn select_records(&self, kind: &str, query: &RecordQuery) -> Result<Vec<RecordRow>, StoreError> {
        self.inner.select_records(kind, query)
    }

    fn delete_records(&mut self, kind: &str, filter: &RecordFilter) -> Result<usize, StoreError> {
        let deleted = self.inner.delete_records(kind, filter)?;
        self.flush()?;
        Ok(deleted)
    }

    fn insert_status(&mut self, status: NewStatus) -> Result<StatusRecord, StoreError> {
        let record = self.inner.insert_status(status)?;
        self.flush()?;
        Ok(record)
    }

    fn find_status(&self, id: StatusId) -> Result<Option<StatusRecord>, StoreError> {
        self.inner.find_status(id)
    }

    fn update_status(&mut self, status: &StatusRecord) -> Result<(), StoreError> {
        self.inner.update_status(status)?;
        self.flush()
    }

    fn statuses_for(&self, owner: &OwnerRef) -> Result<Vec<StatusRecord>, StoreError> {
        self.inner.statuses_for(owner)
    }

    fn next_status(
        &self,
        query: &StatusQuery,
        after: Option<StatusId>,
    ) -> Result<Option<StatusRecord>, StoreError> {
        self.inner.next_status(query, after)
    }

    fn delete_statuses(&mut self, owner_kind: &str, owner_ids: &[RecordId]) -> Result<usize, StoreError> {
        let deleted = self.inner.delete_statuses(owner_kind, owner_ids)?;
        self.flush()?;
        Ok(deleted)
    }
}
