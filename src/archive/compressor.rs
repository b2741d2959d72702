//! Moves status payloads between the row, a scratch disk and the remote
//! archive store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::disk::{Disk, LocalDisk};
use super::zip::Zip;
use crate::error::{ArchiveError, ArchiveErrorCode, ConfigError, Result, StoreError};
use crate::ledger::{PayloadTier, StatusId, StatusRecord};
use crate::store::{self, SharedStore};

/// How payload entries are named inside an hourly archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryLayout {
    /// `Y/m/d_<owner>_Y_m_d.txt`. Statuses of one owner created in the same
    /// hour share an entry; the last compressed one wins.
    #[default]
    OwnerDay,
    /// `Y/m/d_<owner>_Y_m_d_<status>.txt`, one entry per status row.
    PerStatus,
}

/// Remote path of the hourly bucket holding `status`.
pub fn archive_path(status: &StatusRecord) -> String {
    format!("Status/{}.zip", status.created_at.format("%Y%m/%d/%H"))
}

/// Entry name of `status` inside its bucket.
pub fn entry_name(status: &StatusRecord, layout: EntryLayout) -> String {
    let created = status.created_at;
    let base = format!(
        "{}{}{}",
        created.format("%Y/%m/%d_"),
        status.owner.id,
        created.format("_%Y_%m_%d"),
    );
    match layout {
        EntryLayout::OwnerDay => format!("{base}.txt"),
        EntryLayout::PerStatus => format!("{base}_{}.txt", status.id),
    }
}

/// Temp files removed on every exit path.
struct Scratch<'a> {
    disk: &'a LocalDisk,
    paths: Vec<String>,
}

impl<'a> Scratch<'a> {
    fn new(disk: &'a LocalDisk) -> Self {
        Self {
            disk,
            paths: Vec::new(),
        }
    }

    fn track(&mut self, path: &str) {
        self.paths.push(path.to_string());
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(err) = self.disk.delete(path) {
                tracing::warn!(path = %path, error = %err, "failed to remove temp file");
            }
        }
    }
}

/// Exclusive use of one hourly bucket. The bucket's map entry is dropped
/// with the last lease, so the map only holds buckets in use.
struct BucketLease<'a> {
    buckets: &'a Mutex<HashMap<String, Arc<Mutex<()>>>>,
    path: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for BucketLease<'_> {
    fn drop(&mut self) {
        let Ok(mut buckets) = self.buckets.lock() else {
            return;
        };
        // The map and this lease are the only holders left.
        if Arc::strong_count(&self.lock) == 2 {
            buckets.remove(&self.path);
        }
    }
}

/// Tiered archival of status payloads.
pub struct Compressor {
    /// Store holding the status rows.
    store: SharedStore,
    /// Durable archive location.
    remote: Arc<dyn Disk>,
    /// Scratch area for archives being rewritten.
    temp: LocalDisk,
    /// Naming of entries inside a bucket.
    layout: EntryLayout,
    /// Per-bucket locks, keyed by archive path, for buckets currently in use.
    buckets: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("remote", &self.remote)
            .field("temp", &self.temp)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Compressor {
    /// Fails when the two disks resolve to the same location: cleaning the
    /// scratch copy would then delete the archive itself.
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn Disk>,
        temp: LocalDisk,
    ) -> std::result::Result<Self, ConfigError> {
        let identity = temp.identity();
        if remote.identity() == identity {
            return Err(ConfigError::SharedDisk(identity));
        }
        Ok(Self {
            store,
            remote,
            temp,
            layout: EntryLayout::default(),
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the default [`EntryLayout::OwnerDay`] naming.
    pub fn with_layout(mut self, layout: EntryLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Entry naming in use.
    pub fn layout(&self) -> EntryLayout {
        self.layout
    }

    /// Store the status rows are read from and written to.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    fn lease_bucket(&self, path: &str) -> Result<BucketLease<'_>> {
        let mut buckets = self.buckets.lock().map_err(StoreError::from)?;
        let lock = buckets.entry(path.to_string()).or_default().clone();
        Ok(BucketLease {
            buckets: &self.buckets,
            path: path.to_string(),
            lock,
        })
    }

    #[cfg(test)]
    fn buckets_in_use(&self) -> usize {
        self.buckets.lock().map_or(0, |buckets| buckets.len())
    }

    fn load(&self, id: StatusId) -> Result<StatusRecord> {
        let guard = store::lock(&self.store)?;
        Ok(guard
            .find_status(id)?
            .ok_or(StoreError::StatusNotFound(id))?)
    }

    fn persist(&self, status: &mut StatusRecord, mut updated: StatusRecord) -> Result<()> {
        updated.updated_at = Utc::now();
        let mut guard = store::lock(&self.store)?;
        guard.update_status(&updated)?;
        *status = updated;
        Ok(())
    }

    /// Loads status `id` and [compresses](Self::compress) it.
    pub fn compress_by_id(&self, id: StatusId) -> Result<StatusRecord> {
        let mut status = self.load(id)?;
        self.compress(&mut status)?;
        Ok(status)
    }

    /// Loads status `id` and [extracts](Self::extract) it.
    pub fn extract_by_id(&self, id: StatusId) -> Result<StatusRecord> {
        let mut status = self.load(id)?;
        self.extract(&mut status)?;
        Ok(status)
    }

    /// Loads status `id` and [purges](Self::purge) it.
    pub fn purge_by_id(&self, id: StatusId) -> Result<StatusRecord> {
        let mut status = self.load(id)?;
        self.purge(&mut status)?;
        Ok(status)
    }

    /// Moves the payload into the hourly archive on the remote disk.
    ///
    /// An extracted status already has its bytes archived, so it is only
    /// flipped back to compressed. A compressed status is left alone: its
    /// row no longer holds the payload.
    pub fn compress(&self, status: &mut StatusRecord) -> Result<()> {
        if status.tier() == PayloadTier::Compressed {
            tracing::debug!(status_id = status.id, "already compressed");
            return Ok(());
        }
        if status.extracted_at.is_some() {
            let updated = StatusRecord {
                payload: None,
                extracted_at: None,
                compressed_at: Some(Utc::now()),
                ..status.clone()
            };
            self.persist(status, updated)?;
            tracing::debug!(status_id = status.id, "re-compressed extracted payload");
            return Ok(());
        }

        let archive = archive_path(status);
        let entry = entry_name(status, self.layout);
        let lease = self.lease_bucket(&archive)?;
        let _held = lease.lock.lock().map_err(StoreError::from)?;

        let mut scratch = Scratch::new(&self.temp);
        scratch.track(&archive);

        if self.remote.exists(&archive)? {
            let mut source = self.remote.reader(&archive)?;
            self.temp.write_stream(&archive, &mut source)?;
        }

        let local = self.temp.path(&archive);
        if let Some(dir) = local.parent() {
            std::fs::create_dir_all(dir).map_err(|_| ArchiveError::CreateFolder(dir.to_path_buf()))?;
        }

        let mut zip = Zip::new();
        zip.create(&local, false)?;
        if zip.has(&entry)? {
            tracing::warn!(
                status_id = status.id,
                archive = %archive,
                entry = %entry,
                "replacing existing archive entry"
            );
        }
        zip.add_from_string(&entry, status.payload.as_deref().unwrap_or(""))?;
        zip.close()?;

        let mut upload = self.temp.reader(&archive)?;
        self.remote.write_stream(&archive, &mut upload)?;
        drop(upload);
        drop(scratch);

        let updated = StatusRecord {
            payload: None,
            compressed_at: Some(Utc::now()),
            ..status.clone()
        };
        self.persist(status, updated)?;
        tracing::info!(status_id = status.id, archive = %archive, entry = %entry, "compressed");
        Ok(())
    }

    /// Restores the archived payload into the row.
    pub fn extract(&self, status: &mut StatusRecord) -> Result<()> {
        let archive = archive_path(status);
        let entry = entry_name(status, self.layout);
        let lease = self.lease_bucket(&archive)?;
        let _held = lease.lock.lock().map_err(StoreError::from)?;

        let mut scratch = Scratch::new(&self.temp);
        scratch.track(&entry);
        scratch.track(&archive);

        let mut source = self.remote.reader(&archive)?;
        self.temp.write_stream(&archive, &mut source)?;

        let mut zip = Zip::new();
        zip.open(self.temp.path(&archive))?;
        zip.extract(self.temp.root(), Some(&[entry.as_str()]))?;
        zip.close()?;

        let bytes = self.temp.get(&entry)?;
        let payload = String::from_utf8(bytes).map_err(|_| {
            ArchiveError::engine(ArchiveErrorCode::Inval, format!("{entry} is not valid UTF-8"))
        })?;

        let updated = StatusRecord {
            payload: Some(payload),
            extracted_at: Some(Utc::now()),
            ..status.clone()
        };
        self.persist(status, updated)?;
        drop(scratch);
        tracing::info!(status_id = status.id, archive = %archive, entry = %entry, "extracted");
        Ok(())
    }

    /// Drops a restored payload, returning the row to compressed.
    ///
    /// Only extracted rows are touched: a hot row holds the only copy of its
    /// payload and a compressed row has nothing to drop.
    pub fn purge(&self, status: &mut StatusRecord) -> Result<()> {
        if status.tier() != PayloadTier::Extracted {
            tracing::debug!(status_id = status.id, tier = ?status.tier(), "nothing to purge");
            return Ok(());
        }
        let updated = StatusRecord {
            payload: None,
            extracted_at: None,
            ..status.clone()
        };
        self.persist(status, updated)?;
        tracing::debug!(status_id = status.id, "purged extracted payload");
        Ok(())
    }
}
