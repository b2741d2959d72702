//! Persistence seam for tracked records and their status history.
//!
//! The ledger only needs a handful of row operations plus nested
//! transactions; [`MemoryStore`] implements them in memory and
//! [`file`] snapshots it to disk for the command line.

pub mod file;
mod memory;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ledger::{NewStatus, OwnerRef, RecordId, StatusId, StatusRecord, StatusType};

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use memory::FailPoint;

/// Store handle shared by the ledger, the compressor and the sweeps.
pub type SharedStore = Arc<Mutex<dyn Store + Send>>;

/// Wraps a concrete store into a [`SharedStore`].
pub fn shared<S: Store + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub(crate) fn lock(store: &SharedStore) -> Result<MutexGuard<'_, dyn Store + Send + 'static>, StoreError> {
    store.lock().map_err(StoreError::from)
}

/// Row of a tracked record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub kind: String,
    pub id: RecordId,
    pub status: Option<i64>,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a record row that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub kind: String,
    pub status: Option<i64>,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Row predicate for tracked records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub ids: Option<Vec<RecordId>>,
    pub statuses: Option<Vec<i64>>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_at_or_before: Option<DateTime<Utc>>,
}

impl RecordFilter {
    /// Every set criterion holds for `row`.
    pub fn matches(&self, row: &RecordRow) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&row.id) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            match row.status {
                Some(code) if statuses.contains(&code) => {}
                _ => return false,
            }
        }
        if let Some(before) = self.created_before {
            if row.created_at >= before {
                return false;
            }
        }
        if let Some(cutoff) = self.created_at_or_before {
            if row.created_at > cutoff {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    IdAsc,
    IdDesc,
    CreatedAsc,
    CreatedDesc,
}

/// Display-only shaping of a record listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub columns: Option<Vec<String>>,
    pub order: Order,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Query over tracked records of one kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub filter: RecordFilter,
    pub projection: Projection,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these record ids.
    pub fn ids(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.filter.ids = Some(ids.into_iter().collect());
        self
    }

    /// Only records whose status code is one of `codes`.
    pub fn status_in(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.filter.statuses = Some(codes.into_iter().collect());
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.filter.created_before = Some(at);
        self
    }

    pub fn created_at_or_before(mut self, at: DateTime<Utc>) -> Self {
        self.filter.created_at_or_before = Some(at);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.projection.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.projection.order = order;
        self
    }

    /// Caps the listing. Bulk deletes ignore it.
    pub fn limit(mut self, limit: usize) -> Self {
        self.projection.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.projection.offset = Some(offset);
        self
    }

    /// Same predicate, without any column, order, limit or offset shaping.
    pub fn without_projection(&self) -> RecordQuery {
        RecordQuery {
            filter: self.filter.clone(),
            projection: Projection::default(),
        }
    }
}

/// Predicate used by the maintenance sweeps to stream status rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusQuery {
    pub owner_kind: Option<String>,
    pub owner_id: Option<RecordId>,
    pub uncompressed: bool,
    pub created_before: Option<DateTime<Utc>>,
    pub extracted_before: Option<DateTime<Utc>>,
    pub with_payload: bool,
    pub status_type: Option<StatusType>,
}

impl StatusQuery {
    /// Rows that were never compressed and are older than `threshold`.
    pub fn compressible(threshold: DateTime<Utc>, owner_kind: Option<&str>) -> Self {
        Self {
            owner_kind: owner_kind.map(str::to_string),
            uncompressed: true,
            created_before: Some(threshold),
            ..Self::default()
        }
    }

    /// Extracted rows still holding a payload, extracted before `threshold`.
    pub fn purgeable(threshold: DateTime<Utc>) -> Self {
        Self {
            extracted_before: Some(threshold),
            with_payload: true,
            ..Self::default()
        }
    }

    /// Every set criterion holds for `status`.
    pub fn matches(&self, status: &StatusRecord) -> bool {
        if let Some(kind) = &self.owner_kind {
            if &status.owner.kind != kind {
                return false;
            }
        }
        if let Some(id) = self.owner_id {
            if status.owner.id != id {
                return false;
            }
        }
        if self.uncompressed && status.compressed_at.is_some() {
            return false;
        }
        if let Some(before) = self.created_before {
            if status.created_at >= before {
                return false;
            }
        }
        if let Some(before) = self.extracted_before {
            match status.extracted_at {
                Some(at) if at < before => {}
                _ => return false,
            }
        }
        if self.with_payload && status.payload.is_none() {
            return false;
        }
        if let Some(kind) = self.status_type {
            if status.status_type != Some(kind) {
                return false;
            }
        }
        true
    }
}

/// Row storage for tracked records and their history.
///
/// Transactions nest: every `begin` must be closed by exactly one `commit` or
/// `rollback`, and a rollback restores the state seen at the matching `begin`.
pub trait Store {
    fn begin(&mut self);
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    fn insert_record(&mut self, record: NewRecord) -> Result<RecordRow, StoreError>;
    fn find_record(&self, kind: &str, id: RecordId) -> Result<Option<RecordRow>, StoreError>;
    fn update_record(&mut self, row: &RecordRow) -> Result<(), StoreError>;
    fn select_records(&self, kind: &str, query: &RecordQuery) -> Result<Vec<RecordRow>, StoreError>;
    fn delete_records(&mut self, kind: &str, filter: &RecordFilter) -> Result<usize, StoreError>;

    fn insert_status(&mut self, status: NewStatus) -> Result<StatusRecord, StoreError>;
    fn find_status(&self, id: StatusId) -> Result<Option<StatusRecord>, StoreError>;
    fn update_status(&mut self, status: &StatusRecord) -> Result<(), StoreError>;
    /// History of one owner, oldest first.
    fn statuses_for(&self, owner: &OwnerRef) -> Result<Vec<StatusRecord>, StoreError>;
    /// First row matching `query` with an id greater than `after`.
    fn next_status(
        &self,
        query: &StatusQuery,
        after: Option<StatusId>,
    ) -> Result<Option<StatusRecord>, StoreError>;
    fn delete_statuses(&mut self, owner_kind: &str, owner_ids: &[RecordId]) -> Result<usize, StoreError>;
}

/// Runs `f` inside a transaction, committing on success and rolling back on error.
pub fn transaction<T, E>(
    store: &mut dyn Store,
    f: impl FnOnce(&mut dyn Store) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    store.begin();
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(id: RecordId, status: Option<i64>, age_days: i64) -> RecordRow {
        let at = Utc::now() - Duration::days(age_days);
        RecordRow {
            kind: "order".into(),
            id,
            status,
            attributes: serde_json::json!({}),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn record_filter_combines_predicates() {
        let filter = RecordQuery::new()
            .status_in([1, 2])
            .created_before(Utc::now() - Duration::days(1))
            .filter;
        assert!(filter.matches(&row(1, Some(1), 3)));
        assert!(!filter.matches(&row(2, Some(0), 3)));
        assert!(!filter.matches(&row(3, None, 3)));
        assert!(!filter.matches(&row(4, Some(2), 0)));
    }

    #[test]
    fn without_projection_keeps_only_the_filter() {
        let query = RecordQuery::new()
            .ids([1, 2, 3])
            .columns(["id"])
            .order(Order::CreatedDesc)
            .limit(1)
            .offset(2);
        let bare = query.without_projection();
        assert_eq!(bare.filter, query.filter);
        assert_eq!(bare.projection, Projection::default());
    }

    #[test]
    fn purgeable_requires_extracted_payload() {
        let now = Utc::now();
        let query = StatusQuery::purgeable(now);
        let mut status = StatusRecord {
            id: 1,
            owner: OwnerRef::new("order", 1),
            status: 0,
            payload: Some("x".into()),
            status_type: None,
            compressed_at: Some(now - Duration::days(5)),
            extracted_at: Some(now - Duration::days(3)),
            created_at: now - Duration::days(6),
            updated_at: now,
        };
        assert!(query.matches(&status));
        status.payload = None;
        assert!(!query.matches(&status));
        status.payload = Some("x".into());
        status.extracted_at = None;
        assert!(!query.matches(&status));
    }
}
