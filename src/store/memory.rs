use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{NewRecord, Order, RecordFilter, RecordQuery, RecordRow, StatusQuery, Store};
use crate::error::StoreError;
use crate::ledger::{NewStatus, OwnerRef, RecordId, StatusId, StatusRecord};

/// Injectable failure sites, test builds only.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    InsertRecord,
    UpdateRecord,
    DeleteRecords,
    InsertStatus,
    UpdateStatus,
    DeleteStatuses,
}

#[cfg(test)]
impl FailPoint {
    fn site(self) -> &'static str {
        match self {
            FailPoint::InsertRecord => "insert_record",
            FailPoint::UpdateRecord => "update_record",
            FailPoint::DeleteRecords => "delete_records",
            FailPoint::InsertStatus => "insert_status",
            FailPoint::UpdateStatus => "update_status",
            FailPoint::DeleteStatuses => "delete_statuses",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Tables {
    records: BTreeMap<String, BTreeMap<RecordId, RecordRow>>,
    statuses: BTreeMap<StatusId, StatusRecord>,
    last_record_id: RecordId,
    last_status_id: StatusId,
}

/// In-memory [`Store`] with snapshot based nested transactions.
///
/// Serializes to its committed tables only; open transactions are not
/// part of the serialized form.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    tables: Tables,
    #[serde(skip)]
    savepoints: Vec<Tables>,
    #[cfg(test)]
    #[serde(skip)]
    fail_points: Vec<FailPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open transactions.
    pub fn depth(&self) -> usize {
        self.savepoints.len()
    }

    /// Stored records of `kind`.
    pub fn record_count(&self, kind: &str) -> usize {
        self.tables.records.get(kind).map_or(0, BTreeMap::len)
    }

    /// History rows across all owners.
    pub fn status_count(&self) -> usize {
        self.tables.statuses.len()
    }

    /// Arms a one-shot failure for the next call reaching `point`.
    #[cfg(test)]
    pub(crate) fn fail_on(&mut self, point: FailPoint) {
        self.fail_points.push(point);
    }

    #[cfg(test)]
    fn trip(&mut self, point: FailPoint) -> Result<(), StoreError> {
        match self.fail_points.iter().position(|armed| *armed == point) {
            Some(idx) => {
                self.fail_points.remove(idx);
                Err(StoreError::Injected(point.site()))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
macro_rules! trip {
    ($store:expr, $point:ident) => {
        $store.trip(FailPoint::$point)?
    };
}

#[cfg(not(test))]
macro_rules! trip {
    ($store:expr, $point:ident) => {};
}

impl Store for MemoryStore {
    fn begin(&mut self) {
        self.savepoints.push(self.tables.clone());
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let saved = self.savepoints.pop().ok_or(StoreError::NoTransaction)?;
        self.tables = saved;
        Ok(())
    }

    fn insert_record(&mut self, record: NewRecord) -> Result<RecordRow, StoreError> {
        trip!(self, InsertRecord);
        self.tables.last_record_id += 1;
        let row = RecordRow {
            kind: record.kind,
            id: self.tables.last_record_id,
            status: record.status,
            attributes: record.attributes,
            created_at: record.created_at,
            updated_at: record.created_at,
        };
        self.tables
            .records
            .entry(row.kind.clone())
            .or_default()
            .insert(row.id, row.clone());
        Ok(row)
    }

    fn find_record(&self, kind: &str, id: RecordId) -> Result<Option<RecordRow>, StoreError> {
        Ok(self
            .tables
            .records
            .get(kind)
            .and_then(|rows| rows.get(&id))
            .cloned())
    }

    fn update_record(&mut self, row: &RecordRow) -> Result<(), StoreError> {
        trip!(self, UpdateRecord);
        let slot = self
            .tables
            .records
            .get_mut(&row.kind)
            .and_then(|rows| rows.get_mut(&row.id))
            .ok_or_else(|| StoreError::RecordNotFound {
                kind: row.kind.clone(),
                id: row.id,
            })?;
        *slot = row.clone();
        Ok(())
    }

    fn select_records(&self, kind: &str, query: &RecordQuery) -> Result<Vec<RecordRow>, StoreError> {
        let mut rows: Vec<RecordRow> = self
            .tables
            .records
            .get(kind)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|row| query.filter.matches(row))
            .cloned()
            .collect();

        let projection = &query.projection;
        match projection.order {
            Order::IdAsc => {}
            Order::IdDesc => rows.reverse(),
            Order::CreatedAsc => rows.sort_by_key(|row| (row.created_at, row.id)),
            Order::CreatedDesc => {
                rows.sort_by_key(|row| (row.created_at, row.id));
                rows.reverse();
            }
        }

        let offset = projection.offset.unwrap_or(0);
        let limit = projection.limit.unwrap_or(usize::MAX);
        let mut rows: Vec<RecordRow> = rows.into_iter().skip(offset).take(limit).collect();

        if let Some(columns) = &projection.columns {
            for row in &mut rows {
                if let serde_json::Value::Object(map) = &mut row.attributes {
                    map.retain(|key, _| columns.iter().any(|column| column == key));
                }
            }
        }
        Ok(rows)
    }

    fn delete_records(&mut self, kind: &str, filter: &RecordFilter) -> Result<usize, StoreError> {
        trip!(self, DeleteRecords);
        let Some(rows) = self.tables.records.get_mut(kind) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, row| !filter.matches(row));
        Ok(before - rows.len())
    }

    fn insert_status(&mut self, status: NewStatus) -> Result<StatusRecord, StoreError> {
        trip!(self, InsertStatus);
        self.tables.last_status_id += 1;
        let record = StatusRecord {
            id: self.tables.last_status_id,
            owner: status.owner,
            status: status.status,
            payload: status.payload,
            status_type: status.status_type,
            compressed_at: None,
            extracted_at: None,
            created_at: status.created_at,
            updated_at: status.created_at,
        };
        self.tables.statuses.insert(record.id, record.clone());
        Ok(record)
    }

    fn find_status(&self, id: StatusId) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.tables.statuses.get(&id).cloned())
    }

    fn update_status(&mut self, status: &StatusRecord) -> Result<(), StoreError> {
        trip!(self, UpdateStatus);
        let slot = self
            .tables
            .statuses
            .get_mut(&status.id)
            .ok_or(StoreError::StatusNotFound(status.id))?;
        *slot = status.clone();
        Ok(())
    }

    fn statuses_for(&self, owner: &OwnerRef) -> Result<Vec<StatusRecord>, StoreError> {
        let mut history: Vec<StatusRecord> = self
            .tables
            .statuses
            .values()
            .filter(|status| &status.owner == owner)
            .cloned()
            .collect();
        history.sort_by_key(|status| (status.created_at, status.id));
        Ok(history)
    }

    fn next_status(
        &self,
        query: &StatusQuery,
        after: Option<StatusId>,
    ) -> Result<Option<StatusRecord>, StoreError> {
        let start = after.map_or(0, |id| id.saturating_add(1));
        Ok(self
            .tables
            .statuses
            .range(start..)
            .map(|(_, status)| status)
            .find(|status| query.matches(status))
            .cloned())
    }

    fn delete_statuses(&mut self, owner_kind: &str, owner_ids: &[RecordId]) -> Result<usize, StoreError> {
        trip!(self, DeleteStatuses);
        let before = self.tables.statuses.len();
        self.tables.statuses.retain(|_, status| {
            !(status.owner.kind == owner_kind && owner_ids.contains(&status.owner.id))
        });
        Ok(before - self.tables.statuses.len())
    }
}
