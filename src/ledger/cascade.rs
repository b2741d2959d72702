use crate::error::StoreError;
use crate::ledger::RecordId;
use crate::store::{RecordFilter, RecordQuery, Store, transaction};

/// Deletes every `kind` row matched by the query's filter together with its
/// status history, all or nothing.
///
/// Ids are resolved from the filter alone: columns, order, limit and offset
/// on the query only shape listings and never narrow what gets deleted.
pub(crate) fn delete_cascading(
    store: &mut dyn Store,
    kind: &str,
    collects_status: bool,
    query: &RecordQuery,
) -> Result<usize, StoreError> {
    transaction(store, |tx| {
        let ids: Vec<RecordId> = tx
            .select_records(kind, &query.without_projection())?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        if collects_status {
            let removed = tx.delete_statuses(kind, &ids)?;
            tracing::debug!(kind, records = ids.len(), statuses = removed, "cascading delete");
        }
        tx.delete_records(
            kind,
            &RecordFilter {
                ids: Some(ids),
                ..RecordFilter::default()
            },
        )
    })
}
