//! Status ledger: tracked records and their append-only status history.

mod cascade;
mod hooks;
mod record;
mod status;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::Utc;

pub use hooks::{EventSink, LifecycleHook, LogEvents, StatusEvents, StatusHistory};
pub use record::{Entity, Record};
pub use status::{
    NewStatus, OwnerRef, PayloadTier, RecordId, StatusId, StatusOption, StatusRecord, StatusType,
    StatusValue,
};

use crate::error::{CapabilityError, FlowError, Result, StateError};
use crate::failure::Failure;
use crate::store::{self, NewRecord, RecordQuery, SharedStore, Store, transaction};

/// Persists [`Record`]s of one entity type through a hook pipeline.
pub struct Ledger<E: Entity> {
    store: SharedStore,
    hooks: Vec<Box<dyn LifecycleHook<E>>>,
}

impl<E: Entity> Ledger<E> {
    /// A ledger without any hooks: saves write only the record rows.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            hooks: Vec::new(),
        }
    }

    /// A ledger writing status history and dispatching status events to `sink`.
    pub fn with_status_tracking(store: SharedStore, sink: Arc<dyn EventSink<E>>) -> Self {
        Self::new(store)
            .register(StatusHistory)
            .register(StatusEvents::new(sink))
    }

    /// Appends a hook; hooks run in registration order.
    pub fn register(mut self, hook: impl LifecycleHook<E> + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Inserts or updates `record` in a single transaction.
    pub fn save(&self, record: &mut Record<E>) -> Result<()> {
        let mut guard = store::lock(&self.store)?;
        self.save_in(&mut *guard, record)
    }

    fn save_in(&self, store: &mut dyn Store, record: &mut Record<E>) -> Result<()> {
        let inserting = !record.is_persisted();
        match transaction(store, |tx| self.persist(tx, record)) {
            Ok(()) => {
                record.sync_original();
                Ok(())
            }
            Err(err) => {
                if inserting {
                    record.forget_insert();
                }
                Err(err)
            }
        }
    }

    fn persist(&self, store: &mut dyn Store, record: &mut Record<E>) -> Result<()> {
        match record.id() {
            None => {
                for hook in &self.hooks {
                    hook.creating(record)?;
                }
                let row = store.insert_record(NewRecord {
                    kind: E::KIND.to_string(),
                    status: record.status().map(StatusValue::code),
                    attributes: record.attributes()?,
                    created_at: Utc::now(),
                })?;
                record.mark_inserted(&row);
                for hook in &self.hooks {
                    hook.created(store, record)?;
                }
            }
            Some(id) => {
                let transition = record.should_write_transition();
                for hook in &self.hooks {
                    hook.updating(store, record, transition)?;
                }
                record.mark_updated(Utc::now());
                store.update_record(&record.to_row(id)?)?;
                for hook in &self.hooks {
                    hook.updated(store, record, transition)?;
                }
            }
        }
        Ok(())
    }

    /// Stages a transition and saves it.
    pub fn set_status_and_save(
        &self,
        record: &mut Record<E>,
        status: E::Status,
        payload: Option<String>,
        status_type: Option<StatusType>,
    ) -> Result<()> {
        record.set_status(status, payload, status_type);
        self.save(record)
    }

    /// Resets the record to the recovery status its current status declares.
    pub fn defibrillate(&self, record: &mut Record<E>) -> Result<()> {
        if !E::COLLECTS_STATUS {
            return Err(CapabilityError::StatusCollection { kind: E::KIND }.into());
        }
        let current = record.require_status()?;
        let target = current
            .defibrillate()
            .ok_or(CapabilityError::Defibrillation {
                status: current.name(),
            })?;
        tracing::info!(
            kind = E::KIND,
            id = record.id(),
            from = current.name(),
            to = target.name(),
            "defibrillating"
        );
        self.set_status_and_save(record, target, None, None)
    }

    /// Re-saves the record's timestamp. When the current status should be
    /// touched, the save appends a fresh history row and fires its events
    /// even though the status did not change.
    pub fn touch(&self, record: &mut Record<E>) -> Result<()> {
        if !record.is_persisted() {
            return Err(StateError::NotPersisted { kind: E::KIND }.into());
        }
        let force = record.status().is_some_and(StatusValue::should_be_touched);
        self.save_forcing(record, force)
    }

    /// Writes the current status again as a new transition carrying
    /// `payload`, firing its events as if the status had changed.
    pub fn force_transition(
        &self,
        record: &mut Record<E>,
        payload: Option<String>,
        status_type: Option<StatusType>,
    ) -> Result<()> {
        if !record.is_persisted() {
            return Err(StateError::NotPersisted { kind: E::KIND }.into());
        }
        let status = record.require_status()?;
        record.set_status(status, payload, status_type);
        self.save_forcing(record, true)
    }

    fn save_forcing(&self, record: &mut Record<E>, force: bool) -> Result<()> {
        let mut guard = store::lock(&self.store)?;
        let result = transaction(&mut *guard, |tx| {
            record.set_force_status_events(force);
            self.save_in(tx, record)
        });
        record.set_force_status_events(false);
        result
    }

    /// Deletes the record, its history first.
    pub fn delete(&self, record: &mut Record<E>) -> Result<()> {
        let id = record
            .id()
            .ok_or(StateError::NotPersisted { kind: E::KIND })?;
        let mut guard = store::lock(&self.store)?;
        transaction(&mut *guard, |tx| {
            for hook in &self.hooks {
                hook.deleting(tx, record)?;
            }
            tx.delete_records(E::KIND, &RecordQuery::new().ids([id]).filter)?;
            Ok::<_, FlowError>(())
        })?;
        record.forget_insert();
        Ok(())
    }

    /// Bulk delete of every record matching `query`, history included.
    pub fn delete_where(&self, query: &RecordQuery) -> Result<usize> {
        let mut guard = store::lock(&self.store)?;
        let deleted = cascade::delete_cascading(&mut *guard, E::KIND, E::COLLECTS_STATUS, query)?;
        tracing::info!(kind = E::KIND, deleted, "bulk delete");
        Ok(deleted)
    }

    /// Loads one record of this kind.
    pub fn find(&self, id: RecordId) -> Result<Option<Record<E>>> {
        let guard = store::lock(&self.store)?;
        guard
            .find_record(E::KIND, id)?
            .map(Record::from_row)
            .transpose()
    }

    pub fn query(&self, query: &RecordQuery) -> Result<Vec<Record<E>>> {
        let guard = store::lock(&self.store)?;
        guard
            .select_records(E::KIND, query)?
            .into_iter()
            .map(Record::from_row)
            .collect()
    }

    /// History of `record`, oldest first.
    pub fn statuses(&self, record: &Record<E>) -> Result<Vec<StatusRecord>> {
        let owner = self.history_owner(record)?;
        let guard = store::lock(&self.store)?;
        Ok(guard.statuses_for(&owner)?)
    }

    /// Most recent history entry.
    pub fn latest_status(&self, record: &Record<E>) -> Result<Option<StatusRecord>> {
        Ok(self.statuses(record)?.pop())
    }

    pub fn oldest_status(&self, record: &Record<E>) -> Result<Option<StatusRecord>> {
        Ok(self.statuses(record)?.into_iter().next())
    }

    fn history_owner(&self, record: &Record<E>) -> Result<OwnerRef> {
        if !E::COLLECTS_STATUS {
            return Err(CapabilityError::StatusCollection { kind: E::KIND }.into());
        }
        record
            .owner()
            .ok_or_else(|| StateError::NotPersisted { kind: E::KIND }.into())
    }

    /// Saves `status` as an EXCEPTION transition carrying the serialized failure.
    pub fn record_exception(
        &self,
        record: &mut Record<E>,
        status: E::Status,
        error: &anyhow::Error,
    ) -> Result<()> {
        let payload = Failure::from_error(error).to_json()?;
        self.set_status_and_save(record, status, Some(payload), Some(StatusType::Exception))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ledger::testing::{Draft, Order, OrderStatus, RecordingEvents, memory_store, order};
    use crate::store::FailPoint;

    fn tracked() -> (
        std::sync::Arc<std::sync::Mutex<crate::store::MemoryStore>>,
        Arc<RecordingEvents>,
        Ledger<Order>,
    ) {
        let (memory, shared) = memory_store();
        let events = RecordingEvents::new();
        let ledger: Ledger<Order> = Ledger::with_status_tracking(shared, events.clone());
        (memory, events, ledger)
    }

    fn codes(ledger: &Ledger<Order>, record: &Record<Order>) -> Vec<i64> {
        ledger
            .statuses(record)
            .unwrap()
            .iter()
            .map(|s| s.status)
            .collect()
    }

    #[test]
    fn create_writes_initial_history_with_buffered_payload() {
        let (_, _, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Pending);
        record.set_status(
            OrderStatus::Pending,
            Some("created by import".into()),
            Some(StatusType::Request),
        );
        ledger.save(&mut record).unwrap();

        let history = ledger.statuses(&record).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payload.as_deref(), Some("created by import"));
        assert_eq!(history[0].status_type, Some(StatusType::Request));
        assert_eq!(record.status_payload(), None);

        let stored = ledger.find(record.id().unwrap()).unwrap().unwrap();
        assert_eq!(stored.entity.reference, "A-1");
        assert_eq!(stored.status(), Some(OrderStatus::Pending));
    }

    #[test]
    fn missing_status_fails_without_writing() {
        let (memory, _, ledger) = tracked();
        let mut record = Record::new(order("A-1"));
        let err = ledger.save(&mut record).unwrap_err();
        assert!(matches!(err, FlowError::State(StateError::UndefinedStatus { kind: "order" })));
        assert!(!record.is_persisted());
        assert_eq!(memory.lock().unwrap().record_count("order"), 0);
        assert_eq!(memory.lock().unwrap().status_count(), 0);

        let mut record = Record::with_status(order("A-2"), OrderStatus::Pending);
        ledger.save(&mut record).unwrap();
        record.clear_status();
        let err = ledger.save(&mut record).unwrap_err();
        assert_eq!(err.kind(), "state");
        assert_eq!(memory.lock().unwrap().status_count(), 1);
    }

    #[test]
    fn history_appends_each_distinct_status_in_order() {
        let (_, _, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Pending);
        ledger.save(&mut record).unwrap();
        for status in [OrderStatus::Processing, OrderStatus::Failed, OrderStatus::Complete] {
            ledger.set_status_and_save(&mut record, status, None, None).unwrap();
        }
        assert_eq!(codes(&ledger, &record), vec![0, 1, 3, 2]);
        assert_eq!(ledger.oldest_status(&record).unwrap().unwrap().status, 0);
        assert_eq!(ledger.latest_status(&record).unwrap().unwrap().status, 2);
    }

    #[test]
    fn unchanged_status_does_not_append() {
        let (_, events, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Pending);
        ledger.save(&mut record).unwrap();
        ledger
            .set_status_and_save(&mut record, OrderStatus::Complete, Some("a".into()), None)
            .unwrap();
        ledger
            .set_status_and_save(&mut record, OrderStatus::Complete, Some("b".into()), None)
            .unwrap();
        assert_eq!(codes(&ledger, &record), vec![0, 2]);
        assert_eq!(events.names(), vec!["order.completed", "order.notify"]);
        assert_eq!(record.status_payload(), None);
    }

    #[test]
    fn events_fire_on_create_with_record_id() {
        let (_, events, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Failed);
        ledger.save(&mut record).unwrap();
        assert_eq!(events.seen(), vec![("order.failed", Some(1))]);
    }

    #[test]
    fn defibrillate_requires_capability() {
        let (_, _, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Complete);
        ledger.save(&mut record).unwrap();
        let err = ledger.defibrillate(&mut record).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Capability(CapabilityError::Defibrillation { status: "COMPLETE" })
        ));

        ledger
            .set_status_and_save(&mut record, OrderStatus::Failed, None, None)
            .unwrap();
        ledger.defibrillate(&mut record).unwrap();
        assert_eq!(record.status(), Some(OrderStatus::Pending));
        assert_eq!(codes(&ledger, &record), vec![2, 3, 0]);
    }

    #[test]
    fn non_collecting_types_reject_history_operations() {
        let (memory, shared) = memory_store();
        let ledger: Ledger<Draft> = Ledger::with_status_tracking(shared, RecordingEvents::new());
        let mut record = Record::with_status(
            Draft {
                title: "notes".into(),
            },
            OrderStatus::Failed,
        );
        ledger.save(&mut record).unwrap();
        assert_eq!(memory.lock().unwrap().status_count(), 0);
        assert!(matches!(
            ledger.statuses(&record).unwrap_err(),
            FlowError::Capability(CapabilityError::StatusCollection { kind: "draft" })
        ));
        assert!(matches!(
            ledger.defibrillate(&mut record).unwrap_err(),
            FlowError::Capability(CapabilityError::StatusCollection { .. })
        ));
    }

    #[test]
    fn touch_forces_history_only_for_touchable_status() {
        let (_, events, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Processing);
        ledger.save(&mut record).unwrap();
        ledger.touch(&mut record).unwrap();
        ledger.touch(&mut record).unwrap();
        assert_eq!(codes(&ledger, &record), vec![1, 1, 1]);
        assert!(!record.force_status_events());

        ledger
            .set_status_and_save(&mut record, OrderStatus::Complete, None, None)
            .unwrap();
        ledger.touch(&mut record).unwrap();
        assert_eq!(codes(&ledger, &record), vec![1, 1, 1, 2]);
        assert_eq!(events.names().len(), 2);
    }

    #[test]
    fn touch_failure_rolls_back_and_resets_force_flag() {
        let (memory, _, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Processing);
        ledger.save(&mut record).unwrap();
        memory.lock().unwrap().fail_on(FailPoint::UpdateRecord);
        let err = ledger.touch(&mut record).unwrap_err();
        assert!(matches!(err, FlowError::Store(StoreError::Injected("update_record"))));
        assert!(!record.force_status_events());
        assert_eq!(memory.lock().unwrap().status_count(), 1);
        assert_eq!(memory.lock().unwrap().depth(), 0);
    }

    #[test]
    fn forced_transition_repeats_status_with_payload() {
        let (_, events, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Complete);
        ledger.save(&mut record).unwrap();
        ledger
            .force_transition(&mut record, Some("probe: still settled".into()), Some(StatusType::Probe))
            .unwrap();

        assert_eq!(codes(&ledger, &record), vec![2, 2]);
        let latest = ledger.latest_status(&record).unwrap().unwrap();
        assert_eq!(latest.status_type, Some(StatusType::Probe));
        assert_eq!(latest.payload.as_deref(), Some("probe: still settled"));
        assert_eq!(events.names().len(), 4);
        assert!(!record.force_status_events());
        assert_eq!(record.status_payload(), None);
    }

    #[test]
    fn failed_insert_leaves_record_unsaved() {
        let (memory, _, ledger) = tracked();
        memory.lock().unwrap().fail_on(FailPoint::InsertStatus);
        let mut record = Record::with_status(order("A-1"), OrderStatus::Pending);
        assert!(ledger.save(&mut record).is_err());
        assert!(!record.is_persisted());
        assert_eq!(memory.lock().unwrap().record_count("order"), 0);
        ledger.save(&mut record).unwrap();
        assert_eq!(record.id(), Some(1));
        assert_eq!(memory.lock().unwrap().status_count(), 1);
    }

    #[test]
    fn delete_removes_history_first() {
        let (memory, _, ledger) = tracked();
        let mut keep = Record::with_status(order("keep"), OrderStatus::Pending);
        let mut drop = Record::with_status(order("drop"), OrderStatus::Pending);
        ledger.save(&mut keep).unwrap();
        ledger.save(&mut drop).unwrap();
        ledger.delete(&mut drop).unwrap();
        assert!(!drop.is_persisted());
        let store = memory.lock().unwrap();
        assert_eq!(store.record_count("order"), 1);
        assert_eq!(store.status_count(), 1);
    }

    #[test]
    fn bulk_delete_ignores_projection_and_cascades() {
        let (memory, _, ledger) = tracked();
        for (reference, status) in [
            ("a", OrderStatus::Complete),
            ("b", OrderStatus::Complete),
            ("c", OrderStatus::Pending),
        ] {
            let mut record = Record::with_status(order(reference), OrderStatus::Pending);
            ledger.save(&mut record).unwrap();
            ledger.set_status_and_save(&mut record, status, None, None).unwrap();
        }
        let query = RecordQuery::new()
            .status_in([OrderStatus::Complete.code()])
            .limit(1)
            .columns(["reference"]);
        assert_eq!(ledger.delete_where(&query).unwrap(), 2);

        let store = memory.lock().unwrap();
        assert_eq!(store.record_count("order"), 1);
        assert_eq!(store.status_count(), 1);
    }

    #[test]
    fn bulk_delete_is_atomic() {
        let (memory, _, ledger) = tracked();
        for reference in ["a", "b", "c"] {
            let mut record = Record::with_status(order(reference), OrderStatus::Pending);
            ledger.save(&mut record).unwrap();
        }
        memory.lock().unwrap().fail_on(FailPoint::DeleteRecords);
        let err = ledger.delete_where(&RecordQuery::new()).unwrap_err();
        assert_eq!(err.kind(), "store");

        let store = memory.lock().unwrap();
        assert_eq!(store.record_count("order"), 3);
        assert_eq!(store.status_count(), 3);
    }

    #[test]
    fn record_exception_stores_serialized_failure() {
        let (_, _, ledger) = tracked();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Processing);
        ledger.save(&mut record).unwrap();
        let error = anyhow::anyhow!("gateway exploded").context("charging card");
        ledger
            .record_exception(&mut record, OrderStatus::Failed, &error)
            .unwrap();

        let latest = ledger.latest_status(&record).unwrap().unwrap();
        assert_eq!(latest.status_type, Some(StatusType::Exception));
        let payload: serde_json::Value =
            serde_json::from_str(latest.payload.as_deref().unwrap()).unwrap();
        assert_eq!(payload["message"], "charging card");
        assert_eq!(payload["causes"][0], "gateway exploded");
    }
}
