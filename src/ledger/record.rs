use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::status::{OwnerRef, RecordId, StatusType, StatusValue};
use crate::error::{Result, StateError};
use crate::store::RecordRow;

/// A domain type whose lifecycle is tracked by a [`Ledger`](super::Ledger).
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Status: StatusValue;

    /// Owner kind written to the history rows, e.g. `"order"`.
    const KIND: &'static str;

    /// Whether saves write status history for this type.
    const COLLECTS_STATUS: bool = true;
}

/// A tracked entity plus its current status and the transient state used by
/// the save hooks.
#[derive(Debug, Clone)]
pub struct Record<E: Entity> {
    id: Option<RecordId>,
    pub entity: E,
    status: Option<E::Status>,
    original_status: Option<E::Status>,
    status_payload: Option<String>,
    status_type: Option<StatusType>,
    creating: Option<(Option<String>, Option<StatusType>)>,
    force_status_events: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl<E: Entity> Record<E> {
    /// A record that has not been saved yet and has no status.
    pub fn new(entity: E) -> Self {
        Self {
            id: None,
            entity,
            status: None,
            original_status: None,
            status_payload: None,
            status_type: None,
            creating: None,
            force_status_events: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Unsaved record with an initial status.
    pub fn with_status(entity: E, status: E::Status) -> Self {
        let mut record = Self::new(entity);
        record.status = Some(status);
        record
    }

    /// `None` until the record is first saved.
    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn status(&self) -> Option<E::Status> {
        self.status
    }

    /// Status as last loaded from or written to the store.
    pub fn original_status(&self) -> Option<E::Status> {
        self.original_status
    }

    /// Payload staged with the pending transition.
    pub fn status_payload(&self) -> Option<&str> {
        self.status_payload.as_deref()
    }

    pub fn status_type(&self) -> Option<StatusType> {
        self.status_type
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Owner reference of its history entries, once persisted.
    pub fn owner(&self) -> Option<OwnerRef> {
        self.id.map(|id| OwnerRef::new(E::KIND, id))
    }

    /// Stages a transition. Nothing is written until the record is saved.
    pub fn set_status(
        &mut self,
        status: E::Status,
        payload: Option<String>,
        status_type: Option<StatusType>,
    ) -> &mut Self {
        self.status = Some(status);
        self.status_payload = payload;
        self.status_type = status_type;
        self
    }

    /// Drops the current status; saving a status-collecting record in this
    /// state fails.
    pub fn clear_status(&mut self) -> &mut Self {
        self.status = None;
        self
    }

    /// Whether the next save appends history even without a status change.
    pub fn force_status_events(&self) -> bool {
        self.force_status_events
    }

    pub(crate) fn set_force_status_events(&mut self, force: bool) {
        self.force_status_events = force;
    }

    /// True when an update should append history: forced, or the status
    /// differs from the stored one.
    pub fn should_write_transition(&self) -> bool {
        self.force_status_events || self.status != self.original_status
    }

    pub(crate) fn take_status_details(&mut self) -> (Option<String>, Option<StatusType>) {
        (self.status_payload.take(), self.status_type.take())
    }

    pub(crate) fn buffer_creating(&mut self) {
        let details = self.take_status_details();
        self.creating = Some(details);
    }

    pub(crate) fn take_creating(&mut self) -> (Option<String>, Option<StatusType>) {
        self.creating.take().unwrap_or((None, None))
    }

    pub(crate) fn require_status(&self) -> Result<E::Status> {
        self.status
            .ok_or(StateError::UndefinedStatus { kind: E::KIND }.into())
    }

    pub(crate) fn attributes(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.entity)?)
    }

    pub(crate) fn mark_inserted(&mut self, row: &RecordRow) {
        self.id = Some(row.id);
        self.created_at = Some(row.created_at);
        self.updated_at = Some(row.updated_at);
    }

    pub(crate) fn mark_updated(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    /// Reverts the in-memory effects of an insert that was rolled back.
    pub(crate) fn forget_insert(&mut self) {
        self.id = None;
        self.created_at = None;
        self.updated_at = None;
        self.creating = None;
    }

    pub(crate) fn sync_original(&mut self) {
        self.original_status = self.status;
        self.creating = None;
    }

    pub(crate) fn to_row(&self, id: RecordId) -> Result<RecordRow> {
        let now = Utc::now();
        Ok(RecordRow {
            kind: E::KIND.to_string(),
            id,
            status: self.status.map(StatusValue::code),
            attributes: self.attributes()?,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }

    pub(crate) fn from_row(row: RecordRow) -> Result<Self> {
        let entity: E = serde_json::from_value(row.attributes)?;
        let status = row.status.and_then(E::Status::from_code);
        Ok(Self {
            id: Some(row.id),
            entity,
            status,
            original_status: status,
            status_payload: None,
            status_type: None,
            creating: None,
            force_status_events: false,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{Order, OrderStatus};
    use serde_json::json;

    fn order() -> Order {
        Order {
            reference: "A-1".into(),
            amount: 1200,
        }
    }

    #[test]
    fn set_status_only_stages() {
        let mut record = Record::with_status(order(), OrderStatus::Pending);
        record.set_status(
            OrderStatus::Processing,
            Some("body".into()),
            Some(StatusType::Request),
        );
        assert_eq!(record.status(), Some(OrderStatus::Processing));
        assert_eq!(record.status_payload(), Some("body"));
        assert_eq!(record.status_type(), Some(StatusType::Request));
        assert!(!record.is_persisted());
        assert!(record.should_write_transition());
    }

    #[test]
    fn transition_compares_against_original() {
        let row = RecordRow {
            kind: "order".into(),
            id: 3,
            status: Some(1),
            attributes: json!({ "reference": "A-1", "amount": 1200 }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut record: Record<Order> = Record::from_row(row).unwrap();
        assert_eq!(record.original_status(), Some(OrderStatus::Processing));
        assert!(!record.should_write_transition());

        record.set_status(OrderStatus::Processing, None, None);
        assert!(!record.should_write_transition());

        record.set_force_status_events(true);
        assert!(record.should_write_transition());
    }

    #[test]
    fn buffered_creating_details_leave_public_fields_empty() {
        let mut record = Record::with_status(order(), OrderStatus::Pending);
        record.set_status(OrderStatus::Pending, Some("hello".into()), Some(StatusType::Probe));
        record.buffer_creating();
        assert_eq!(record.status_payload(), None);
        assert_eq!(record.status_type(), None);
        assert_eq!(
            record.take_creating(),
            (Some("hello".into()), Some(StatusType::Probe))
        );
        assert_eq!(record.take_creating(), (None, None));
    }

    #[test]
    fn missing_status_is_a_state_error() {
        let record: Record<Order> = Record::new(order());
        let err = record.require_status().unwrap_err();
        assert_eq!(err.kind(), "state");
    }
}
