//! Save/delete hook pipeline registered on a [`Ledger`](super::Ledger).

use std::sync::Arc;

use chrono::Utc;

use super::record::{Entity, Record};
use super::status::{NewStatus, StatusType, StatusValue};
use crate::error::{FlowError, Result, StateError};
use crate::store::Store;

/// One stage of the save/delete pipeline. Every method defaults to a no-op.
///
/// `transition` tells the update hooks whether this save appends history
/// (forced, or the status changed since it was loaded). It is computed once
/// before `updating` runs, so later hooks see the same decision.
pub trait LifecycleHook<E: Entity>: Send + Sync {
    fn creating(&self, _record: &mut Record<E>) -> Result<()> {
        Ok(())
    }

    fn created(&self, _store: &mut dyn Store, _record: &mut Record<E>) -> Result<()> {
        Ok(())
    }

    fn updating(
        &self,
        _store: &mut dyn Store,
        _record: &mut Record<E>,
        _transition: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn updated(&self, _store: &mut dyn Store, _record: &Record<E>, _transition: bool) -> Result<()> {
        Ok(())
    }

    fn deleting(&self, _store: &mut dyn Store, _record: &Record<E>) -> Result<()> {
        Ok(())
    }
}

/// Writes the append-only history rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusHistory;

impl<E: Entity> LifecycleHook<E> for StatusHistory {
    fn creating(&self, record: &mut Record<E>) -> Result<()> {
        record.buffer_creating();
        Ok(())
    }

    fn created(&self, store: &mut dyn Store, record: &mut Record<E>) -> Result<()> {
        if !E::COLLECTS_STATUS {
            return Ok(());
        }
        let status = record.require_status()?;
        let (payload, status_type) = record.take_creating();
        append(store, record, status, payload, status_type)
    }

    fn updating(&self, store: &mut dyn Store, record: &mut Record<E>, transition: bool) -> Result<()> {
        if !E::COLLECTS_STATUS {
            record.take_status_details();
            return Ok(());
        }
        let status = record.require_status();
        let (payload, status_type) = record.take_status_details();
        let status = status?;
        if transition {
            append(store, record, status, payload, status_type)?;
        }
        Ok(())
    }

    fn deleting(&self, store: &mut dyn Store, record: &Record<E>) -> Result<()> {
        if !E::COLLECTS_STATUS {
            return Ok(());
        }
        if let Some(id) = record.id() {
            let removed = store.delete_statuses(E::KIND, &[id])?;
            tracing::debug!(kind = E::KIND, id, removed, "deleted status history");
        }
        Ok(())
    }
}

fn append<E: Entity>(
    store: &mut dyn Store,
    record: &Record<E>,
    status: E::Status,
    payload: Option<String>,
    status_type: Option<StatusType>,
) -> Result<()> {
    let owner = record
        .owner()
        .ok_or(StateError::NotPersisted { kind: E::KIND })?;
    let written = store.insert_status(NewStatus {
        owner,
        status: status.code(),
        payload,
        status_type,
        created_at: Utc::now(),
    })?;
    tracing::debug!(
        kind = E::KIND,
        id = written.owner.id,
        status = status.name(),
        status_id = written.id,
        "appended status"
    );
    Ok(())
}

/// Receiver of the lifecycle events declared by status values.
pub trait EventSink<E: Entity>: Send + Sync {
    fn dispatch(&self, event: &'static str, record: &Record<E>) -> anyhow::Result<()>;
}

/// Sink that only logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl<E: Entity> EventSink<E> for LogEvents {
    fn dispatch(&self, event: &'static str, record: &Record<E>) -> anyhow::Result<()> {
        tracing::info!(event, kind = E::KIND, id = record.id(), "status event");
        Ok(())
    }
}

/// Dispatches the events of the new status after a create, and after an
/// update that appended history.
pub struct StatusEvents<E: Entity> {
    sink: Arc<dyn EventSink<E>>,
}

impl<E: Entity> StatusEvents<E> {
    pub fn new(sink: Arc<dyn EventSink<E>>) -> Self {
        Self { sink }
    }

    fn fire(&self, record: &Record<E>) -> Result<()> {
        let Some(events) = record.status().and_then(StatusValue::events) else {
            return Ok(());
        };
        for &event in events {
            self.sink.dispatch(event, record).map_err(FlowError::Handler)?;
        }
        Ok(())
    }
}

impl<E: Entity> LifecycleHook<E> for StatusEvents<E> {
    fn created(&self, _store: &mut dyn Store, record: &mut Record<E>) -> Result<()> {
        self.fire(record)
    }

    fn updated(&self, _store: &mut dyn Store, record: &Record<E>, transition: bool) -> Result<()> {
        if transition {
            self.fire(record)?;
        }
        Ok(())
    }
}
