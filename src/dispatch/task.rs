use tracing::info;

use super::correlation_id;
use crate::error::{FlowError, Result, StateError};
use crate::ledger::{Entity, Ledger, Record};

/// Internal work performed on a tracked record, bracketed by two statuses.
pub trait Task<E: Entity>: Send + Sync {
    /// Status saved before [`Task::handle`] runs.
    fn processing(&self, record: &Record<E>) -> E::Status;

    /// Status saved once [`Task::handle`] succeeded.
    fn complete(&self, record: &Record<E>) -> E::Status;

    /// The work itself. Changes to the record are saved with the complete status.
    fn handle(&self, record: &mut Record<E>) -> anyhow::Result<()>;
}

/// A task waiting for its record; see [`PendingTask::on`].
pub struct PendingTask<'a, E: Entity, T> {
    ledger: &'a Ledger<E>,
    task: T,
    record: Option<&'a mut Record<E>>,
}

impl<'a, E, T> PendingTask<'a, E, T>
where
    E: Entity,
    T: Task<E>,
{
    pub fn new(ledger: &'a Ledger<E>, task: T) -> Self {
        Self {
            ledger,
            task,
            record: None,
        }
    }

    /// Binds the record the task runs on.
    pub fn on(mut self, record: &'a mut Record<E>) -> Self {
        self.record = Some(record);
        self
    }

    /// Saves the processing status, runs the task and saves the complete
    /// status. A task failure is returned without a further transition.
    pub fn dispatch(self) -> Result<()> {
        let Self {
            ledger,
            task,
            record,
        } = self;
        let record = record.ok_or(StateError::Unbound("pending task"))?;
        let correlation = correlation_id();

        info!(%correlation, kind = E::KIND, id = record.id(), "running task");
        let processing = task.processing(record);
        ledger.set_status_and_save(record, processing, None, None)?;

        task.handle(record).map_err(FlowError::Handler)?;

        let complete = task.complete(record);
        ledger.set_status_and_save(record, complete, None, None)?;
        info!(%correlation, kind = E::KIND, id = record.id(), "task complete");
        Ok(())
    }
}
