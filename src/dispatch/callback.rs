use tracing::{error, info, warn};

use super::correlation_id;
use crate::error::{FlowError, Result, StateError};
use crate::format::{FormatOptions, RequestDescription, build_request};
use crate::ledger::{Entity, Ledger, Record, StatusType, StatusValue};
use crate::sanitize::Sanitizer;

/// Handles an inbound request (typically a webhook) for a tracked record.
pub trait Callback<E: Entity>: Send + Sync {
    /// The status the record must be in for this callback to run.
    fn initial(&self, record: &Record<E>, request: &RequestDescription) -> E::Status;

    fn processing(&self, record: &Record<E>, request: &RequestDescription) -> E::Status;

    fn complete(&self, record: &Record<E>, request: &RequestDescription) -> E::Status;

    fn failed(&self, record: &Record<E>, request: &RequestDescription) -> E::Status;

    fn handle(&self, record: &mut Record<E>, request: &RequestDescription) -> anyhow::Result<()>;

    fn sanitizer(&self, _record: &Record<E>, _request: &RequestDescription) -> Option<Sanitizer> {
        None
    }
}

/// A callback waiting for its record and request.
pub struct PendingCallback<'a, E: Entity, C> {
    ledger: &'a Ledger<E>,
    callback: C,
    record: Option<&'a mut Record<E>>,
    request: Option<RequestDescription>,
}

impl<'a, E, C> PendingCallback<'a, E, C>
where
    E: Entity,
    C: Callback<E>,
{
    pub fn new(ledger: &'a Ledger<E>, callback: C) -> Self {
        Self {
            ledger,
            callback,
            record: None,
            request: None,
        }
    }

    /// Binds the record the callback applies to.
    pub fn on(mut self, record: &'a mut Record<E>) -> Self {
        self.record = Some(record);
        self
    }

    /// Inbound request recorded with the PROCESSING entry. Required.
    pub fn with_request(mut self, request: RequestDescription) -> Self {
        self.request = Some(request);
        self
    }

    /// Checks the record is in the callback's initial status, records the
    /// inbound request as PROCESSING and runs the handler.
    ///
    /// A handler failure is recorded as a FAILED transition carrying the
    /// serialized error, then returned.
    pub fn dispatch(self) -> Result<()> {
        let Self {
            ledger,
            callback,
            record,
            request,
        } = self;
        let request = request.ok_or(StateError::MissingRequest)?;
        let record = record.ok_or(StateError::Unbound("pending callback"))?;
        let correlation = correlation_id();

        let expected = callback.initial(record, &request);
        if record.status() != Some(expected) {
            let actual = record.status().map_or("none", StatusValue::name);
            warn!(%correlation, kind = E::KIND, id = record.id(), actual, expected = expected.name(), "callback rejected");
            return Err(StateError::UnexpectedStatus {
                expected: expected.name(),
                actual: actual.to_string(),
            }
            .into());
        }

        let description = match callback.sanitizer(record, &request) {
            Some(sanitizer) => request.sanitized(&sanitizer),
            None => request.clone(),
        };
        let payload = build_request(&description, &FormatOptions::request());

        info!(%correlation, kind = E::KIND, id = record.id(), method = %request.method, "processing callback");
        let processing = callback.processing(record, &request);
        ledger.set_status_and_save(record, processing, Some(payload), Some(StatusType::Callback))?;

        if let Err(err) = callback.handle(record, &request) {
            let failed = callback.failed(record, &request);
            if let Err(record_err) = ledger.record_exception(record, failed, &err) {
                error!(%correlation, error = %record_err, "failed to record callback failure");
            }
            warn!(%correlation, kind = E::KIND, id = record.id(), error = %err, "callback failed");
            return Err(FlowError::Handler(err));
        }

        let complete = callback.complete(record, &request);
        ledger.set_status_and_save(record, complete, None, None)?;
        info!(%correlation, kind = E::KIND, id = record.id(), "callback complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::failure::Failure;
    use crate::format::Body;
    use crate::ledger::testing::{Order, OrderStatus, RecordingEvents, memory_store, order};
    use serde_json::json;

    #[derive(Default)]
    struct Paid {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Callback<Order> for &Paid {
        fn initial(&self, _: &Record<Order>, _: &RequestDescription) -> OrderStatus {
            OrderStatus::Processing
        }

        fn processing(&self, _: &Record<Order>, _: &RequestDescription) -> OrderStatus {
            OrderStatus::Pending
        }

        fn complete(&self, _: &Record<Order>, _: &RequestDescription) -> OrderStatus {
            OrderStatus::Complete
        }

        fn failed(&self, _: &Record<Order>, _: &RequestDescription) -> OrderStatus {
            OrderStatus::Failed
        }

        fn handle(&self, record: &mut Record<Order>, request: &RequestDescription) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("signature mismatch");
            }
            if let Body::Structured(body) = &request.body {
                record.entity.amount = body["amount"].as_i64().unwrap_or_default();
            }
            Ok(())
        }

        fn sanitizer(&self, _: &Record<Order>, _: &RequestDescription) -> Option<Sanitizer> {
            Some(Sanitizer::new().keys(["signature", "x-signature"]))
        }
    }

    fn webhook() -> RequestDescription {
        RequestDescription::new("POST", "https://shop.test/hooks/paid?ref=A-1")
            .header("content-type", "application/json")
            .header("x-signature", "sig-123")
            .body(Body::Structured(json!({ "amount": 250, "signature": "sig-123" })))
    }

    fn setup(status: OrderStatus) -> (Ledger<Order>, Record<Order>) {
        let (_, shared) = memory_store();
        let ledger: Ledger<Order> = Ledger::with_status_tracking(shared, RecordingEvents::new());
        let mut record = Record::with_status(order("A-1"), status);
        ledger.save(&mut record).unwrap();
        (ledger, record)
    }

    #[test]
    fn wrong_initial_status_is_rejected_before_any_side_effect() {
        let (ledger, mut record) = setup(OrderStatus::Complete);
        let handler = Paid::default();
        let err = PendingCallback::new(&ledger, &handler)
            .on(&mut record)
            .with_request(webhook())
            .dispatch()
            .unwrap_err();
        match err {
            FlowError::State(StateError::UnexpectedStatus { expected, actual }) => {
                assert_eq!(expected, "PROCESSING");
                assert_eq!(actual, "COMPLETE");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.statuses(&record).unwrap().len(), 1);
    }

    #[test]
    fn missing_request_or_record() {
        let (ledger, mut record) = setup(OrderStatus::Processing);
        let handler = Paid::default();
        let err = PendingCallback::new(&ledger, &handler)
            .on(&mut record)
            .dispatch()
            .unwrap_err();
        assert!(matches!(err, FlowError::State(StateError::MissingRequest)));

        let err = PendingCallback::new(&ledger, &handler)
            .with_request(webhook())
            .dispatch()
            .unwrap_err();
        assert!(matches!(err, FlowError::State(StateError::Unbound(_))));
    }

    #[test]
    fn records_sanitized_request_then_complete() {
        let (ledger, mut record) = setup(OrderStatus::Processing);
        let handler = Paid::default();
        PendingCallback::new(&ledger, &handler)
            .on(&mut record)
            .with_request(webhook())
            .dispatch()
            .unwrap();

        assert_eq!(record.status(), Some(OrderStatus::Complete));
        assert_eq!(record.entity.amount, 250);
        let history = ledger.statuses(&record).unwrap();
        let codes: Vec<i64> = history.iter().map(|s| s.status).collect();
        assert_eq!(codes, [1, 0, 2]);

        let processing = &history[1];
        assert_eq!(processing.status_type, Some(StatusType::Callback));
        let text = processing.payload.as_deref().unwrap();
        assert!(text.starts_with("POST /hooks/paid?ref=A-1 HTTP/1.1\r\n"));
        assert!(text.contains("X-Signature: ********\r\n"));
        assert!(text.contains("\"signature\": \"********\""));
        assert!(!text.contains("sig-123"));

        assert_eq!(history[2].payload, None);
        assert_eq!(history[2].status_type, None);
    }

    #[test]
    fn handler_failure_is_recorded_then_returned() {
        let (ledger, mut record) = setup(OrderStatus::Processing);
        let handler = Paid {
            fail: true,
            ..Paid::default()
        };
        let err = PendingCallback::new(&ledger, &handler)
            .on(&mut record)
            .with_request(webhook())
            .dispatch()
            .unwrap_err();
        assert!(matches!(&err, FlowError::Handler(e) if e.to_string() == "signature mismatch"));

        assert_eq!(record.status(), Some(OrderStatus::Failed));
        let latest = ledger.latest_status(&record).unwrap().unwrap();
        assert_eq!(latest.status_type, Some(StatusType::Exception));
        let failure: Failure = serde_json::from_str(latest.payload.as_deref().unwrap()).unwrap();
        assert_eq!(failure.message, "signature mismatch");
        assert_eq!(failure.kind, "handler");
    }
}
