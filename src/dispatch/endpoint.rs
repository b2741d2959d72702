use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use super::correlation_id;
use super::transport::{HttpTransport, OutgoingRequest, RawResponse};
use crate::error::{FlowError, Result, StateError};
use crate::format::{
    Body, FormatOptions, Headers, RequestDescription, RequestFormat, build_curl, build_request,
    render_response,
};
use crate::ledger::{Entity, Ledger, Record, StatusType};
use crate::sanitize::Sanitizer;

/// An outbound HTTP call made on behalf of a tracked record.
pub trait Endpoint<E: Entity>: Send + Sync {
    /// Status recorded, with the formatted request, before the call.
    fn processing(&self) -> E::Status;

    /// Status recorded, with the formatted response, after the call.
    fn complete(&self) -> E::Status;

    fn url(&self, record: &Record<E>) -> String;

    fn method(&self, record: &Record<E>) -> Method;

    fn headers(&self, _record: &Record<E>) -> Headers {
        Headers::new()
    }

    fn build_payload(&self, record: &Record<E>) -> anyhow::Result<Value>;

    /// Applies the response to the record before the completing save.
    fn process_response(&self, _response: &RawResponse, _record: &mut Record<E>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Masking applied to the recorded request and response.
    fn sanitizer(&self) -> Option<Sanitizer> {
        None
    }

    fn request_format(&self) -> RequestFormat {
        RequestFormat::Curl
    }
}

/// An endpoint waiting for its record; see [`PendingEndpoint::on`].
pub struct PendingEndpoint<'a, E: Entity, H, T> {
    ledger: &'a Ledger<E>,
    transport: &'a T,
    endpoint: H,
    record: Option<&'a mut Record<E>>,
}

impl<'a, E, H, T> PendingEndpoint<'a, E, H, T>
where
    E: Entity,
    H: Endpoint<E>,
    T: HttpTransport,
{
    pub fn new(ledger: &'a Ledger<E>, transport: &'a T, endpoint: H) -> Self {
        Self {
            ledger,
            transport,
            endpoint,
            record: None,
        }
    }

    /// Binds the record the call is made for.
    pub fn on(mut self, record: &'a mut Record<E>) -> Self {
        self.record = Some(record);
        self
    }

    /// Records the request as PROCESSING, performs the call, lets the
    /// endpoint apply the response and records it as COMPLETE.
    ///
    /// Transport and handler failures are returned as they are: nothing
    /// beyond the PROCESSING entry is written for a failed call.
    pub async fn dispatch(self) -> Result<()> {
        let Self {
            ledger,
            transport,
            endpoint,
            record,
        } = self;
        let record = record.ok_or(StateError::Unbound("pending endpoint"))?;
        let correlation = correlation_id();

        let payload = endpoint.build_payload(record).map_err(FlowError::Handler)?;
        let method = endpoint.method(record);
        let url = endpoint.url(record);
        let headers = endpoint.headers(record);
        let sanitizer = endpoint.sanitizer();

        let mut description = RequestDescription::new(method.as_str(), url.clone())
            .headers(headers.clone())
            .body(Body::from_value(payload.clone()));
        if let Some(sanitizer) = &sanitizer {
            description = description.sanitized(sanitizer);
        }
        let mask_char = sanitizer.as_ref().map_or('*', Sanitizer::mask_character);
        let request_text = match endpoint.request_format() {
            RequestFormat::Curl => build_curl(&description, mask_char),
            RequestFormat::Http => build_request(&description, &FormatOptions::request()),
        };

        info!(%correlation, kind = E::KIND, id = record.id(), %method, %url, "dispatching endpoint");
        ledger.set_status_and_save(
            record,
            endpoint.processing(),
            Some(request_text),
            Some(StatusType::Request),
        )?;

        let request = OutgoingRequest::new(method, url)
            .headers(headers)
            .payload(payload);
        let response = transport.send(request).await?;
        debug!(%correlation, status = response.status, "endpoint responded");

        endpoint
            .process_response(&response, record)
            .map_err(FlowError::Handler)?;

        let response_text = render_response(
            &response.describe(),
            sanitizer.as_ref(),
            &FormatOptions::response(),
        );
        ledger.set_status_and_save(
            record,
            endpoint.complete(),
            Some(response_text),
            Some(StatusType::Response),
        )?;
        info!(%correlation, kind = E::KIND, id = record.id(), "endpoint complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::transport::{HttpConfig, ReqwestTransport};
    use crate::error::TransportError;
    use crate::ledger::testing::{Order, OrderStatus, RecordingEvents, memory_store, order};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Charge {
        base: String,
    }

    impl Endpoint<Order> for Charge {
        fn processing(&self) -> OrderStatus {
            OrderStatus::Processing
        }

        fn complete(&self) -> OrderStatus {
            OrderStatus::Complete
        }

        fn url(&self, record: &Record<Order>) -> String {
            format!("{}/charges/{}", self.base, record.entity.reference)
        }

        fn method(&self, _record: &Record<Order>) -> Method {
            Method::POST
        }

        fn headers(&self, _record: &Record<Order>) -> Headers {
            Headers::new()
                .with("Content-Type", "application/json")
                .with("Authorization", "Bearer live-secret")
        }

        fn build_payload(&self, record: &Record<Order>) -> anyhow::Result<Value> {
            Ok(json!({ "amount": record.entity.amount, "card": "4111111111111111" }))
        }

        fn process_response(&self, response: &RawResponse, record: &mut Record<Order>) -> anyhow::Result<()> {
            let body = response.json().unwrap_or_default();
            record.entity.reference = body["charge"].as_str().unwrap_or("?").to_string();
            Ok(())
        }

        fn sanitizer(&self) -> Option<Sanitizer> {
            Some(Sanitizer::new().keys(["card", "authorization", "secret"]))
        }
    }

    fn ledger() -> Ledger<Order> {
        let (_, shared) = memory_store();
        Ledger::with_status_tracking(shared, RecordingEvents::new())
    }

    #[tokio::test]
    async fn records_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/charges/A-1"))
            .and(body_json(json!({ "amount": 100, "card": "4111111111111111" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"charge":"ch_1","secret":"s"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let ledger = ledger();
        let transport = ReqwestTransport::new(&HttpConfig::default()).unwrap();
        let mut record = Record::with_status(order("A-1"), OrderStatus::Pending);
        ledger.save(&mut record).unwrap();

        PendingEndpoint::new(&ledger, &transport, Charge { base: server.uri() })
            .on(&mut record)
            .dispatch()
            .await
            .unwrap();

        assert_eq!(record.status(), Some(OrderStatus::Complete));
        assert_eq!(record.entity.reference, "ch_1");

        let history = ledger.statuses(&record).unwrap();
        assert_eq!(history.len(), 3);
        let request = &history[1];
        assert_eq!(request.status_type, Some(StatusType::Request));
        let request_text = request.payload.as_deref().unwrap();
        assert!(request_text.starts_with("curl \\\n  -sS \\\n  -X 'POST'"));
        assert!(request_text.contains("-H 'Authorization: Bearer ********'"));
        assert!(request_text.contains(r#"--data '{"amount":100,"card":"********"}'"#));
        assert!(!request_text.contains("4111"));

        let response = &history[2];
        assert_eq!(response.status_type, Some(StatusType::Response));
        let response_text = response.payload.as_deref().unwrap();
        assert!(response_text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response_text.contains("\"secret\": \"********\""));
        assert!(response_text.contains("\"charge\": \"ch_1\""));
    }

    #[tokio::test]
    async fn transport_failure_leaves_processing_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ledger = ledger();
        let transport = ReqwestTransport::new(&HttpConfig::default()).unwrap();
        let mut record = Record::with_status(order("A-2"), OrderStatus::Pending);
        ledger.save(&mut record).unwrap();

        let err = PendingEndpoint::new(&ledger, &transport, Charge { base: server.uri() })
            .on(&mut record)
            .dispatch()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Transport(TransportError::Status { status: 500, .. })
        ));
        let codes: Vec<i64> = ledger.statuses(&record).unwrap().iter().map(|s| s.status).collect();
        assert_eq!(codes, [0, 1]);
    }

    #[tokio::test]
    async fn unbound_endpoint_fails() {
        let ledger = ledger();
        let transport = ReqwestTransport::new(&HttpConfig::default()).unwrap();
        let err = PendingEndpoint::new(&ledger, &transport, Charge { base: String::new() })
            .dispatch()
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::State(StateError::Unbound(_))));
    }
}
