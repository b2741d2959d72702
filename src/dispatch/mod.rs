//! Endpoints, callbacks and tasks bound to a tracked record, each run
//! between recorded status transitions.
//!
//! ```ignore
//! PendingEndpoint::new(&ledger, &transport, ChargeCard)
//!     .on(&mut order)
//!     .dispatch()
//!     .await?;
//! ```

mod callback;
mod endpoint;
mod task;
pub mod transport;

use uuid::Uuid;

pub use callback::{Callback, PendingCallback};
pub use endpoint::{Endpoint, PendingEndpoint};
pub use task::{PendingTask, Task};
pub use transport::{HttpConfig, HttpTransport, OutgoingRequest, RawResponse, ReqwestTransport};

/// Id tying together the log lines of one dispatch.
pub(crate) fn correlation_id() -> Uuid {
    Uuid::new_v4()
}
