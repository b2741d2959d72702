//! Append-only status ledger for business records, with tiered archival of
//! the recorded payloads and audited HTTP dispatch.
//!
//! A [`Ledger`] persists records whose status changes are written to an
//! immutable history. Request and response texts attached to those entries
//! are masked by a [`Sanitizer`], rendered by [`format`] and later moved into
//! hourly zip archives by the [`Compressor`].

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod failure;
pub mod format;
pub mod ledger;
pub mod maintenance;
pub mod sanitize;
pub mod store;

pub use archive::Compressor;
pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use ledger::{Entity, Ledger, Record, StatusRecord, StatusType, StatusValue};
pub use sanitize::Sanitizer;
pub use store::{SharedStore, Store};
