use std::backtrace::BacktraceStatus;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result, TransportError};

/// Serialized form of a failure, stored as the payload of EXCEPTION entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub kind: String,
    /// Underlying causes, outermost first, excluding `message` itself.
    pub causes: Vec<String>,
    pub backtrace: Option<String>,
}

impl Failure {
    /// Captures the message, cause chain and backtrace, if one was captured.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = if let Some(flow) = error.downcast_ref::<FlowError>() {
            flow.kind()
        } else if error.downcast_ref::<TransportError>().is_some() {
            "transport"
        } else if error.downcast_ref::<std::io::Error>().is_some() {
            "io"
        } else {
            "handler"
        };

        let backtrace = error.backtrace();
        let backtrace = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            message: error.to_string(),
            kind: kind.to_string(),
            causes: error.chain().skip(1).map(ToString::to_string).collect(),
            backtrace,
        }
    }

    /// Pretty JSON, as stored in the history.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}
