//! Error taxonomy for the ledger, the archive engine and the dispatch pipeline.
//!
//! Every failure maps to one of the domain enums below and is wrapped by
//! [`FlowError`] at the public API boundary. Handler failures keep their
//! original `anyhow::Error` so the caller sees exactly what the handler raised.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failure raised by a bound endpoint, callback or task handler.
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Short machine-friendly name of the failure family.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Capability(_) => "capability",
            FlowError::State(_) => "state",
            FlowError::Archive(_) => "archive",
            FlowError::Transport(_) => "transport",
            FlowError::Config(_) => "config",
            FlowError::Store(_) => "store",
            FlowError::Handler(_) => "handler",
            FlowError::Io(_) => "io",
            FlowError::Json(_) => "json",
        }
    }
}

/// An operation required a capability the target does not declare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("`{kind}` records do not collect status history")]
    StatusCollection { kind: &'static str },

    #[error("status `{status}` cannot be defibrillated")]
    Defibrillation { status: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("undefined status on `{kind}` record")]
    UndefinedStatus { kind: &'static str },

    #[error("cannot process callback: invalid status {actual} (expected {expected})")]
    UnexpectedStatus {
        expected: &'static str,
        actual: String,
    },

    #[error("{0} has no record bound; call `on` first")]
    Unbound(&'static str),

    #[error("request not set for pending callback")]
    MissingRequest,

    #[error("`{kind}` record has not been persisted yet")]
    NotPersisted { kind: &'static str },
}

/// Status codes of the zip engine, with their classic numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveErrorCode {
    Ok = 0,
    MultiDisk = 1,
    Rename = 2,
    Close = 3,
    Seek = 4,
    Read = 5,
    Write = 6,
    Crc = 7,
    ZipClosed = 8,
    NoEnt = 9,
    Exists = 10,
    Open = 11,
    TmpOpen = 12,
    Zlib = 13,
    Memory = 14,
    Changed = 15,
    CompNotSupp = 16,
    Eof = 17,
    Inval = 18,
    NoZip = 19,
    Internal = 20,
    Incons = 21,
    Remove = 22,
    Deleted = 23,
}

const ARCHIVE_CODES: [ArchiveErrorCode; 24] = [
    ArchiveErrorCode::Ok,
    ArchiveErrorCode::MultiDisk,
    ArchiveErrorCode::Rename,
    ArchiveErrorCode::Close,
    ArchiveErrorCode::Seek,
    ArchiveErrorCode::Read,
    ArchiveErrorCode::Write,
    ArchiveErrorCode::Crc,
    ArchiveErrorCode::ZipClosed,
    ArchiveErrorCode::NoEnt,
    ArchiveErrorCode::Exists,
    ArchiveErrorCode::Open,
    ArchiveErrorCode::TmpOpen,
    ArchiveErrorCode::Zlib,
    ArchiveErrorCode::Memory,
    ArchiveErrorCode::Changed,
    ArchiveErrorCode::CompNotSupp,
    ArchiveErrorCode::Eof,
    ArchiveErrorCode::Inval,
    ArchiveErrorCode::NoZip,
    ArchiveErrorCode::Internal,
    ArchiveErrorCode::Incons,
    ArchiveErrorCode::Remove,
    ArchiveErrorCode::Deleted,
];

impl ArchiveErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Code as reported by the archive engine.
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| ARCHIVE_CODES.get(idx).copied())
    }

    /// Engine wording for the code.
    pub fn message(self) -> &'static str {
        match self {
            ArchiveErrorCode::Ok => "No error",
            ArchiveErrorCode::MultiDisk => "Multi-disk zip archives not supported",
            ArchiveErrorCode::Rename => "Renaming temporary file failed",
            ArchiveErrorCode::Close => "Closing zip archive failed",
            ArchiveErrorCode::Seek => "Seek error",
            ArchiveErrorCode::Read => "Read error",
            ArchiveErrorCode::Write => "Write error",
            ArchiveErrorCode::Crc => "CRC error",
            ArchiveErrorCode::ZipClosed => "Containing zip archive was closed",
            ArchiveErrorCode::NoEnt => "No such file",
            ArchiveErrorCode::Exists => "File already exists",
            ArchiveErrorCode::Open => "Can't open file",
            ArchiveErrorCode::TmpOpen => "Failure to create temporary file",
            ArchiveErrorCode::Zlib => "Zlib error",
            ArchiveErrorCode::Memory => "Malloc failure",
            ArchiveErrorCode::Changed => "Entry has been changed",
            ArchiveErrorCode::CompNotSupp => "Compression method not supported",
            ArchiveErrorCode::Eof => "Premature EOF",
            ArchiveErrorCode::Inval => "Invalid argument",
            ArchiveErrorCode::NoZip => "Not a zip archive",
            ArchiveErrorCode::Internal => "Internal error",
            ArchiveErrorCode::Incons => "Zip archive inconsistent",
            ArchiveErrorCode::Remove => "Can't remove file",
            ArchiveErrorCode::Deleted => "Entry has been deleted",
        }
    }

    /// Translates a raw numeric status into its description.
    pub fn describe(code: i32) -> String {
        match Self::from_code(code) {
            Some(known) => known.message().to_string(),
            None => format!("Unknown status {code}"),
        }
    }

    fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ArchiveErrorCode::NoEnt,
            io::ErrorKind::AlreadyExists => ArchiveErrorCode::Exists,
            io::ErrorKind::PermissionDenied => ArchiveErrorCode::Open,
            io::ErrorKind::UnexpectedEof => ArchiveErrorCode::Eof,
            io::ErrorKind::InvalidInput => ArchiveErrorCode::Inval,
            io::ErrorKind::OutOfMemory => ArchiveErrorCode::Memory,
            io::ErrorKind::WriteZero => ArchiveErrorCode::Write,
            _ => ArchiveErrorCode::Read,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{}: {detail}", code.message())]
    Engine {
        code: ArchiveErrorCode,
        detail: String,
    },

    #[error("Unsupported skip mode `{0}`")]
    UnsupportedSkipMode(String),

    #[error("Invalid file")]
    InvalidFile,

    #[error("Invalid destination path")]
    InvalidDestination,

    #[error("Error creating folder {0}")]
    CreateFolder(PathBuf),

    #[error("Destination path not writable: {0}")]
    NotWritable(PathBuf),

    #[error("Path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("No archive is open")]
    NotOpen,
}

impl ArchiveError {
    pub fn engine(code: ArchiveErrorCode, detail: impl Into<String>) -> Self {
        ArchiveError::Engine {
            code,
            detail: detail.into(),
        }
    }

    /// Wraps an IO failure, translating its kind into an engine status.
    pub fn io(err: io::Error, detail: impl Into<String>) -> Self {
        let code = ArchiveErrorCode::from_io(&err);
        ArchiveError::Engine {
            code,
            detail: format!("{}: {err}", detail.into()),
        }
    }

    /// Engine status behind this error, when there is one.
    pub fn code(&self) -> Option<ArchiveErrorCode> {
        match self {
            ArchiveError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        use zip::result::ZipError;

        let code = match &err {
            ZipError::Io(io_err) => ArchiveErrorCode::from_io(io_err),
            ZipError::InvalidArchive(_) => ArchiveErrorCode::NoZip,
            ZipError::UnsupportedArchive(_) => ArchiveErrorCode::CompNotSupp,
            ZipError::FileNotFound => ArchiveErrorCode::NoEnt,
            ZipError::InvalidPassword => ArchiveErrorCode::Inval,
            _ => ArchiveErrorCode::Internal,
        };
        ArchiveError::engine(code, err.to_string())
    }
}

/// Failures of the outbound HTTP call. Never retried internally.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "compression disks must be distinct, but remote and temp both resolve to {0}; \
         cleanup of the temp copy would delete the only archive"
    )]
    SharedDisk(String),

    #[error("invalid value for `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    #[error("{kind} record {id} not found")]
    RecordNotFound { kind: String, id: u64 },

    #[error("status record {0} not found")]
    StatusNotFound(u64),

    #[error("commit or rollback without an open transaction")]
    NoTransaction,

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    #[error("failed to persist store to {path}: {message}")]
    Persist { path: String, message: String },

    #[error("injected failure at {0}")]
    Injected(&'static str),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned(err.to_string())
    }
}
