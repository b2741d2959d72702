use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked record row.
pub type RecordId = u64;

/// Identifier of a status history row.
pub type StatusId = u64;

/// A backed status enum: a closed set of named cases, each stored as its scalar
/// code and carrying its label and capabilities as data.
///
/// Capabilities are declared per variant by overriding the defaulted methods:
///
/// - [`defibrillate`](StatusValue::defibrillate) returns the reset target when
///   the status can be defibrillated;
/// - [`should_be_touched`](StatusValue::should_be_touched) forces a fresh
///   history entry on `touch`;
/// - [`events`](StatusValue::events) lists the events dispatched whenever a
///   transition into this status is written.
pub trait StatusValue: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every case, in declaration order.
    fn all() -> &'static [Self];

    /// The stored scalar.
    fn code(self) -> i64;

    /// Case name, e.g. `PENDING`.
    fn name(self) -> &'static str;

    /// Human readable label. Defaults to the case name.
    fn label(self) -> &'static str {
        self.name()
    }

    /// Case stored as `code`, if any.
    fn from_code(code: i64) -> Option<Self> {
        Self::all().iter().copied().find(|status| status.code() == code)
    }

    /// Status a stuck record is reset to, when this case allows it.
    fn defibrillate(self) -> Option<Self> {
        None
    }

    /// Whether `touch` appends a history entry even without a change.
    fn should_be_touched(self) -> bool {
        false
    }

    /// Events dispatched after a transition into this case is written.
    fn events(self) -> Option<&'static [&'static str]> {
        None
    }

    /// `name`/`value`/`label` triples for every case.
    fn options() -> Vec<StatusOption> {
        Self::all()
            .iter()
            .map(|status| StatusOption {
                name: status.name(),
                value: status.code(),
                label: status.label(),
            })
            .collect()
    }

    /// Labels of every case, in declaration order.
    fn labels() -> Vec<&'static str> {
        Self::all().iter().map(|status| status.label()).collect()
    }
}

/// One case as exposed to listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusOption {
    pub name: &'static str,
    pub value: i64,
    pub label: &'static str,
}

/// Classifies the payload attached to a history entry.
///
/// Persisted as its integer code, which is fixed and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatusType {
    Request = 0,
    Response = 1,
    Callback = 2,
    Exception = 3,
    Probe = 4,
}

impl StatusType {
    /// Every type, ordered by code.
    pub const ALL: [StatusType; 5] = [
        StatusType::Request,
        StatusType::Response,
        StatusType::Callback,
        StatusType::Exception,
        StatusType::Probe,
    ];

    /// Persisted code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Display name, as shown in history listings.
    pub fn label(self) -> &'static str {
        match self {
            StatusType::Request => "Request",
            StatusType::Response => "Response",
            StatusType::Callback => "Callback",
            StatusType::Exception => "Exception",
            StatusType::Probe => "Probe",
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<StatusType> for u8 {
    fn from(value: StatusType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for StatusType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        StatusType::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("unknown status type code {value}"))
    }
}

/// Polymorphic owner of a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Entity kind, e.g. `order`.
    pub kind: String,
    pub id: RecordId,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, id: RecordId) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Where a history entry's payload currently lives.
///
/// A purged entry is indistinguishable from a compressed one and reads as
/// [`PayloadTier::Compressed`] again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadTier {
    /// Payload is stored on the row.
    Hot,
    /// Payload lives only in the hourly archive.
    Compressed,
    /// Payload was restored from the archive and may be purged again.
    Extracted,
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StatusId,
    /// Record the entry belongs to.
    pub owner: OwnerRef,
    /// Stored code of the status entered.
    pub status: i64,
    /// Empty while the payload is only in the archive.
    pub payload: Option<String>,
    #[serde(rename = "type")]
    pub status_type: Option<StatusType>,
    /// Set when the payload was archived.
    pub compressed_at: Option<DateTime<Utc>>,
    /// Set when the payload was restored from the archive.
    pub extracted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Derived from the compression and extraction stamps.
    pub fn tier(&self) -> PayloadTier {
        match (self.compressed_at, self.extracted_at) {
            (None, _) => PayloadTier::Hot,
            (Some(_), Some(_)) => PayloadTier::Extracted,
            (Some(_), None) => PayloadTier::Compressed,
        }
    }

    /// Decodes the stored scalar into a typed status.
    pub fn status_as<S: StatusValue>(&self) -> Option<S> {
        S::from_code(self.status)
    }
}

/// Values for a history entry that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatus {
    pub owner: OwnerRef,
    pub status: i64,
    pub payload: Option<String>,
    pub status_type: Option<StatusType>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::OrderStatus;

    fn record(compressed: bool, extracted: bool) -> StatusRecord {
        let now = Utc::now();
        StatusRecord {
            id: 1,
            owner: OwnerRef::new("order", 7),
            status: 0,
            payload: None,
            status_type: None,
            compressed_at: compressed.then_some(now),
            extracted_at: extracted.then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tier_is_derived_from_timestamps() {
        assert_eq!(record(false, false).tier(), PayloadTier::Hot);
        assert_eq!(record(true, false).tier(), PayloadTier::Compressed);
        assert_eq!(record(true, true).tier(), PayloadTier::Extracted);
    }

    #[test]
    fn status_type_codes_are_stable() {
        let codes: Vec<u8> = StatusType::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
        assert_eq!(StatusType::try_from(3), Ok(StatusType::Exception));
        assert!(StatusType::try_from(5).is_err());
        assert_eq!(StatusType::Probe.to_string(), "Probe");
    }

    #[test]
    fn status_type_serializes_as_integer() {
        let json = serde_json::to_string(&StatusType::Callback).unwrap();
        assert_eq!(json, "2");
        let parsed: StatusType = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, StatusType::Response);
        assert!(serde_json::from_str::<StatusType>("9").is_err());
    }

    #[test]
    fn status_record_uses_type_column_name() {
        let mut rec = record(false, false);
        rec.status_type = Some(StatusType::Request);
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["type"], 0);
        assert!(value.get("status_type").is_none());
    }

    #[test]
    fn backed_enum_helpers() {
        assert_eq!(OrderStatus::from_code(1), Some(OrderStatus::Processing));
        assert_eq!(OrderStatus::from_code(42), None);
        assert_eq!(OrderStatus::Failed.label(), "Failed");
        let options = OrderStatus::options();
        assert_eq!(options.len(), OrderStatus::all().len());
        assert_eq!(options[0].name, "PENDING");
        assert_eq!(options[0].value, 0);
        assert!(OrderStatus::labels().contains(&"Complete"));
    }

    #[test]
    fn status_as_decodes_scalar() {
        let mut rec = record(false, false);
        rec.status = 2;
        assert_eq!(rec.status_as::<OrderStatus>(), Some(OrderStatus::Complete));
    }
}
