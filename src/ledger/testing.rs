//! Fixtures shared by the unit tests.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::hooks::EventSink;
use super::record::{Entity, Record};
use super::status::{RecordId, StatusValue};
use crate::store::{MemoryStore, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl StatusValue for OrderStatus {
    fn all() -> &'static [Self] {
        &[
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Complete,
            OrderStatus::Failed,
        ]
    }

    fn code(self) -> i64 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Complete => 2,
            OrderStatus::Failed => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Failed => "FAILED",
        }
    }

    fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Complete => "Complete",
            OrderStatus::Failed => "Failed",
        }
    }

    fn defibrillate(self) -> Option<Self> {
        match self {
            OrderStatus::Failed => Some(OrderStatus::Pending),
            _ => None,
        }
    }

    fn should_be_touched(self) -> bool {
        matches!(self, OrderStatus::Processing)
    }

    fn events(self) -> Option<&'static [&'static str]> {
        match self {
            OrderStatus::Complete => Some(&["order.completed", "order.notify"]),
            OrderStatus::Failed => Some(&["order.failed"]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub reference: String,
    pub amount: i64,
}

impl Entity for Order {
    type Status = OrderStatus;
    const KIND: &'static str = "order";
}

/// An entity that carries a status but keeps no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
}

impl Entity for Draft {
    type Status = OrderStatus;
    const KIND: &'static str = "draft";
    const COLLECTS_STATUS: bool = false;
}

pub fn order(reference: &str) -> Order {
    Order {
        reference: reference.to_string(),
        amount: 100,
    }
}

/// A memory store plus the shared handle the ledger uses, pointing at the
/// same tables.
pub fn memory_store() -> (Arc<Mutex<MemoryStore>>, SharedStore) {
    let concrete = Arc::new(Mutex::new(MemoryStore::new()));
    let shared: SharedStore = concrete.clone();
    (concrete, shared)
}

/// Event sink that remembers every dispatch.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    seen: Mutex<Vec<(&'static str, Option<RecordId>)>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn seen(&self) -> Vec<(&'static str, Option<RecordId>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl<E: Entity> EventSink<E> for RecordingEvents {
    fn dispatch(&self, event: &'static str, record: &Record<E>) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((event, record.id()));
        Ok(())
    }
}
