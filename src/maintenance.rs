//! Batch housekeeping: archiving old payloads, dropping restored ones and
//! probing records stuck in a waiting status.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::archive::Compressor;
use crate::error::{ConfigError, Result};
use crate::ledger::{Entity, Ledger, Record, RecordId, StatusId, StatusRecord, StatusType};
use crate::store::{self, Order, RecordQuery, StatusQuery};

/// Outcome of one pass. Failed rows keep their state and are retried by
/// the next pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Rows handled successfully.
    pub processed: usize,
    /// Status id and error of every failed row.
    pub failures: Vec<(u64, String)>,
}

impl SweepReport {
    /// No row failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moment `minutes` ago. Spans reaching past the representable range
/// saturate to the earliest instant.
pub fn threshold(minutes: u64) -> DateTime<Utc> {
    ago(i64::try_from(minutes).ok().and_then(Duration::try_minutes))
}

fn ago(span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|span| Utc::now().checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Archives every hot payload created before `threshold`, optionally only
/// for owners of `kind`.
pub fn compress_sweep(
    compressor: &Compressor,
    threshold: DateTime<Utc>,
    kind: Option<&str>,
) -> Result<SweepReport> {
    let query = StatusQuery::compressible(threshold, kind);
    info!(?kind, %threshold, "compress sweep");
    sweep(compressor, &query, Compressor::compress)
}

/// Drops payloads restored before `threshold`.
pub fn purge_sweep(compressor: &Compressor, threshold: DateTime<Utc>) -> Result<SweepReport> {
    let query = StatusQuery::purgeable(threshold);
    info!(%threshold, "purge sweep");
    sweep(compressor, &query, Compressor::purge)
}

/// Streams matching rows one at a time in id order. The store lock is not
/// held while a row is being processed.
fn sweep(
    compressor: &Compressor,
    query: &StatusQuery,
    action: impl Fn(&Compressor, &mut StatusRecord) -> Result<()>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut after: Option<StatusId> = None;
    loop {
        let next = {
            let guard = store::lock(compressor.store())?;
            guard.next_status(query, after)?
        };
        let Some(mut status) = next else { break };
        after = Some(status.id);

        match action(compressor, &mut status) {
            Ok(()) => report.processed += 1,
            Err(err) => {
                warn!(status_id = status.id, error = %err, "sweep failed for status");
                report.failures.push((status.id, err.to_string()));
            }
        }
    }
    info!(
        processed = report.processed,
        failed = report.failures.len(),
        "sweep finished"
    );
    Ok(report)
}

fn default_grace() -> u64 {
    300
}

fn default_batch() -> usize {
    200
}

/// One `[[probes]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeConfig {
    /// Owner kind the probe applies to.
    pub kind: String,
    /// Status codes a record is waiting in.
    pub trigger_statuses: Vec<i64>,
    /// Seconds a record must have waited before it is probed.
    #[serde(default = "default_grace")]
    pub grace: u64,
    /// Records loaded per query.
    #[serde(default = "default_batch")]
    pub batch: usize,
}

impl ProbeConfig {
    /// Probe with the default grace and batch.
    pub fn new(kind: impl Into<String>, trigger_statuses: impl IntoIterator<Item = i64>) -> Self {
        Self {
            kind: kind.into(),
            trigger_statuses: trigger_statuses.into_iter().collect(),
            grace: default_grace(),
            batch: default_batch(),
        }
    }

    /// Seconds a record must have waited.
    pub fn grace(mut self, seconds: u64) -> Self {
        self.grace = seconds;
        self
    }

    /// Records loaded per query.
    pub fn batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Rejects empty trigger lists and a zero batch.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.trigger_statuses.is_empty() {
            return Err(ConfigError::Invalid {
                key: "probes.trigger_statuses",
                message: format!("probe for {} has no trigger statuses", self.kind),
            });
        }
        if self.batch == 0 {
            return Err(ConfigError::Invalid {
                key: "probes.batch",
                message: format!("probe for {} has a zero batch", self.kind),
            });
        }
        Ok(())
    }

    /// Newest creation time a record may have to be probed.
    fn cutoff(&self) -> DateTime<Utc> {
        ago(i64::try_from(self.grace).ok().and_then(Duration::try_seconds))
    }
}

/// Checks on a record that has been waiting too long.
pub trait Prober<E: Entity> {
    /// Payload recorded with the PROBE transition.
    fn probe(&self, record: &Record<E>) -> anyhow::Result<Option<String>>;
}

impl<E: Entity, F> Prober<E> for F
where
    F: Fn(&Record<E>) -> anyhow::Result<Option<String>>,
{
    fn probe(&self, record: &Record<E>) -> anyhow::Result<Option<String>> {
        self(record)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Records selected for probing, in id order.
    pub candidates: Vec<RecordId>,
    pub sweep: SweepReport,
}

/// Probes records of `E` sitting in a trigger status for longer than the
/// grace period, skipping those probed since the cutoff. A dry run only
/// selects.
pub fn probe_sweep<E: Entity>(
    ledger: &Ledger<E>,
    config: &ProbeConfig,
    prober: &impl Prober<E>,
    dry_run: bool,
) -> Result<ProbeReport> {
    if config.kind != E::KIND {
        return Err(ConfigError::Invalid {
            key: "probes.kind",
            message: format!("probe for {} run against {}", config.kind, E::KIND),
        }
        .into());
    }
    config.validate()?;

    let cutoff = config.cutoff();
    let query = RecordQuery::new()
        .status_in(config.trigger_statuses.iter().copied())
        .created_at_or_before(cutoff)
        .order(Order::IdAsc);

    let mut candidates = Vec::new();
    for record in ledger.query(&query)? {
        if candidates.len() == config.batch {
            break;
        }
        let probed_recently = ledger.statuses(&record)?.iter().any(|status| {
            status.status_type == Some(StatusType::Probe) && status.created_at > cutoff
        });
        if !probed_recently {
            candidates.push(record);
        }
    }

    let mut report = ProbeReport {
        candidates: candidates.iter().filter_map(Record::id).collect(),
        sweep: SweepReport::default(),
    };
    info!(kind = E::KIND, %cutoff, selected = report.candidates.len(), dry_run, "probe sweep");
    if dry_run {
        return Ok(report);
    }

    for mut record in candidates {
        let id = record.id().unwrap_or_default();
        let outcome = prober
            .probe(&record)
            .map_err(crate::error::FlowError::Handler)
            .and_then(|payload| ledger.force_transition(&mut record, payload, Some(StatusType::Probe)));
        match outcome {
            Ok(()) => {
                debug!(kind = E::KIND, id, "probed");
                report.sweep.processed += 1;
            }
            Err(err) => {
                warn!(kind = E::KIND, id, error = %err, "probe failed");
                report.sweep.failures.push((id, err.to_string()));
            }
        }
    }
    Ok(report)
}
