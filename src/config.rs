//! Settings loaded from `flow.toml`.
//!
//! Missing keys fall back to defaults. The `FLOW_*` environment variables
//! take precedence over the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::archive::{Compressor, EntryLayout, LocalDisk, normalize_root};
use crate::dispatch::HttpConfig;
use crate::error::ConfigError;
use crate::maintenance::ProbeConfig;
use crate::store::SharedStore;

/// Read by the binary unless `--config` says otherwise.
pub const DEFAULT_PATH: &str = "flow.toml";

/// Two days, in minutes.
const DEFAULT_TIMEOUT: u64 = 60 * 24 * 2;

/// Everything the binary and the maintenance sweeps need.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub compression: CompressionConfig,
    pub purge: PurgeConfig,
    /// Looked up by owner kind; the first match wins.
    pub probes: Vec<ProbeConfig>,
    pub http: HttpConfig,
}

/// Archive roots. They must not overlap: cleaning the scratch area would
/// otherwise delete archives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Where hourly archives are kept.
    pub remote: PathBuf,
    /// Scratch space for archives being written or read.
    pub temp: PathBuf,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            remote: PathBuf::from("storage/remote"),
            temp: PathBuf::from("storage/temp"),
        }
    }
}

/// The `[compression]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub disk: DiskConfig,
    /// Minutes a payload stays hot before it is archived.
    pub timeout: u64,
    /// How entries are named inside an hourly archive.
    pub entry_layout: EntryLayout,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            disk: DiskConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            entry_layout: EntryLayout::default(),
        }
    }
}

/// The `[purge]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Minutes an extracted payload is kept.
    pub timeout: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FlowConfig {
    /// Reads `path` when it exists, applies the environment and validates.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::parse(&contents).with_context(|| format!("parsing {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without applying the environment or validating.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overrides values from `lookup`, normally the process environment.
    /// Empty values are ignored.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(remote) = get("FLOW_COMPRESSION_DISK_REMOTE") {
            self.compression.disk.remote = PathBuf::from(remote);
        }
        if let Some(temp) = get("FLOW_COMPRESSION_DISK_TEMP") {
            self.compression.disk.temp = PathBuf::from(temp);
        }
        if let Some(timeout) = get("FLOW_COMPRESSION_TIMEOUT") {
            self.compression.timeout = minutes("FLOW_COMPRESSION_TIMEOUT", &timeout)?;
        }
        if let Some(timeout) = get("FLOW_PURGE_TIMEOUT") {
            self.purge.timeout = minutes("FLOW_PURGE_TIMEOUT", &timeout)?;
        }
        Ok(())
    }

    /// Rejects overlapping disk roots and incomplete probe tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let remote = normalize_root(&self.compression.disk.remote);
        let temp = normalize_root(&self.compression.disk.temp);
        if remote.starts_with(&temp) || temp.starts_with(&remote) {
            return Err(ConfigError::SharedDisk(remote.display().to_string()));
        }
        for probe in &self.probes {
            probe.validate()?;
        }
        Ok(())
    }

    /// Compressor over the configured local disks.
    pub fn compressor(&self, store: SharedStore) -> Result<Compressor, ConfigError> {
        let disk = &self.compression.disk;
        Ok(Compressor::new(
            store,
            Arc::new(LocalDisk::new(&disk.remote)),
            LocalDisk::new(&disk.temp),
        )?
        .with_layout(self.compression.entry_layout))
    }

    /// Probe configured for `kind`.
    pub fn probe(&self, kind: &str) -> Option<&ProbeConfig> {
        self.probes.iter().find(|probe| probe.kind == kind)
    }
}

fn minutes(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        message: format!("expected whole minutes, got `{value}`"),
    })
}
