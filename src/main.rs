mod cli;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use flowledger::config::FlowConfig;
use flowledger::ledger::OwnerRef;
use flowledger::maintenance::{compress_sweep, purge_sweep, threshold};
use flowledger::store::{self, FileStore};
use ui::Progress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = FlowConfig::load(&cli.config)?;
    let store = store::shared(
        FileStore::open(&cli.store)
            .with_context(|| format!("opening store {}", cli.store.display()))?,
    );
    let compressor = config.compressor(store.clone())?;

    match cli.command {
        Command::Compress { kind, id: None } => {
            let progress = Progress::start("compressing payloads");
            let cutoff = threshold(config.compression.timeout);
            let report = compress_sweep(&compressor, cutoff, kind.as_deref())?;
            progress.sweep_done("compress", &report);
        }
        Command::Compress { id: Some(id), .. } => {
            let progress = Progress::start(&format!("compressing status {id}"));
            match compressor.compress_by_id(id) {
                Ok(status) => progress.status_done("compressed", &status),
                Err(err) => {
                    progress.fail(&err.to_string());
                    return Err(err.into());
                }
            }
        }
        Command::Purge { id: None } => {
            let progress = Progress::start("purging extracted payloads");
            let report = purge_sweep(&compressor, threshold(config.purge.timeout))?;
            progress.sweep_done("purge", &report);
        }
        Command::Purge { id: Some(id) } => {
            let progress = Progress::start(&format!("purging status {id}"));
            let status = compressor.purge_by_id(id)?;
            progress.status_done("purged", &status);
        }
        Command::Extract { status_id } => {
            let progress = Progress::start(&format!("extracting status {status_id}"));
            match compressor.extract_by_id(status_id) {
                Ok(status) => {
                    progress.status_done("extracted", &status);
                    println!("{}", status.payload.unwrap_or_default());
                }
                Err(err) => {
                    progress.fail(&err.to_string());
                    return Err(err.into());
                }
            }
        }
        Command::History { kind, id } => {
            let progress = Progress::start("loading history");
            let owner = OwnerRef::new(kind, id);
            let statuses = {
                let guard = store
                    .lock()
                    .map_err(|err| anyhow::anyhow!("store lock poisoned: {err}"))?;
                guard.statuses_for(&owner)?
            };
            progress.history(&owner.to_string(), &statuses);
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "flowledger=debug" } else { "flowledger=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
