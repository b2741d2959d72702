//! Terminal feedback for the maintenance commands: a spinner while a
//! command runs and a coloured summary afterwards.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use flowledger::ledger::{PayloadTier, StatusRecord};
use flowledger::maintenance::SweepReport;

/// Spinner for one command plus the styles of its summary lines.
pub struct Progress {
    /// Cleared before any summary is printed.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Progress {
    /// Starts a spinner showing `message`.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Clears the spinner and prints the sweep outcome, one line per failure.
    pub fn sweep_done(&self, action: &str, report: &SweepReport) {
        self.pb.finish_and_clear();
        println!(
            "  {} {action}: {} processed",
            self.green.apply_to("✓"),
            report.processed
        );
        for (id, reason) in &report.failures {
            println!("  {} status {id}: {reason}", self.red.apply_to("✗"));
        }
    }

    /// Clears the spinner and prints the status with its payload tier.
    pub fn status_done(&self, action: &str, status: &StatusRecord) {
        self.pb.finish_and_clear();
        println!(
            "  {} {action} status {} ({})",
            self.green.apply_to("✓"),
            status.id,
            tier_label(status.tier())
        );
    }

    /// Clears the spinner and prints `message` as an error.
    pub fn fail(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }

    /// Prints one line per entry, oldest first.
    pub fn history(&self, owner: &str, statuses: &[StatusRecord]) {
        self.pb.finish_and_clear();
        if statuses.is_empty() {
            println!("  {} no history for {owner}", self.yellow.apply_to("!"));
            return;
        }
        println!("{}", self.green.apply_to(format!("─── {owner} ───")));
        for status in statuses {
            let kind = status
                .status_type
                .map_or_else(|| "-".to_string(), |kind| kind.to_string());
            println!(
                "  {:>6}  {}  status={:<4} {:<9} {}",
                status.id,
                status.created_at.format("%Y-%m-%d %H:%M:%S"),
                status.status,
                kind,
                self.dim.apply_to(tier_label(status.tier()))
            );
        }
    }
}

fn tier_label(tier: PayloadTier) -> &'static str {
    match tier {
        PayloadTier::Hot => "hot",
        PayloadTier::Compressed => "compressed",
        PayloadTier::Extracted => "extracted",
    }
}
