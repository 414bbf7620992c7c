//! `scanguard reconcile` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use scanguard_verifier::reconcile::{ReconcileReport, Reconciler};
use scanguard_verifier::store::ScanStore;

use crate::cli::ReconcileArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Execute the `reconcile` command.
///
/// Queues every unconfirmed incident and waits until the ledger worker has
/// settled each one as confirmed or failed.
pub async fn execute(
    args: ReconcileArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let workspace = Workspace::open(config_path).await?;
    let ledger = workspace.ledger().await?;

    // The channel must hold the whole backlog: nothing consumes it until the
    // reconciler pass is done.
    let backlog = workspace.store.unconfirmed_incidents().await?.len();
    let (incident_tx, incident_rx) = mpsc::channel(backlog.max(1));

    let report = Reconciler::new(Arc::clone(&workspace.store), incident_tx)
        .include_rejected(args.include_rejected)
        .run_once()
        .await?;

    let worker = workspace.worker(ledger);
    workspace.drain(Arc::clone(&worker), incident_rx).await;
    workspace.save().await?;

    let summary = ReconcileSummary {
        report,
        confirmed: worker.confirmed_count(),
        failed: worker.failed_count(),
    };
    info!(
        enqueued = summary.report.enqueued,
        confirmed = summary.confirmed,
        failed = summary.failed,
        "reconcile finished"
    );
    writer.render(&summary)?;

    if summary.failed > 0 {
        return Err(CliError::Command(format!(
            "{} incident(s) could not be recorded on the ledger",
            summary.failed
        )));
    }
    Ok(())
}

/// Reconcile pass plus the worker's outcome counts.
#[derive(Serialize)]
pub struct ReconcileSummary {
    #[serde(flatten)]
    pub report: ReconcileReport,
    pub confirmed: u64,
    pub failed: u64,
}

impl Render for ReconcileSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Ledger reconcile")?;
        writeln!(w, "  Unconfirmed:      {}", self.report.unconfirmed)?;
        writeln!(w, "  Enqueued:         {}", self.report.enqueued)?;
        writeln!(w, "  Skipped rejected: {}", self.report.skipped_rejected)?;
        writeln!(w, "  Confirmed:        {}", self.confirmed.to_string().green())?;
        if self.failed > 0 {
            writeln!(w, "  Failed:           {}", self.failed.to_string().red().bold())?;
        } else {
            writeln!(w, "  Failed:           0")?;
        }
        Ok(())
    }
}
