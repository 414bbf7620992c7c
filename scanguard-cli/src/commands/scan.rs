//! `scanguard scan` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use scanguard_core::types::LedgerStatus;
use scanguard_verifier::coordinator::ScanVerification;
use scanguard_verifier::store::ScanStore;

use crate::cli::ScanArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Execute the `scan` command.
pub async fn execute(
    args: ScanArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let workspace = Workspace::open(config_path).await?;
    let ledger = workspace.ledger().await?;
    let (incident_tx, incident_rx) = mpsc::channel(workspace.verifier.queue_capacity.max(1));

    let coordinator = workspace.coordinator(Arc::clone(&ledger), incident_tx);
    let result = coordinator
        .record_scan(&args.code, &args.location, args.actor.as_deref())
        .await;
    drop(coordinator);
    let verification = result?;

    let mut report = ScanReport {
        verification,
        ledger_status: None,
        ledger_ref: None,
    };

    if let Some(incident) = report.verification.raised_incident.as_ref() {
        report.ledger_status = Some(incident.ledger_status);
        if args.wait {
            info!(code = %args.code, incident_id = %incident.id, "waiting for ledger submission");
            let worker = workspace.worker(ledger);
            workspace.drain(worker, incident_rx).await;

            let product = workspace.store.product(&args.code).await?;
            if let Some(current) = product.incident(&incident.id) {
                report.ledger_status = Some(current.ledger_status);
                report.ledger_ref = current.ledger_ref.clone();
            }
        }
    }

    workspace.save().await?;
    writer.render(&report)?;
    Ok(())
}

/// Scan result plus the ledger state of a raised incident.
#[derive(Serialize)]
pub struct ScanReport {
    #[serde(flatten)]
    pub verification: ScanVerification,
    /// Ledger status of the raised incident (None when nothing was raised)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_status: Option<LedgerStatus>,
    /// Ledger reference once confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_ref: Option<String>,
}

impl Render for ScanReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let v = &self.verification;
        writeln!(w, "Scan recorded: {}", v.product_code.bold())?;
        writeln!(w, "  At:       {}", v.scan.occurred_at.to_rfc3339())?;
        writeln!(w, "  Location: {}", v.scan.location)?;
        if let Some(actor) = &v.scan.actor {
            writeln!(w, "  Actor:    {}", actor)?;
        }

        if v.counterfeit {
            writeln!(w, "  Status:   {}", "COUNTERFEIT".red().bold())?;
        } else {
            writeln!(w, "  Status:   {}", "OK".green().bold())?;
        }
        if let Some(warning) = &v.warning {
            writeln!(w, "  Warning:  {}", warning.yellow())?;
        }

        if let Some(verdict) = &v.verdict {
            writeln!(
                w,
                "  Window:   {} prior scans, {} distinct locations",
                verdict.scan_count,
                verdict.distinct_locations.len()
            )?;
        }

        if let Some(incident) = &v.raised_incident {
            writeln!(w, "  Incident: {}", incident.id)?;
            if let Some(status) = self.ledger_status {
                writeln!(w, "  Ledger:   {}", status)?;
            }
            if let Some(ledger_ref) = &self.ledger_ref {
                writeln!(w, "  Ref:      {}", ledger_ref)?;
            }
        }

        Ok(())
    }
}
