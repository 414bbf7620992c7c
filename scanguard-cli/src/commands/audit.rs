//! `scanguard audit` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use scanguard_verifier::coordinator::AuditReport;
use scanguard_verifier::error::VerifierError;
use scanguard_verifier::ledger::ChainVerification;

use crate::cli::AuditArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Execute the `audit` command.
///
/// Fails after rendering when any confirmed incident's hash differs from
/// the ledger record or the local ledger chain is broken.
pub async fn execute(
    args: AuditArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let workspace = Workspace::open(config_path).await?;
    let ledger = workspace.ledger().await?;

    // audit never raises incidents; the receiver is not needed
    let (incident_tx, _incident_rx) = mpsc::channel(1);
    let coordinator = workspace.coordinator(Arc::clone(&ledger), incident_tx);

    let incidents = match &args.incident {
        Some(incident_id) => vec![coordinator.audit_incident(&args.code, incident_id).await?],
        None => coordinator.audit_product(&args.code).await?,
    };
    let chain = ledger.verify_chain().await.map_err(VerifierError::from)?;

    let summary = AuditSummary {
        product_code: args.code,
        incidents,
        chain,
    };
    let mismatches = summary.mismatches();
    info!(
        code = %summary.product_code,
        incidents = summary.incidents.len(),
        mismatches,
        "audit finished"
    );
    writer.render(&summary)?;

    if mismatches > 0 || !summary.chain_intact() {
        warn!(code = %summary.product_code, "ledger audit found discrepancies");
        return Err(CliError::Command("ledger audit found discrepancies".to_owned()));
    }
    Ok(())
}

/// Audit results for one product.
#[derive(Serialize)]
pub struct AuditSummary {
    pub product_code: String,
    pub incidents: Vec<AuditReport>,
    /// Hash chain check (local file ledger only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainVerification>,
}

impl AuditSummary {
    /// Incidents whose ledger hash differs from the local payload hash.
    pub fn mismatches(&self) -> usize {
        self.incidents
            .iter()
            .filter(|r| r.hash_matches == Some(false))
            .count()
    }

    /// True when there is no chain to check or the chain is intact.
    pub fn chain_intact(&self) -> bool {
        self.chain.as_ref().is_none_or(ChainVerification::is_intact)
    }
}

impl Render for AuditSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Ledger audit: {}", self.product_code.bold())?;
        if self.incidents.is_empty() {
            writeln!(w, "  (no incidents)")?;
        }

        for report in &self.incidents {
            writeln!(w)?;
            writeln!(w, "  Incident: {}", report.incident_id)?;
            writeln!(w, "    Local status: {}", report.local_status)?;
            writeln!(w, "    Content hash: {}", report.content_hash)?;
            if let Some(ledger_ref) = &report.ledger_ref {
                writeln!(w, "    Ledger ref:   {}", ledger_ref)?;
            }
            if let Some(record) = &report.record {
                writeln!(w, "    Ledger state: {}", record.status)?;
            }
            match report.hash_matches {
                Some(true) => writeln!(w, "    Hash:         {}", "MATCH".green().bold())?,
                Some(false) => writeln!(w, "    Hash:         {}", "MISMATCH".red().bold())?,
                None => writeln!(w, "    Hash:         not checked")?,
            }
        }

        if let Some(chain) = &self.chain {
            writeln!(w)?;
            if chain.is_intact() {
                writeln!(
                    w,
                    "  Ledger chain: {} ({} records)",
                    "INTACT".green().bold(),
                    chain.records
                )?;
            } else {
                writeln!(
                    w,
                    "  Ledger chain: {} at line {}: {}",
                    "BROKEN".red().bold(),
                    chain.first_broken.unwrap_or_default(),
                    chain.reason.as_deref().unwrap_or("unknown")
                )?;
            }
        }
        Ok(())
    }
}
