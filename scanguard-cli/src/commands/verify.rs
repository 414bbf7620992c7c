//! `scanguard verify` command handler

use std::io::Write;
use std::path::Path;

use chrono::DateTime;
use tracing::info;

use scanguard_verifier::coordinator::ProductView;
use scanguard_verifier::store::ScanStore;

use crate::cli::VerifyArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Execute the `verify` command.
///
/// Read-only: no scan is recorded and detection does not run.
pub async fn execute(
    args: VerifyArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let workspace = Workspace::open(config_path).await?;
    info!(code = %args.code, "verifying product");

    let view = ProductView::from(workspace.store.product(&args.code).await?);
    writer.render(&view)?;
    Ok(())
}

fn epoch(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

impl Render for ProductView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Product: {} ({})", self.code.bold(), self.name)?;
        writeln!(w, "  Manufacturer: {}", self.manufacturer_id)?;
        writeln!(w, "  Batch:        {}", self.batch_id)?;
        writeln!(w, "  Manufactured: {}", epoch(self.manufactured_at))?;
        writeln!(w, "  Expires:      {}", epoch(self.expires_at))?;
        if self.flagged {
            writeln!(w, "  Flagged:      {}", "COUNTERFEIT".red().bold())?;
        } else {
            writeln!(w, "  Flagged:      {}", "no".green())?;
        }

        writeln!(w)?;
        writeln!(w, "Scans ({}):", self.scans.len())?;
        for scan in &self.scans {
            writeln!(w, "  {}", scan)?;
        }

        if !self.incidents.is_empty() {
            writeln!(w)?;
            writeln!(w, "Incidents ({}):", self.incidents.len())?;
            for incident in &self.incidents {
                writeln!(w, "  {}", incident)?;
            }
        }

        Ok(())
    }
}
