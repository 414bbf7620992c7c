//! `scanguard reports` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use scanguard_core::types::ManufacturerReportEntry;
use scanguard_verifier::notifier::ReportNotifier;

use crate::cli::ReportsArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Execute the `reports` command.
pub async fn execute(
    args: ReportsArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let workspace = Workspace::open(config_path).await?;
    let reports = workspace.book.reports(&args.manufacturer).await?;

    writer.render(&ReportsListing {
        manufacturer: args.manufacturer,
        reports,
    })?;
    Ok(())
}

/// Report entries for one manufacturer, oldest first.
#[derive(Serialize)]
pub struct ReportsListing {
    pub manufacturer: String,
    pub reports: Vec<ManufacturerReportEntry>,
}

impl Render for ReportsListing {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Reports for {} ({} total)",
            self.manufacturer.bold(),
            self.reports.len()
        )?;
        if self.reports.is_empty() {
            writeln!(w, "  (none)")?;
            return Ok(());
        }

        writeln!(w, "  {:<20} {:<38} {}", "PRODUCT", "INCIDENT", "DETECTED")?;
        for entry in &self.reports {
            writeln!(
                w,
                "  {:<20} {:<38} {}",
                entry.product_code,
                entry.incident_id,
                entry.detected_at.to_rfc3339()
            )?;
        }
        Ok(())
    }
}
