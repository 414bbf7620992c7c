//! `scanguard import` command handler
//!
//! Seed file format:
//!
//! ```json
//! {
//!   "manufacturers": ["acme"],
//!   "products": [
//!     {
//!       "code": "P-001",
//!       "name": "Vitamin C 500mg",
//!       "batch_id": "B-2024-01",
//!       "manufactured_at": 1704067200,
//!       "expires_at": 1767225600,
//!       "manufacturer_id": "acme"
//!     }
//!   ]
//! }
//! ```

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use scanguard_core::types::Product;
use scanguard_verifier::error::VerifierError;
use scanguard_verifier::store::ScanStore;

use crate::cli::ImportArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::workspace::Workspace;

/// Seed file contents.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub manufacturers: Vec<String>,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

/// Product identity fields; scans and incidents always start empty.
#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub code: String,
    pub name: String,
    pub batch_id: String,
    pub manufactured_at: i64,
    pub expires_at: i64,
    pub manufacturer_id: String,
}

impl SeedFile {
    /// Parse and check a seed document.
    pub fn parse(content: &str) -> Result<Self, CliError> {
        let seed: SeedFile = serde_json::from_str(content)?;
        for product in &seed.products {
            if product.code.trim().is_empty() {
                return Err(CliError::Command("product code must not be empty".to_owned()));
            }
            if product.manufacturer_id.trim().is_empty() {
                return Err(CliError::Command(format!(
                    "product '{}' has no manufacturer_id",
                    product.code
                )));
            }
            if product.expires_at < product.manufactured_at {
                return Err(CliError::Command(format!(
                    "product '{}' expires before it is manufactured",
                    product.code
                )));
            }
        }
        Ok(seed)
    }
}

/// Execute the `import` command.
pub async fn execute(
    args: ImportArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let content = tokio::fs::read_to_string(&args.file).await?;
    let seed = SeedFile::parse(&content)?;
    let workspace = Workspace::open(config_path).await?;

    let mut report = ImportReport {
        source: args.file.display().to_string(),
        manufacturers_registered: 0,
        products_imported: 0,
        skipped: Vec::new(),
    };

    let product_owners = seed.products.iter().map(|p| p.manufacturer_id.as_str());
    for manufacturer in seed.manufacturers.iter().map(String::as_str).chain(product_owners) {
        if workspace.book.register_manufacturer(manufacturer).await {
            report.manufacturers_registered += 1;
        }
    }

    for seed_product in seed.products {
        let product = Product::new(
            seed_product.code,
            seed_product.name,
            seed_product.batch_id,
            seed_product.manufacturer_id,
            seed_product.manufactured_at,
            seed_product.expires_at,
        );
        let code = product.code.clone();
        match workspace.store.insert_product(product).await {
            Ok(()) => report.products_imported += 1,
            Err(e) if e.is_conflict() => {
                warn!(code = %code, "product already registered, skipping");
                report.skipped.push(code);
            }
            Err(e) => return Err(VerifierError::from(e).into()),
        }
    }

    workspace.save().await?;
    info!(
        imported = report.products_imported,
        skipped = report.skipped.len(),
        "import finished"
    );
    writer.render(&report)?;
    Ok(())
}

/// Import summary.
#[derive(Serialize)]
pub struct ImportReport {
    pub source: String,
    pub manufacturers_registered: usize,
    pub products_imported: usize,
    /// Codes that already existed
    pub skipped: Vec<String>,
}

impl Render for ImportReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Import: {}", self.source.bold())?;
        writeln!(w, "  Manufacturers registered: {}", self.manufacturers_registered)?;
        writeln!(w, "  Products imported:        {}", self.products_imported)?;
        if !self.skipped.is_empty() {
            writeln!(
                w,
                "  Skipped (already registered): {}",
                self.skipped.join(", ").yellow()
            )?;
        }
        Ok(())
    }
}
