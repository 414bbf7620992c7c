//! Command handlers -- one module per subcommand

pub mod audit;
pub mod config;
pub mod import;
pub mod reconcile;
pub mod reports;
pub mod scan;
pub mod verify;

use std::path::Path;

use crate::cli::Commands;
use crate::error::CliError;
use crate::output::OutputWriter;

/// Route a parsed subcommand to its handler.
pub async fn dispatch(
    command: Commands,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match command {
        Commands::Scan(args) => scan::execute(args, config_path, writer).await,
        Commands::Verify(args) => verify::execute(args, config_path, writer).await,
        Commands::Reports(args) => reports::execute(args, config_path, writer).await,
        Commands::Import(args) => import::execute(args, config_path, writer).await,
        Commands::Reconcile(args) => reconcile::execute(args, config_path, writer).await,
        Commands::Audit(args) => audit::execute(args, config_path, writer).await,
        Commands::Config(args) => config::execute(args, config_path, writer).await,
    }
}
