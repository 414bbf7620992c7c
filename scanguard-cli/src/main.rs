use clap::Parser;

use scanguard_cli::cli::Cli;
use scanguard_cli::commands;
use scanguard_cli::logging::init_logging;
use scanguard_cli::output::OutputWriter;
use scanguard_core::config::ScanguardConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings come from the file when it parses; `config validate`
    // still has to run against a broken file.
    let general = match ScanguardConfig::from_file(&cli.config).await {
        Ok(mut config) => {
            config.apply_env_overrides();
            config.general
        }
        Err(_) => Default::default(),
    };
    if let Err(e) = init_logging(&general, cli.log_level.as_deref()) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }

    tracing::debug!(config = %cli.config.display(), "scanguard starting");

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = commands::dispatch(cli.command, &cli.config, &writer).await {
        tracing::debug!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
