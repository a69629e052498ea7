//! ciprom CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ciprom_cli::cli::{Cli, Commands};
use ciprom_cli::commands::{CollectCommand, InitConfigCommand, ValidateCommand};
use ciprom_cli::output::OutputFormat;

fn main() -> ExitCode {
    // Initialize tracing; logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ciprom=info")),
        )
        .with_writer(io::stderr)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error_line(&e));
            ExitCode::FAILURE
        }
    }
}

/// `CliError` messages already embed their cause, so only the outer error is
/// printed.
fn error_line(err: &anyhow::Error) -> String {
    format!("Error: {err}")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Collect(args) => {
            let cmd = CollectCommand::new(args.config, args.output);
            cmd.execute(&mut stdout, &format).await?;
        }
        Commands::Validate { config } => {
            let cmd = ValidateCommand::new(config);
            cmd.execute(&mut stdout, &format)?;
        }
        Commands::InitConfig { output, force } => {
            let cmd = InitConfigCommand::new(output, force);
            cmd.execute(&mut stdout, &format)?;
        }
    }

    Ok(())
}
