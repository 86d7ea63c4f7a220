//! clinsync entry point.

use clap::Parser;
use clinsync::cli::{Cli, Commands, commands};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_tracing(cli.verbose, cli.quiet);

    // Structured output when asked for or when piped into tooling.
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                eprintln!("Error: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

async fn run(cli: &Cli, json: bool) -> Result<(), clinsync::Error> {
    match &cli.command {
        Commands::Run => commands::run::execute(cli.db.as_ref(), cli.central_url.as_deref()).await,
        Commands::Status => commands::status::execute(cli.db.as_ref(), json),
        Commands::Operations { status, limit } => {
            commands::operations::execute(status.as_deref(), *limit, cli.db.as_ref(), json)
        }
        Commands::Conflicts { command } => {
            commands::conflicts::execute(command, cli.db.as_ref(), cli.central_url.as_deref(), json)
                .await
        }
        Commands::Cleanup => commands::cleanup::execute(cli.db.as_ref(), json),
    }
}
