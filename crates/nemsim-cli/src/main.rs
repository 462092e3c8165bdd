use clap::Parser;
use nemsim_batch::RunVerdict;
use nemsim_cli::{Cli, Commands};
use std::process;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod commands;

fn dispatch(cli: &Cli) -> anyhow::Result<RunVerdict> {
    match &cli.command {
        Commands::Run(args) => commands::run::handle(args),
        Commands::Plan {
            start,
            process,
            interval_counts,
        } => {
            commands::plan::handle(*start, *process, interval_counts.as_deref())?;
            Ok(RunVerdict::Clean)
        }
        Commands::Batch(args) => commands::batch::handle(args),
        Commands::Report { manifest } => commands::report::handle(manifest),
    }
}

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    let code = match dispatch(&cli) {
        Ok(verdict) => {
            info!(status = verdict.as_str(), "finished");
            verdict.exit_code()
        }
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            RunVerdict::Error.exit_code()
        }
    };
    process::exit(code);
}
