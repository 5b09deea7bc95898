//! Command-line entry point of the osier front end.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use osier::config::SCHEMA_HELP;
use osier::{create_core_data, release_core_data, run_compilation};

/// Front end of the osier language: compiles a source file to the opcode IR.
#[derive(Debug, Parser)]
#[command(name = "osier", version, after_help = SCHEMA_HELP)]
struct Args {
    /// Source file to compile; overrides `entrypoint.filepath`.
    source: Option<PathBuf>,

    /// Configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compile `std.filepath` instead of the entry point.
    #[arg(long)]
    std_mode: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("osier=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut core = match create_core_data(args.config.as_deref()) {
        Ok(core) => core,
        Err(error) => {
            eprintln!("error: {error}");

            return ExitCode::FAILURE;
        }
    };

    if let Some(source) = args.source {
        core.config.entrypoint.filepath = Some(source);
    }

    let ok = run_compilation(&mut core, args.std_mode);

    if !ok {
        let _ = core.errors.print_all(&mut std::io::stderr());
    }

    release_core_data(core);

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
