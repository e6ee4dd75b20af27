mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn init_tracing() {
    // Library crates emit `tracing` events; without a subscriber RUST_LOG
    // has no effect. Default to info so build progress is visible.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            inputs,
            output,
            bounds,
            threads,
            force,
            prefix_ids,
            no_compress,
            absolute,
            scale,
            subset,
            max_files,
            null_depth,
            base_depth,
            cold_depth,
            points_per_chunk,
            factor,
        } => commands::build::run(commands::build::BuildArgs {
            inputs,
            output,
            bounds,
            threads,
            force,
            prefix_ids,
            no_compress,
            absolute,
            scale,
            subset,
            max_files,
            null_depth,
            base_depth,
            cold_depth,
            points_per_chunk,
            factor,
        }),

        Commands::Merge { path, of } => commands::merge::run(&path, of),

        Commands::Infer { inputs } => commands::infer::run(&inputs),
    }
}
