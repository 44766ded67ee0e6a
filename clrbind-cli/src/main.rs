mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show clrbind info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("clrbind", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Bind {
            references,
            options,
            log,
            stats,
        } => commands::bind::run(references, options, *log, *stats, &cli.global),
        Command::Identity { names, satisfies } => {
            commands::identity::run(names, satisfies.as_deref(), &cli.global)
        }
        Command::Inspect { paths, manifests } => {
            commands::inspect::run(paths, *manifests, &cli.global)
        }
    }
}
