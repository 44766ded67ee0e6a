use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// clrbind - resolve .NET assembly references the way the runtime binder does
#[derive(Debug, Parser)]
#[command(name = "clrbind", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// How the binder is configured for a `bind` run.
#[derive(Debug, clap::Args)]
pub struct BindOptions {
    /// Application probing directory; may be repeated.
    #[arg(short = 'a', long = "app-path", value_name = "DIR")]
    pub app_paths: Vec<PathBuf>,

    /// Trusted platform assembly; may be repeated.
    #[arg(short = 't', long = "tpa", value_name = "FILE")]
    pub platform_assemblies: Vec<PathBuf>,

    /// Directory whose .dll files are all trusted platform assemblies.
    #[arg(long = "tpa-dir", value_name = "DIR")]
    pub platform_dirs: Vec<PathBuf>,

    /// Root directory for satellite assemblies; may be repeated.
    #[arg(long = "resource-root", value_name = "DIR")]
    pub resource_roots: Vec<PathBuf>,

    /// Application configuration file with binding redirects.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preferred cultures, most preferred first (e.g. "de-DE,de").
    #[arg(long, value_name = "LIST")]
    pub cultures: Option<String>,

    /// Do not probe <name>.exe candidates.
    #[arg(long)]
    pub no_exe: bool,

    /// Treat candidate files as text manifests holding a display name.
    #[arg(long)]
    pub manifests: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bind assembly references against a probing configuration.
    Bind {
        /// Assembly references, e.g. "System.Runtime, Version=8.0.0.0".
        #[arg(value_name = "REFERENCE", required = true)]
        references: Vec<String>,

        #[command(flatten)]
        options: BindOptions,

        /// Print the binding log after the results.
        #[arg(long)]
        log: bool,

        /// Print binder statistics after the results.
        #[arg(long)]
        stats: bool,
    },

    /// Parse and normalize assembly display names.
    Identity {
        /// Display names to parse.
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,

        /// Check whether this definition satisfies each parsed reference.
        #[arg(long, value_name = "DEFINITION")]
        satisfies: Option<String>,
    },

    /// Read the assembly identity of image files.
    Inspect {
        /// Paths to .NET assemblies.
        #[arg(value_name = "FILE", required = true)]
        paths: Vec<PathBuf>,

        /// Treat files as text manifests holding a display name.
        #[arg(long)]
        manifests: bool,
    },
}
