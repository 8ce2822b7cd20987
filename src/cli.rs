//! Command line arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tessera - run and inspect compiled tessera units
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log every executed instruction (needs RUST_LOG=trace)
    #[arg(long, global = true)]
    pub trace: bool,

    /// Deepest allowed nesting of script function calls
    #[arg(long, global = true, env = "TESSERA_MAX_DEPTH", default_value_t = 200)]
    pub max_depth: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, link and execute units in order
    Run(RunArgs),

    /// Print the instruction listing of a unit
    #[command(alias = "dis")]
    Disasm(FileArgs),

    /// Print the identifier table stored in a unit
    Names(FileArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Units to run; all are linked before the first one runs
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Session identifier exposed to scripts as `session_id`
    #[arg(long)]
    pub session: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct FileArgs {
    /// Persisted unit
    pub file: PathBuf,
}
