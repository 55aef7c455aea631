mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "borealis", about = "Polarimetric imaging data processing pipeline")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort raw files by their header-derived type
    Sort(commands::sort::SortArgs),
    /// Build master dark and flat frames
    Calib(commands::calib::CalibArgs),
    /// Generate a template configuration file
    New(commands::new::NewArgs),
    /// Run the data processing pipeline
    Run(commands::run::RunArgs),
    /// Combine file headers into a CSV table
    Table(commands::table::TableArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Sort(args) => commands::sort::run(args),
        Commands::Calib(args) => commands::calib::run(args),
        Commands::New(args) => commands::new::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Table(args) => commands::table::run(args),
    }
}
