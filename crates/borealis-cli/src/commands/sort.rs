use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use borealis_core::consts::default_num_proc;
use borealis_core::organization::sort_files;

#[derive(Args)]
pub struct SortArgs {
    /// FITS files to sort
    #[arg(required = true)]
    pub filenames: Vec<PathBuf>,

    /// Output directory (defaults to the current working directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Copy files instead of moving them
    #[arg(short, long)]
    pub copy: bool,

    /// Number of workers
    #[arg(short = 'j', long, default_value_t = default_num_proc())]
    pub num_proc: usize,

    /// Silence progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn run(args: &SortArgs) -> Result<()> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let sorted = super::with_pool(args.num_proc, || {
        sort_files(&args.filenames, Some(&output), args.copy)
    })?;

    if !args.quiet {
        println!("Sorted {} of {} files", sorted.len(), args.filenames.len());
    }
    if sorted.len() < args.filenames.len() {
        eprintln!(
            "{} file(s) could not be sorted, see warnings above",
            args.filenames.len() - sorted.len()
        );
    }
    Ok(())
}
