use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use borealis_core::consts::default_num_proc;
use borealis_core::organization::header_rows;
use borealis_core::products::header_table_csv;

#[derive(Args)]
pub struct TableArgs {
    /// FITS files to parse headers from
    #[arg(required = true)]
    pub filenames: Vec<PathBuf>,

    /// Output CSV filename
    #[arg(short, long, default_value = "header_table.csv")]
    pub output: PathBuf,

    /// Number of workers
    #[arg(short = 'j', long, default_value_t = default_num_proc())]
    pub num_proc: usize,

    /// Silence progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn run(args: &TableArgs) -> Result<()> {
    if args.output.is_file()
        && !super::confirm(&format!(
            "{} already exists. Overwrite?",
            args.output.display()
        ))?
    {
        return Ok(());
    }

    let rows = super::with_pool(args.num_proc, || header_rows(&args.filenames))?;
    std::fs::write(&args.output, header_table_csv(&rows))?;

    if !args.quiet {
        println!(
            "Wrote {} header(s) to {}",
            rows.len(),
            args.output.display()
        );
    }
    Ok(())
}
