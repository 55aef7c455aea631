use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use borealis_core::calibrate::{make_master_dark, make_master_flat};
use borealis_core::consts::default_num_proc;
use borealis_core::pipeline::config::CollapseMethod;

#[derive(Clone, Copy, ValueEnum)]
pub enum CollapseArg {
    Median,
    Mean,
    Varmean,
    Biweight,
}

impl From<CollapseArg> for CollapseMethod {
    fn from(arg: CollapseArg) -> Self {
        match arg {
            CollapseArg::Median => Self::Median,
            CollapseArg::Mean => Self::Mean,
            CollapseArg::Varmean => Self::Varmean,
            CollapseArg::Biweight => Self::Biweight,
        }
    }
}

#[derive(Args)]
pub struct CalibArgs {
    /// FITS files to use as dark frames
    #[arg(long, num_args = 1..)]
    pub darks: Option<Vec<PathBuf>>,

    /// FITS files to use as flat frames
    #[arg(long, num_args = 1..)]
    pub flats: Option<Vec<PathBuf>>,

    /// Collapse method for the master frames
    #[arg(short, long, value_enum, default_value = "median")]
    pub collapse: CollapseArg,

    /// Output directory (defaults to the current working directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Force recomputation and overwrite existing files
    #[arg(short, long)]
    pub force: bool,

    /// Number of workers
    #[arg(short = 'j', long, default_value_t = default_num_proc())]
    pub num_proc: usize,

    /// Silence progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn run(args: &CalibArgs) -> Result<()> {
    let outdir = args
        .output
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let method = CollapseMethod::from(args.collapse);

    super::with_pool(args.num_proc, || -> Result<()> {
        let mut master_darks = None;
        if let Some(darks) = &args.darks {
            let made = make_master_dark(darks, method, &outdir, args.force)?;
            if !args.quiet {
                println!("Made {} master dark(s)", made.len());
                for path in &made {
                    println!("  {}", path.display());
                }
            }
            master_darks = Some(made);
        }
        if let Some(flats) = &args.flats {
            let made = make_master_flat(
                flats,
                master_darks.as_deref(),
                method,
                &outdir,
                args.force,
            )?;
            if !args.quiet {
                println!("Made {} master flat(s)", made.len());
                for path in &made {
                    println!("  {}", path.display());
                }
            }
        }
        Ok(())
    })?
}
