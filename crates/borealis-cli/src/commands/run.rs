use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use borealis_core::consts::default_num_proc;
use borealis_core::pipeline::{Pipeline, PipelineStage, ProgressReporter};

use crate::summary::print_pipeline_summary;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline configuration file (TOML)
    pub config: PathBuf,

    /// FITS files to run through the pipeline
    #[arg(required = true)]
    pub filenames: Vec<PathBuf>,

    /// Number of workers
    #[arg(short = 'j', long, default_value_t = default_num_proc())]
    pub num_proc: usize,

    /// Silence progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

/// Drives one progress bar per pipeline stage.
struct BarReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        let bar = match total_items {
            Some(total) => ProgressBar::new(total as u64),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::default_bar().template("{msg:24} [{bar:40}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(stage.to_string());
        *self.bar.lock().unwrap() = Some(bar);
    }

    fn advance(&self, items_done: usize) {
        if let Some(bar) = self.bar.lock().unwrap().as_ref() {
            bar.set_position(items_done as u64);
        }
    }

    fn finish_stage(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish();
        }
    }
}

struct QuietReporter;
impl ProgressReporter for QuietReporter {}

pub fn run(args: &RunArgs) -> Result<()> {
    let pipeline = Pipeline::from_file(&args.config)
        .with_context(|| format!("could not load {}", args.config.display()))?;

    if !args.quiet {
        print_pipeline_summary(pipeline.config());
    }

    let reporter: std::sync::Arc<dyn ProgressReporter> = if args.quiet {
        std::sync::Arc::new(QuietReporter)
    } else {
        std::sync::Arc::new(BarReporter::new())
    };
    let summary = pipeline.run_reported(&args.filenames, Some(args.num_proc), reporter)?;

    if !args.quiet {
        println!();
        for count in &summary.stages {
            println!(
                "  {:<24} {:>4} in, {:>4} out",
                count.stage.to_string(),
                count.inputs,
                count.outputs
            );
        }
    }
    if !summary.products.is_empty() {
        println!("\nProducts:");
        for path in &summary.products {
            println!("  {}", path.display());
        }
    }
    if !summary.failures.is_empty() {
        eprintln!("\n{} file(s) failed:", summary.failures.len());
        for failure in &summary.failures {
            eprintln!(
                "  [{}] {}: {}",
                failure.stage,
                failure.file.display(),
                failure.message
            );
        }
    }
    if !summary.incomplete_sets.is_empty() {
        eprintln!("\n{} incomplete HWP set(s):", summary.incomplete_sets.len());
        for set in &summary.incomplete_sets {
            eprintln!("  {set}");
        }
    }
    if summary.is_clean() && !args.quiet {
        println!("\nDone");
    }
    Ok(())
}
