use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use borealis_core::pipeline::templates::{template, TemplateKind};

#[derive(Clone, Copy, ValueEnum)]
pub enum TemplateArg {
    Minimal,
    Pdi,
    All,
}

impl From<TemplateArg> for TemplateKind {
    fn from(arg: TemplateArg) -> Self {
        match arg {
            TemplateArg::Minimal => Self::Minimal,
            TemplateArg::Pdi => Self::Pdi,
            TemplateArg::All => Self::All,
        }
    }
}

#[derive(Args)]
pub struct NewArgs {
    /// Path of the configuration file to create
    pub config: PathBuf,

    /// Template configuration to generate
    #[arg(short, long, value_enum, default_value = "pdi")]
    pub template: TemplateArg,

    /// Target object name
    #[arg(short, long)]
    pub object: Option<String>,

    /// If coronagraphic, the inner working angle in mas
    #[arg(short = 'c', long = "coronagraph", value_name = "IWA")]
    pub iwa: Option<f64>,

    /// Preview the generated TOML before saving
    #[arg(short, long)]
    pub preview: bool,
}

pub fn run(args: &NewArgs) -> Result<()> {
    let name = args
        .config
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .context("configuration path has no stem")?;

    let config = template(
        args.template.into(),
        &name,
        args.object.as_deref(),
        args.iwa,
    );
    let toml_str = config.to_toml()?;

    if args.preview {
        let divider = "-".repeat(12);
        println!("{divider} PREVIEW {} {divider}", args.config.display());
        println!("{toml_str}");
        println!("{divider} END PREVIEW {divider}");
        if !super::confirm("Would you like to save this configuration?")? {
            return Ok(());
        }
    }

    if args.config.is_file()
        && !super::confirm(&format!(
            "{} already exists, would you like to overwrite it?",
            args.config.display()
        ))?
    {
        return Ok(());
    }

    std::fs::write(&args.config, toml_str)
        .with_context(|| format!("could not write {}", args.config.display()))?;
    println!("Wrote {}", args.config.display());
    Ok(())
}
