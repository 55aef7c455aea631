use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, warn};

use crate::calibrate::calibrate_file;
use crate::collapse::collapse_file;
use crate::consts::default_num_proc;
use crate::cube::FileRecord;
use crate::error::{BorealisError, Result};
use crate::indexing::{lamd_to_pixel, WindowContext};
use crate::io::fits;
use crate::polarimetry::{group_hwp_sets, pair_beams, polarimetry_file, PolFrame};
use crate::products::{adi_products, header_table_file, pdi_products};
use crate::register::register_file;
use crate::select::{frame_select_file, metric_file};
use crate::version::check_version;

use super::config::PipelineConfig;
use super::types::{NoOpReporter, PipelineStage, ProgressReporter, RunSummary, StageFailure};

/// The pipeline execution engine.
///
/// Owns the fixed stage graph (calibrate, frame select, register,
/// collapse, polarimetry, products) and walks it in dependency order over
/// a validated, version-gated configuration. Stages whose option block is
/// absent are skipped entirely; within an enabled stage, independent files
/// fan out over a bounded worker pool and individual failures are caught
/// and reported without aborting the batch.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate and version-gate a configuration. Fails before any stage
    /// can execute.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_version(config, crate::VERSION)
    }

    /// Like [`Pipeline::new`] with an explicit running-pipeline version,
    /// threaded as an argument so the guard stays a pure function.
    pub fn with_version(config: PipelineConfig, pipeline_version: &str) -> Result<Self> {
        config.validate()?;
        if !check_version(&config.version, pipeline_version)? {
            return Err(BorealisError::VersionMismatch {
                config: config.version.clone(),
                pipeline: pipeline_version.to_string(),
            });
        }
        Ok(Self { config })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(PipelineConfig::from_file(path)?)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over the given raw files.
    pub fn run(&self, filenames: &[PathBuf], num_proc: Option<usize>) -> Result<RunSummary> {
        self.run_reported(filenames, num_proc, Arc::new(NoOpReporter))
    }

    /// Run with a progress reporter driving UI feedback.
    pub fn run_reported(
        &self,
        filenames: &[PathBuf],
        num_proc: Option<usize>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<RunSummary> {
        let workers = num_proc.unwrap_or_else(default_num_proc);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| BorealisError::Pipeline(e.to_string()))?;
        info!(workers, files = filenames.len(), name = %self.config.name, "starting pipeline");
        pool.install(|| self.run_inner(filenames, reporter.as_ref()))
    }

    fn run_inner(
        &self,
        filenames: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        // extract per-file identity; unreadable inputs drop out here
        reporter.begin_stage(PipelineStage::Discovery, Some(filenames.len()));
        let counter = AtomicUsize::new(0);
        let results: Vec<std::result::Result<FileRecord, StageFailure>> = filenames
            .par_iter()
            .map(|path| {
                let result = FileRecord::new(path.clone()).map_err(|e| StageFailure {
                    stage: PipelineStage::Discovery,
                    file: path.clone(),
                    message: e.to_string(),
                });
                reporter.advance(counter.fetch_add(1, Ordering::Relaxed) + 1);
                result
            })
            .collect();
        reporter.finish_stage();
        let mut records = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(record) => records.push(record),
                Err(failure) => {
                    warn!(stage = %failure.stage, file = %failure.file.display(), "{}", failure.message);
                    summary.failures.push(failure);
                }
            }
        }
        summary.record_stage(PipelineStage::Discovery, filenames.len(), records.len());

        if let Some(options) = &self.config.calibrate {
            records = self.run_stage(
                PipelineStage::Calibrate,
                records,
                reporter,
                &mut summary,
                |record| {
                    let outputs = calibrate_file(
                        &record.path,
                        record.info.camera,
                        options,
                        self.config.coordinate.as_ref(),
                    )?;
                    Ok(outputs
                        .into_iter()
                        .map(|(path, beam)| match beam {
                            Some(beam) => record.with_beam(path, beam),
                            None => record.with_path(path),
                        })
                        .collect())
                },
            );
        }

        if let Some(options) = &self.config.frame_select {
            records = self.run_stage(
                PipelineStage::FrameSelect,
                records,
                reporter,
                &mut summary,
                |record| {
                    let ctx = self.window_context(record)?;
                    let metrics = metric_file(&record.path, options, &ctx)?;
                    let selected = frame_select_file(&record.path, &metrics, options)?;
                    Ok(vec![record.with_path(selected)])
                },
            );
        }

        if let Some(options) = &self.config.register {
            records = self.run_stage(
                PipelineStage::Register,
                records,
                reporter,
                &mut summary,
                |record| {
                    let ctx = self.window_context(record)?;
                    let aligned = register_file(&record.path, options, &ctx)?;
                    Ok(vec![record.with_path(aligned)])
                },
            );
        }

        if let Some(options) = &self.config.collapse {
            records = self.run_stage(
                PipelineStage::Collapse,
                records,
                reporter,
                &mut summary,
                |record| {
                    let collapsed = collapse_file(&record.path, options)?;
                    Ok(vec![record.with_path(collapsed)])
                },
            );
        }

        let mut stokes_paths: Vec<PathBuf> = Vec::new();
        if let Some(options) = &self.config.polarimetry {
            stokes_paths = self.run_polarimetry(&records, reporter, &mut summary, options)?;
        }

        if let Some(options) = &self.config.products {
            self.run_products(filenames, &records, &stokes_paths, reporter, &mut summary, options)?;
        }

        info!(
            failures = summary.failures.len(),
            incomplete_sets = summary.incomplete_sets.len(),
            "pipeline finished"
        );
        Ok(summary)
    }

    /// Fan a per-file operation over the worker pool. Outputs keep the
    /// input order; a file's failure is logged, recorded, and excluded
    /// without disturbing its siblings.
    fn run_stage<F>(
        &self,
        stage: PipelineStage,
        records: Vec<FileRecord>,
        reporter: &dyn ProgressReporter,
        summary: &mut RunSummary,
        op: F,
    ) -> Vec<FileRecord>
    where
        F: Fn(&FileRecord) -> Result<Vec<FileRecord>> + Sync,
    {
        let inputs = records.len();
        reporter.begin_stage(stage, Some(inputs));
        let counter = AtomicUsize::new(0);
        let results: Vec<std::result::Result<Vec<FileRecord>, StageFailure>> = records
            .par_iter()
            .map(|record| {
                let result = op(record).map_err(|e| StageFailure {
                    stage,
                    file: record.path.clone(),
                    message: e.to_string(),
                });
                reporter.advance(counter.fetch_add(1, Ordering::Relaxed) + 1);
                result
            })
            .collect();
        reporter.finish_stage();

        let mut survivors = Vec::with_capacity(inputs);
        for result in results {
            match result {
                Ok(outputs) => survivors.extend(outputs),
                Err(failure) => {
                    warn!(stage = %failure.stage, file = %failure.file.display(), "{}", failure.message);
                    summary.failures.push(failure);
                }
            }
        }
        info!(stage = %stage, inputs, outputs = survivors.len(), "stage complete");
        summary.record_stage(stage, inputs, survivors.len());
        survivors
    }

    /// Group collapsed outputs into HWP sets and combine the complete
    /// ones. Grouping can only happen after collapse has finished for
    /// every surviving file.
    fn run_polarimetry(
        &self,
        records: &[FileRecord],
        reporter: &dyn ProgressReporter,
        summary: &mut RunSummary,
        options: &super::config::PolarimetryOptions,
    ) -> Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for record in records {
            match PolFrame::from_file(&record.path) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    warn!(file = %record.path.display(), "{e}");
                    summary.failures.push(StageFailure {
                        stage: PipelineStage::Polarimetry,
                        file: record.path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let (pairs, unpaired) = pair_beams(frames);
        for frame in &unpaired {
            warn!(file = %frame.path.display(), "no matching beam, excluded from polarimetry");
        }
        let (complete, incomplete) = group_hwp_sets(pairs, options.n_per_hwp);
        for set in &incomplete {
            let description = format!(
                "{} cycle {} ({} pairs)",
                set.target,
                set.cycle,
                set.pairs.len()
            );
            warn!(set = %description, "incomplete HWP set, excluded from combination");
            summary.incomplete_sets.push(description);
        }

        reporter.begin_stage(PipelineStage::Polarimetry, Some(complete.len()));
        let counter = AtomicUsize::new(0);
        let sets = complete.len();
        let results: Vec<std::result::Result<Vec<PathBuf>, StageFailure>> = complete
            .par_iter()
            .map(|set| {
                let first_path = set.pairs[0].left.path.clone();
                let result = (|| {
                    let info = crate::cube::FileInfo::from_file(&first_path)?;
                    let ctx = self.window_context_for(&first_path, info.camera)?;
                    polarimetry_file(set, &self.config.name, options, &ctx)
                })()
                .map_err(|e: BorealisError| StageFailure {
                    stage: PipelineStage::Polarimetry,
                    file: first_path,
                    message: e.to_string(),
                });
                reporter.advance(counter.fetch_add(1, Ordering::Relaxed) + 1);
                result
            })
            .collect();
        reporter.finish_stage();

        let mut stokes_paths = Vec::new();
        for result in results {
            match result {
                // the IP-corrected cube supersedes the raw one downstream
                Ok(written) => stokes_paths.extend(written.into_iter().last()),
                Err(failure) => {
                    warn!(stage = %failure.stage, file = %failure.file.display(), "{}", failure.message);
                    summary.failures.push(failure);
                }
            }
        }
        summary.record_stage(PipelineStage::Polarimetry, sets, stokes_paths.len());
        Ok(stokes_paths)
    }

    fn run_products(
        &self,
        filenames: &[PathBuf],
        records: &[FileRecord],
        stokes_paths: &[PathBuf],
        reporter: &dyn ProgressReporter,
        summary: &mut RunSummary,
        options: &super::config::ProductOptions,
    ) -> Result<()> {
        reporter.begin_stage(PipelineStage::Products, None);
        let outdir = options
            .output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        if options.header_table {
            let table_path = outdir.join(format!("{}_headers.csv", self.config.name));
            match header_table_file(filenames, &table_path, options.force) {
                Ok(path) => summary.products.push(path),
                Err(e) => self.record_product_failure(summary, &table_path, e),
            }
        }

        if options.adi_cubes && self.config.collapse.is_some() {
            let labeled: Vec<(PathBuf, String)> = records
                .iter()
                .map(|record| {
                    let label = match record.beam {
                        Some(beam) => format!("{}_{}", record.info.camera, beam.as_str()),
                        None => record.info.camera.to_string(),
                    };
                    (record.path.clone(), label)
                })
                .collect();
            if !labeled.is_empty() {
                match adi_products(&labeled, &self.config.name, &outdir, options.force) {
                    Ok(paths) => summary.products.extend(paths),
                    Err(e) => self.record_product_failure(summary, &outdir, e),
                }
            }
        }

        if options.pdi_cubes && !stokes_paths.is_empty() {
            match pdi_products(stokes_paths, &self.config.name, &outdir, options.force) {
                Ok(path) => summary.products.push(path),
                Err(e) => self.record_product_failure(summary, &outdir, e),
            }
        }
        reporter.finish_stage();
        let product_count = summary.products.len();
        summary.record_stage(PipelineStage::Products, records.len(), product_count);
        Ok(())
    }

    fn record_product_failure(&self, summary: &mut RunSummary, path: &Path, error: BorealisError) {
        warn!(file = %path.display(), "{error}");
        summary.failures.push(StageFailure {
            stage: PipelineStage::Products,
            file: path.to_path_buf(),
            message: error.to_string(),
        });
    }

    /// Measurement context for a record: star position estimate for its
    /// camera, and the satellite-spot separation converted to pixels with
    /// the file's filter.
    fn window_context(&self, record: &FileRecord) -> Result<WindowContext> {
        self.window_context_for(&record.path, record.info.camera)
    }

    fn window_context_for(
        &self,
        path: &Path,
        camera: crate::cube::Camera,
    ) -> Result<WindowContext> {
        let center = self
            .config
            .frame_centers
            .as_ref()
            .and_then(|fc| fc.get(camera))
            .map(|[x, y]| (y, x));
        let satspot_radius = match &self.config.satspots {
            Some(satspots) => {
                let header = fits::read_header(path)?;
                let filter = header.string("X_IRCFLT").unwrap_or("open");
                Some(lamd_to_pixel(satspots.radius, filter)?)
            }
            None => None,
        };
        Ok(WindowContext {
            center,
            satspot_radius,
        })
    }
}
