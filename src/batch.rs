//! Preprocessing of every OME-TIFF file of one directory.

use crate::export::{self, StackMetadata};
use crate::reader::{self, OmeTiffReader, StackReader};
use crate::registration::{self, EccMatchParameters};
use crate::stack::FrameStack;
use crate::store;
use crate::transform::TransformChain;
use crate::PrepError;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything a batch run needs; nothing is derived from the process state.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Directory containing the OME-TIFF files
    pub input_dir: PathBuf,
    /// Output images, transforms and metadata directory
    pub output_dir: PathBuf,
    /// Bright field channel, the registration reference and PNG source
    pub bf_channel: usize,
    /// Channels interleaved in each file
    pub channel_count: usize,
    /// Write `<file>.metadata.json`
    pub export_metadata: bool,
    /// Register the frames of every stack
    pub register: bool,
    /// Write the bright field frames as 8-bit PNGs
    pub export_png: bool,
    /// Use an existing `<file>.tmats.json` instead of estimating again
    pub reuse_transforms: bool,
    pub ecc: EccMatchParameters,
    /// Worker threads, `None` uses the global rayon pool
    pub jobs: Option<usize>,
}

impl PreprocessConfig {
    /// Defaults for `input_dir`, writing to `<input_dir>/output`.
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        let input_dir = input_dir.into();
        Self {
            output_dir: input_dir.join("output"),
            input_dir,
            bf_channel: 0,
            channel_count: 1,
            export_metadata: false,
            register: false,
            export_png: false,
            reuse_transforms: false,
            ecc: EccMatchParameters::default(),
            jobs: None,
        }
    }

    pub fn validate(&self) -> Result<(), PrepError> {
        if self.channel_count == 0 {
            return Err(PrepError::InvalidParams(
                "channel count must be at least 1".into(),
            ));
        }
        if self.bf_channel >= self.channel_count {
            return Err(PrepError::InvalidParams(format!(
                "bright field channel {} does not exist with {} channel(s)",
                self.bf_channel, self.channel_count
            )));
        }
        if self.jobs == Some(0) {
            return Err(PrepError::InvalidParams("jobs must be at least 1".into()));
        }
        self.ecc.validate()
    }
}

/// What happened to one input file.
#[derive(Debug, Clone, Default)]
pub struct FileReport {
    pub source: PathBuf,
    pub time_count: usize,
    pub channel_count: usize,
    /// Time indices registered with the identity fallback
    pub fallback_frames: Vec<usize>,
    pub min_correlation: Option<f64>,
    /// Files written for this input
    pub outputs: Vec<PathBuf>,
    /// Outputs that could not be written, with the reason
    pub skipped_outputs: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<FileReport>,
    pub failed: Vec<(PathBuf, PrepError)>,
}

impl BatchReport {
    pub fn fallback_count(&self) -> usize {
        self.processed.iter().map(|r| r.fallback_frames.len()).sum()
    }
}

pub struct BatchPreprocessor {
    config: PreprocessConfig,
    reader: Box<dyn StackReader>,
}

impl BatchPreprocessor {
    /// A preprocessor reading files with [`OmeTiffReader`].
    pub fn new(config: PreprocessConfig) -> Self {
        let reader = OmeTiffReader {
            channel_count: config.channel_count,
        };
        Self::with_reader(config, Box::new(reader))
    }

    pub fn with_reader(config: PreprocessConfig, reader: Box<dyn StackReader>) -> Self {
        Self { config, reader }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Processes every OME-TIFF file of the input directory.
    ///
    /// Only an invalid configuration or an unreadable input directory is an
    /// error. Failures of single files are logged and listed in the report.
    pub fn run(&self) -> Result<BatchReport, PrepError> {
        self.config.validate()?;
        let files = reader::collect_stack_files(&self.config.input_dir)?;
        fs::create_dir_all(&self.config.output_dir)?;
        log::info!(
            "Running on {} ({} file(s)), output {}",
            self.config.input_dir.display(),
            files.len(),
            self.config.output_dir.display()
        );

        let results = match self.config.jobs {
            Some(jobs) => rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .map_err(|e| PrepError::InvalidParams(e.to_string()))?
                .install(|| self.process_all(&files)),
            None => self.process_all(&files),
        };

        let mut report = BatchReport::default();
        for (path, result) in results {
            match result {
                Ok(file_report) => report.processed.push(file_report),
                Err(e) => {
                    log::error!("{}: {}", path.display(), e);
                    report.failed.push((path, e));
                }
            }
        }
        log::info!(
            "Done: {} processed, {} failed, {} frame(s) fell back to identity",
            report.processed.len(),
            report.failed.len(),
            report.fallback_count()
        );
        Ok(report)
    }

    fn process_all(&self, files: &[PathBuf]) -> Vec<(PathBuf, Result<FileReport, PrepError>)> {
        files
            .par_iter()
            .map(|path| (path.clone(), self.process_file(path)))
            .collect()
    }

    /// Load → register → export for a single file.
    pub fn process_file(&self, path: &Path) -> Result<FileReport, PrepError> {
        log::info!("Opening: {}", path.display());
        let source_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PrepError::InvalidPathEncoding(path.to_path_buf()))?;
        let stack = self.reader.read(path)?;
        if self.config.bf_channel >= stack.channel_count() {
            return Err(PrepError::InvalidParams(format!(
                "bright field channel {} does not exist, {} has {} channel(s)",
                self.config.bf_channel,
                path.display(),
                stack.channel_count()
            )));
        }

        let mut report = FileReport {
            source: path.to_path_buf(),
            time_count: stack.time_count(),
            channel_count: stack.channel_count(),
            ..Default::default()
        };

        let (stack, chain) = if self.config.register {
            let chain = self.transform_chain(source_name, &stack, &mut report)?;
            let registered = registration::apply_chain_to_stack(&stack, &chain)?;
            report.fallback_frames = chain.fallback_frames();
            report.min_correlation = chain.min_correlation();
            (registered, Some(chain))
        } else {
            (stack, None)
        };

        if self.config.export_png {
            for (t, frame) in stack.channel(self.config.bf_channel)?.iter().enumerate() {
                let destination = export::png_path(&self.config.output_dir, source_name, t);
                let written = export::write_png(frame, &destination);
                report.record(destination, written);
            }
        }

        if self.config.export_metadata {
            let metadata = StackMetadata::describe(source_name, &stack, chain.as_ref());
            let destination = export::metadata_path(&self.config.output_dir, source_name);
            let written = export::write_metadata(&metadata, &destination);
            report.record(destination, written);
        }

        Ok(report)
    }

    /// Reuses a stored chain when asked to, otherwise estimates one on the
    /// bright field channel and stores it.
    fn transform_chain(
        &self,
        source_name: &str,
        stack: &FrameStack,
        report: &mut FileReport,
    ) -> Result<TransformChain, PrepError> {
        let destination = store::transform_path(&self.config.output_dir, source_name);
        if self.config.reuse_transforms && destination.is_file() {
            let chain = store::load_for(&destination, source_name, stack.time_count())?;
            log::info!(
                "Reusing {} transforms from {}",
                chain.len(),
                destination.display()
            );
            return Ok(chain);
        }

        log::info!(
            "Registering {} on channel {}",
            source_name,
            self.config.bf_channel
        );
        let start = std::time::Instant::now();
        let chain = registration::estimate_chain(
            stack.channel(self.config.bf_channel)?,
            self.config.ecc,
        )?;
        log::info!(
            "Registered {} frames of {} in {:?}",
            chain.len(),
            source_name,
            start.elapsed()
        );
        let written = store::save(&chain, &destination, source_name);
        report.record(destination, written);
        Ok(chain)
    }
}

impl FileReport {
    /// Write failures only cost the output they concern.
    fn record(&mut self, destination: PathBuf, written: Result<(), PrepError>) {
        match written {
            Ok(()) => self.outputs.push(destination),
            Err(e) => {
                log::error!("Could not write {}: {}", destination.display(), e);
                self.skipped_outputs.push((destination, e.to_string()));
            }
        }
    }
}
