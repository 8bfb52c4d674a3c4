//! Two-pass loudness normalization driving ffmpeg's `loudnorm` filter.
//!
//! Per input, the pipeline probes stream facts, runs `loudnorm` in analysis
//! mode, parses the JSON report it prints, builds a corrected second-pass
//! filter from those measurements, then re-runs the engine to write the
//! normalized file. The CLI (`bin` feature) and the GTK front end (`gui`
//! feature) are both thin drivers over [`normalize_batch`].

pub mod correct;
pub mod encode;
pub mod error;
#[cfg(feature = "gui")]
pub mod gui;
pub mod measure;
pub mod output;
pub mod prefs;
pub mod probe;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use strum_macros::Display;

use crate::error::Error;
pub use crate::{encode::Progress, measure::MeasuredLoudness, probe::SourceInfo};

pub const DEFAULT_INTEGRATED_LUFS: f64 = -14.0;
pub const DEFAULT_TRUE_PEAK_DBTP: f64 = -1.5;
pub const DEFAULT_LOUDNESS_RANGE_LU: f64 = 11.0;

/// Targets handed to the loudness filter: integrated loudness in LUFS,
/// true peak in dBTP, loudness range in LU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessTargets {
    pub integrated: f64,
    pub true_peak: f64,
    pub loudness_range: f64,
}

impl Default for LoudnessTargets {
    fn default() -> Self {
        LoudnessTargets {
            integrated: DEFAULT_INTEGRATED_LUFS,
            true_peak: DEFAULT_TRUE_PEAK_DBTP,
            loudness_range: DEFAULT_LOUDNESS_RANGE_LU,
        }
    }
}

/// Output channel policy. `Keep` preserves the source layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[cfg_attr(feature = "bin", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Keep,
    Mono,
    Stereo,
}

/// Shared request configuration applied to every input of a batch.
#[derive(Debug, Clone, Default)]
pub struct NormalizationOptions {
    pub targets: LoudnessTargets,
    /// Explicit output path, taken verbatim; only valid when the batch has
    /// exactly one input.
    pub output: Option<PathBuf>,
    /// Explicit output bitrate such as `192k`. When absent and the output
    /// container is lossy, the source bitrate is probed instead.
    pub bitrate: Option<String>,
    pub channels: ChannelMode,
}

/// Resolved external engine binaries.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl EngineConfig {
    /// Resolves ffmpeg from PATH, failing early when it is absent. ffprobe
    /// is looked up best-effort since probing degrades rather than aborts.
    pub fn locate() -> Result<Self, Error> {
        let ffmpeg =
            which::which("ffmpeg").map_err(|_| Error::EngineMissing { tool: "ffmpeg" })?;
        let ffprobe = which::which("ffprobe").unwrap_or_else(|_| PathBuf::from("ffprobe"));
        Ok(EngineConfig { ffmpeg, ffprobe })
    }
}

/// Per-job state machine: `pending -> measuring -> correcting -> encoding
/// -> {done | failed}`. Failures are terminal; the batch moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum JobStage {
    Pending,
    Measuring,
    Correcting,
    Encoding,
    Done,
    Failed,
}

/// Outcome of one input, recorded once when the job completes.
#[derive(Debug)]
pub struct JobResult {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub error: Option<Error>,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Rejects invalid input/option combinations before any engine process is
/// spawned.
pub fn validate_batch(inputs: &[PathBuf], options: &NormalizationOptions) -> Result<(), Error> {
    if inputs.is_empty() {
        return Err(Error::InvalidOptions("no input files given".to_string()));
    }
    if options.output.is_some() && inputs.len() != 1 {
        return Err(Error::InvalidOptions(format!(
            "an explicit output path requires exactly one input, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// Processes the inputs in order, one at a time. A measurement or encoding
/// failure is recorded in that input's [`JobResult`] and the batch
/// continues; only option validation aborts the whole run.
pub fn normalize_batch(
    inputs: &[PathBuf],
    options: &NormalizationOptions,
    engine: &EngineConfig,
    mut on_progress: impl FnMut(usize, Progress),
) -> Result<Vec<JobResult>, Error> {
    validate_batch(inputs, options)?;

    let mut results = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        info!("processing {:?} ({} of {})", input, index + 1, inputs.len());
        match normalize_one(input, options, engine, |p| on_progress(index, p)) {
            Ok(output) => {
                trace_stage(input, JobStage::Done);
                results.push(JobResult {
                    input: input.clone(),
                    output: Some(output),
                    error: None,
                });
            }
            Err(e) => {
                trace_stage(input, JobStage::Failed);
                error!("{e}");
                results.push(JobResult {
                    input: input.clone(),
                    output: None,
                    error: Some(e),
                });
            }
        }
    }

    let failed = results.iter().filter(|r| !r.succeeded()).count();
    info!(
        "batch complete: {} succeeded, {} failed",
        results.len() - failed,
        failed
    );
    Ok(results)
}

/// Runs the full two-pass pipeline for a single input and returns the path
/// of the file it wrote.
pub fn normalize_one(
    input: &Path,
    options: &NormalizationOptions,
    engine: &EngineConfig,
    mut on_progress: impl FnMut(Progress),
) -> Result<PathBuf, Error> {
    trace_stage(input, JobStage::Pending);
    if !input.is_file() {
        return Err(Error::Io {
            path: input.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "input file not found"),
        });
    }

    // Explicit output paths are taken verbatim; templated ones go through
    // collision avoidance.
    let output = match &options.output {
        Some(path) => path.clone(),
        None => output::next_free_path(output::default_output_path(
            input,
            options.targets.integrated,
        ))?,
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    trace_stage(input, JobStage::Measuring);
    let measured =
        measure::measure_loudness(engine, input, &options.targets).map_err(|source| {
            Error::Measurement {
                path: input.to_path_buf(),
                source,
            }
        })?;

    trace_stage(input, JobStage::Correcting);
    let filter = correct::second_pass_filter(&options.targets, &measured);
    let source_info = probe::probe_source(engine, input);

    trace_stage(input, JobStage::Encoding);
    encode::run_second_pass(
        engine,
        input,
        &output,
        &filter,
        options.bitrate.as_deref(),
        source_info.bitrate.as_deref(),
        options.channels,
        source_info.duration_seconds,
        &mut on_progress,
    )
    .map_err(|source| Error::Encoding {
        path: input.to_path_buf(),
        source,
    })?;

    Ok(output)
}

fn trace_stage(input: &Path, stage: JobStage) {
    debug!("{}: {:?}", stage, input.file_name().unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_batch(&[], &NormalizationOptions::default()),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn explicit_output_requires_exactly_one_input() {
        let options = NormalizationOptions {
            output: Some(PathBuf::from("out.mp3")),
            ..Default::default()
        };
        let two = vec![PathBuf::from("a.mp3"), PathBuf::from("b.mp3")];
        assert!(matches!(
            validate_batch(&two, &options),
            Err(Error::InvalidOptions(_))
        ));

        let one = vec![PathBuf::from("a.mp3")];
        assert!(validate_batch(&one, &options).is_ok());
    }

    #[test]
    fn channel_mode_displays_lowercase() {
        assert_eq!(ChannelMode::Keep.to_string(), "keep");
        assert_eq!(ChannelMode::Mono.to_string(), "mono");
        assert_eq!(ChannelMode::Stereo.to_string(), "stereo");
    }
}
