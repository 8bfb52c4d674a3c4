use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Probe failures are advisory: callers degrade to an unknown duration or
/// the engine's default bitrate instead of failing the job.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with {status}")]
    Failed {
        tool: &'static str,
        status: ExitStatus,
    },
    #[error("probe output has no usable {field}")]
    Missing { field: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum MeasurementError {
    #[error("failed to launch ffmpeg: {0}")]
    Launch(#[from] io::Error),
    #[error("analysis pass exited with {status}: {stderr_tail}")]
    EngineFailed {
        status: ExitStatus,
        stderr_tail: String,
    },
    #[error("no loudness report in engine output")]
    ReportMissing,
    #[error("malformed loudness report: {0}")]
    ReportMalformed(#[from] serde_json::Error),
    #[error("loudness report field {0:?} is missing or not a number")]
    ReportField(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum EncodingError {
    #[error("failed to launch ffmpeg: {0}")]
    Launch(#[from] io::Error),
    #[error("encoding pass exited with {status}: {stderr_tail}")]
    EngineFailed {
        status: ExitStatus,
        stderr_tail: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("{tool} not found in PATH")]
    EngineMissing { tool: &'static str },
    #[error("measurement failed for {path}: {source}")]
    Measurement {
        path: PathBuf,
        #[source]
        source: MeasurementError,
    },
    #[error("encoding failed for {path}: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: EncodingError,
    },
    #[error("no free output path near {path}: suffixes -001..-999 are all taken")]
    OutputPathsExhausted { path: PathBuf },
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
