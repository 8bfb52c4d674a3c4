//! First pass: run the loudness filter in analysis mode and decode the JSON
//! report it prints on the diagnostic stream.

use std::path::Path;
use std::process::Command;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::error::MeasurementError;
use crate::{EngineConfig, LoudnessTargets, correct};

lazy_static! {
    /// First well-formed report object after the filter's marker lines. The
    /// framing is a versioned external contract (`print_format=json`); all
    /// knowledge of it lives in [`parse_report`].
    static ref REPORT_RE: Regex = Regex::new(r#"\{\s*"input_i"[\s\S]*?\}"#).unwrap();
}

/// Loudness facts from the analysis pass, consumed once by the corrector.
/// Units: `input_i` and `input_thresh` in LUFS, `input_tp` in dBTP,
/// `input_lra` and `target_offset` in LU.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredLoudness {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

/// Runs the engine in measurement mode over `input` and parses its report.
pub fn measure_loudness(
    engine: &EngineConfig,
    input: &Path,
    targets: &LoudnessTargets,
) -> Result<MeasuredLoudness, MeasurementError> {
    let output = Command::new(&engine.ffmpeg)
        .args(["-hide_banner", "-nostats", "-i"])
        .arg(input)
        .arg("-af")
        .arg(correct::analysis_filter(targets))
        .args(["-f", "null", "-"])
        .output()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(MeasurementError::EngineFailed {
            status: output.status,
            stderr_tail: tail(&stderr, 1000),
        });
    }
    let measured = parse_report(&stderr)?;
    debug!(
        "measured {:?}: {:?}",
        input.file_name().unwrap_or_default(),
        measured
    );
    Ok(measured)
}

/// Locates and decodes the JSON report in the engine's diagnostic output.
/// Single fix point for report format drift.
pub fn parse_report(engine_output: &str) -> Result<MeasuredLoudness, MeasurementError> {
    let block = REPORT_RE
        .find(engine_output)
        .ok_or(MeasurementError::ReportMissing)?;
    let report: Value = serde_json::from_str(block.as_str())?;
    Ok(MeasuredLoudness {
        input_i: field(&report, "input_i")?,
        input_tp: field(&report, "input_tp")?,
        input_lra: field(&report, "input_lra")?,
        input_thresh: field(&report, "input_thresh")?,
        target_offset: field(&report, "target_offset")?,
    })
}

/// The filter emits numeric fields as JSON strings; plain numbers are
/// tolerated too.
fn field(report: &Value, key: &'static str) -> Result<f64, MeasurementError> {
    match report.get(key) {
        Some(Value::Number(n)) => n.as_f64().ok_or(MeasurementError::ReportField(key)),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| MeasurementError::ReportField(key)),
        _ => Err(MeasurementError::ReportField(key)),
    }
}

/// Last `max_chars` characters of `text`, for bounded diagnostics.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let skip = text.chars().count().saturating_sub(max_chars);
    text.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_OUTPUT: &str = r#"Input #0, mp3, from 'song.mp3':
  Duration: 00:03:25.07, start: 0.000000, bitrate: 192 kb/s
[Parsed_loudnorm_0 @ 0x5591e8c4]
{
    "input_i" : "-20.00",
    "input_tp" : "-3.00",
    "input_lra" : "8.00",
    "input_thresh" : "-30.00",
    "output_i" : "-14.11",
    "output_tp" : "-1.50",
    "output_lra" : "7.10",
    "output_thresh" : "-24.09",
    "normalization_type" : "dynamic",
    "target_offset" : "0.50"
}
"#;

    #[test]
    fn parses_report_framed_in_diagnostic_output() {
        let measured = parse_report(ENGINE_OUTPUT).unwrap();
        assert_eq!(
            measured,
            MeasuredLoudness {
                input_i: -20.0,
                input_tp: -3.0,
                input_lra: 8.0,
                input_thresh: -30.0,
                target_offset: 0.5,
            }
        );
    }

    #[test]
    fn accepts_plain_json_numbers() {
        let text = r#"{"input_i": -20, "input_tp": -3, "input_lra": 8,
                       "input_thresh": -30, "target_offset": 0.5}"#;
        let measured = parse_report(text).unwrap();
        assert_eq!(measured.input_i, -20.0);
        assert_eq!(measured.target_offset, 0.5);
    }

    #[test]
    fn output_without_report_is_an_error() {
        assert!(matches!(
            parse_report("frame=100 fps=25\n"),
            Err(MeasurementError::ReportMissing)
        ));
    }

    #[test]
    fn missing_field_names_the_culprit() {
        let text = r#"{"input_i": "-20.00", "input_tp": "-3.00",
                       "input_lra": "8.00", "input_thresh": "-30.00"}"#;
        assert!(matches!(
            parse_report(text),
            Err(MeasurementError::ReportField("target_offset"))
        ));
    }

    #[test]
    fn tail_is_character_bounded() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
    }
}
