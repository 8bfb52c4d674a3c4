//! Stream facts from the probing tool: duration, audio bitrate, channel
//! count. Everything here is best-effort; a probe that fails only costs the
//! caller a determinate progress bar or a bitrate hint.

use std::path::Path;
use std::process::Command;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde_json::Value;

use crate::EngineConfig;
use crate::error::ProbeError;

lazy_static! {
    /// `Duration: 00:03:25.07` in the engine banner; the last field is
    /// centiseconds.
    static ref DURATION_RE: Regex =
        Regex::new(r"Duration:\s*(\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap();
}

/// Best-effort facts about one input stream. Every field may be unknown.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SourceInfo {
    pub duration_seconds: Option<f64>,
    /// Audio bitrate formatted for `-b:a`, e.g. `192k`.
    pub bitrate: Option<String>,
    pub channels: Option<u32>,
}

/// Queries ffprobe, then falls back to the ffmpeg banner for the duration.
/// Never fails: each unanswered query degrades to `None` and is logged.
pub fn probe_source(engine: &EngineConfig, input: &Path) -> SourceInfo {
    let mut info = match ffprobe_source(engine, input) {
        Ok(info) => info,
        Err(e) => {
            warn!(
                "ffprobe failed for {:?}: {}",
                input.file_name().unwrap_or_default(),
                e
            );
            SourceInfo::default()
        }
    };
    if info.duration_seconds.is_none() {
        match banner_duration(engine, input) {
            Ok(secs) => info.duration_seconds = Some(secs),
            Err(e) => debug!(
                "banner duration fallback failed for {:?}: {}",
                input.file_name().unwrap_or_default(),
                e
            ),
        }
    }
    info
}

fn ffprobe_source(engine: &EngineConfig, input: &Path) -> Result<SourceInfo, ProbeError> {
    let output = Command::new(&engine.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=bit_rate,channels:format=duration",
            "-of",
            "json",
        ])
        .arg(input)
        .output()
        .map_err(|source| ProbeError::Launch {
            tool: "ffprobe",
            source,
        })?;
    if !output.status.success() {
        return Err(ProbeError::Failed {
            tool: "ffprobe",
            status: output.status,
        });
    }
    parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
}

/// ffprobe prints numeric entries as JSON strings, so both representations
/// are accepted.
pub(crate) fn parse_ffprobe_output(text: &str) -> Result<SourceInfo, ProbeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| ProbeError::Missing { field: "json" })?;
    let stream = value
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or(Value::Null);
    let format = value.get("format").cloned().unwrap_or(Value::Null);

    Ok(SourceInfo {
        duration_seconds: number(format.get("duration")).filter(|d| *d > 0.0),
        bitrate: number(stream.get("bit_rate"))
            .filter(|bps| *bps > 0.0)
            .map(|bps| format_bitrate(bps as u64)),
        channels: number(stream.get("channels")).map(|c| c as u32),
    })
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `192000` bps -> `192k`, floored at 1k since the engine rejects `0k`.
pub(crate) fn format_bitrate(bps: u64) -> String {
    let kbps = ((bps as f64) / 1000.0).round() as u64;
    format!("{}k", kbps.max(1))
}

/// Duration fallback: decode the input to the null muxer and scan the
/// banner on the diagnostic stream.
fn banner_duration(engine: &EngineConfig, input: &Path) -> Result<f64, ProbeError> {
    let output = Command::new(&engine.ffmpeg)
        .args(["-hide_banner", "-i"])
        .arg(input)
        .args(["-f", "null", "-"])
        .output()
        .map_err(|source| ProbeError::Launch {
            tool: "ffmpeg",
            source,
        })?;
    parse_banner_duration(&String::from_utf8_lossy(&output.stderr)).ok_or(ProbeError::Missing {
        field: "duration",
    })
}

pub(crate) fn parse_banner_duration(stderr: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(stderr)?;
    let h: f64 = caps[1].parse().ok()?;
    let m: f64 = caps[2].parse().ok()?;
    let s: f64 = caps[3].parse().ok()?;
    let cs: f64 = caps[4].parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s + cs / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json_with_string_numbers() {
        let text = r#"{
            "streams": [{"bit_rate": "192000", "channels": 2}],
            "format": {"duration": "205.070000"}
        }"#;
        let info = parse_ffprobe_output(text).unwrap();
        assert_eq!(info.duration_seconds, Some(205.07));
        assert_eq!(info.bitrate.as_deref(), Some("192k"));
        assert_eq!(info.channels, Some(2));
    }

    #[test]
    fn missing_stream_entries_degrade_to_none() {
        let info = parse_ffprobe_output(r#"{"format": {}}"#).unwrap();
        assert_eq!(info, SourceInfo::default());
    }

    #[test]
    fn bitrate_is_rounded_and_floored() {
        assert_eq!(format_bitrate(192_000), "192k");
        assert_eq!(format_bitrate(127_500), "128k");
        assert_eq!(format_bitrate(300), "1k");
    }

    #[test]
    fn banner_duration_converts_centiseconds() {
        let stderr = "Input #0, mp3, from 'song.mp3':\n  \
                      Duration: 00:03:25.07, start: 0.000000, bitrate: 192 kb/s\n";
        let secs = parse_banner_duration(stderr).unwrap();
        assert!((secs - 205.07).abs() < 1e-9);
    }

    #[test]
    fn banner_without_duration_yields_none() {
        assert_eq!(parse_banner_duration("no banner here"), None);
    }
}
