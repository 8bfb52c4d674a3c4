//! Second pass: apply the corrected filter and stream the engine's progress
//! output back to the caller.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, warn};

use crate::error::EncodingError;
use crate::{ChannelMode, EngineConfig};

/// Progress report from the encoding pass. `Fraction` carries the completed
/// share of the known duration; `Indeterminate` is sent once when the
/// duration could not be probed, so callers can show a pulsing indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Indeterminate,
    Fraction(f64),
    Done,
}

/// Output containers where `-b:a` is meaningful; everything else keeps the
/// engine's codec defaults.
const LOSSY_BITRATE_EXTS: &[&str] = &["mp3", "m4a", "aac", "opus", "ogg"];
const STDERR_TAIL_LINES: usize = 200;

/// Runs the engine to produce `output`. Never overwrites: uniqueness comes
/// from the output namer and `-n` makes the engine refuse rather than
/// prompt if the path appears in between.
#[allow(clippy::too_many_arguments)]
pub fn run_second_pass(
    engine: &EngineConfig,
    input: &Path,
    output: &Path,
    filter: &str,
    explicit_bitrate: Option<&str>,
    probed_bitrate: Option<&str>,
    channels: ChannelMode,
    duration_seconds: Option<f64>,
    mut on_progress: impl FnMut(Progress),
) -> Result<(), EncodingError> {
    let args = build_encode_args(
        input,
        output,
        filter,
        explicit_bitrate,
        probed_bitrate,
        channels,
    );
    debug!("encode args: {args:?}");

    let mut child = Command::new(&engine.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain stderr on its own thread so neither pipe can fill up and stall
    // the engine; only a bounded tail is kept for diagnostics.
    let stderr = child.stderr.take();
    let tail_thread = thread::spawn(move || {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    });

    let known_duration = duration_seconds.filter(|d| *d > 0.0);
    if known_duration.is_none() {
        on_progress(Progress::Indeterminate);
    }
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else { break };
            let position_seconds = match parse_progress_line(&line) {
                Some(ProgressLine::Micros(us)) => us as f64 / 1_000_000.0,
                Some(ProgressLine::Seconds(secs)) => secs,
                Some(ProgressLine::End) | None => continue,
            };
            if let Some(total) = known_duration {
                on_progress(Progress::Fraction((position_seconds / total).clamp(0.0, 1.0)));
            }
        }
    }

    let status = child.wait()?;
    let stderr_tail = tail_thread.join().unwrap_or_default();
    if !status.success() {
        warn!(
            "encoding pass failed for {:?}",
            input.file_name().unwrap_or_default()
        );
        return Err(EncodingError::EngineFailed {
            status,
            stderr_tail,
        });
    }
    on_progress(Progress::Done);
    Ok(())
}

/// Argument vector for the encoding pass. Policy from the output extension:
/// `.mp3` pins the encoder, lossy containers get an explicit or probed
/// bitrate, `-ac` is added only when a channel count is forced.
pub(crate) fn build_encode_args(
    input: &Path,
    output: &Path,
    filter: &str,
    explicit_bitrate: Option<&str>,
    probed_bitrate: Option<&str>,
    channels: ChannelMode,
) -> Vec<OsString> {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        "-n".into(),
        "-i".into(),
        input.into(),
        "-af".into(),
        filter.into(),
    ];
    if ext == "mp3" {
        args.extend(["-c:a".into(), "libmp3lame".into()]);
    }
    if LOSSY_BITRATE_EXTS.contains(&ext.as_str()) {
        if let Some(bitrate) = explicit_bitrate.or(probed_bitrate) {
            args.extend(["-b:a".into(), bitrate.into()]);
        }
    }
    match channels {
        ChannelMode::Keep => {}
        ChannelMode::Mono => args.extend(["-ac".into(), "1".into()]),
        ChannelMode::Stereo => args.extend(["-ac".into(), "2".into()]),
    }
    args.extend(["-progress".into(), "pipe:1".into(), output.into()]);
    args
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ProgressLine {
    Micros(u64),
    Seconds(f64),
    End,
}

/// Decodes one `-progress` key=value line. The engine's `out_time_ms` is in
/// microseconds despite its name; `out_time_us` is preferred when present
/// and `out_time` is the textual fallback.
pub(crate) fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let line = line.trim();
    if let Some(value) = line.strip_prefix("out_time_us=") {
        return value.trim().parse::<u64>().ok().map(ProgressLine::Micros);
    }
    if let Some(value) = line.strip_prefix("out_time_ms=") {
        return value.trim().parse::<u64>().ok().map(ProgressLine::Micros);
    }
    if let Some(value) = line.strip_prefix("out_time=") {
        return parse_clock_time(value.trim()).map(ProgressLine::Seconds);
    }
    if line == "progress=end" {
        return Some(ProgressLine::End);
    }
    None
}

/// `HH:MM:SS.micros` as printed by `out_time=`.
fn parse_clock_time(text: &str) -> Option<f64> {
    let mut parts = text.splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn has_pair(args: &[String], key: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == key && w[1] == value)
    }

    #[test]
    fn out_time_us_is_microseconds() {
        assert_eq!(
            parse_progress_line("out_time_us=1500000"),
            Some(ProgressLine::Micros(1_500_000))
        );
    }

    #[test]
    fn out_time_ms_is_also_microseconds() {
        assert_eq!(
            parse_progress_line("out_time_ms=1500000"),
            Some(ProgressLine::Micros(1_500_000))
        );
    }

    #[test]
    fn out_time_clock_format_is_seconds() {
        assert_eq!(
            parse_progress_line("out_time=00:00:10.500000"),
            Some(ProgressLine::Seconds(10.5))
        );
    }

    #[test]
    fn end_marker_and_noise_lines() {
        assert_eq!(parse_progress_line("progress=end"), Some(ProgressLine::End));
        assert_eq!(parse_progress_line("frame=42"), None);
        assert_eq!(parse_progress_line("out_time_us=N/A"), None);
    }

    #[test]
    fn mp3_output_pins_encoder_and_bitrate() {
        let args = args_as_strings(&build_encode_args(
            Path::new("in.wav"),
            Path::new("out.mp3"),
            "loudnorm=...",
            Some("192k"),
            Some("128k"),
            ChannelMode::Keep,
        ));
        assert!(has_pair(&args, "-c:a", "libmp3lame"));
        assert!(has_pair(&args, "-b:a", "192k"));
        assert!(args.contains(&"-n".to_string()));
        assert!(has_pair(&args, "-progress", "pipe:1"));
        assert_eq!(args.last().unwrap(), "out.mp3");
    }

    #[test]
    fn probed_bitrate_is_the_fallback() {
        let args = args_as_strings(&build_encode_args(
            Path::new("in.opus"),
            Path::new("out.opus"),
            "loudnorm=...",
            None,
            Some("96k"),
            ChannelMode::Keep,
        ));
        assert!(has_pair(&args, "-b:a", "96k"));
    }

    #[test]
    fn lossless_output_ignores_bitrate() {
        let args = args_as_strings(&build_encode_args(
            Path::new("in.wav"),
            Path::new("out.wav"),
            "loudnorm=...",
            Some("192k"),
            Some("128k"),
            ChannelMode::Keep,
        ));
        assert!(!args.iter().any(|a| a == "-b:a"));
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn forced_channels_add_ac() {
        let mono = args_as_strings(&build_encode_args(
            Path::new("in.mp3"),
            Path::new("out.mp3"),
            "loudnorm=...",
            None,
            None,
            ChannelMode::Mono,
        ));
        assert!(has_pair(&mono, "-ac", "1"));

        let keep = args_as_strings(&build_encode_args(
            Path::new("in.mp3"),
            Path::new("out.mp3"),
            "loudnorm=...",
            None,
            None,
            ChannelMode::Keep,
        ));
        assert!(!keep.iter().any(|a| a == "-ac"));
    }
}
