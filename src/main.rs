use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use dualpass_audio_normalize::{
    ChannelMode, DEFAULT_INTEGRATED_LUFS, DEFAULT_LOUDNESS_RANGE_LU, DEFAULT_TRUE_PEAK_DBTP,
    EngineConfig, LoudnessTargets, NormalizationOptions, Progress, normalize_batch,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Normalize audio to a target loudness with ffmpeg loudnorm (dual pass)",
    long_about = None
)]
struct Cli {
    /// input audio file(s)
    inputs: Vec<PathBuf>,

    /// single output file path (only with one input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// target integrated loudness in LUFS
    #[arg(long = "I", allow_negative_numbers = true, default_value_t = DEFAULT_INTEGRATED_LUFS)]
    integrated: f64,

    /// target true peak in dBTP
    #[arg(long = "TP", allow_negative_numbers = true, default_value_t = DEFAULT_TRUE_PEAK_DBTP)]
    true_peak: f64,

    /// target loudness range in LU
    #[arg(long = "LRA", allow_negative_numbers = true, default_value_t = DEFAULT_LOUDNESS_RANGE_LU)]
    loudness_range: f64,

    /// output bitrate such as 192k, probed from the source when omitted
    #[arg(long)]
    bitrate: Option<String>,

    /// force the output channel count
    #[arg(long, value_enum)]
    channels: Option<ChannelMode>,

    /// run in batch/CLI mode instead of launching the graphical interface
    #[arg(long)]
    no_gui: bool,
}

fn main() -> Result<()> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    if cli.inputs.is_empty() && !cli.no_gui {
        #[cfg(feature = "gui")]
        {
            dualpass_audio_normalize::gui::run()?;
            return Ok(());
        }
        #[cfg(not(feature = "gui"))]
        bail!(
            "no inputs given and GUI support is not compiled in; \
             rebuild with --features gui or pass input files with --no-gui"
        );
    }

    let options = NormalizationOptions {
        targets: LoudnessTargets {
            integrated: cli.integrated,
            true_peak: cli.true_peak,
            loudness_range: cli.loudness_range,
        },
        output: cli.output,
        bitrate: cli.bitrate,
        channels: cli.channels.unwrap_or_default(),
    };

    info!(
        "Targets: {:.2} LUFS / {:.1} dBTP / {:.1} LU",
        options.targets.integrated, options.targets.true_peak, options.targets.loudness_range
    );
    match &options.bitrate {
        Some(bitrate) => info!("Bitrate: {bitrate}"),
        None => info!("Bitrate: probed from source where applicable"),
    }
    info!("Channels: {}", options.channels);

    let engine = EngineConfig::locate()?;

    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .expect("Internal Error: Failed to set progress bar style")
        .progress_chars("#>-");
    let spinner_style = ProgressStyle::default_spinner();

    let inputs = cli.inputs.clone();
    let mut active: Option<(usize, ProgressBar)> = None;
    let results = normalize_batch(&cli.inputs, &options, &engine, |index, progress| {
        let bar = match &active {
            Some((i, bar)) if *i == index => bar.clone(),
            _ => {
                if let Some((_, old)) = active.take() {
                    old.finish_and_clear();
                }
                let bar = ProgressBar::new(100).with_style(bar_style.clone());
                bar.set_message(
                    inputs[index]
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                );
                active = Some((index, bar.clone()));
                bar
            }
        };
        match progress {
            Progress::Indeterminate => {
                bar.set_style(spinner_style.clone());
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            Progress::Fraction(frac) => bar.set_position((frac * 100.0).round() as u64),
            Progress::Done => {
                bar.finish_and_clear();
                active = None;
            }
        }
    })?;

    let mut failed = 0usize;
    for result in &results {
        match (&result.output, &result.error) {
            (Some(output), None) => {
                println!("OK: {} -> {}", result.input.display(), output.display());
            }
            (_, Some(error)) => {
                failed += 1;
                println!("FAILED: {}: {}", result.input.display(), error);
            }
            _ => {}
        }
    }
    if failed > 0 {
        bail!("{failed} of {} jobs failed", results.len());
    }
    Ok(())
}
