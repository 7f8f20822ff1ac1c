//! `sipcheck analyze`: offline analysis of a recording

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sipcheck_analysis_core::{
    analyze_wav, read_wav, segment_frames, AnalyzerConfig, BeepConfig, BeepSummary, FrameAnalysis,
};
use sipcheck_scenario_core::EngineConfig;
use tracing::{debug, info};

use crate::cli::AnalyzeArgs;

/// Aggregate numbers over all frames of a recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameStats {
    pub total_frames: usize,
    /// Frames whose peak exceeded the threshold
    pub valid_frames: usize,
    pub peak_level_db: f32,
    pub threshold_db: f32,
    pub avg_frequency_hz: Option<f32>,
    pub avg_level_db: Option<f32>,
    /// Valid frames within the analyzer tolerance of `--target-freq`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_frames: Option<usize>,
}

impl FrameStats {
    pub fn from_frames(frames: &[FrameAnalysis], config: &AnalyzerConfig, target_hz: Option<f32>) -> Self {
        let peak_level_db = frames
            .iter()
            .map(|f| f.frequency.magnitude_db)
            .fold(-200.0_f32, f32::max);

        let valid: Vec<_> = frames.iter().filter(|f| f.frequency.valid).collect();
        let n = valid.len() as f32;
        let (avg_frequency_hz, avg_level_db) = if valid.is_empty() {
            (None, None)
        } else {
            (
                Some(valid.iter().map(|f| f.frequency.frequency).sum::<f32>() / n),
                Some(valid.iter().map(|f| f.frequency.magnitude_db).sum::<f32>() / n),
            )
        };

        let target_frames = target_hz.map(|target| {
            valid
                .iter()
                .filter(|f| config.freq_matches(f.frequency.frequency, target))
                .count()
        });

        Self {
            total_frames: frames.len(),
            valid_frames: valid.len(),
            peak_level_db,
            threshold_db: config.min_level_db,
            avg_frequency_hz,
            avg_level_db,
            target_frames,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeReport {
    file: PathBuf,
    sample_rate: u32,
    channels: u16,
    duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_freq_hz: Option<f32>,
    freq_tolerance_hz: f32,
    stats: FrameStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    beeps: Option<BeepSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<Vec<FrameAnalysis>>,
}

fn analyzer_config(args: &AnalyzeArgs, config: &EngineConfig) -> AnalyzerConfig {
    let mut analyzer = config.analyzer;
    if let Some(fft_size) = args.fft_size {
        analyzer = analyzer.with_fft_size(fft_size);
    }
    analyzer
}

fn beep_config(args: &AnalyzeArgs, config: &EngineConfig) -> BeepConfig {
    let mut beep = config.beep;
    if let Some(freq) = args.target_freq {
        beep = beep.with_target_freq(freq);
    }
    beep
}

fn build_report(path: &Path, args: &AnalyzeArgs, config: &EngineConfig) -> Result<AnalyzeReport> {
    info!("Analyzing audio file: {}", path.display());

    let analyzer = analyzer_config(args, config);
    let wav = read_wav(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let analysis = analyze_wav(&wav, &analyzer)
        .with_context(|| format!("Failed to analyze {}", path.display()))?;
    info!("Analyzed {} frames", analysis.frames.len());

    for (i, frame) in analysis.frames.iter().take(5).enumerate() {
        debug!(
            "Frame {}: freq={:.1} Hz, level={:.1} dB, valid={}",
            i, frame.frequency.frequency, frame.frequency.magnitude_db, frame.frequency.valid
        );
    }

    let beeps = args.beeps.then(|| {
        segment_frames(
            &analysis.frames,
            analysis.end_time_secs(),
            beep_config(args, config),
        )
    });

    Ok(AnalyzeReport {
        file: path.to_path_buf(),
        sample_rate: analysis.format.sample_rate,
        channels: analysis.format.channels,
        duration_secs: wav.duration_secs(),
        target_freq_hz: args.target_freq,
        freq_tolerance_hz: analysis.config.freq_tolerance_hz,
        stats: FrameStats::from_frames(&analysis.frames, &analysis.config, args.target_freq),
        beeps,
        frames: args.frames.then(|| analysis.frames.clone()),
    })
}

fn print_report(report: &AnalyzeReport, show_stats: bool) {
    println!(
        "{}: {} Hz, {} channel(s), {:.2}s",
        report.file.display(),
        report.sample_rate,
        report.channels,
        report.duration_secs
    );

    if show_stats {
        let stats = &report.stats;
        println!("Audio statistics:");
        println!("  Total frames: {}", stats.total_frames);
        println!("  Valid frames (above threshold): {}", stats.valid_frames);
        println!("  Peak level: {:.1} dB", stats.peak_level_db);
        println!("  Threshold: {:.1} dB", stats.threshold_db);
        if let (Some(freq), Some(level)) = (stats.avg_frequency_hz, stats.avg_level_db) {
            println!("  Average frequency: {:.1} Hz", freq);
            println!("  Average level: {:.1} dB", level);
        }
        if let (Some(count), Some(target)) = (stats.target_frames, report.target_freq_hz) {
            println!(
                "  Frames at {:.0} Hz (±{:.0} Hz): {}",
                target, report.freq_tolerance_hz, count
            );
        }
    }

    if let Some(frames) = &report.frames {
        println!("Frames:");
        for frame in frames {
            println!(
                "  {:8.3}s  {:7.1} Hz  {:6.1} dB  rms {:6.1} dB{}",
                frame.time_secs,
                frame.frequency.frequency,
                frame.frequency.magnitude_db,
                frame.level.rms_db,
                if frame.frequency.valid { "" } else { "  (below threshold)" }
            );
        }
    }

    if let Some(summary) = &report.beeps {
        for beep in &summary.beeps {
            println!(
                "  Beep #{}: {:.3}s - {:.3}s ({:.0}ms) @ {:.0}Hz, {:.1}dB",
                beep.index + 1,
                beep.start_time_secs,
                beep.end_time_secs,
                beep.duration_secs * 1000.0,
                beep.frequency_hz,
                beep.avg_level_db
            );
        }
        println!("Detected beeps: {}", summary.count());
    }
}

pub fn run(args: &AnalyzeArgs, config: &EngineConfig) -> Result<()> {
    let report = build_report(&args.file, args, config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.stats || !args.beeps);
    }
    Ok(())
}
