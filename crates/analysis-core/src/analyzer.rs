//! Windowed-FFT frequency and level analysis
//!
//! The analyzer owns one FFT plan and one Hann window sized to
//! [`AnalyzerConfig::fft_size`]. Each call to [`Analyzer::detect_frequency`]
//! reports the strongest non-DC bin of a single frame; each call to
//! [`Analyzer::calculate_level`] reports RMS and peak of the raw frame.
//!
//! # Example
//!
//! ```rust
//! use sipcheck_analysis_core::{Analyzer, AnalyzerConfig};
//!
//! let config = AnalyzerConfig::default().with_sample_rate(8000);
//! let mut analyzer = Analyzer::new(config).unwrap();
//!
//! let tone: Vec<i16> = (0..512)
//!     .map(|i| {
//!         let t = i as f32 / 8000.0;
//!         ((2.0 * std::f32::consts::PI * 1000.0 * t).sin() * 16000.0) as i16
//!     })
//!     .collect();
//!
//! let result = analyzer.detect_frequency(&tone);
//! assert!(result.valid);
//! assert!((result.frequency - 1000.0).abs() <= analyzer.bin_width_hz());
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{FrequencyResult, LevelResult};
use crate::wav::{read_wav, WavAudio, WavFormat};

/// Fixed silence floor for [`LevelResult::is_silence`], independent of the
/// configured minimum level
pub const SILENCE_THRESHOLD_DB: f32 = -60.0;

/// Added before taking a logarithm so digital silence stays finite
const DB_EPSILON: f32 = 1e-10;

const FULL_SCALE: f32 = 32768.0;

/// Analyzer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Sample rate of the input in Hz (overridden by the file when analyzing a WAV)
    pub sample_rate: u32,
    /// FFT window length; must be a power of two
    pub fft_size: usize,
    /// A peak must exceed this level to be reported as valid
    pub min_level_db: f32,
    /// Tolerance of [`AnalyzerConfig::freq_matches`] for single frames.
    /// Beep segmentation carries its own in
    /// [`BeepConfig`](crate::segmenter::BeepConfig).
    pub freq_tolerance_hz: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            fft_size: 512,
            min_level_db: -40.0,
            freq_tolerance_hz: 50.0,
        }
    }
}

impl AnalyzerConfig {
    /// Set the sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the FFT window size
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Set the minimum valid level
    pub fn with_min_level_db(mut self, min_level_db: f32) -> Self {
        self.min_level_db = min_level_db;
        self
    }

    /// Set the frequency match tolerance
    pub fn with_freq_tolerance_hz(mut self, tolerance: f32) -> Self {
        self.freq_tolerance_hz = tolerance;
        self
    }

    /// Hop between consecutive frames of a file analysis (50% overlap)
    pub fn hop_size(&self) -> usize {
        self.fft_size / 2
    }

    /// Whether `detected` lies within the configured tolerance of `target`
    pub fn freq_matches(&self, detected: f32, target: f32) -> bool {
        (detected - target).abs() <= self.freq_tolerance_hz
    }
}

/// Single-frame spectral and level analyzer
pub struct Analyzer {
    config: AnalyzerConfig,
    window: Vec<f32>,
    buffer: Vec<Complex32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Create an analyzer, planning the FFT for `config.fft_size`
    pub fn new(config: AnalyzerConfig) -> AnalysisResult<Self> {
        let size = config.fft_size;
        if size < 2 || !size.is_power_of_two() {
            return Err(AnalysisError::InvalidFftSize { size });
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);

        Ok(Self {
            config,
            window: hann_window(size),
            buffer: vec![Complex32::new(0.0, 0.0); size],
            fft,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Frequency resolution of one FFT bin
    pub fn bin_width_hz(&self) -> f32 {
        self.config.sample_rate as f32 / self.config.fft_size as f32
    }

    /// Find the dominant frequency of up to `fft_size` samples.
    ///
    /// Shorter input is zero-padded. DC (bin 0) is never reported.
    pub fn detect_frequency(&mut self, samples: &[i16]) -> FrequencyResult {
        let size = self.config.fft_size;
        let used = samples.len().min(size);

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let value = if i < used {
                (samples[i] as f32 / FULL_SCALE) * self.window[i]
            } else {
                0.0
            };
            *slot = Complex32::new(value, 0.0);
        }

        self.fft.process(&mut self.buffer);

        let mut peak = 0.0f32;
        let mut peak_bin = 0usize;
        for (bin, value) in self.buffer.iter().enumerate().take(size / 2).skip(1) {
            let magnitude = value.norm();
            if magnitude > peak {
                peak = magnitude;
                peak_bin = bin;
            }
        }

        let magnitude_db = 20.0 * (peak / (size / 2) as f32 + DB_EPSILON).log10();

        FrequencyResult {
            frequency: peak_bin as f32 * self.bin_width_hz(),
            magnitude_db,
            valid: magnitude_db > self.config.min_level_db,
        }
    }

    /// RMS and peak of the raw frame in dBFS
    pub fn calculate_level(&self, samples: &[i16]) -> AnalysisResult<LevelResult> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyFrame);
        }

        let mut sum_squares = 0.0f64;
        let mut peak = 0i32;
        for &sample in samples {
            let normalized = sample as f64 / FULL_SCALE as f64;
            sum_squares += normalized * normalized;
            peak = peak.max((sample as i32).abs());
        }

        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
        let rms_db = 20.0 * (rms + DB_EPSILON).log10();
        let peak_db = 20.0 * (peak as f32 / FULL_SCALE + DB_EPSILON).log10();

        Ok(LevelResult {
            rms_db,
            peak_db,
            is_silence: rms_db < SILENCE_THRESHOLD_DB,
        })
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
        .collect()
}

/// One analysed frame of a recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameAnalysis {
    /// Offset of the frame start in seconds
    pub time_secs: f64,
    pub frequency: FrequencyResult,
    pub level: LevelResult,
}

/// Per-frame analysis of a whole recording
#[derive(Debug, Clone)]
pub struct FileAnalysis {
    /// Format chunk of the analysed file
    pub format: WavFormat,
    /// Configuration actually used (sample rate taken from the file)
    pub config: AnalyzerConfig,
    /// Frames at 50% overlap
    pub frames: Vec<FrameAnalysis>,
}

impl FileAnalysis {
    /// Seconds between consecutive frame starts
    pub fn hop_secs(&self) -> f64 {
        self.config.hop_size() as f64 / self.config.sample_rate as f64
    }

    /// Time at which a frame following the last one would start
    pub fn end_time_secs(&self) -> f64 {
        self.frames.len() as f64 * self.hop_secs()
    }

    /// Frames whose peak exceeded the minimum level
    pub fn valid_frames(&self) -> impl Iterator<Item = &FrameAnalysis> {
        self.frames.iter().filter(|f| f.frequency.valid)
    }
}

/// Analyse a WAV file frame by frame.
///
/// The sample rate comes from the file's format chunk; all other settings
/// come from `config`.
pub fn analyze_file(path: impl AsRef<Path>, config: &AnalyzerConfig) -> AnalysisResult<FileAnalysis> {
    let path = path.as_ref();
    let wav = read_wav(path)?;
    debug!(
        "Analyzing {}: {} Hz, {} channel(s), {:.2}s",
        path.display(),
        wav.format.sample_rate,
        wav.format.channels,
        wav.duration_secs()
    );
    analyze_wav(&wav, config)
}

/// Analyse an already decoded recording
pub fn analyze_wav(wav: &WavAudio, config: &AnalyzerConfig) -> AnalysisResult<FileAnalysis> {
    let config = config.with_sample_rate(wav.format.sample_rate);
    let frames = analyze_samples(&wav.samples, &config)?;
    Ok(FileAnalysis {
        format: wav.format,
        config,
        frames,
    })
}

/// Slide a full window across `samples` with a hop of half a window.
///
/// Only complete windows are analysed; fewer than one full window is an error.
pub fn analyze_samples(samples: &[i16], config: &AnalyzerConfig) -> AnalysisResult<Vec<FrameAnalysis>> {
    let mut analyzer = Analyzer::new(*config)?;
    let frame_len = config.fft_size;
    let hop = config.hop_size();

    if samples.len() < frame_len {
        return Err(AnalysisError::TooShort {
            samples: samples.len(),
            required: frame_len,
        });
    }

    let hop_secs = hop as f64 / config.sample_rate as f64;
    let mut frames = Vec::with_capacity((samples.len() - frame_len) / hop + 1);

    for (index, window) in samples.windows(frame_len).step_by(hop).enumerate() {
        let frequency = analyzer.detect_frequency(window);
        let level = analyzer.calculate_level(window)?;
        frames.push(FrameAnalysis {
            time_secs: index as f64 * hop_secs,
            frequency,
            level,
        });
    }

    debug!("Analyzed {} frames", frames.len());
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                ((2.0 * std::f32::consts::PI * freq * t).sin() * amplitude * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        for size in [0, 1, 3, 500, 1000] {
            let config = AnalyzerConfig::default().with_fft_size(size);
            assert!(
                matches!(Analyzer::new(config), Err(AnalysisError::InvalidFftSize { .. })),
                "size {} should be rejected",
                size
            );
        }
        assert!(Analyzer::new(AnalyzerConfig::default().with_fft_size(1024)).is_ok());
    }

    #[test]
    fn test_full_scale_sine_detected_within_one_bin() {
        let config = AnalyzerConfig::default().with_sample_rate(8000).with_fft_size(512);
        let mut analyzer = Analyzer::new(config).unwrap();
        for f0 in [440.0f32, 1000.0, 2600.0] {
            let result = analyzer.detect_frequency(&sine(f0, 1.0, 8000, 512));
            assert!(result.valid);
            assert!(
                (result.frequency - f0).abs() <= analyzer.bin_width_hz(),
                "expected ~{} Hz, got {}",
                f0,
                result.frequency
            );
        }
    }

    #[test]
    fn test_silence_is_invalid_at_epsilon_floor() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        let result = analyzer.detect_frequency(&[0i16; 512]);
        assert!(!result.valid);
        assert!(result.magnitude_db < -190.0);
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        let result = analyzer.detect_frequency(&sine(1000.0, 1.0, 8000, 300));
        assert!(result.valid);
        assert!((result.frequency - 1000.0).abs() <= 2.0 * analyzer.bin_width_hz());
    }

    #[test]
    fn test_level_of_silence() {
        let analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        let level = analyzer.calculate_level(&[0i16; 256]).unwrap();
        assert!(level.is_silence);
        assert!(level.rms_db <= -60.0);
        assert!(level.peak_db <= -60.0);
    }

    #[test]
    fn test_level_of_full_scale_sine() {
        let analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        let level = analyzer.calculate_level(&sine(1000.0, 1.0, 8000, 800)).unwrap();
        assert!(!level.is_silence);
        // RMS of a sine is -3 dB relative to its peak
        assert!((level.rms_db - -3.01).abs() < 0.2, "rms {}", level.rms_db);
        assert!(level.peak_db > -0.1);
    }

    #[test]
    fn test_level_handles_most_negative_sample() {
        let analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        let level = analyzer.calculate_level(&[i16::MIN, 0]).unwrap();
        assert!(level.peak_db.abs() < 1e-3);
    }

    #[test]
    fn test_empty_frame_level_is_error() {
        let analyzer = Analyzer::new(AnalyzerConfig::default()).unwrap();
        assert!(matches!(analyzer.calculate_level(&[]), Err(AnalysisError::EmptyFrame)));
    }

    #[test]
    fn test_freq_matches_uses_tolerance() {
        let config = AnalyzerConfig::default().with_freq_tolerance_hz(25.0);
        assert!(config.freq_matches(1010.0, 1000.0));
        assert!(config.freq_matches(975.0, 1000.0));
        assert!(!config.freq_matches(1030.0, 1000.0));
    }

    #[test]
    fn test_analyze_samples_frame_count() {
        let config = AnalyzerConfig::default().with_fft_size(256);
        let frames = analyze_samples(&sine(800.0, 0.5, 8000, 1000), &config).unwrap();
        // (1000 - 256) / 128 + 1
        assert_eq!(frames.len(), 6);
        assert!((frames[1].time_secs - 128.0 / 8000.0).abs() < 1e-12);
    }

    #[test]
    fn test_analyze_samples_too_short() {
        let config = AnalyzerConfig::default();
        assert!(matches!(
            analyze_samples(&[0i16; 100], &config),
            Err(AnalysisError::TooShort { samples: 100, required: 512 })
        ));
    }
}
