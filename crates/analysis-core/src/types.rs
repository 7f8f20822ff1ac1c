//! Result types produced by the analyzer and the segmenter

use serde::{Deserialize, Serialize};

/// Dominant frequency of one analysis frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResult {
    /// Frequency of the strongest non-DC bin in Hz
    pub frequency: f32,
    /// Magnitude of that bin in dB relative to full scale
    pub magnitude_db: f32,
    /// Whether the magnitude exceeded the analyzer's minimum level
    pub valid: bool,
}

/// Signal level of one raw (unwindowed) frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelResult {
    /// RMS level in dBFS
    pub rms_db: f32,
    /// Peak level in dBFS
    pub peak_db: f32,
    /// RMS below the fixed silence floor
    pub is_silence: bool,
}

/// A tone interval accepted by the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeepEvent {
    /// Time the tone opened, in seconds from the start of the stream
    pub start_time_secs: f64,
    /// Time the tone closed
    pub end_time_secs: f64,
    /// `end_time_secs - start_time_secs`
    pub duration_secs: f64,
    /// Mean detected frequency over the tone's frames
    pub frequency_hz: f64,
    /// Mean RMS level over the tone's frames
    pub avg_level_db: f64,
    /// Highest peak level seen in any of the tone's frames
    pub peak_level_db: f64,
    /// Zero-based position in the emitted sequence
    pub index: usize,
}

/// Aggregate of everything a segmenter has emitted so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeepSummary {
    /// Accepted beeps, in emission order
    pub beeps: Vec<BeepEvent>,
    /// Start time of the first accepted beep
    pub first_beep_time_secs: Option<f64>,
    /// Sum of all accepted beep durations
    pub total_beep_duration_secs: f64,
}

impl BeepSummary {
    /// Number of accepted beeps
    pub fn count(&self) -> usize {
        self.beeps.len()
    }

    /// Frequency of the first accepted beep, if any
    pub fn first_frequency_hz(&self) -> Option<f64> {
        self.beeps.first().map(|b| b.frequency_hz)
    }
}
