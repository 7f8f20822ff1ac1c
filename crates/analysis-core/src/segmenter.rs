//! Tone segmentation
//!
//! Turns a stream of per-frame analysis results into discrete [`BeepEvent`]s.
//! A frame is "tone" when its peak is valid, loud enough, not silent, and (if
//! a target is configured) close enough to the target frequency. A run of tone
//! frames becomes a beep when the first non-tone frame closes it and the run's
//! duration lies within `[min_duration_secs, max_duration_secs]`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::FrameAnalysis;
use crate::types::{BeepEvent, BeepSummary, FrequencyResult, LevelResult};

/// Beep detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeepConfig {
    /// Frames with a peak at or below this level are not tone
    pub min_level_db: f32,
    /// Shortest accepted beep
    pub min_duration_secs: f64,
    /// Longest accepted beep
    pub max_duration_secs: f64,
    /// Expected beep frequency; 0 accepts any frequency
    pub target_freq_hz: f32,
    /// Allowed distance from `target_freq_hz`
    pub freq_tolerance_hz: f32,
}

impl Default for BeepConfig {
    fn default() -> Self {
        Self {
            min_level_db: -40.0,
            min_duration_secs: 0.05,
            max_duration_secs: 5.0,
            target_freq_hz: 0.0,
            freq_tolerance_hz: 50.0,
        }
    }
}

impl BeepConfig {
    /// Restrict detection to tones near `freq_hz` (0 disables the restriction)
    pub fn with_target_freq(mut self, freq_hz: f32) -> Self {
        self.target_freq_hz = freq_hz;
        self
    }

    /// Set the accepted duration range
    pub fn with_duration_range(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.min_duration_secs = min_secs;
        self.max_duration_secs = max_secs;
        self
    }

    /// Set the minimum tone level
    pub fn with_min_level_db(mut self, min_level_db: f32) -> Self {
        self.min_level_db = min_level_db;
        self
    }

    /// Set the frequency tolerance
    pub fn with_freq_tolerance_hz(mut self, tolerance: f32) -> Self {
        self.freq_tolerance_hz = tolerance;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ToneState {
    in_tone: bool,
    start_time: f64,
    sum_freq: f64,
    sum_level: f64,
    peak_level: f64,
    frames: u32,
}

impl ToneState {
    fn open(&mut self, freq: &FrequencyResult, level: &LevelResult, time: f64) {
        *self = Self {
            in_tone: true,
            start_time: time,
            sum_freq: freq.frequency as f64,
            sum_level: level.rms_db as f64,
            peak_level: level.peak_db as f64,
            frames: 1,
        };
    }

    fn accumulate(&mut self, freq: &FrequencyResult, level: &LevelResult) {
        self.sum_freq += freq.frequency as f64;
        self.sum_level += level.rms_db as f64;
        self.peak_level = self.peak_level.max(level.peak_db as f64);
        self.frames += 1;
    }
}

/// Streaming beep detector; one instance per verification pass
#[derive(Debug, Clone)]
pub struct ToneSegmenter {
    config: BeepConfig,
    state: ToneState,
    summary: BeepSummary,
}

impl ToneSegmenter {
    pub fn new(config: BeepConfig) -> Self {
        Self {
            config,
            state: ToneState::default(),
            summary: BeepSummary::default(),
        }
    }

    pub fn config(&self) -> &BeepConfig {
        &self.config
    }

    /// Whether a tone is currently open
    pub fn is_in_tone(&self) -> bool {
        self.state.in_tone
    }

    /// Tone classification of a single frame
    pub fn is_tone(&self, freq: &FrequencyResult, level: &LevelResult) -> bool {
        let on_target = self.config.target_freq_hz == 0.0
            || (freq.frequency - self.config.target_freq_hz).abs() <= self.config.freq_tolerance_hz;

        freq.valid && !level.is_silence && freq.magnitude_db > self.config.min_level_db && on_target
    }

    /// Feed one frame observed at `time_secs`.
    ///
    /// Returns the beep that this frame closed, if it was accepted.
    pub fn process(
        &mut self,
        freq: &FrequencyResult,
        level: &LevelResult,
        time_secs: f64,
    ) -> Option<BeepEvent> {
        let tone = self.is_tone(freq, level);

        match (self.state.in_tone, tone) {
            (false, true) => {
                self.state.open(freq, level, time_secs);
                None
            }
            (true, true) => {
                self.state.accumulate(freq, level);
                None
            }
            (true, false) => self.close(time_secs),
            (false, false) => None,
        }
    }

    /// Close a tone still open at the end of the stream
    pub fn finish(&mut self, end_time_secs: f64) -> Option<BeepEvent> {
        if self.state.in_tone {
            self.close(end_time_secs)
        } else {
            None
        }
    }

    fn close(&mut self, time_secs: f64) -> Option<BeepEvent> {
        let state = std::mem::take(&mut self.state);
        let duration = time_secs - state.start_time;

        if duration < self.config.min_duration_secs || duration > self.config.max_duration_secs {
            debug!(
                "Discarding tone at {:.3}s: {:.0}ms outside [{:.0}ms, {:.0}ms]",
                state.start_time,
                duration * 1000.0,
                self.config.min_duration_secs * 1000.0,
                self.config.max_duration_secs * 1000.0
            );
            return None;
        }

        let n = state.frames as f64;
        let event = BeepEvent {
            start_time_secs: state.start_time,
            end_time_secs: time_secs,
            duration_secs: duration,
            frequency_hz: state.sum_freq / n,
            avg_level_db: state.sum_level / n,
            peak_level_db: state.peak_level,
            index: self.summary.beeps.len(),
        };

        debug!(
            "Beep #{}: {:.3}s - {:.3}s @ {:.0} Hz, {:.1} dB",
            event.index + 1,
            event.start_time_secs,
            event.end_time_secs,
            event.frequency_hz,
            event.avg_level_db
        );

        if self.summary.first_beep_time_secs.is_none() {
            self.summary.first_beep_time_secs = Some(event.start_time_secs);
        }
        self.summary.total_beep_duration_secs += duration;
        self.summary.beeps.push(event);

        Some(event)
    }

    /// Everything emitted so far
    pub fn summary(&self) -> &BeepSummary {
        &self.summary
    }

    pub fn into_summary(self) -> BeepSummary {
        self.summary
    }

    /// Drop all events and any open tone; configuration is kept
    pub fn reset(&mut self) {
        self.state = ToneState::default();
        self.summary = BeepSummary::default();
    }
}

/// Segment a sequence of analysed frames, closing any trailing tone at `end_time_secs`
pub fn segment_frames(frames: &[FrameAnalysis], end_time_secs: f64, config: BeepConfig) -> BeepSummary {
    let mut segmenter = ToneSegmenter::new(config);
    for frame in frames {
        segmenter.process(&frame.frequency, &frame.level, frame.time_secs);
    }
    segmenter.finish(end_time_secs);
    segmenter.into_summary()
}
