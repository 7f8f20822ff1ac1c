//! # sipcheck analysis core
//!
//! Offline audio verification used by the scenario engine to turn a call
//! recording into evidence:
//!
//! - [`wav`] reads RIFF/WAVE containers (16-bit PCM, unknown chunks skipped)
//! - [`analyzer`] extracts the dominant frequency and the level of each frame
//! - [`segmenter`] groups tone frames into [`BeepEvent`]s
//!
//! ```rust,no_run
//! use sipcheck_analysis_core::{analyze_file, segment_frames, AnalyzerConfig, BeepConfig};
//!
//! # fn main() -> Result<(), sipcheck_analysis_core::AnalysisError> {
//! let analysis = analyze_file("recording.wav", &AnalyzerConfig::default())?;
//! let beeps = segment_frames(&analysis.frames, analysis.end_time_secs(), BeepConfig::default());
//! println!("{} beeps", beeps.count());
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod error;
pub mod segmenter;
pub mod types;
pub mod wav;

pub use analyzer::{
    analyze_file, analyze_samples, analyze_wav, Analyzer, AnalyzerConfig, FileAnalysis, FrameAnalysis,
    SILENCE_THRESHOLD_DB,
};
pub use error::{AnalysisError, AnalysisResult};
pub use segmenter::{segment_frames, BeepConfig, ToneSegmenter};
pub use types::{BeepEvent, BeepSummary, FrequencyResult, LevelResult};
pub use wav::{parse_wav, read_wav, WavAudio, WavFormat};
