//! WAV recording input
//!
//! Container parsing is left to `hound`; this module only narrows what comes
//! out of it to the 16-bit integer PCM the analyzer works on, keeping the
//! first channel.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};

/// Format of a decoded recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl From<hound::WavSpec> for WavFormat {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

/// Decoded recording, reduced to its first channel
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub format: WavFormat,
    pub samples: Vec<i16>,
}

impl WavAudio {
    /// Length of the payload in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.format.sample_rate as f64
    }
}

/// Read and decode a WAV file from disk
pub fn read_wav(path: impl AsRef<Path>) -> AnalysisResult<WavAudio> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| AnalysisError::io(path, e))?;
    parse_wav(&bytes)
}

/// Decode a WAV file held in memory
pub fn parse_wav(bytes: &[u8]) -> AnalysisResult<WavAudio> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int {
        return Err(AnalysisError::unsupported("floating-point samples (only 16-bit PCM is decoded)"));
    }
    if spec.bits_per_sample != 16 {
        return Err(AnalysisError::unsupported(format!(
            "{} bits per sample (only 16-bit PCM is decoded)",
            spec.bits_per_sample
        )));
    }
    if spec.sample_rate == 0 {
        return Err(AnalysisError::unsupported("sample rate is zero"));
    }

    let declared = reader.len() as usize;
    // Recorders that were killed mid-write leave a stale data size behind
    let interleaved: Vec<i16> = reader
        .samples::<i16>()
        .take_while(Result::is_ok)
        .filter_map(Result::ok)
        .collect();
    if interleaved.len() < declared {
        warn!(
            "WAV data chunk is truncated: {} of {} samples present",
            interleaved.len(),
            declared
        );
    }

    let channels = spec.channels as usize;
    let samples: Vec<i16> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame[0])
        .collect();
    debug!(
        "Decoded {} samples at {} Hz ({} channels)",
        samples.len(),
        spec.sample_rate,
        spec.channels
    );

    Ok(WavAudio {
        format: spec.into(),
        samples,
    })
}
