//! Audio Module - Streams, Pegelmessung und Mixer
//!
//! Dieses Modul verwaltet:
//! - Live-Audiostreams mit PCM-Puffern
//! - Pegelmessung (RMS) und Quantisierung in Sprechstufen
//! - Den Mixer für Remote-Streams und Sound-Effekte

mod analyzer;
mod effects;
mod mixer;
mod stream;

use thiserror::Error;

pub use analyzer::{rms, talking_loudness_level, LevelAnalyzer, LOUDNESS_THRESHOLDS};
pub use effects::{EffectClip, EffectSound};
#[cfg(feature = "cpal")]
pub(crate) use effects::resample;
pub use mixer::AudioMixer;
pub use stream::{MediaStream, ANALYSIS_WINDOW, FRAME_SIZE, SAMPLE_RATE};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to load audio: {0}")]
    Load(String),
}
