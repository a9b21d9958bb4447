//! Sound-Effekte für Anrufe
//!
//! Die vier Effekte liegen als WAV-Dateien im Effekt-Verzeichnis und werden
//! beim Beitreten geladen, nach Mono konvertiert und auf 48kHz gebracht.

use super::stream::SAMPLE_RATE;
use super::AudioError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Die festen Sound-Effekte eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectSound {
    CallStart,
    CallEnd,
    ParticipantJoined,
    ParticipantLeft,
}

impl EffectSound {
    pub const ALL: [EffectSound; 4] = [
        EffectSound::CallStart,
        EffectSound::CallEnd,
        EffectSound::ParticipantJoined,
        EffectSound::ParticipantLeft,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectSound::CallStart => "call-start",
            EffectSound::CallEnd => "call-end",
            EffectSound::ParticipantJoined => "participant-joined",
            EffectSound::ParticipantLeft => "participant-left",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            EffectSound::CallStart => "qall_start.wav",
            EffectSound::CallEnd => "qall_end.wav",
            EffectSound::ParticipantJoined => "qall_joined.wav",
            EffectSound::ParticipantLeft => "qall_left.wav",
        }
    }
}

/// Dekodierter Effekt (Mono, 48kHz)
#[derive(Debug, Clone)]
pub struct EffectClip {
    samples: Arc<[f32]>,
}

impl EffectClip {
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Lädt eine WAV-Datei ohne den Runtime-Thread zu blockieren
    pub async fn load(path: PathBuf) -> Result<Self, AudioError> {
        tokio::task::spawn_blocking(move || Self::load_wav(&path))
            .await
            .map_err(|e| AudioError::Load(e.to_string()))?
    }

    fn load_wav(path: &Path) -> Result<Self, AudioError> {
        tracing::debug!("Loading effect clip {}", path.display());

        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::UnsupportedFormat(format!(
                        "{} bits per sample",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let mono = downmix(&samples, spec.channels)?;
        Ok(Self::from_samples(resample(&mono, spec.sample_rate, SAMPLE_RATE)))
    }
}

/// Mittelt alle Kanäle eines Frames zu einem Mono-Sample
fn downmix(samples: &[f32], channels: u16) -> Result<Vec<f32>, AudioError> {
    match channels {
        0 => Err(AudioError::UnsupportedFormat("0 channels".to_string())),
        1 => Ok(samples.to_vec()),
        n => Ok(samples
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect()),
    }
}

/// Einfaches Linear-Resampling
pub(crate) fn resample(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
