//! Media Stream - ein Audio-Track mit PCM-Puffern
//!
//! Ein `MediaStream` ist ein günstig klonbares Handle. Produzenten
//! (Mikrofon, Transport) schreiben Samples hinein, der Mixer liest sie zur
//! Wiedergabe und der Level-Analyzer schaut auf ein gleitendes Fenster der
//! zuletzt geschriebenen Samples.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate aller Streams im Mixer
pub const SAMPLE_RATE: u32 = 48000;

/// Frame Size in Samples (20ms @ 48kHz = 960 samples)
pub const FRAME_SIZE: usize = 960;

/// Größe des Analyse-Fensters (~43ms)
pub const ANALYSIS_WINDOW: usize = 2048;

/// Buffer Size für den Wiedergabe-Puffer
const PLAYBACK_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// MEDIA STREAM
// ============================================================================

struct StreamInner {
    id: String,
    audio_enabled: AtomicBool,
    ended: AtomicBool,

    /// Letzte Samples für die Pegelmessung (wird überschrieben)
    analysis: Mutex<HeapRb<f32>>,

    /// Samples, die der Mixer noch abspielen muss
    playback: Mutex<HeapRb<f32>>,
}

/// Live-Audiostream (lokales Mikrofon oder Remote-Teilnehmer)
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                audio_enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
                analysis: Mutex::new(HeapRb::new(ANALYSIS_WINDOW)),
                playback: Mutex::new(HeapRb::new(PLAYBACK_BUFFER_SIZE)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Schreibt neue Samples in den Stream
    ///
    /// Ein deaktivierter Audio-Track liefert Stille, ein beendeter Stream
    /// verwirft alles.
    pub fn push_samples(&self, data: &[f32]) {
        if self.is_ended() {
            return;
        }
        let enabled = self.is_audio_enabled();

        {
            let mut analysis = self.inner.analysis.lock();
            for &sample in data {
                analysis.push_overwrite(if enabled { sample } else { 0.0 });
            }
        }

        let mut playback = self.inner.playback.lock();
        for &sample in data {
            // Voll: ältere Samples behalten, neue verwerfen
            let _ = playback.try_push(if enabled { sample } else { 0.0 });
        }
    }

    /// Aktiviert/deaktiviert den Audio-Track (Mute des lokalen Mikrofons)
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.inner.audio_enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!("Stream {} audio enabled: {}", self.id(), enabled);
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.inner.audio_enabled.load(Ordering::SeqCst)
    }

    /// Beendet den Stream und leert die Puffer
    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
        self.inner.analysis.lock().clear();
        self.inner.playback.lock().clear();
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Kopie des aktuellen Analyse-Fensters (älteste Samples zuerst)
    pub fn analysis_window(&self) -> Vec<f32> {
        self.inner.analysis.lock().iter().copied().collect()
    }

    /// Liest bis zu `out.len()` Samples zur Wiedergabe, gibt die Anzahl zurück
    pub fn pop_playback(&self, out: &mut [f32]) -> usize {
        self.inner.playback.lock().pop_slice(out)
    }

    /// Prüft ob beide Handles auf denselben Stream zeigen
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("audio_enabled", &self.is_audio_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
