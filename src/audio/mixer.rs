//! Audio Mixer - Remote-Streams und Sound-Effekte
//!
//! Der Mixer hält pro Teilnehmer eine Quelle mit eigener Lautstärke, die
//! vier Effekt-Clips und einen Analyzer für das eigene Mikrofon
//! (Self-Monitoring, wird nicht abgespielt).

use super::analyzer::LevelAnalyzer;
use super::effects::{EffectClip, EffectSound};
use super::stream::MediaStream;
use crate::session::UserId;
use std::collections::HashMap;

/// Lautstärke neuer Quellen
const DEFAULT_SOURCE_VOLUME: f32 = 1.0;

struct StreamSource {
    analyzer: LevelAnalyzer,
    volume: f32,
}

struct EffectSource {
    clip: EffectClip,
    /// Aktuelle Abspielposition, None = gestoppt
    position: Option<usize>,
}

/// Mixer für einen aktiven Anruf
pub struct AudioMixer {
    master_volume: f32,
    muted: bool,
    sources: HashMap<UserId, StreamSource>,
    effects: HashMap<EffectSound, EffectSource>,
    local_monitor: Option<LevelAnalyzer>,
}

impl AudioMixer {
    pub fn new(master_volume: f32) -> Self {
        tracing::info!("AudioMixer initialized: master volume {:.2}", master_volume);

        Self {
            master_volume: master_volume.clamp(0.0, 1.0),
            muted: false,
            sources: HashMap::new(),
            effects: HashMap::new(),
            local_monitor: None,
        }
    }

    // ========================================================================
    // STREAM SOURCES
    // ========================================================================

    /// Fügt den Stream eines Teilnehmers hinzu (ersetzt einen vorhandenen)
    pub fn add_stream(&mut self, user_id: UserId, stream: MediaStream) {
        tracing::debug!("Mixer: attaching stream {} of {}", stream.id(), user_id);

        let volume = self
            .sources
            .get(&user_id)
            .map(|s| s.volume)
            .unwrap_or(DEFAULT_SOURCE_VOLUME);
        self.sources.insert(
            user_id,
            StreamSource {
                analyzer: LevelAnalyzer::new(stream),
                volume,
            },
        );
    }

    pub fn remove_stream(&mut self, user_id: &UserId) -> bool {
        self.sources.remove(user_id).is_some()
    }

    pub fn has_stream(&self, user_id: &UserId) -> bool {
        self.sources.contains_key(user_id)
    }

    /// Prüft ob genau dieser Stream für den Teilnehmer angehängt ist
    pub fn has_stream_instance(&self, user_id: &UserId, stream: &MediaStream) -> bool {
        self.sources
            .get(user_id)
            .is_some_and(|s| s.analyzer.stream().same_stream(stream))
    }

    pub fn stream_count(&self) -> usize {
        self.sources.len()
    }

    pub fn set_volume(&mut self, user_id: &UserId, volume: f32) -> bool {
        match self.sources.get_mut(user_id) {
            Some(source) => {
                source.volume = volume.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    pub fn volume(&self, user_id: &UserId) -> Option<f32> {
        self.sources.get(user_id).map(|s| s.volume)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Pegel eines Teilnehmers, 0.0 wenn unbekannt
    pub fn level_of(&self, user_id: &UserId) -> f32 {
        self.sources
            .get(user_id)
            .map(|s| s.analyzer.level())
            .unwrap_or(0.0)
    }

    // ========================================================================
    // LOCAL MONITOR
    // ========================================================================

    /// Hängt den Analyzer für das eigene Mikrofon an
    pub fn monitor_local(&mut self, stream: MediaStream) {
        self.local_monitor = Some(LevelAnalyzer::new(stream));
    }

    pub fn local_level(&self) -> Option<f32> {
        self.local_monitor.as_ref().map(|a| a.level())
    }

    // ========================================================================
    // EFFECTS
    // ========================================================================

    pub fn add_effect(&mut self, sound: EffectSound, clip: EffectClip) {
        self.effects.insert(
            sound,
            EffectSource {
                clip,
                position: None,
            },
        );
    }

    pub fn has_effect(&self, sound: EffectSound) -> bool {
        self.effects.contains_key(&sound)
    }

    /// Startet einen Effekt von vorne
    pub fn play_effect(&mut self, sound: EffectSound) {
        match self.effects.get_mut(&sound) {
            Some(effect) => {
                tracing::debug!("Mixer: playing {}", sound.name());
                effect.position = Some(0);
            }
            None => tracing::debug!("Mixer: effect {} not loaded", sound.name()),
        }
    }

    pub fn is_playing(&self, sound: EffectSound) -> bool {
        self.effects
            .get(&sound)
            .is_some_and(|e| e.position.is_some())
    }

    // ========================================================================
    // OUTPUT
    // ========================================================================

    pub fn mute_all(&mut self) {
        self.muted = true;
    }

    /// Mischt den nächsten Block aller Quellen in `out`
    ///
    /// Quellen werden auch im Mute-Zustand gelesen, damit sich keine Latenz
    /// in den Puffern aufstaut.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let mut scratch = vec![0.0f32; out.len()];
        let mut active = 0usize;

        for source in self.sources.values() {
            let read = source.analyzer.stream().pop_playback(&mut scratch);
            if read == 0 {
                continue;
            }
            active += 1;
            for (o, s) in out.iter_mut().zip(&scratch[..read]) {
                *o += s * source.volume;
            }
        }

        for effect in self.effects.values_mut() {
            let Some(position) = effect.position else {
                continue;
            };
            let remaining = &effect.clip.samples()[position.min(effect.clip.len())..];
            let count = remaining.len().min(out.len());
            if count > 0 {
                active += 1;
            }
            for (o, s) in out.iter_mut().zip(&remaining[..count]) {
                *o += s;
            }
            let next = position + count;
            effect.position = (next < effect.clip.len()).then_some(next);
        }

        let gain = if self.muted {
            0.0
        } else if active > 1 {
            self.master_volume / (active as f32).sqrt()
        } else {
            self.master_volume
        };

        for sample in out.iter_mut() {
            *sample = (*sample * gain).clamp(-1.0, 1.0);
        }
    }
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("master_volume", &self.master_volume)
            .field("muted", &self.muted)
            .field("streams", &self.sources.len())
            .field("effects", &self.effects.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_readding_stream_replaces() {
        let mut mixer = AudioMixer::new(1.0);
        let first = MediaStream::new("a");
        let second = MediaStream::new("b");

        mixer.add_stream(user("bob"), first.clone());
        mixer.set_volume(&user("bob"), 0.5);
        mixer.add_stream(user("bob"), second.clone());

        assert_eq!(mixer.stream_count(), 1);
        assert!(mixer.has_stream_instance(&user("bob"), &second));
        assert!(!mixer.has_stream_instance(&user("bob"), &first));
        assert_eq!(mixer.volume(&user("bob")), Some(0.5));
    }

    #[test]
    fn test_level_of_unknown_user_is_zero() {
        let mixer = AudioMixer::new(1.0);
        assert_eq!(mixer.level_of(&user("nobody")), 0.0);
        assert_eq!(mixer.local_level(), None);
    }

    #[test]
    fn test_level_of_attached_stream() {
        let mut mixer = AudioMixer::new(1.0);
        let stream = MediaStream::new("a");
        stream.push_samples(&[0.25; 2048]);
        mixer.add_stream(user("bob"), stream);

        assert!((mixer.level_of(&user("bob")) - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_render_applies_volume_and_mute() {
        let mut mixer = AudioMixer::new(1.0);
        let stream = MediaStream::new("a");
        mixer.add_stream(user("bob"), stream.clone());
        mixer.set_volume(&user("bob"), 0.5);

        stream.push_samples(&[0.8; 4]);
        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));

        mixer.mute_all();
        stream.push_samples(&[0.8; 4]);
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_effect_plays_once() {
        let mut mixer = AudioMixer::new(1.0);
        mixer.add_effect(EffectSound::CallStart, EffectClip::from_samples(vec![0.5; 6]));

        mixer.play_effect(EffectSound::CallStart);
        assert!(mixer.is_playing(EffectSound::CallStart));

        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.5; 4]);
        mixer.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert!(!mixer.is_playing(EffectSound::CallStart));
    }

    #[test]
    fn test_play_unloaded_effect_is_noop() {
        let mut mixer = AudioMixer::new(1.0);
        mixer.play_effect(EffectSound::CallEnd);
        assert!(!mixer.is_playing(EffectSound::CallEnd));
    }

    #[test]
    fn test_render_clamps_output() {
        let mut mixer = AudioMixer::new(1.0);
        let a = MediaStream::new("a");
        let b = MediaStream::new("b");
        mixer.add_stream(user("a"), a.clone());
        mixer.add_stream(user("b"), b.clone());
        a.push_samples(&[1.0; 2]);
        b.push_samples(&[1.0; 2]);

        let mut out = [0.0; 2];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s <= 1.0 && s > 0.0));
    }
}
