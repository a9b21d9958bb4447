//! Voice Channel - Geräte-Freigabe und Beitritt zum Sprachkanal

use super::engine::{CallEngine, CallEngineError, CallEvent, EngineInner};
use super::talking::TalkingSource;
use crate::audio::{AudioMixer, EffectClip, EffectSound, MediaStream};
use crate::config::{DEFAULT_PARTICIPANT_VOLUME, MAX_CONNECT_ATTEMPTS, STREAM_SETTLE_DELAY};
use crate::session::UserId;
use crate::transport::{TransportClient, TransportEvent};
use futures::future::join_all;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

impl CallEngine {
    /// Prüft ob das Mikrofon benutzt werden darf
    ///
    /// Ein aufgelöstes Eingabegerät wird in den Einstellungen gespeichert.
    pub async fn ensure_device_permission(&self) -> bool {
        if !self.inner.settings.read().is_enabled {
            tracing::info!("Voice is disabled in settings");
            return false;
        }

        let devices = &self.inner.devices;
        if devices.requires_microphone_grant() && !devices.request_microphone().await {
            tracing::warn!("Microphone permission denied");
            self.notify("Microphone access was denied");
            return false;
        }

        let preferred = self.inner.settings.read().audio_input_device_id.clone();
        match devices.resolve_input_device(preferred.as_deref()).await {
            Ok(device_id) => {
                tracing::debug!("Using audio input device {}", device_id);
                self.inner.settings.write().audio_input_device_id = Some(device_id);
                true
            }
            Err(e) => {
                tracing::error!("Failed to resolve audio input device: {}", e);
                self.notify("No microphone available");
                false
            }
        }
    }

    /// Tritt dem Medienraum einer Session bei
    ///
    /// Reißt ein Verbindungsfehler die Verbindung während des Beitritts ab,
    /// endet der Beitritt mit `ConnectionLost` und hinterlässt weder Mixer
    /// noch Poller noch lokalen Stream.
    pub async fn join_voice_channel(&self, room: &str) -> Result<(), CallEngineError> {
        let (generation, client) = self.connect_with_retry().await?;

        let mixer = self.build_mixer().await;
        *self.inner.mixer.lock() = Some(mixer);

        self.inner.poller.start(TalkingSource {
            mixer: Arc::clone(&self.inner.mixer),
            store: Arc::clone(&self.inner.store),
            events: self.inner.event_tx.clone(),
        });

        let listener = spawn_call_listener(&self.inner, client.subscribe());
        if let Err(e) = self.attach_call_listener(generation, listener) {
            self.abandon_join(None);
            return Err(e);
        }

        let device_id = self.inner.settings.read().audio_input_device_id.clone();
        let local = self.inner.devices.open_input(device_id.as_deref()).await?;
        self.set_local_stream(local.clone());
        self.ensure_join_current(generation, &local)?;

        // Mute-Status bleibt über Anrufe hinweg erhalten
        if self.is_mic_muted() {
            self.mute();
        } else {
            self.unmute();
        }

        tracing::info!("Joining room {}", room);
        if let Err(e) = client.join_room(room, local.clone()).await {
            tracing::error!("Failed to join room {}: {}", room, e);
            if self.connection_generation() == Some(generation) {
                self.close_connection();
            } else {
                self.abandon_join(Some(&local));
            }
            return Err(e.into());
        }
        self.ensure_join_current(generation, &local)?;

        if let Some(mixer) = self.inner.mixer.lock().as_mut() {
            mixer.play_effect(EffectSound::CallStart);
        }
        tracing::info!("Joined room {}", room);
        Ok(())
    }

    /// Prüft nach einem `.await`, ob die Verbindung des Beitritts noch steht
    fn ensure_join_current(
        &self,
        generation: u64,
        local: &MediaStream,
    ) -> Result<(), CallEngineError> {
        if self.connection_generation() == Some(generation) {
            return Ok(());
        }
        tracing::warn!("Connection lost while joining");
        self.abandon_join(Some(local));
        Err(CallEngineError::ConnectionLost)
    }

    /// Räumt einen abgebrochenen Beitritt auf
    ///
    /// Der eigene lokale Stream wird immer beendet. Mixer und Poller nur,
    /// wenn keine neuere Verbindung sie inzwischen übernommen hat.
    fn abandon_join(&self, local: Option<&MediaStream>) {
        if let Some(local) = local {
            local.stop();
            let mut current = self.inner.local_stream.lock();
            if current.as_ref().is_some_and(|s| s.same_stream(local)) {
                *current = None;
            }
        }

        if self.has_connection() {
            return;
        }
        self.inner.poller.stop();
        *self.inner.mixer.lock() = None;
        if let Some(stream) = self.inner.local_stream.lock().take() {
            stream.stop();
        }
    }

    /// Verbindet bis eine Verbindung steht (höchstens `MAX_CONNECT_ATTEMPTS` Versuche)
    async fn connect_with_retry(&self) -> Result<(u64, Arc<dyn TransportClient>), CallEngineError> {
        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            if let Some(current) = self.current_client() {
                return Ok(current);
            }
            match self.establish_connection().await {
                Err(CallEngineError::NotInitialized) => {
                    return Err(CallEngineError::NotInitialized);
                }
                Err(e) => tracing::warn!("Connection attempt {} failed: {}", attempt, e),
                Ok(()) => {}
            }
        }

        self.current_client()
            .ok_or(CallEngineError::ConnectionUnavailable(MAX_CONNECT_ATTEMPTS))
    }

    /// Erstellt den Mixer, lädt die Effekte und hängt bekannte Streams an
    async fn build_mixer(&self) -> AudioMixer {
        let (master_volume, paths) = {
            let settings = self.inner.settings.read();
            let paths: Vec<_> = EffectSound::ALL
                .iter()
                .map(|sound| (*sound, settings.effect_path(sound.file_name())))
                .collect();
            (settings.master_volume, paths)
        };

        let mut mixer = AudioMixer::new(master_volume);

        let loads = paths.into_iter().map(|(sound, path)| async move {
            (sound, EffectClip::load(path).await)
        });
        for (sound, result) in join_all(loads).await {
            match result {
                Ok(clip) => mixer.add_effect(sound, clip),
                Err(e) => tracing::warn!("Failed to load effect {}: {}", sound.name(), e),
            }
        }

        let streams: Vec<(UserId, MediaStream)> = self
            .inner
            .remote_streams
            .read()
            .iter()
            .map(|(user, stream)| (user.clone(), stream.clone()))
            .collect();
        for (user, stream) in streams {
            mixer.add_stream(user.clone(), stream);
            mixer.set_volume(&user, DEFAULT_PARTICIPANT_VOLUME);
        }

        mixer
    }

    fn set_local_stream(&self, stream: MediaStream) {
        if let Some(mixer) = self.inner.mixer.lock().as_mut() {
            mixer.monitor_local(stream.clone());
        }
        if let Some(previous) = self.inner.local_stream.lock().replace(stream) {
            previous.stop();
        }
    }

    fn handle_call_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ParticipantJoined { participant } => {
                tracing::info!("Participant joined: {}", participant);
                self.play_effect(EffectSound::ParticipantJoined);
                self.emit(CallEvent::ParticipantJoined(participant));
            }
            TransportEvent::ParticipantLeft { participant } => {
                tracing::info!("Participant left: {}", participant);
                self.inner.remote_streams.write().remove(&participant);
                if let Some(mixer) = self.inner.mixer.lock().as_mut() {
                    mixer.remove_stream(&participant);
                    mixer.play_effect(EffectSound::ParticipantLeft);
                }
                self.emit(CallEvent::ParticipantLeft(participant));
            }
            TransportEvent::StreamReceived {
                participant,
                stream,
            } => {
                if self.inner.store.local_user().as_ref() == Some(&participant) {
                    tracing::debug!("Ignoring own stream");
                    return;
                }
                tracing::debug!("Stream {} received from {}", stream.id(), participant);
                self.inner
                    .remote_streams
                    .write()
                    .insert(participant.clone(), stream.clone());
                spawn_delayed_attach(&self.inner, participant, stream);
            }
            TransportEvent::ConnectionError { .. } | TransportEvent::ConnectionClosed => {}
        }
    }

    fn play_effect(&self, sound: EffectSound) {
        if let Some(mixer) = self.inner.mixer.lock().as_mut() {
            mixer.play_effect(sound);
        }
    }
}

/// Listener für die Dauer eines Anrufs
fn spawn_call_listener(
    inner: &Arc<EngineInner>,
    mut events: broadcast::Receiver<TransportEvent>,
) -> JoinHandle<()> {
    let weak: Weak<EngineInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match weak.upgrade() {
                    Some(inner) => CallEngine { inner }.handle_call_event(event),
                    None => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Call listener lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Hängt einen empfangenen Stream nach einer kurzen Wartezeit an den Mixer
///
/// Gehört der Stream dann nicht mehr dem Teilnehmer, wird nichts angehängt.
fn spawn_delayed_attach(inner: &Arc<EngineInner>, participant: UserId, stream: MediaStream) {
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        tokio::time::sleep(STREAM_SETTLE_DELAY).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let still_owned = inner
            .remote_streams
            .read()
            .get(&participant)
            .is_some_and(|current| current.same_stream(&stream));
        if !still_owned {
            tracing::debug!("Stream of {} is gone, not attaching", participant);
            return;
        }

        match inner.mixer.lock().as_mut() {
            Some(mixer) => {
                mixer.add_stream(participant.clone(), stream);
                mixer.set_volume(&participant, DEFAULT_PARTICIPANT_VOLUME);
                tracing::info!("Attached stream of {}", participant);
            }
            None => tracing::debug!("No mixer, stream of {} stays pending", participant),
        };
    });
}

// ============================================================================
// TESTS
// ============================================================================
