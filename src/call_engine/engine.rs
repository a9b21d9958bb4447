//! Call Engine - Einstiegspunkt für die UI
//!
//! Die Engine besitzt die Verbindung, den Mixer, den lokalen Stream und
//! die Remote-Streams eines Anrufs. Es gibt keinen globalen Zustand: pro
//! Engine existiert höchstens eine Verbindung und ein Mixer, und jede neue
//! Verbindung schließt zuerst die alte.
//!
//! Die Operationen sind auf mehrere Dateien verteilt:
//! - `connection.rs`: Verbindungsaufbau und Teardown
//! - `voice.rs`: Geräte-Freigabe und Beitritt zum Sprachkanal
//! - `mute.rs`: Mute / Unmute

use super::talking::{TalkingStateDiff, TalkingStatePoller};
use crate::audio::{AudioMixer, MediaStream};
use crate::config::RtcSettings;
use crate::device::{DeviceError, DeviceLayer};
use crate::session::{
    CallSession, ChannelId, ResolvedSession, SessionError, SessionRegistry, SessionStore, UserId,
    QALL_SESSION_TYPE,
};
use crate::transport::{TransportClient, TransportConnector, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Geteilter Slot für den Mixer des aktiven Anrufs
pub type MixerSlot = Arc<Mutex<Option<AudioMixer>>>;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallEngineError {
    #[error("Application not initialized: local user unknown")]
    NotInitialized,

    #[error("Microphone not available or voice disabled")]
    PermissionDenied,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Connection lost while joining")]
    ConnectionLost,

    #[error("No connection after {0} attempts")]
    ConnectionUnavailable(u32),

    #[error("No active call session")]
    NoActiveSession,
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Events die von der CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Geänderte Sprechstufen (nur Deltas)
    TalkingStateChanged(TalkingStateDiff),
    ParticipantJoined(UserId),
    ParticipantLeft(UserId),
    /// Meldung, die dem Benutzer angezeigt werden soll
    Notice(String),
}

// ============================================================================
// SPEECH ANNOUNCER
// ============================================================================

/// Text-to-Speech-Ansagen, die beim Verlassen eines Anrufs enden müssen
pub trait SpeechAnnouncer: Send + Sync {
    fn stop(&self);
}

/// Announcer ohne Sprachausgabe
#[derive(Debug, Default)]
pub struct NoopAnnouncer;

impl SpeechAnnouncer for NoopAnnouncer {
    fn stop(&self) {}
}

// ============================================================================
// CALL ENGINE
// ============================================================================

/// Die aktuelle Transport-Verbindung samt ihrer Listener
pub(super) struct ActiveConnection {
    pub generation: u64,
    pub client: Arc<dyn TransportClient>,
    pub connection_listener: JoinHandle<()>,
    pub call_listener: Option<JoinHandle<()>>,
}

pub(super) struct EngineInner {
    pub store: Arc<dyn SessionStore>,
    pub registry: SessionRegistry,
    pub connector: Arc<dyn TransportConnector>,
    pub devices: Arc<dyn DeviceLayer>,
    pub announcer: Arc<dyn SpeechAnnouncer>,
    pub settings: RwLock<RtcSettings>,

    pub connection: Mutex<Option<ActiveConnection>>,
    pub mixer: MixerSlot,
    pub local_stream: Mutex<Option<MediaStream>>,
    pub remote_streams: RwLock<HashMap<UserId, MediaStream>>,
    pub is_mic_muted: AtomicBool,
    pub poller: TalkingStatePoller,

    pub event_tx: broadcast::Sender<CallEvent>,
    pub next_generation: AtomicU64,
}

/// Orchestriert Sprachanrufe in Channels
#[derive(Clone)]
pub struct CallEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl CallEngine {
    /// Erstellt eine neue CallEngine
    pub fn new(
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn TransportConnector>,
        devices: Arc<dyn DeviceLayer>,
        settings: RtcSettings,
    ) -> Self {
        Self::with_announcer(store, connector, devices, settings, Arc::new(NoopAnnouncer))
    }

    pub fn with_announcer(
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn TransportConnector>,
        devices: Arc<dyn DeviceLayer>,
        settings: RtcSettings,
        announcer: Arc<dyn SpeechAnnouncer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(EngineInner {
                registry: SessionRegistry::new(Arc::clone(&store)),
                store,
                connector,
                devices,
                announcer,
                settings: RwLock::new(settings),
                connection: Mutex::new(None),
                mixer: Arc::new(Mutex::new(None)),
                local_stream: Mutex::new(None),
                remote_streams: RwLock::new(HashMap::new()),
                is_mic_muted: AtomicBool::new(false),
                poller: TalkingStatePoller::new(),
                event_tx,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.event_tx.subscribe()
    }

    // ========================================================================
    // CALLS
    // ========================================================================

    /// Startet einen Anruf im Channel oder tritt dem laufenden bei
    pub async fn start_call(
        &self,
        channel_id: &ChannelId,
    ) -> Result<ResolvedSession, CallEngineError> {
        if !self.ensure_device_permission().await {
            return Err(CallEngineError::PermissionDenied);
        }

        let resolved = self
            .inner
            .registry
            .resolve_or_create_session(channel_id, QALL_SESSION_TYPE)?;

        if let Err(e) = self.join_voice_channel(resolved.session_id.as_str()).await {
            tracing::error!("Failed to join voice channel {}: {}", channel_id, e);
            self.close_connection();
            self.inner.store.remove_session(&resolved.session_id);
            return Err(e);
        }

        Ok(resolved)
    }

    /// Beendet den aktuellen Anruf
    pub fn end_call(&self) -> Result<(), CallEngineError> {
        let session = self
            .inner
            .store
            .current_session(QALL_SESSION_TYPE)
            .ok_or(CallEngineError::NoActiveSession)?;

        tracing::info!("Ending call {}", session.session_id);
        self.close_connection();
        self.inner.store.remove_session(&session.session_id);
        self.inner.announcer.stop();
        Ok(())
    }

    // ========================================================================
    // STATE
    // ========================================================================

    /// Aktuelle Call-Session des lokalen Benutzers
    pub fn current_session(&self) -> Option<CallSession> {
        self.inner.store.current_session(QALL_SESSION_TYPE)
    }

    /// Teilnehmer der aktuellen Session
    pub fn participants(&self) -> Vec<UserId> {
        self.current_session()
            .map(|s| self.inner.store.session_participants(&s.session_id))
            .unwrap_or_default()
    }

    /// Zuletzt veröffentlichte Sprechstufen aller Teilnehmer
    pub fn talking_levels(&self) -> HashMap<UserId, u8> {
        self.inner.poller.levels()
    }

    pub fn has_connection(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    pub fn has_mixer(&self) -> bool {
        self.inner.mixer.lock().is_some()
    }

    pub fn is_mic_muted(&self) -> bool {
        self.inner.is_mic_muted.load(Ordering::SeqCst)
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.inner.local_stream.lock().clone()
    }

    /// Teilnehmer, von denen ein Stream empfangen wurde
    pub fn remote_participants(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.inner.remote_streams.read().keys().cloned().collect();
        users.sort();
        users
    }

    /// Ist der Stream des Teilnehmers im Mixer angehängt?
    pub fn is_stream_attached(&self, user_id: &UserId) -> bool {
        self.inner
            .mixer
            .lock()
            .as_ref()
            .is_some_and(|m| m.has_stream(user_id))
    }

    pub fn settings(&self) -> RtcSettings {
        self.inner.settings.read().clone()
    }

    // ========================================================================
    // VOLUME
    // ========================================================================

    pub fn participant_volume(&self, user_id: &UserId) -> Option<f32> {
        self.inner
            .mixer
            .lock()
            .as_ref()
            .and_then(|m| m.volume(user_id))
    }

    pub fn set_participant_volume(&self, user_id: &UserId, volume: f32) -> bool {
        self.inner
            .mixer
            .lock()
            .as_mut()
            .is_some_and(|m| m.set_volume(user_id, volume))
    }

    /// Setzt die Gesamtlautstärke (Einstellung und laufender Mixer)
    pub fn set_master_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.inner.settings.write().master_volume = volume;
        if let Some(mixer) = self.inner.mixer.lock().as_mut() {
            mixer.set_master_volume(volume);
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Zeigt dem Benutzer eine Meldung an
    pub(super) fn notify(&self, message: &str) {
        let _ = self
            .inner
            .event_tx
            .send(CallEvent::Notice(message.to_string()));
    }

    pub(super) fn emit(&self, event: CallEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("has_connection", &self.has_connection())
            .field("has_mixer", &self.has_mixer())
            .field("is_mic_muted", &self.is_mic_muted())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
