//! Test-Doubles für Transport, Geräte und Ansagen

use crate::audio::{MediaStream, SAMPLE_RATE};
use crate::call_engine::{CallEngine, SpeechAnnouncer};
use crate::config::RtcSettings;
use crate::device::{DeviceError, DeviceLayer};
use crate::session::{InMemorySessionStore, UserId};
use crate::transport::{
    ConnectionErrorReason, TransportClient, TransportConnector, TransportError, TransportEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Lässt gespawnte Tasks laufen
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Schreibt die vier Effekt-WAVs in ein Verzeichnis
pub fn write_effects(dir: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    for sound in crate::audio::EffectSound::ALL {
        let mut writer = hound::WavWriter::create(dir.join(sound.file_name()), spec).unwrap();
        for i in 0..480 {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct FakeTransport {
    identity: UserId,
    events: broadcast::Sender<TransportEvent>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    joined: Mutex<Vec<String>>,
    fail_connect: bool,
    fail_join: bool,
    error_on_connect: Option<ConnectionErrorReason>,
}

impl FakeTransport {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.joined.lock().clone()
    }
}

#[async_trait]
impl TransportClient for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        // Handshake klappt, der Fehler kommt erst danach über den Event-Strom
        if let Some(reason) = self.error_on_connect.clone() {
            self.emit(TransportEvent::ConnectionError { reason });
        }
        Ok(())
    }

    async fn join_room(&self, room: &str, _local_stream: MediaStream) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_join {
            return Err(TransportError::JoinFailed {
                room: room.to_string(),
                reason: "room closed".to_string(),
            });
        }
        self.joined.lock().push(room.to_string());
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    clients: Mutex<Vec<Arc<FakeTransport>>>,
    fail_connect: AtomicBool,
    fail_join: AtomicBool,
    error_on_connect: Mutex<Option<ConnectionErrorReason>>,
}

impl FakeConnector {
    pub fn created(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn last_client(&self) -> Arc<FakeTransport> {
        self.clients.lock().last().cloned().expect("no client created")
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    /// Neue Clients melden direkt nach dem Handshake einen Verbindungsfehler
    pub fn error_on_connect(&self, reason: ConnectionErrorReason) {
        *self.error_on_connect.lock() = Some(reason);
    }
}

impl TransportConnector for FakeConnector {
    fn create_client(&self, identity: &UserId) -> Arc<dyn TransportClient> {
        let (events, _) = broadcast::channel(32);
        let client = Arc::new(FakeTransport {
            identity: identity.clone(),
            events,
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            joined: Mutex::new(Vec::new()),
            fail_connect: self.fail_connect.load(Ordering::SeqCst),
            fail_join: self.fail_join.load(Ordering::SeqCst),
            error_on_connect: self.error_on_connect.lock().clone(),
        });
        self.clients.lock().push(Arc::clone(&client));
        client
    }
}

// ============================================================================
// DEVICES
// ============================================================================

pub struct FakeDevices {
    connector: Arc<FakeConnector>,
    require_grant: AtomicBool,
    granted: AtomicBool,
    fail_resolve: AtomicBool,
    deny_open: AtomicBool,
    drop_connection_on_open: AtomicBool,
    opened: Mutex<Vec<MediaStream>>,
}

impl FakeDevices {
    pub fn new(connector: Arc<FakeConnector>) -> Self {
        Self {
            connector,
            require_grant: AtomicBool::new(false),
            granted: AtomicBool::new(true),
            fail_resolve: AtomicBool::new(false),
            deny_open: AtomicBool::new(false),
            drop_connection_on_open: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn require_grant(&self, required: bool) {
        self.require_grant.store(required, Ordering::SeqCst);
    }

    pub fn grant(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn fail_resolve(&self, fail: bool) {
        self.fail_resolve.store(fail, Ordering::SeqCst);
    }

    /// Das Betriebssystem verweigert das Öffnen des Mikrofons
    pub fn deny_open(&self, deny: bool) {
        self.deny_open.store(deny, Ordering::SeqCst);
    }

    /// Die Verbindung bricht ab, während das Mikrofon geöffnet wird
    pub fn drop_connection_on_open(&self, drop: bool) {
        self.drop_connection_on_open.store(drop, Ordering::SeqCst);
    }

    /// Alle bisher geöffneten lokalen Streams
    pub fn opened(&self) -> Vec<MediaStream> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl DeviceLayer for FakeDevices {
    fn requires_microphone_grant(&self) -> bool {
        self.require_grant.load(Ordering::SeqCst)
    }

    async fn request_microphone(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn resolve_input_device(&self, preferred: Option<&str>) -> Result<String, DeviceError> {
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(DeviceError::NoInputDevice);
        }
        Ok(preferred.unwrap_or("default").to_string())
    }

    async fn open_input(&self, device_id: Option<&str>) -> Result<MediaStream, DeviceError> {
        if self.deny_open.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }

        let stream = MediaStream::new(format!("local-{}", device_id.unwrap_or("default")));
        self.opened.lock().push(stream.clone());

        if self.drop_connection_on_open.load(Ordering::SeqCst) {
            self.connector
                .last_client()
                .emit(TransportEvent::ConnectionError {
                    reason: ConnectionErrorReason::CredentialExpired,
                });
            settle().await;
        }
        Ok(stream)
    }
}

// ============================================================================
// ANNOUNCER
// ============================================================================

#[derive(Default)]
pub struct RecordingAnnouncer {
    stops: AtomicUsize,
}

impl RecordingAnnouncer {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechAnnouncer for RecordingAnnouncer {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct TestHarness {
    pub engine: CallEngine,
    pub connector: Arc<FakeConnector>,
    pub devices: Arc<FakeDevices>,
    pub announcer: Arc<RecordingAnnouncer>,
    pub store: InMemorySessionStore,
}

impl TestHarness {
    pub fn new(user: &str) -> Self {
        Self::build(InMemorySessionStore::new(user), Self::default_settings())
    }

    pub fn with_settings(user: &str, settings: RtcSettings) -> Self {
        Self::build(InMemorySessionStore::new(user), settings)
    }

    pub fn with_store(store: InMemorySessionStore) -> Self {
        Self::build(store, Self::default_settings())
    }

    /// Zweiter Client auf demselben Session-Store
    pub fn sharing_store(&self, user: &str) -> Self {
        Self::build(self.store.as_user(user), Self::default_settings())
    }

    /// Defaults ohne Effekt-Dateien
    pub fn default_settings() -> RtcSettings {
        RtcSettings {
            effects_dir: PathBuf::from("/nonexistent/qall-effects"),
            ..RtcSettings::default()
        }
    }

    fn build(store: InMemorySessionStore, settings: RtcSettings) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let devices = Arc::new(FakeDevices::new(Arc::clone(&connector)));
        let announcer = Arc::new(RecordingAnnouncer::default());

        let engine = CallEngine::with_announcer(
            Arc::new(store.clone()),
            connector.clone(),
            devices.clone(),
            settings,
            announcer.clone(),
        );

        Self {
            engine,
            connector,
            devices,
            announcer,
            store,
        }
    }
}
