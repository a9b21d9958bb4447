//! Connection Lifecycle - Aufbau und Teardown der Transport-Verbindung
//!
//! `close_connection` ist der einzige Teardown-Pfad. Jeder Fehler und
//! jedes Verlassen eines Anrufs läuft genau einmal hier durch.

use super::engine::{ActiveConnection, CallEngine, CallEngineError, EngineInner};
use crate::audio::EffectSound;
use crate::session::QALL_SESSION_TYPE;
use crate::transport::{ConnectionErrorReason, TransportClient, TransportEvent};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

impl CallEngine {
    /// Baut eine neue Verbindung unter der eigenen User-ID auf
    ///
    /// Eine bestehende Verbindung wird vorher geschlossen.
    pub async fn establish_connection(&self) -> Result<(), CallEngineError> {
        let identity = self
            .inner
            .store
            .local_user()
            .ok_or(CallEngineError::NotInitialized)?;

        if self.has_connection() {
            tracing::info!("Replacing existing connection");
            self.close_connection();
        }

        let client = self.inner.connector.create_client(&identity);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let connection_listener = spawn_connection_listener(&self.inner, client.subscribe());

        *self.inner.connection.lock() = Some(ActiveConnection {
            generation,
            client: Arc::clone(&client),
            connection_listener,
            call_listener: None,
        });

        tracing::info!("Connecting as {}", identity);

        if let Err(e) = client.connect().await {
            tracing::error!("Failed to establish connection: {}", e);
            // Nur aufräumen, wenn inzwischen keine andere Verbindung aktiv ist
            if self.connection_generation() == Some(generation) {
                self.close_connection();
            }
            return Err(e.into());
        }

        tracing::info!("Connection established");
        Ok(())
    }

    /// Schließt die Verbindung und räumt den Anruf-Zustand ab
    ///
    /// Ohne Verbindung passiert nichts.
    pub fn close_connection(&self) {
        let Some(connection) = self.inner.connection.lock().take() else {
            return;
        };

        {
            let mut mixer = self.inner.mixer.lock();
            if let Some(mixer) = mixer.as_mut() {
                mixer.play_effect(EffectSound::CallEnd);
                mixer.mute_all();
                // Poller vor dem Mixer stoppen
                self.inner.poller.stop();
            }
        }

        connection.client.disconnect();
        connection.connection_listener.abort();
        if let Some(listener) = connection.call_listener {
            listener.abort();
        }

        *self.inner.mixer.lock() = None;
        if let Some(stream) = self.inner.local_stream.lock().take() {
            stream.stop();
        }
        self.inner.remote_streams.write().clear();

        tracing::info!("Connection closed");
    }

    /// Reagiert auf einen Verbindungsfehler des Transports
    ///
    /// Läuft im Connection-Listener. Zwischen Teardown und Session-Entfernung
    /// darf kein `.await` liegen, da der Teardown den Listener abbricht.
    fn handle_connection_error(&self, reason: &ConnectionErrorReason) {
        tracing::error!("Failed to establish connection: {}", reason);
        match reason {
            ConnectionErrorReason::IdentityInUse => tracing::error!("Peer id already in use"),
            ConnectionErrorReason::CredentialExpired => {
                tracing::error!("Transport credentials expired")
            }
            ConnectionErrorReason::Other(_) => {}
        }
        self.notify("Connection failed");

        self.close_connection();

        // z.B. Credentials mitten im Anruf abgelaufen: Session verlassen
        if let Some(session) = self.inner.store.current_session(QALL_SESSION_TYPE) {
            tracing::info!("Leaving session {} after connection error", session.session_id);
            self.inner.store.remove_session(&session.session_id);
            self.inner.announcer.stop();
        }
    }

    pub(super) fn connection_generation(&self) -> Option<u64> {
        self.inner.connection.lock().as_ref().map(|c| c.generation)
    }

    pub(super) fn current_client(&self) -> Option<(u64, Arc<dyn TransportClient>)> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|c| (c.generation, Arc::clone(&c.client)))
    }

    /// Registriert den Listener eines Anrufs an der Verbindung
    ///
    /// Ein vorhandener Listener wird ersetzt, damit wiederholte Beitritte
    /// keine doppelten Listener erzeugen.
    pub(super) fn attach_call_listener(
        &self,
        generation: u64,
        listener: JoinHandle<()>,
    ) -> Result<(), CallEngineError> {
        let mut connection = self.inner.connection.lock();
        match connection.as_mut() {
            Some(active) if active.generation == generation => {
                if let Some(previous) = active.call_listener.replace(listener) {
                    previous.abort();
                }
                Ok(())
            }
            _ => {
                listener.abort();
                Err(CallEngineError::ConnectionLost)
            }
        }
    }
}

/// Listener für die Lebensdauer einer Verbindung
fn spawn_connection_listener(
    inner: &Arc<EngineInner>,
    mut events: broadcast::Receiver<TransportEvent>,
) -> JoinHandle<()> {
    let weak: Weak<EngineInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TransportEvent::ConnectionError { reason }) => {
                    if let Some(inner) = weak.upgrade() {
                        CallEngine { inner }.handle_connection_error(&reason);
                    }
                    break;
                }
                Ok(TransportEvent::ConnectionClosed) => {
                    tracing::info!("Connection closed by transport");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Connection listener lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::CallEvent;
    use crate::session::{ChannelId, InMemorySessionStore, SessionStore};
    use crate::testing::{settle, TestHarness};
    use crate::transport::TransportError;

    #[tokio::test(start_paused = true)]
    async fn test_close_without_connection_is_noop() {
        let harness = TestHarness::new("alice");

        harness.engine.close_connection();
        harness.engine.close_connection();

        assert!(!harness.engine.has_connection());
        assert!(!harness.engine.has_mixer());
        assert_eq!(harness.connector.created(), 0);
        assert_eq!(harness.announcer.stops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_without_identity_fails() {
        let harness = TestHarness::with_store(InMemorySessionStore::default());

        let result = harness.engine.establish_connection().await;
        assert!(matches!(result, Err(CallEngineError::NotInitialized)));
        assert_eq!(harness.connector.created(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_establish_twice_replaces_connection() {
        let harness = TestHarness::new("alice");

        harness.engine.establish_connection().await.unwrap();
        let first = harness.connector.last_client();
        harness.engine.establish_connection().await.unwrap();
        let second = harness.connector.last_client();

        assert_eq!(harness.connector.created(), 2);
        assert_eq!(first.disconnects(), 1);
        assert_eq!(second.disconnects(), 0);
        assert!(second.is_connected());
        assert_eq!(second.identity().as_str(), "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_leaves_no_connection() {
        let harness = TestHarness::new("alice");
        harness.connector.fail_connect(true);

        let result = harness.engine.establish_connection().await;
        assert!(matches!(
            result,
            Err(CallEngineError::Transport(TransportError::ConnectionFailed(_)))
        ));
        assert!(!harness.engine.has_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_in_use_during_call_leaves_session() {
        let harness = TestHarness::new("alice");
        let mut events = harness.engine.subscribe();
        harness.engine.start_call(&ChannelId::new("c1")).await.unwrap();
        assert!(harness.store.current_session(QALL_SESSION_TYPE).is_some());

        harness
            .connector
            .last_client()
            .emit(TransportEvent::ConnectionError {
                reason: ConnectionErrorReason::IdentityInUse,
            });
        settle().await;

        assert!(harness.store.current_session(QALL_SESSION_TYPE).is_none());
        assert!(!harness.engine.has_connection());
        assert!(!harness.engine.has_mixer());
        assert!(harness.engine.local_stream().is_none());
        assert_eq!(harness.announcer.stops(), 1);
        assert_eq!(harness.connector.last_client().disconnects(), 1);

        let mut notices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CallEvent::Notice(message) = event {
                notices.push(message);
            }
        }
        assert_eq!(notices, vec!["Connection failed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_credentials_mid_call_leave_session() {
        let harness = TestHarness::new("alice");
        harness.engine.start_call(&ChannelId::new("c1")).await.unwrap();

        harness
            .connector
            .last_client()
            .emit(TransportEvent::ConnectionError {
                reason: ConnectionErrorReason::CredentialExpired,
            });
        settle().await;

        assert!(harness.engine.current_session().is_none());
        assert!(!harness.engine.has_connection());
        assert_eq!(harness.announcer.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_without_session() {
        let harness = TestHarness::new("alice");
        harness.engine.establish_connection().await.unwrap();

        harness
            .connector
            .last_client()
            .emit(TransportEvent::ConnectionError {
                reason: ConnectionErrorReason::Other("network".to_string()),
            });
        settle().await;

        assert!(!harness.engine.has_connection());
        assert_eq!(harness.announcer.stops(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_closed_event_keeps_state() {
        let harness = TestHarness::new("alice");
        harness.engine.start_call(&ChannelId::new("c1")).await.unwrap();

        harness
            .connector
            .last_client()
            .emit(TransportEvent::ConnectionClosed);
        settle().await;

        assert!(harness.engine.has_connection());
        assert!(harness.engine.has_mixer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_poller_and_clears_streams() {
        let harness = TestHarness::new("alice");
        harness.engine.start_call(&ChannelId::new("c1")).await.unwrap();
        assert!(harness.engine.inner.poller.is_running());

        let local = harness.engine.local_stream().unwrap();
        harness.engine.close_connection();

        assert!(!harness.engine.inner.poller.is_running());
        assert!(local.is_ended());
        assert!(harness.engine.remote_participants().is_empty());
    }
}
