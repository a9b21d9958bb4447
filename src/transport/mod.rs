//! Transport Module - Schnittstelle zum P2P-Medientransport
//!
//! Der eigentliche Transport (Signaling, ICE, Codecs) ist eine externe
//! Komponente. Die Call-Engine kennt nur:
//! - Verbinden / Trennen unter der eigenen User-ID
//! - Einem Raum mit dem lokalen Stream beitreten
//! - Einen Event-Strom mit Verbindungs- und Teilnehmer-Events

use crate::audio::MediaStream;
use crate::session::UserId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Failed to join room {room}: {reason}")]
    JoinFailed { room: String, reason: String },
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Grund eines Verbindungsfehlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionErrorReason {
    /// Die eigene ID ist bereits von einer anderen Verbindung belegt
    IdentityInUse,
    /// Credentials abgelaufen (z.B. mitten im Anruf)
    CredentialExpired,
    Other(String),
}

impl std::fmt::Display for ConnectionErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionErrorReason::IdentityInUse => f.write_str("identity already in use"),
            ConnectionErrorReason::CredentialExpired => f.write_str("credential expired"),
            ConnectionErrorReason::Other(reason) => f.write_str(reason),
        }
    }
}

/// Events die vom Transport ausgelöst werden
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionError { reason: ConnectionErrorReason },
    ConnectionClosed,
    ParticipantJoined { participant: UserId },
    ParticipantLeft { participant: UserId },
    StreamReceived { participant: UserId, stream: MediaStream },
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Eine Transport-Verbindung, gebunden an die lokale User-ID
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Baut die Verbindung auf und wartet auf den Handshake
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tritt einem Medienraum bei und veröffentlicht den lokalen Stream
    async fn join_room(&self, room: &str, local_stream: MediaStream)
        -> Result<(), TransportError>;

    /// Trennt die Verbindung
    fn disconnect(&self);

    /// Gibt einen Event-Receiver zurück
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Erzeugt neue Transport-Verbindungen
pub trait TransportConnector: Send + Sync {
    fn create_client(&self, identity: &UserId) -> Arc<dyn TransportClient>;
}
