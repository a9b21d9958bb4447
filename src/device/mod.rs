//! Device Module - Mikrofon-Freigabe und Eingabegeräte
//!
//! Die Call-Engine braucht vom Gerät nur drei Dinge:
//! - Eine (plattformabhängige) Mikrofon-Freigabe
//! - Eine aufgelöste Eingabegerät-ID
//! - Einen lokalen Audiostream für diese ID
//!
//! Mit dem Feature `cpal` steht eine echte Implementierung zur Verfügung.

#[cfg(feature = "cpal")]
mod cpal_input;

#[cfg(feature = "cpal")]
pub use cpal_input::CpalDevices;

use crate::audio::MediaStream;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Audio input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// DEVICE LAYER
// ============================================================================

#[async_trait]
pub trait DeviceLayer: Send + Sync {
    /// Verlangt die Plattform eine explizite Mikrofon-Freigabe?
    fn requires_microphone_grant(&self) -> bool {
        false
    }

    /// Fragt die Mikrofon-Freigabe beim Betriebssystem an
    async fn request_microphone(&self) -> bool {
        true
    }

    /// Löst die ID des Eingabegeräts auf
    ///
    /// Eine gespeicherte ID wird bevorzugt, solange das Gerät existiert.
    async fn resolve_input_device(&self, preferred: Option<&str>) -> Result<String, DeviceError>;

    /// Öffnet das Mikrofon und liefert den lokalen Stream
    async fn open_input(&self, device_id: Option<&str>) -> Result<MediaStream, DeviceError>;
}
