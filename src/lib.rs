//! Qall - Sprachanrufe in Chat-Channels
//!
//! Der Kern einer Voice-Call-Funktion für Gruppen-Chats:
//! - Eine Call-Session pro Channel, die alle Teilnehmer teilen
//! - P2P-Medientransport hinter einem Trait
//! - Mixer mit Sound-Effekten und Pegelmessung ("wer spricht gerade")
//! - Mute-Status, der über den Session-Store sichtbar ist

pub mod audio;
pub mod call_engine;
pub mod config;
pub mod device;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call_engine::{CallEngine, CallEngineError, CallEvent, NoopAnnouncer, SpeechAnnouncer};
pub use config::RtcSettings;
pub use session::{ChannelId, InMemorySessionStore, SessionId, SessionStore, UserId};

use tracing_subscriber::EnvFilter;

/// Initialisiert das Logging
///
/// `RUST_LOG` überschreibt den Default-Filter. Ein zweiter Aufruf ist harmlos.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("qall=debug"));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
