//! Call Engine Module - Sprachanrufe in Channels
//!
//! Dieses Modul verwaltet:
//! - Verbindungsaufbau und Teardown des Transports
//! - Den Beitritt zum Sprachkanal einer Session
//! - Mute / Unmute samt Session-State
//! - Die periodische Erkennung, wer gerade spricht

mod connection;
mod engine;
mod mute;
mod talking;
mod voice;

pub use engine::{CallEngine, CallEngineError, CallEvent, MixerSlot, NoopAnnouncer, SpeechAnnouncer};
pub use talking::{compute_talking_diff, TalkingStateDiff, TalkingStatePoller};
