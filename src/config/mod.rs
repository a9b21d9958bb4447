//! Config Module - Einstellungen und Konstanten der Call-Engine

mod settings;

pub use settings::{RtcSettings, SettingsError, ENV_EFFECTS_DIR, ENV_RTC_DISABLED};

use std::time::Duration;

/// Updates des Sprechstatus pro Sekunde
pub const TALKING_STATE_UPDATE_FPS: u32 = 30;

/// Wartezeit bis ein empfangener Stream stabil genug zum Anhängen ist
pub const STREAM_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Lautstärke eines neu angehängten Teilnehmers
pub const DEFAULT_PARTICIPANT_VOLUME: f32 = 0.5;

/// Maximale Verbindungsversuche beim Beitreten
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
