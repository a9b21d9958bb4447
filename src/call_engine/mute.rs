//! Mute / Unmute des eigenen Mikrofons
//!
//! Der Mute-Status steckt an zwei Stellen: im Audio-Track des lokalen
//! Streams und als `micmuted` im Session-State, damit die anderen
//! Teilnehmer ihn sehen.

use super::engine::CallEngine;
use crate::session::{MIC_MUTED_STATE, QALL_SESSION_TYPE};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

impl CallEngine {
    /// Schaltet das Mikrofon stumm
    pub fn mute(&self) {
        self.set_mic_muted(true);
    }

    pub fn unmute(&self) {
        self.set_mic_muted(false);
    }

    /// Ohne lokalen Stream oder Session passiert nichts.
    fn set_mic_muted(&self, muted: bool) {
        let Some(stream) = self.local_stream() else {
            return;
        };
        let Some(session) = self.inner.store.current_session(QALL_SESSION_TYPE) else {
            return;
        };

        stream.set_audio_enabled(!muted);
        self.inner.is_mic_muted.store(muted, Ordering::SeqCst);

        let mut states: BTreeSet<String> = session.states;
        if muted {
            states.insert(MIC_MUTED_STATE.to_string());
        } else {
            states.remove(MIC_MUTED_STATE);
        }
        self.inner
            .store
            .modify_session_states(&session.session_id, states.into_iter().collect());

        tracing::info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }
}

// ============================================================================
// TESTS
// ============================================================================
