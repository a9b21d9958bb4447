//! Session Registry - "beitreten oder neu erstellen"
//!
//! Sucht für einen Channel die Session des gewünschten Typs. Existiert
//! keine, wird eine neue ID erzeugt. Die Registry sperrt nichts: laufen
//! zwei Clients gleichzeitig los, entscheidet das idempotente Add des
//! Stores.

use super::store::SessionStore;
use super::types::{ChannelId, ResolvedSession, SessionId, JOINED_STATE};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

/// Länge des zufälligen Suffixes einer neuen Session-ID
const SESSION_SUFFIX_LEN: usize = 16;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Already in a call session for channel {0}")]
    AlreadyInCall(ChannelId),
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Findet die passende Session des Channels oder registriert eine neue
    pub fn resolve_or_create_session(
        &self,
        channel_id: &ChannelId,
        session_type: &str,
    ) -> Result<ResolvedSession, SessionError> {
        if let Some(current) = self.store.current_channel() {
            if &current != channel_id {
                return Err(SessionError::AlreadyInCall(current));
            }
        }

        let existing = self
            .store
            .channel_sessions(channel_id)
            .into_iter()
            .find(|session| session.session_type == session_type);

        let is_new_session = existing.is_none();
        let session_id = existing
            .map(|session| session.session_id)
            .unwrap_or_else(|| new_session_id(session_type));

        // Auch bei bestehenden Sessions: der Store führt das Add zusammen
        self.store.add_session(
            channel_id,
            &session_id,
            session_type,
            vec![JOINED_STATE.to_string()],
        );

        tracing::info!(
            "Resolved {} session {} for channel {} (new: {})",
            session_type,
            session_id,
            channel_id,
            is_new_session
        );

        Ok(ResolvedSession {
            session_id,
            is_new_session,
        })
    }
}

/// Erzeugt `<session_type>-<zufall>`
fn new_session_id(session_type: &str) -> SessionId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(char::from)
        .collect();
    SessionId::new(format!("{}-{}", session_type, suffix))
}

// ============================================================================
// TESTS
// ============================================================================
