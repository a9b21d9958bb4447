//! Session Store
//!
//! Der Store hält alle bekannten Call-Sessions und deren Teilnehmer.
//! Im Client wird er vom Server synchronisiert; die Call-Engine liest
//! nur daraus und fordert Änderungen an (add / modify / remove).

use super::types::{CallSession, ChannelId, SessionId, UserId, MIC_MUTED_STATE};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Zugriff auf den externen Session-/Entity-Store
///
/// Alle Methoden handeln im Namen des lokalen Benutzers. `add_session`
/// muss idempotent sein: dieselbe Session zweimal hinzuzufügen ist erlaubt.
pub trait SessionStore: Send + Sync {
    /// ID des eingeloggten Benutzers (None solange die App nicht initialisiert ist)
    fn local_user(&self) -> Option<UserId>;

    fn add_session(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        session_type: &str,
        states: Vec<String>,
    );

    fn modify_session_states(&self, session_id: &SessionId, states: Vec<String>);

    fn remove_session(&self, session_id: &SessionId);

    /// Alle Sessions eines Channels
    fn channel_sessions(&self, channel_id: &ChannelId) -> Vec<CallSession>;

    /// Channel, in dem der lokale Benutzer gerade in einer Session ist
    fn current_channel(&self) -> Option<ChannelId>;

    /// Aktuelle Session des lokalen Benutzers mit dem angegebenen Typ
    fn current_session(&self, session_type: &str) -> Option<CallSession>;

    fn session_participants(&self, session_id: &SessionId) -> Vec<UserId>;

    /// Teilnehmer, die ihr Mikrofon stummgeschaltet haben
    fn muted_participants(&self, session_id: &SessionId) -> HashSet<UserId>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug)]
struct SessionEntry {
    session_type: String,
    channel_id: ChannelId,
    participants: HashMap<UserId, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<SessionId, SessionEntry>,
    channel_sessions: HashMap<ChannelId, BTreeSet<SessionId>>,
}

/// Einfacher Store im Speicher
///
/// Mehrere Handles können sich über [`InMemorySessionStore::as_user`]
/// denselben Zustand teilen, so dass sich mehrere Clients simulieren lassen.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    me: Option<UserId>,
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemorySessionStore {
    /// Erstellt einen leeren Store für den angegebenen Benutzer
    pub fn new(me: impl Into<UserId>) -> Self {
        Self {
            me: Some(me.into()),
            inner: Arc::default(),
        }
    }

    /// Handle auf denselben Zustand, aber im Namen eines anderen Benutzers
    pub fn as_user(&self, user: impl Into<UserId>) -> Self {
        Self {
            me: Some(user.into()),
            inner: Arc::clone(&self.inner),
        }
    }

    fn to_session(&self, id: &SessionId, entry: &SessionEntry) -> CallSession {
        let states = self
            .me
            .as_ref()
            .and_then(|me| entry.participants.get(me))
            .cloned()
            .unwrap_or_default();

        CallSession {
            session_id: id.clone(),
            session_type: entry.session_type.clone(),
            channel_id: entry.channel_id.clone(),
            states,
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn local_user(&self) -> Option<UserId> {
        self.me.clone()
    }

    fn add_session(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        session_type: &str,
        states: Vec<String>,
    ) {
        let Some(me) = self.me.clone() else {
            tracing::warn!("Cannot add session {} without a local user", session_id);
            return;
        };

        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .entry(session_id.clone())
            .or_insert_with(|| SessionEntry {
                session_type: session_type.to_string(),
                channel_id: channel_id.clone(),
                participants: HashMap::new(),
            });
        let channel_id = entry.channel_id.clone();

        // Bereits vorhandene States bleiben erhalten (idempotentes Add)
        entry
            .participants
            .entry(me)
            .or_insert_with(|| states.into_iter().collect());

        inner
            .channel_sessions
            .entry(channel_id)
            .or_default()
            .insert(session_id.clone());
    }

    fn modify_session_states(&self, session_id: &SessionId, states: Vec<String>) {
        let Some(me) = self.me.as_ref() else {
            return;
        };

        let mut inner = self.inner.write();
        match inner
            .sessions
            .get_mut(session_id)
            .and_then(|entry| entry.participants.get_mut(me))
        {
            Some(current) => *current = states.into_iter().collect(),
            None => tracing::warn!("Session {} not joined, cannot modify states", session_id),
        }
    }

    fn remove_session(&self, session_id: &SessionId) {
        let Some(me) = self.me.as_ref() else {
            return;
        };

        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.get_mut(session_id) else {
            return;
        };
        entry.participants.remove(me);

        // Letzter Teilnehmer weg: Session verschwindet
        if entry.participants.is_empty() {
            let channel_id = entry.channel_id.clone();
            inner.sessions.remove(session_id);
            if let Some(ids) = inner.channel_sessions.get_mut(&channel_id) {
                ids.remove(session_id);
                if ids.is_empty() {
                    inner.channel_sessions.remove(&channel_id);
                }
            }
        }
    }

    fn channel_sessions(&self, channel_id: &ChannelId) -> Vec<CallSession> {
        let inner = self.inner.read();
        inner
            .channel_sessions
            .get(channel_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).map(|e| self.to_session(id, e)))
            .collect()
    }

    fn current_channel(&self) -> Option<ChannelId> {
        let me = self.me.as_ref()?;
        let inner = self.inner.read();
        inner
            .sessions
            .values()
            .find(|entry| entry.participants.contains_key(me))
            .map(|entry| entry.channel_id.clone())
    }

    fn current_session(&self, session_type: &str) -> Option<CallSession> {
        let me = self.me.as_ref()?;
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .find(|(_, entry)| {
                entry.session_type == session_type && entry.participants.contains_key(me)
            })
            .map(|(id, entry)| self.to_session(id, entry))
    }

    fn session_participants(&self, session_id: &SessionId) -> Vec<UserId> {
        let inner = self.inner.read();
        let mut users: Vec<UserId> = inner
            .sessions
            .get(session_id)
            .map(|entry| entry.participants.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    fn muted_participants(&self, session_id: &SessionId) -> HashSet<UserId> {
        let inner = self.inner.read();
        inner
            .sessions
            .get(session_id)
            .map(|entry| {
                entry
                    .participants
                    .iter()
                    .filter(|(_, states)| states.contains(MIC_MUTED_STATE))
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
