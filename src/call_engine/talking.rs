//! Talking-State Poller
//!
//! Liest 30x pro Sekunde den Pegel aller Teilnehmer und veröffentlicht
//! nur die Änderungen als ein gebündeltes Event. Ohne Diff würde die UI
//! bei jedem Tick neu zeichnen.

use super::engine::{CallEvent, MixerSlot};
use crate::audio::{talking_loudness_level, AudioMixer};
use crate::config::TALKING_STATE_UPDATE_FPS;
use crate::session::{SessionStore, UserId, QALL_SESSION_TYPE};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Geänderte Sprechstufen seit dem letzten Tick
pub type TalkingStateDiff = HashMap<UserId, u8>;

/// Woher der Poller seine Daten liest und wohin er schreibt
#[derive(Clone)]
pub(crate) struct TalkingSource {
    pub mixer: MixerSlot,
    pub store: Arc<dyn SessionStore>,
    pub events: broadcast::Sender<CallEvent>,
}

pub struct TalkingStatePoller {
    levels: Arc<RwLock<HashMap<UserId, u8>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TalkingStatePoller {
    pub fn new() -> Self {
        Self {
            levels: Arc::default(),
            task: Mutex::new(None),
        }
    }

    /// Startet den periodischen Task (ein laufender wird vorher gestoppt)
    pub(crate) fn start(&self, source: TalkingSource) {
        self.stop();

        let levels = Arc::clone(&self.levels);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(1) / TALKING_STATE_UPDATE_FPS);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick(&levels, &source);
            }
        });

        *self.task.lock() = Some(handle);
        tracing::debug!("Talking state updates started");
    }

    /// Stoppt den Task und vergisst die Sprechstufen; gibt zurück ob er lief
    pub fn stop(&self) -> bool {
        let stopped = self.task.lock().take();
        self.levels.write().clear();
        match stopped {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Talking state updates stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Zuletzt veröffentlichte Sprechstufen
    pub fn levels(&self) -> HashMap<UserId, u8> {
        self.levels.read().clone()
    }
}

impl Default for TalkingStatePoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TalkingStatePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(levels: &RwLock<HashMap<UserId, u8>>, source: &TalkingSource) {
    let me = source.store.local_user();
    let (roster, muted) = match source.store.current_session(QALL_SESSION_TYPE) {
        Some(session) => (
            source.store.session_participants(&session.session_id),
            source.store.muted_participants(&session.session_id),
        ),
        None => (Vec::new(), HashSet::new()),
    };

    let diff = {
        let mixer = source.mixer.lock();
        compute_talking_diff(&levels.read(), me.as_ref(), &roster, &muted, mixer.as_ref())
    };
    if diff.is_empty() {
        return;
    }

    levels
        .write()
        .extend(diff.iter().map(|(user, level)| (user.clone(), *level)));
    let _ = source.events.send(CallEvent::TalkingStateChanged(diff));
}

/// Berechnet die geänderten Sprechstufen
///
/// Fehlende Mixer-Einträge zählen als still. Global stummgeschaltete
/// Teilnehmer sind immer 0.
pub fn compute_talking_diff(
    previous: &HashMap<UserId, u8>,
    me: Option<&UserId>,
    roster: &[UserId],
    muted: &HashSet<UserId>,
    mixer: Option<&AudioMixer>,
) -> TalkingStateDiff {
    let mut diff = TalkingStateDiff::new();

    for user in roster {
        if Some(user) == me {
            continue;
        }

        let loudness = if muted.contains(user) {
            0
        } else {
            mixer
                .map(|m| talking_loudness_level(m.level_of(user)))
                .unwrap_or(0)
        };
        if previous.get(user) != Some(&loudness) {
            diff.insert(user.clone(), loudness);
        }
    }

    if let Some(me) = me {
        let level = mixer.and_then(|m| m.local_level()).unwrap_or(0.0);
        let loudness = talking_loudness_level(level);
        if previous.get(me) != Some(&loudness) {
            diff.insert(me.clone(), loudness);
        }
    }

    diff
}

// ============================================================================
// TESTS
// ============================================================================
