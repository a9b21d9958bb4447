//! Datentypen für Call-Sessions
//!
//! IDs sind Newtypes um Strings, damit Channel-, User- und Session-IDs
//! nicht verwechselt werden können.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Session-Typ für Sprachanrufe in einem Channel
pub const QALL_SESSION_TYPE: &str = "qall";

/// Status-Tag, mit dem jede neue Session registriert wird
pub const JOINED_STATE: &str = "joined";

/// Status-Tag für ein stummgeschaltetes Mikrofon
pub const MIC_MUTED_STATE: &str = "micmuted";

// ============================================================================
// IDS
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// ID eines Text-Channels
    ChannelId
);
string_id!(
    /// ID eines Benutzers (lokal oder remote)
    UserId
);
string_id!(
    /// ID einer Call-Session, z.B. `qall-4fj2k9...`
    SessionId
);

// ============================================================================
// CALL SESSION
// ============================================================================

/// Eine Call-Session aus Sicht eines Teilnehmers
///
/// `states` ist eine Menge: nur die Mitgliedschaft eines Tags zählt,
/// nicht die Reihenfolge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: SessionId,
    pub session_type: String,
    pub channel_id: ChannelId,
    pub states: BTreeSet<String>,
}

impl CallSession {
    pub fn has_state(&self, tag: &str) -> bool {
        self.states.contains(tag)
    }

    /// Gibt die States als duplikatfreie Liste zurück (für den Store)
    pub fn state_list(&self) -> Vec<String> {
        self.states.iter().cloned().collect()
    }
}

/// Ergebnis von `resolve_or_create_session`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub session_id: SessionId,
    pub is_new_session: bool,
}
