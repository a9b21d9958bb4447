//! Session Module - Call-Sessions pro Channel
//!
//! Dieses Modul verwaltet:
//! - IDs und den Session-Datentyp
//! - Den Zugriff auf den externen Session-Store
//! - Die Auflösung "bestehender Session beitreten oder neue erstellen"

mod registry;
mod store;
mod types;

pub use registry::{SessionError, SessionRegistry};
pub use store::{InMemorySessionStore, SessionStore};
pub use types::*;
