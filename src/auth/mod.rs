//! Authentication
//!
//! Credential verification, session storage, and the gate that composes
//! them into per-route-group policies.

pub mod credentials;
pub mod gate;
pub mod session;

use serde::{Deserialize, Serialize};

pub use credentials::{CredentialVerifier, PasswordStore, StoreError};
pub use gate::{enforce, evaluate, parse_basic, AuthGate, AuthRejection, AuthResult, Policy};
pub use session::{MemorySessionStore, SessionRecord, SessionStore};

/// Authenticated principal, placed in request extensions by the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}
