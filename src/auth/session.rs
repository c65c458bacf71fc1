use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::events::BusEvent;

/// The signed-in user as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
}

/// An authenticated backend session.
///
/// Owned by the configuration manager; broadcast to every host surface on
/// change. Lifecycle is bound to sign-in and sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: SessionUser,
    /// Bearer token sent with every table operation
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires
    pub expires_at: i64,
}

impl AuthSession {
    /// Check if the access token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now().timestamp()
    }

    /// Check if the access token expires within the given number of seconds
    pub fn expires_soon(&self, within_secs: i64) -> bool {
        self.expires_at - Utc::now().timestamp() < within_secs
    }
}

/// Authentication state of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No session present
    Unauthenticated,
    /// Signed in with a session
    Authenticated { session: AuthSession },
    /// Account created but the email address still needs confirmation
    AwaitingVerification { email: String },
    /// The last auth operation failed
    Failed { reason: String },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }
}

/// Auth-state broadcast sent to every host surface.
///
/// The serialized form keeps the original cross-context message shape:
/// `{"type": "AUTH_STATE_CHANGED", "session": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthEvent {
    #[serde(rename = "AUTH_STATE_CHANGED")]
    StateChanged { session: Option<AuthSession> },
}

impl BusEvent for AuthEvent {
    fn label(&self) -> &'static str {
        match self {
            AuthEvent::StateChanged { .. } => "AUTH_STATE_CHANGED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> AuthSession {
        AuthSession {
            user: SessionUser {
                id: "u1".into(),
                email: "a@b.com".into(),
            },
            access_token: "eyJ.token".into(),
            refresh_token: None,
            expires_at,
        }
    }

    #[test]
    fn expiry_helpers() {
        let now = Utc::now().timestamp();
        assert!(session(now - 10).is_expired());
        assert!(!session(now + 3600).is_expired());
        assert!(session(now + 100).expires_soon(300));
        assert!(!session(now + 3600).expires_soon(300));
    }

    #[test]
    fn broadcast_keeps_the_original_wire_shape() {
        let event = AuthEvent::StateChanged { session: None };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "AUTH_STATE_CHANGED");
        assert!(value["session"].is_null());
    }
}
