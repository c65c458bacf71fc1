use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::session::{AuthSession, AuthState};
use crate::common::validation::{validate_input, InputKind};
use crate::config::ConfigManager;
use crate::error::{validation_failed, SyncResult};
use crate::supabase::SupabaseClient;

/// Result of a signup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The backend issued a session immediately
    SignedIn { session: AuthSession },
    /// The backend requires the email address to be confirmed first
    VerificationRequired { email: String },
}

/// Sign-in, signup and sign-out orchestration.
///
/// Sessions are persisted through the [`ConfigManager`], which also
/// announces every change on the auth bus. Host surfaces that subscribe
/// after a change re-read state explicitly; the broadcast itself is
/// eventually consistent by design.
pub struct AuthService {
    client: Arc<SupabaseClient>,
    config: Arc<ConfigManager>,
    state: RwLock<AuthState>,
}

impl AuthService {
    pub fn new(client: Arc<SupabaseClient>, config: Arc<ConfigManager>) -> Self {
        Self {
            client,
            config,
            state: RwLock::new(AuthState::Unauthenticated),
        }
    }

    /// Current authentication state
    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated()
    }

    /// Restore the persisted session on startup.
    ///
    /// An expired session with a refresh token is refreshed once; if that
    /// fails the stale session is cleared rather than left half-valid.
    pub async fn restore(&self) -> SyncResult<()> {
        let Some(session) = self.config.auth_session().await? else {
            debug!("No persisted session to restore");
            return Ok(());
        };

        if !session.is_expired() {
            info!(user = %session.user.email, "Restored session");
            *self.state.write().await = AuthState::Authenticated { session };
            return Ok(());
        }

        match &session.refresh_token {
            Some(refresh_token) => match self.client.refresh_session(refresh_token).await {
                Ok(fresh) => {
                    info!(user = %fresh.user.email, "Refreshed expired session");
                    self.config.set_auth_session(fresh.clone()).await?;
                    *self.state.write().await = AuthState::Authenticated { session: fresh };
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "Session refresh failed, signing out locally");
                    self.config.clear_auth_session().await?;
                    *self.state.write().await = AuthState::Unauthenticated;
                    Ok(())
                }
            },
            None => {
                debug!("Persisted session expired with no refresh token");
                self.config.clear_auth_session().await?;
                *self.state.write().await = AuthState::Unauthenticated;
                Ok(())
            }
        }
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> SyncResult<AuthSession> {
        let email_check = validate_input(email, InputKind::Email);
        if !email_check.is_valid {
            return Err(validation_failed(email_check.message));
        }
        if password.is_empty() {
            return Err(validation_failed("Please enter your password"));
        }

        match self.client.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!(user = %session.user.email, "Signed in");
                self.config.set_auth_session(session.clone()).await?;
                *self.state.write().await = AuthState::Authenticated {
                    session: session.clone(),
                };
                Ok(session)
            }
            Err(e) => {
                *self.state.write().await = AuthState::Failed {
                    reason: e.message.clone(),
                };
                Err(e)
            }
        }
    }

    /// Create an account.
    ///
    /// Backends configured to verify email addresses return a user but no
    /// session; in that case one immediate sign-in is attempted (some
    /// deployments verify lazily), and failing that the outcome asks the
    /// user to check their inbox.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> SyncResult<SignUpOutcome> {
        let email_check = validate_input(email, InputKind::Email);
        if !email_check.is_valid {
            return Err(validation_failed(email_check.message));
        }
        let password_check = validate_input(password, InputKind::Password);
        if !password_check.is_valid {
            return Err(validation_failed(password_check.message));
        }
        if password != confirm_password {
            return Err(validation_failed("Passwords do not match"));
        }

        let response = self.client.sign_up(email, password).await?;

        if let Some(session) = response.session {
            info!(user = %session.user.email, "Signed up with immediate session");
            self.config.set_auth_session(session.clone()).await?;
            *self.state.write().await = AuthState::Authenticated {
                session: session.clone(),
            };
            return Ok(SignUpOutcome::SignedIn { session });
        }

        debug!("Signup returned no session, attempting one sign-in");
        match self.client.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.config.set_auth_session(session.clone()).await?;
                *self.state.write().await = AuthState::Authenticated {
                    session: session.clone(),
                };
                Ok(SignUpOutcome::SignedIn { session })
            }
            Err(e) => {
                debug!(error = %e, "Post-signup sign-in declined, verification pending");
                *self.state.write().await = AuthState::AwaitingVerification {
                    email: email.to_string(),
                };
                Ok(SignUpOutcome::VerificationRequired {
                    email: email.to_string(),
                })
            }
        }
    }

    /// Sign out.
    ///
    /// The backend call is best effort - the local session is always
    /// cleared, even when the revocation request fails.
    pub async fn sign_out(&self) -> SyncResult<()> {
        if let Some(session) = self.config.auth_session().await? {
            if let Err(e) = self.client.sign_out(&session.access_token).await {
                warn!(error = %e, "Backend sign-out failed, clearing local session anyway");
            }
        }

        self.config.clear_auth_session().await?;
        *self.state.write().await = AuthState::Unauthenticated;
        info!("Signed out");
        Ok(())
    }
}
