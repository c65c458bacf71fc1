use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::service::{AuthService, SignUpOutcome};
use crate::auth::session::AuthSession;
use crate::error::{user_message, SyncResult};

/// How long the verification notice stays up before the flow returns to
/// the login view
const VERIFICATION_NOTICE_DELAY: Duration = Duration::from_secs(3);

/// Which auth view a host surface should render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthView {
    Login,
    Signup,
    Profile,
}

/// View state machine backing the auth screens.
///
/// Transitions: `Login ⇄ Signup` through the form links, any view to
/// `Profile` on successful authentication, and `Profile → Login` on
/// sign-out. Signup that ends in email verification parks on `Login`
/// with a notice once the delay elapses.
#[derive(Clone)]
pub struct AuthFlow {
    service: Arc<AuthService>,
    view: Arc<RwLock<AuthView>>,
    /// Message the current view should show, if any
    notice: Arc<RwLock<Option<String>>>,
}

impl AuthFlow {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self {
            service,
            view: Arc::new(RwLock::new(AuthView::Login)),
            notice: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn view(&self) -> AuthView {
        *self.view.read().await
    }

    pub async fn notice(&self) -> Option<String> {
        self.notice.read().await.clone()
    }

    /// Start on the right view for the current auth state
    pub async fn sync_with_service(&self) {
        let view = if self.service.is_authenticated().await {
            AuthView::Profile
        } else {
            AuthView::Login
        };
        *self.view.write().await = view;
    }

    pub async fn show_signup(&self) {
        *self.view.write().await = AuthView::Signup;
        *self.notice.write().await = None;
    }

    pub async fn show_login(&self) {
        *self.view.write().await = AuthView::Login;
        *self.notice.write().await = None;
    }

    /// Submit the login form
    pub async fn submit_login(&self, email: &str, password: &str) -> SyncResult<AuthSession> {
        match self.service.sign_in(email, password).await {
            Ok(session) => {
                *self.view.write().await = AuthView::Profile;
                *self.notice.write().await = None;
                Ok(session)
            }
            Err(e) => {
                *self.notice.write().await = Some(user_message(&e));
                Err(e)
            }
        }
    }

    /// Submit the signup form
    pub async fn submit_signup(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> SyncResult<SignUpOutcome> {
        match self.service.sign_up(email, password, confirm_password).await {
            Ok(SignUpOutcome::SignedIn { session }) => {
                *self.view.write().await = AuthView::Profile;
                *self.notice.write().await = None;
                Ok(SignUpOutcome::SignedIn { session })
            }
            Ok(SignUpOutcome::VerificationRequired { email }) => {
                *self.notice.write().await = Some(
                    "Account created. Check your email to verify your address, then sign in."
                        .to_string(),
                );
                self.schedule_return_to_login();
                Ok(SignUpOutcome::VerificationRequired { email })
            }
            Err(e) => {
                *self.notice.write().await = Some(user_message(&e));
                Err(e)
            }
        }
    }

    /// Sign out and return to the login view
    pub async fn sign_out(&self) -> SyncResult<()> {
        self.service.sign_out().await?;
        *self.view.write().await = AuthView::Login;
        *self.notice.write().await = None;
        Ok(())
    }

    /// Switch back to the login view after the notice delay. The pending
    /// switch cannot be cancelled; a user navigating in the meantime just
    /// lands on the login view once it fires.
    fn schedule_return_to_login(&self) {
        let view = Arc::clone(&self.view);
        tokio::spawn(async move {
            tokio::time::sleep(VERIFICATION_NOTICE_DELAY).await;
            debug!("Returning to login view after verification notice");
            *view.write().await = AuthView::Login;
        });
    }
}
