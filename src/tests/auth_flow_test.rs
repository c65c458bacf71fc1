//! Auth flow tests: view transitions, validation gating, and the
//! signup-then-verify path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::auth::{AuthFlow, AuthService, AuthState, AuthView, SignUpOutcome};
use crate::config::store::{MemoryStore, SettingsStore};
use crate::config::{ConfigManager, KEY_SUPABASE_CONFIG};
use crate::error::ErrorCategory;
use crate::events::EventBus;
use crate::supabase::http_client::mock::MockHttpClient;
use crate::supabase::http_client::HttpMethod;
use crate::supabase::SupabaseClient;

struct Harness {
    http: Arc<MockHttpClient>,
    config: Arc<ConfigManager>,
    service: Arc<AuthService>,
    flow: AuthFlow,
}

async fn harness() -> Harness {
    let store = MemoryStore::shared();
    store
        .set(
            KEY_SUPABASE_CONFIG,
            json!({"url": "https://unit.supabase.co", "anonKey": "eyJtest"}),
        )
        .await
        .unwrap();

    let http = Arc::new(MockHttpClient::new());
    let config = Arc::new(ConfigManager::new(
        store,
        EventBus::new(16),
        EventBus::new(16),
    ));
    let client = Arc::new(SupabaseClient::new(
        Arc::clone(&config),
        http.clone() as Arc<dyn crate::supabase::HttpClient>,
    ));
    let service = Arc::new(AuthService::new(client, Arc::clone(&config)));
    let flow = AuthFlow::new(Arc::clone(&service));

    Harness {
        http,
        config,
        service,
        flow,
    }
}

fn session_body(email: &str) -> serde_json::Value {
    json!({
        "access_token": "eyJ.fresh",
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "user": {"id": "user-1", "email": email},
    })
}

#[tokio::test(start_paused = true)]
async fn login_moves_to_profile_and_persists_the_session() {
    let h = harness().await;
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/token",
            200,
            &session_body("a@b.com").to_string(),
        )
        .await;

    let session = h.flow.submit_login("a@b.com", "123456").await.unwrap();

    assert_eq!(session.user.email, "a@b.com");
    assert_eq!(h.flow.view().await, AuthView::Profile);
    assert!(h.service.is_authenticated().await);
    assert_eq!(
        h.config.auth_session().await.unwrap().unwrap().access_token,
        "eyJ.fresh"
    );
}

#[tokio::test(start_paused = true)]
async fn bad_credentials_set_a_notice_and_stay_on_login() {
    let h = harness().await;
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/token",
            400,
            &json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})
                .to_string(),
        )
        .await;

    let err = h.flow.submit_login("a@b.com", "wrong").await.unwrap_err();

    assert_eq!(err.category, ErrorCategory::Auth);
    assert_eq!(h.flow.view().await, AuthView::Login);
    assert!(h.flow.notice().await.is_some());
    assert!(matches!(h.service.state().await, AuthState::Failed { .. }));
}

#[tokio::test(start_paused = true)]
async fn validation_failures_never_reach_the_backend() {
    let h = harness().await;

    assert!(h.flow.submit_login("not-an-email", "pw").await.is_err());
    assert!(h.flow.submit_login("a@b.com", "").await.is_err());
    assert!(h
        .flow
        .submit_signup("a@b.com", "12345", "12345")
        .await
        .is_err());
    assert!(h
        .flow
        .submit_signup("a@b.com", "123456", "different")
        .await
        .is_err());

    assert!(h.http.requests().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn signup_without_session_attempts_one_sign_in_then_asks_for_verification() {
    let h = harness().await;
    // The backend creates the user but withholds a session until the
    // email address is confirmed; the follow-up sign-in is declined.
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/signup",
            200,
            &json!({"id": "user-2", "email": "new@b.com"}).to_string(),
        )
        .await;
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/token",
            400,
            &json!({"error": "invalid_grant", "error_description": "Email not confirmed"})
                .to_string(),
        )
        .await;

    h.flow.show_signup().await;
    let outcome = h
        .flow
        .submit_signup("new@b.com", "123456", "123456")
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SignUpOutcome::VerificationRequired {
            email: "new@b.com".to_string()
        }
    );
    // Exactly one sign-in retry, no more.
    assert_eq!(
        h.http.request_count(HttpMethod::Post, "/auth/v1/token").await,
        1
    );
    assert!(matches!(
        h.service.state().await,
        AuthState::AwaitingVerification { .. }
    ));
    let notice = h.flow.notice().await.unwrap();
    assert!(notice.contains("verify"));

    // After the fixed delay the flow falls back to the login view.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.flow.view().await, AuthView::Login);
}

#[tokio::test(start_paused = true)]
async fn signup_with_immediate_session_goes_straight_to_profile() {
    let h = harness().await;
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/signup",
            200,
            &session_body("new@b.com").to_string(),
        )
        .await;

    h.flow.show_signup().await;
    let outcome = h
        .flow
        .submit_signup("new@b.com", "123456", "123456")
        .await
        .unwrap();

    assert!(matches!(outcome, SignUpOutcome::SignedIn { .. }));
    assert_eq!(h.flow.view().await, AuthView::Profile);
    // No sign-in retry was needed.
    assert_eq!(
        h.http.request_count(HttpMethod::Post, "/auth/v1/token").await,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_the_session_even_when_the_backend_fails() {
    let h = harness().await;
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/token",
            200,
            &session_body("a@b.com").to_string(),
        )
        .await;
    h.http
        .respond(HttpMethod::Post, "/auth/v1/logout", 503, "{}")
        .await;

    h.flow.submit_login("a@b.com", "123456").await.unwrap();
    h.flow.sign_out().await.unwrap();

    assert_eq!(h.flow.view().await, AuthView::Login);
    assert_eq!(h.config.auth_session().await.unwrap(), None);
    assert!(!h.service.is_authenticated().await);
}

#[tokio::test(start_paused = true)]
async fn restore_refreshes_an_expired_session() {
    let h = harness().await;
    // Persist an expired session with a refresh token, as a previous run
    // would have left behind.
    h.config
        .import_config(json!({
            "auth": {
                "user": {"id": "user-1", "email": "a@b.com"},
                "access_token": "eyJ.stale",
                "refresh_token": "refresh-1",
                "expires_at": chrono::Utc::now().timestamp() - 60,
            }
        }))
        .await
        .unwrap();
    h.http
        .respond(
            HttpMethod::Post,
            "/auth/v1/token",
            200,
            &session_body("a@b.com").to_string(),
        )
        .await;

    h.service.restore().await.unwrap();

    assert!(h.service.is_authenticated().await);
    assert_eq!(
        h.config.auth_session().await.unwrap().unwrap().access_token,
        "eyJ.fresh"
    );
}
