use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::auth::session::{AuthSession, SessionUser};
use crate::config::{ConfigManager, SupabaseConfig};
use crate::error::{
    config_missing, network_timeout, request_failed, ErrorCode, SyncError, SyncResult,
};
use crate::supabase::http_client::{HttpClient, HttpMethod, HttpResponse};

/// Table holding the user's bookmarks
pub const TABLE_BOOKMARKS: &str = "bookmarks";
/// Table holding per-user profile rows (preferences live here)
pub const TABLE_USER_PROFILES: &str = "user_profiles";

/// Response to a signup request. Backends that verify email addresses
/// return the created user without a session.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: Option<SessionUser>,
    pub session: Option<AuthSession>,
}

/// Thin client over the hosted backend's auth and table APIs.
///
/// Connection settings and the active session are read from the
/// [`ConfigManager`] per request, so a reconfiguration or sign-out takes
/// effect immediately. Responses are mapped structurally (status plus
/// body code) onto typed errors; nothing downstream inspects raw bodies.
pub struct SupabaseClient {
    config: Arc<ConfigManager>,
    http: Arc<dyn HttpClient>,
}

impl SupabaseClient {
    pub fn new(config: Arc<ConfigManager>, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    async fn backend(&self) -> SyncResult<SupabaseConfig> {
        self.config
            .supabase_config()
            .await?
            .ok_or_else(|| config_missing("supabaseConfig"))
    }

    fn base_headers(config: &SupabaseConfig, bearer: &str) -> HashMap<String, String> {
        HashMap::from([
            ("apikey".to_string(), config.anon_key.clone()),
            ("Authorization".to_string(), format!("Bearer {}", bearer)),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    /// Access token for table operations; requires a signed-in session
    async fn access_token(&self) -> SyncResult<String> {
        match self.config.auth_session().await? {
            Some(session) => Ok(session.access_token),
            None => Err(SyncError::new(ErrorCode::AuthFailed)
                .message("User is not authenticated")
                .build()),
        }
    }

    async fn send(
        &self,
        operation: &str,
        method: HttpMethod,
        url: &str,
        headers: HashMap<String, String>,
        body: Option<Value>,
    ) -> SyncResult<HttpResponse> {
        debug!(operation, ?method, url, "Backend request");
        let response = self
            .http
            .request(method, url, headers, body.map(|b| b.to_string()))
            .await
            .map_err(|e| transport_error(operation, &e))?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(operation, &response))
        }
    }

    // ---- Auth endpoints ----

    /// `POST /auth/v1/token?grant_type=password`
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> SyncResult<AuthSession> {
        let config = self.backend().await?;
        let url = format!("{}/auth/v1/token?grant_type=password", config.url);
        let response = self
            .send(
                "auth.signIn",
                HttpMethod::Post,
                &url,
                Self::base_headers(&config, &config.anon_key),
                Some(json!({ "email": email, "password": password })),
            )
            .await?;

        decode_session("auth.signIn", &parse_body(&response))
    }

    /// `POST /auth/v1/signup`
    pub async fn sign_up(&self, email: &str, password: &str) -> SyncResult<SignUpResponse> {
        let config = self.backend().await?;
        let url = format!("{}/auth/v1/signup", config.url);
        let response = self
            .send(
                "auth.signUp",
                HttpMethod::Post,
                &url,
                Self::base_headers(&config, &config.anon_key),
                Some(json!({ "email": email, "password": password })),
            )
            .await?;

        let body = parse_body(&response);

        // A session is only present when the backend does not require
        // email verification.
        let session = if body.get("access_token").is_some() {
            Some(decode_session("auth.signUp", &body)?)
        } else {
            None
        };

        let user_value = if body.get("user").is_some() {
            body.get("user").cloned()
        } else if body.get("id").is_some() {
            Some(body.clone())
        } else {
            None
        };
        let user = user_value
            .as_ref()
            .and_then(|u| decode_user(u).ok())
            .or_else(|| session.as_ref().map(|s| s.user.clone()));

        Ok(SignUpResponse { user, session })
    }

    /// `POST /auth/v1/logout`
    pub async fn sign_out(&self, access_token: &str) -> SyncResult<()> {
        let config = self.backend().await?;
        let url = format!("{}/auth/v1/logout", config.url);
        self.send(
            "auth.signOut",
            HttpMethod::Post,
            &url,
            Self::base_headers(&config, access_token),
            None,
        )
        .await?;
        Ok(())
    }

    /// `POST /auth/v1/token?grant_type=refresh_token`
    pub async fn refresh_session(&self, refresh_token: &str) -> SyncResult<AuthSession> {
        let config = self.backend().await?;
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", config.url);
        let response = self
            .send(
                "auth.refresh",
                HttpMethod::Post,
                &url,
                Self::base_headers(&config, &config.anon_key),
                Some(json!({ "refresh_token": refresh_token })),
            )
            .await?;

        decode_session("auth.refresh", &parse_body(&response))
    }

    // ---- Table operations ----

    /// Select rows: `GET /rest/v1/{table}?select={columns}&{col}=eq.{value}`
    pub async fn select(
        &self,
        table: &str,
        columns: &str,
        filters: &[(&str, &str)],
    ) -> SyncResult<Vec<Value>> {
        let config = self.backend().await?;
        let token = self.access_token().await?;
        let operation = format!("{}.select", table);

        let url = table_url(&config, table, columns, filters, &operation)?;
        let response = self
            .send(
                &operation,
                HttpMethod::Get,
                url.as_str(),
                Self::base_headers(&config, &token),
                None,
            )
            .await?;

        response
            .json::<Vec<Value>>()
            .map_err(|e| request_failed(&operation, e))
    }

    /// Upsert a row, merging on the given conflict target and returning
    /// the stored representation
    pub async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: Option<&str>,
    ) -> SyncResult<Vec<Value>> {
        let config = self.backend().await?;
        let token = self.access_token().await?;
        let operation = format!("{}.upsert", table);

        let mut url = table_url(&config, table, "*", &[], &operation)?;
        if let Some(target) = on_conflict {
            url.query_pairs_mut().append_pair("on_conflict", target);
        }

        let mut headers = Self::base_headers(&config, &token);
        headers.insert(
            "Prefer".to_string(),
            "resolution=merge-duplicates,return=representation".to_string(),
        );

        let response = self
            .send(
                &operation,
                HttpMethod::Post,
                url.as_str(),
                headers,
                Some(Value::Array(vec![row])),
            )
            .await?;

        response
            .json::<Vec<Value>>()
            .map_err(|e| request_failed(&operation, e))
    }

    /// Patch rows matching the filters, returning the stored representation
    pub async fn update(
        &self,
        table: &str,
        patch: Value,
        filters: &[(&str, &str)],
    ) -> SyncResult<Vec<Value>> {
        let config = self.backend().await?;
        let token = self.access_token().await?;
        let operation = format!("{}.update", table);

        let url = table_url(&config, table, "*", filters, &operation)?;
        let mut headers = Self::base_headers(&config, &token);
        headers.insert("Prefer".to_string(), "return=representation".to_string());

        let response = self
            .send(
                &operation,
                HttpMethod::Patch,
                url.as_str(),
                headers,
                Some(patch),
            )
            .await?;

        response
            .json::<Vec<Value>>()
            .map_err(|e| request_failed(&operation, e))
    }

    /// Delete rows matching the filters
    pub async fn delete(&self, table: &str, filters: &[(&str, &str)]) -> SyncResult<()> {
        let config = self.backend().await?;
        let token = self.access_token().await?;
        let operation = format!("{}.delete", table);

        let url = table_url(&config, table, "*", filters, &operation)?;
        self.send(
            &operation,
            HttpMethod::Delete,
            url.as_str(),
            Self::base_headers(&config, &token),
            None,
        )
        .await?;
        Ok(())
    }
}

fn table_url(
    config: &SupabaseConfig,
    table: &str,
    columns: &str,
    filters: &[(&str, &str)],
    operation: &str,
) -> SyncResult<Url> {
    let mut url = Url::parse(&format!("{}/rest/v1/{}", config.url, table))
        .map_err(|e| request_failed(operation, e))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("select", columns);
        for (column, value) in filters {
            pairs.append_pair(column, &format!("eq.{}", value));
        }
    }
    Ok(url)
}

fn parse_body(response: &HttpResponse) -> Value {
    serde_json::from_str(response.body()).unwrap_or(Value::Null)
}

/// Map a transport-level failure (DNS, connect, timeout) onto a typed error
fn transport_error(operation: &str, err: &anyhow::Error) -> SyncError {
    let text = err.to_string();
    if text.contains("timeout") || text.contains("timed out") {
        network_timeout(operation)
    } else {
        request_failed(operation, err)
    }
}

/// Map a non-2xx response onto a typed error using status and body code.
///
/// The body `code`/`error` field wins over the raw status so that auth
/// failures surfaced as 400s (e.g. `invalid_grant`) still classify as
/// auth errors.
fn error_from_response(operation: &str, response: &HttpResponse) -> SyncError {
    let body = parse_body(response);
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| body.get("error_code").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str));
    let description = body
        .get("msg")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("error_description").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", response.status()));

    let status = response.status();

    if matches!(code, Some("invalid_grant") | Some("PGRST116")) || status == 401 || status == 403 {
        let mut builder = SyncError::new(ErrorCode::AuthFailed).message(description);
        if let Some(code) = code {
            builder = builder.context(format!("{} ({})", operation, code));
        } else {
            builder = builder.context(operation.to_string());
        }
        return builder.build();
    }

    if status == 408 || status == 504 {
        return network_timeout(operation);
    }

    if status >= 500 {
        return SyncError::new(ErrorCode::DatabaseFailed)
            .message(description)
            .context(operation.to_string())
            .build();
    }

    if code.is_some_and(|c| c.starts_with("PGRST")) {
        return SyncError::new(ErrorCode::DatabaseFailed)
            .message(description)
            .context(format!("{} ({})", operation, code.unwrap_or_default()))
            .build();
    }

    if status == 400 || status == 422 {
        return SyncError::new(ErrorCode::ValidationFailed)
            .message(description)
            .context(operation.to_string())
            .build();
    }

    warn!(operation, status, "Unrecognized backend error shape");
    SyncError::from_foreign(description, code, operation)
}

fn decode_session(operation: &str, body: &Value) -> SyncResult<AuthSession> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| request_failed(operation, "session response missing access_token"))?
        .to_string();

    let refresh_token = body
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::to_string);

    let expires_at = body
        .get("expires_at")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| {
            let expires_in = body.get("expires_in").and_then(Value::as_i64).unwrap_or(3600);
            chrono::Utc::now().timestamp() + expires_in
        });

    let user = body
        .get("user")
        .ok_or_else(|| request_failed(operation, "session response missing user"))
        .and_then(decode_user)?;

    Ok(AuthSession {
        user,
        access_token,
        refresh_token,
        expires_at,
    })
}

fn decode_user(value: &Value) -> SyncResult<SessionUser> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| request_failed("auth", "user object missing id"))?;
    let email = value
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(SessionUser {
        id: id.to_string(),
        email: email.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthEvent;
    use crate::config::store::{MemoryStore, SettingsStore};
    use crate::config::{ConfigEvent, KEY_AUTH_SESSION, KEY_SUPABASE_CONFIG};
    use crate::error::ErrorCategory;
    use crate::error::ErrorSeverity;
    use crate::events::EventBus;
    use crate::supabase::http_client::ReqwestHttpClient;
    use serde_json::json;

    /// Config manager pointing at a mock server; the store is seeded
    /// directly because the validated setter rejects plain-http URLs.
    async fn seeded_config(url: &str, with_session: bool) -> Arc<ConfigManager> {
        let store = MemoryStore::shared();
        store
            .set(
                KEY_SUPABASE_CONFIG,
                json!({"url": url, "anonKey": "eyJtest"}),
            )
            .await
            .unwrap();
        if with_session {
            store
                .set(
                    KEY_AUTH_SESSION,
                    json!({
                        "user": {"id": "user-1", "email": "a@b.com"},
                        "access_token": "eyJ.access",
                        "expires_at": chrono::Utc::now().timestamp() + 3600,
                    }),
                )
                .await
                .unwrap();
        }
        Arc::new(ConfigManager::new(
            store,
            EventBus::<ConfigEvent>::new(16),
            EventBus::<AuthEvent>::new(16),
        ))
    }

    async fn config_for(url: &str) -> Arc<ConfigManager> {
        seeded_config(url, false).await
    }

    async fn signed_in_config_for(url: &str) -> Arc<ConfigManager> {
        seeded_config(url, true).await
    }

    fn client_for(config: Arc<ConfigManager>) -> SupabaseClient {
        SupabaseClient::new(config, Arc::new(ReqwestHttpClient::new()))
    }

    fn session_body() -> serde_json::Value {
        json!({
            "access_token": "eyJ.fresh",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "user": {"id": "user-1", "email": "a@b.com"},
        })
    }

    #[tokio::test]
    async fn sign_in_decodes_a_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "password".into(),
            ))
            .with_status(200)
            .with_body(session_body().to_string())
            .create_async()
            .await;

        let client = client_for(config_for(&server.url()).await);
        let session = client
            .sign_in_with_password("a@b.com", "123456")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.user.id, "user-1");
        assert_eq!(session.access_token, "eyJ.fresh");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn invalid_grant_maps_to_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/token")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(
                json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = client_for(config_for(&server.url()).await);
        let err = client
            .sign_in_with_password("a@b.com", "wrong")
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Auth);
        assert_eq!(err.severity, ErrorSeverity::High);
        assert!(err.context.as_deref().unwrap_or("").contains("invalid_grant"));
    }

    #[tokio::test]
    async fn postgrest_codes_map_to_database_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/bookmarks")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(
                json!({"code": "PGRST301", "message": "query error"}).to_string(),
            )
            .create_async()
            .await;

        let client = client_for(signed_in_config_for(&server.url()).await);
        let err = client
            .select(TABLE_BOOKMARKS, "*", &[("user_id", "user-1")])
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Database);
    }

    #[tokio::test]
    async fn missing_row_code_maps_to_auth_per_policy() {
        // PGRST116 doubles as the backend's "JWT does not match a row"
        // signal and is treated as an auth failure.
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/user_profiles")
            .match_query(mockito::Matcher::Any)
            .with_status(406)
            .with_body(json!({"code": "PGRST116", "message": "no rows"}).to_string())
            .create_async()
            .await;

        let client = client_for(signed_in_config_for(&server.url()).await);
        let err = client
            .select(TABLE_USER_PROFILES, "*", &[("id", "user-1")])
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Auth);
        assert_eq!(err.severity, ErrorSeverity::High);
    }

    #[tokio::test]
    async fn table_operations_require_a_session() {
        let server = mockito::Server::new_async().await;
        let client = client_for(config_for(&server.url()).await);

        let err = client
            .select(TABLE_BOOKMARKS, "*", &[])
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Auth);
    }

    #[tokio::test]
    async fn operations_without_backend_config_fail_with_config_missing() {
        let store = MemoryStore::shared();
        let config = Arc::new(ConfigManager::new(
            store,
            EventBus::<ConfigEvent>::new(16),
            EventBus::<AuthEvent>::new(16),
        ));
        let client = client_for(config);

        let err = client.sign_in_with_password("a@b.com", "pw").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissing);
    }

    #[tokio::test]
    async fn upsert_sends_merge_prefer_header_and_conflict_target() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/bookmarks")
            .match_query(mockito::Matcher::Regex("on_conflict=user_id%2Curl".into()))
            .match_header(
                "prefer",
                "resolution=merge-duplicates,return=representation",
            )
            .with_status(201)
            .with_body(json!([{"id": "b1", "url": "https://x", "status": "read"}]).to_string())
            .create_async()
            .await;

        let client = client_for(signed_in_config_for(&server.url()).await);
        let rows = client
            .upsert(
                TABLE_BOOKMARKS,
                json!({"url": "https://x", "status": "read"}),
                Some("user_id,url"),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows[0]["id"], "b1");
    }

    #[tokio::test]
    async fn signup_without_session_reports_verification_pending_shape() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/v1/signup")
            .with_status(200)
            .with_body(json!({"id": "user-2", "email": "new@b.com"}).to_string())
            .create_async()
            .await;

        let client = client_for(config_for(&server.url()).await);
        let response = client.sign_up("new@b.com", "123456").await.unwrap();

        assert!(response.session.is_none());
        assert_eq!(response.user.unwrap().id, "user-2");
    }
}
