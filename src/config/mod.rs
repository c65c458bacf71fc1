use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::auth::session::AuthSession;
use crate::auth::AuthEvent;
use crate::error::{
    config_invalid, storage_failed, validation_failed, SyncResult,
};
use crate::events::{BusEvent, EventBus};

pub mod migration;
pub mod store;

use migration::{run_migrations, CONFIG_VERSION};
use store::SettingsStore;

// Storage keys, unchanged from the original extension's sync storage
pub const KEY_SUPABASE_CONFIG: &str = "supabaseConfig";
pub const KEY_STATUS_TYPES: &str = "customStatusTypes";
pub const KEY_AUTH_SESSION: &str = "auth_session";
pub const KEY_CONFIG_VERSION: &str = "configVersion";

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Public client key (a JWT, distinct from the privileged service key)
    #[serde(rename = "anonKey")]
    pub anon_key: String,
}

impl SupabaseConfig {
    /// A config missing either field counts as absent, never as partial
    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.anon_key.is_empty()
    }
}

/// User preferences synchronized alongside bookmarks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(rename = "customStatusTypes")]
    pub custom_status_types: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            custom_status_types: default_status_types(),
        }
    }
}

/// Built-in read-status labels used until the user customizes them
pub fn default_status_types() -> Vec<String> {
    ["read", "good-reference", "low-value", "revisit-later"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Configuration change notifications
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    BackendConfigChanged { config: SupabaseConfig },
    StatusTypesChanged { types: Vec<String> },
    SessionChanged { session: Option<AuthSession> },
}

impl BusEvent for ConfigEvent {
    fn label(&self) -> &'static str {
        match self {
            ConfigEvent::BackendConfigChanged { .. } => "backend-config-changed",
            ConfigEvent::StatusTypesChanged { .. } => "status-types-changed",
            ConfigEvent::SessionChanged { .. } => "session-changed",
        }
    }
}

/// Versioned snapshot produced by [`ConfigManager::export_config`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub version: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub supabase: Option<SupabaseConfig>,
    pub preferences: Preferences,
    pub auth: Option<AuthSession>,
}

/// Per-section outcome of [`ConfigManager::import_config`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub applied: Vec<&'static str>,
    pub rejected: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct ConfigState {
    supabase: Option<SupabaseConfig>,
    status_types: Option<Vec<String>>,
    session: Option<AuthSession>,
    version: u32,
}

/// Owner of all persisted engine settings.
///
/// Constructed once per engine and injected into the services that need
/// it. Every accessor initializes lazily; concurrent callers share a
/// single initialization run, and a failed run is retried by the next
/// caller.
pub struct ConfigManager {
    store: Arc<dyn SettingsStore>,
    state: RwLock<ConfigState>,
    events: EventBus<ConfigEvent>,
    /// Session changes are also announced on the auth bus so every host
    /// surface observes sign-in state without polling storage
    auth_events: EventBus<AuthEvent>,
    init: OnceCell<()>,
}

impl ConfigManager {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        events: EventBus<ConfigEvent>,
        auth_events: EventBus<AuthEvent>,
    ) -> Self {
        Self {
            store,
            state: RwLock::new(ConfigState::default()),
            events,
            auth_events,
            init: OnceCell::new(),
        }
    }

    /// Subscribe to configuration change events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// Load persisted state exactly once; safe to call from anywhere.
    pub async fn ensure_initialized(&self) -> SyncResult<()> {
        self.init
            .get_or_try_init(|| self.load())
            .await
            .map(|_| ())
    }

    async fn load(&self) -> SyncResult<()> {
        debug!("Loading persisted settings");

        let stored_version = match self.store.get(KEY_CONFIG_VERSION).await {
            Ok(Some(Value::Number(n))) => n.as_u64().unwrap_or(1) as u32,
            Ok(_) => 1,
            Err(e) => return Err(storage_failed(e)),
        };

        let version = run_migrations(self.store.as_ref(), stored_version).await;
        if version != stored_version {
            // Best effort: a failed bump just reruns idempotent migrations
            // on the next launch.
            if let Err(e) = self
                .store
                .set(KEY_CONFIG_VERSION, Value::from(version))
                .await
            {
                warn!(error = %e, "Failed to persist settings version");
            }
        }

        // Each entry loads independently: one corrupt value falls back to
        // its default instead of poisoning the whole document.
        let supabase = self
            .load_entry::<SupabaseConfig>(KEY_SUPABASE_CONFIG)
            .await?
            .filter(SupabaseConfig::is_complete);
        let status_types = self.load_entry::<Vec<String>>(KEY_STATUS_TYPES).await?;
        let session = self.load_entry::<AuthSession>(KEY_AUTH_SESSION).await?;

        let mut state = self.state.write().await;
        state.supabase = supabase;
        state.status_types = status_types;
        state.session = session;
        state.version = version;

        info!(
            version,
            configured = state.supabase.is_some(),
            signed_in = state.session.is_some(),
            "Settings loaded"
        );
        Ok(())
    }

    async fn load_entry<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> SyncResult<Option<T>> {
        match self.store.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring corrupt settings entry");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => Err(storage_failed(e)),
        }
    }

    /// Validate and persist the backend connection settings
    pub async fn set_supabase_config(&self, url: &str, anon_key: &str) -> SyncResult<()> {
        self.ensure_initialized().await?;

        if !url.starts_with("https://") {
            return Err(config_invalid(
                KEY_SUPABASE_CONFIG,
                "backend URL must start with https://",
            ));
        }
        if !anon_key.starts_with("eyJ") {
            return Err(config_invalid(
                KEY_SUPABASE_CONFIG,
                "anon key does not look like a client JWT",
            ));
        }

        let config = SupabaseConfig {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        };
        let value = serde_json::to_value(&config).map_err(storage_failed)?;
        self.store
            .set(KEY_SUPABASE_CONFIG, value)
            .await
            .map_err(storage_failed)?;

        self.state.write().await.supabase = Some(config.clone());
        self.events
            .publish(ConfigEvent::BackendConfigChanged { config })
            .await;
        Ok(())
    }

    /// Current backend settings, if completely configured
    pub async fn supabase_config(&self) -> SyncResult<Option<SupabaseConfig>> {
        self.ensure_initialized().await?;
        Ok(self.state.read().await.supabase.clone())
    }

    pub async fn is_supabase_configured(&self) -> SyncResult<bool> {
        Ok(self.supabase_config().await?.is_some())
    }

    /// Replace the user's status labels
    pub async fn set_custom_status_types(&self, types: Vec<String>) -> SyncResult<()> {
        self.ensure_initialized().await?;

        if types.is_empty() {
            return Err(validation_failed("At least one status type is required"));
        }
        if types.iter().any(|t| t.trim().is_empty()) {
            return Err(validation_failed("Status types must not be empty"));
        }

        let value = serde_json::to_value(&types).map_err(storage_failed)?;
        self.store
            .set(KEY_STATUS_TYPES, value)
            .await
            .map_err(storage_failed)?;

        self.state.write().await.status_types = Some(types.clone());
        self.events
            .publish(ConfigEvent::StatusTypesChanged { types })
            .await;
        Ok(())
    }

    /// Current status labels, falling back to the built-in defaults
    pub async fn custom_status_types(&self) -> SyncResult<Vec<String>> {
        self.ensure_initialized().await?;
        Ok(self
            .state
            .read()
            .await
            .status_types
            .clone()
            .unwrap_or_else(default_status_types))
    }

    /// Persist a session and announce the auth-state change.
    ///
    /// The announcement is best effort: hosts that are not listening yet
    /// observe the session on their next explicit read.
    pub async fn set_auth_session(&self, session: AuthSession) -> SyncResult<()> {
        self.ensure_initialized().await?;

        let value = serde_json::to_value(&session).map_err(storage_failed)?;
        self.store
            .set(KEY_AUTH_SESSION, value)
            .await
            .map_err(storage_failed)?;

        self.state.write().await.session = Some(session.clone());
        self.announce_session(Some(session)).await;
        Ok(())
    }

    /// Remove the persisted session and announce sign-out
    pub async fn clear_auth_session(&self) -> SyncResult<()> {
        self.ensure_initialized().await?;

        self.store
            .remove(KEY_AUTH_SESSION)
            .await
            .map_err(storage_failed)?;

        self.state.write().await.session = None;
        self.announce_session(None).await;
        Ok(())
    }

    pub async fn auth_session(&self) -> SyncResult<Option<AuthSession>> {
        self.ensure_initialized().await?;
        Ok(self.state.read().await.session.clone())
    }

    async fn announce_session(&self, session: Option<AuthSession>) {
        self.events
            .publish(ConfigEvent::SessionChanged {
                session: session.clone(),
            })
            .await;
        let receivers = self
            .auth_events
            .publish(AuthEvent::StateChanged { session })
            .await;
        if receivers == 0 {
            debug!("Auth state change had no listeners");
        }
    }

    /// Produce a versioned snapshot of all persisted settings
    pub async fn export_config(&self) -> SyncResult<ConfigSnapshot> {
        self.ensure_initialized().await?;
        let state = self.state.read().await;
        Ok(ConfigSnapshot {
            version: state.version,
            timestamp: chrono::Utc::now(),
            supabase: state.supabase.clone(),
            preferences: Preferences {
                custom_status_types: state
                    .status_types
                    .clone()
                    .unwrap_or_else(default_status_types),
            },
            auth: state.session.clone(),
        })
    }

    /// Import a snapshot, applying each section independently.
    ///
    /// A corrupt section is reported in the result and does not prevent
    /// the other sections from being applied.
    pub async fn import_config(&self, data: Value) -> SyncResult<ImportReport> {
        self.ensure_initialized().await?;

        let Some(object) = data.as_object() else {
            return Err(validation_failed("Import data must be a JSON object"));
        };

        let mut report = ImportReport::default();

        if let Some(section) = object.get("supabase").filter(|v| !v.is_null()) {
            let outcome = match serde_json::from_value::<SupabaseConfig>(section.clone()) {
                Ok(config) => self.set_supabase_config(&config.url, &config.anon_key).await,
                Err(e) => Err(validation_failed(format!("malformed backend config: {}", e))),
            };
            Self::record(&mut report, "supabase", outcome);
        }

        if let Some(section) = object.get("preferences").filter(|v| !v.is_null()) {
            let outcome = match serde_json::from_value::<Preferences>(section.clone()) {
                Ok(prefs) => self.set_custom_status_types(prefs.custom_status_types).await,
                Err(e) => Err(validation_failed(format!("malformed preferences: {}", e))),
            };
            Self::record(&mut report, "preferences", outcome);
        }

        if let Some(section) = object.get("auth").filter(|v| !v.is_null()) {
            let outcome = match serde_json::from_value::<AuthSession>(section.clone()) {
                Ok(session) => self.set_auth_session(session).await,
                Err(e) => Err(validation_failed(format!("malformed session: {}", e))),
            };
            Self::record(&mut report, "auth", outcome);
        }

        Ok(report)
    }

    fn record(report: &mut ImportReport, section: &'static str, outcome: SyncResult<()>) {
        match outcome {
            Ok(()) => report.applied.push(section),
            Err(e) => report.rejected.push((section.to_string(), e.message)),
        }
    }
}
