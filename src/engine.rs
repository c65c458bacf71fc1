use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::auth::{AuthEvent, AuthFlow, AuthService};
use crate::bookmarks::{BookmarkEvent, BookmarkService, UserService};
use crate::config::store::{JsonFileStore, SettingsStore};
use crate::config::{ConfigEvent, ConfigManager};
use crate::error::{ErrorCode, ErrorReporter, SyncError, SyncResult};
use crate::events::{EventBus, EVENT_BUS_CAPACITY};
use crate::supabase::{HttpClient, RealtimeManager, ReqwestHttpClient, SupabaseClient};

/// Composition root wiring the engine's services together.
///
/// Everything is constructed from the injected settings store and HTTP
/// client; there are no process-wide singletons. Host surfaces hold one
/// engine and subscribe to its event buses.
pub struct SyncEngine {
    config: Arc<ConfigManager>,
    auth: Arc<AuthService>,
    auth_flow: AuthFlow,
    bookmarks: Arc<BookmarkService>,
    users: Arc<UserService>,
    realtime: Arc<RealtimeManager>,
    reporter: Arc<ErrorReporter>,
    auth_events: EventBus<AuthEvent>,
    config_events: EventBus<ConfigEvent>,
    bookmark_events: EventBus<BookmarkEvent>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn SettingsStore>, http: Arc<dyn HttpClient>) -> Self {
        let config_events = EventBus::new(EVENT_BUS_CAPACITY);
        let auth_events = EventBus::new(EVENT_BUS_CAPACITY);
        let bookmark_events = EventBus::new(EVENT_BUS_CAPACITY);
        let reporter = Arc::new(ErrorReporter::new());

        let config = Arc::new(ConfigManager::new(
            store,
            config_events.clone(),
            auth_events.clone(),
        ));
        let client = Arc::new(SupabaseClient::new(Arc::clone(&config), http));
        let auth = Arc::new(AuthService::new(Arc::clone(&client), Arc::clone(&config)));
        let auth_flow = AuthFlow::new(Arc::clone(&auth));
        let bookmarks = Arc::new(BookmarkService::new(
            Arc::clone(&client),
            Arc::clone(&config),
            Arc::clone(&reporter),
        ));
        let users = Arc::new(UserService::new(
            Arc::clone(&client),
            Arc::clone(&config),
            Arc::clone(&reporter),
        ));
        let realtime = Arc::new(RealtimeManager::new(
            Arc::clone(&config),
            bookmark_events.clone(),
        ));

        Self {
            config,
            auth,
            auth_flow,
            bookmarks,
            users,
            realtime,
            reporter,
            auth_events,
            config_events,
            bookmark_events,
        }
    }

    /// Engine backed by a JSON settings file and a real HTTP client
    pub fn with_defaults(settings_path: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(JsonFileStore::new(settings_path)),
            Arc::new(ReqwestHttpClient::new()),
        )
    }

    /// Load settings and restore any persisted session
    pub async fn initialize(&self) -> SyncResult<()> {
        info!("Initializing sync engine");
        self.config.ensure_initialized().await?;
        self.auth.restore().await?;
        self.auth_flow.sync_with_service().await;
        Ok(())
    }

    /// Start the live bookmark feed for the signed-in user
    pub async fn start_realtime(&self) -> SyncResult<()> {
        match self.config.auth_session().await? {
            Some(session) => self.realtime.subscribe(&session.user.id).await,
            None => Err(SyncError::new(ErrorCode::AuthFailed)
                .message("User is not authenticated")
                .build()),
        }
    }

    pub async fn stop_realtime(&self) {
        self.realtime.unsubscribe().await;
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn auth_flow(&self) -> &AuthFlow {
        &self.auth_flow
    }

    pub fn bookmarks(&self) -> &Arc<BookmarkService> {
        &self.bookmarks
    }

    pub fn users(&self) -> &Arc<UserService> {
        &self.users
    }

    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    pub fn subscribe_config_events(&self) -> broadcast::Receiver<ConfigEvent> {
        self.config_events.subscribe()
    }

    pub fn subscribe_bookmark_events(&self) -> broadcast::Receiver<BookmarkEvent> {
        self.bookmark_events.subscribe()
    }
}
