use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Export modules
pub mod auth;
pub mod bookmarks;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod supabase;

#[cfg(test)]
mod tests;

// Re-export core components
pub use crate::auth::{AuthEvent, AuthFlow, AuthService, AuthSession, AuthState, SessionUser};
pub use crate::bookmarks::{
    Bookmark, BookmarkEvent, BookmarkFilter, BookmarkService, BookmarkStats, UserService,
};
pub use crate::config::{ConfigEvent, ConfigManager, Preferences, SupabaseConfig};
pub use crate::engine::SyncEngine;
pub use crate::error::{
    ErrorCategory, ErrorCode, ErrorReporter, ErrorSeverity, SyncError, SyncResult,
};
pub use crate::events::EventBus;
pub use crate::supabase::{RealtimeManager, SupabaseClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize structured logging for hosts that don't bring their own
/// subscriber. Respects `RUST_LOG`; quiet by default in release builds.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "forgetfulme=debug,warn".into()
        } else {
            "forgetfulme=info,warn".into()
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
