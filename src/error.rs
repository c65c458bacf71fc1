use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Structured error type for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    /// Error code for programmatic handling
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional context for additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Severity level
    pub severity: ErrorSeverity,
    /// Error category for retry policies and user-visibility decisions
    pub category: ErrorCategory,
    /// Unique identifier for this error instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

/// Result type used throughout the crate
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Create a new error builder with the specified error code
    pub fn new(code: ErrorCode) -> SyncErrorBuilder {
        SyncErrorBuilder {
            code,
            message: String::new(),
            context: None,
            severity: code.default_category().default_severity(),
            category: code.default_category(),
            error_id: None,
        }
    }

    /// Classify a foreign error (storage failure, transport error, backend
    /// body without a recognized shape) into a structured error.
    ///
    /// Classification is an ordered substring rule list over the raw
    /// message (case-sensitive), plus the optional backend `code` field for
    /// auth errors. The first matching category wins. The `context` string
    /// only participates in the interface-surface rule.
    pub fn from_foreign(
        message: impl Into<String>,
        code: Option<&str>,
        context: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let context = context.into();
        let category = classify_message(&message, code, &context);

        SyncError {
            code: category.fallback_code(),
            message,
            context: if context.is_empty() {
                None
            } else {
                Some(context)
            },
            severity: category.default_severity(),
            category,
            error_id: None,
        }
    }

    /// Attach or replace the context string
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Determine the category for a raw error message.
///
/// Precedence: Network, then Auth, then Validation, then Database, then
/// Config, then Ui (by context), then Unknown. Overlapping keywords
/// resolve by this order, so "auth network timeout" classifies as Network.
fn classify_message(message: &str, code: Option<&str>, context: &str) -> ErrorCategory {
    const NETWORK: &[&str] = &["fetch", "network", "timeout"];
    const AUTH: &[&str] = &[
        "authenticated",
        "JWT",
        "refresh_token",
        "Invalid login credentials",
    ];
    const AUTH_CODES: &[&str] = &["PGRST116", "invalid_grant"];
    const VALIDATION: &[&str] = &["validation", "invalid input", "required"];
    const DATABASE: &[&str] = &["database", "relation", "PGRST", "constraint"];
    const CONFIG: &[&str] = &["configuration", "not configured", "missing config"];

    if NETWORK.iter().any(|s| message.contains(s)) {
        ErrorCategory::Network
    } else if AUTH.iter().any(|s| message.contains(s))
        || code.is_some_and(|c| AUTH_CODES.contains(&c))
    {
        ErrorCategory::Auth
    } else if VALIDATION.iter().any(|s| message.contains(s)) {
        ErrorCategory::Validation
    } else if DATABASE.iter().any(|s| message.contains(s)) {
        ErrorCategory::Database
    } else if CONFIG.iter().any(|s| message.contains(s)) {
        ErrorCategory::Config
    } else if context.contains("ui.") {
        ErrorCategory::Ui
    } else {
        ErrorCategory::Unknown
    }
}

/// Builder for creating SyncError instances
pub struct SyncErrorBuilder {
    code: ErrorCode,
    message: String,
    context: Option<String>,
    severity: ErrorSeverity,
    category: ErrorCategory,
    error_id: Option<String>,
}

impl SyncErrorBuilder {
    /// Set the error message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the error context
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the error severity
    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the error category
    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// Build the final SyncError
    pub fn build(self) -> SyncError {
        SyncError {
            code: self.code,
            message: self.message,
            context: self.context,
            severity: self.severity,
            category: self.category,
            error_id: self.error_id,
        }
    }
}

/// Error codes for different types of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // General errors
    Unknown,
    Internal,

    // Configuration related errors
    ConfigInvalid,
    ConfigMissing,
    StorageFailed,

    // Input validation errors
    ValidationFailed,

    // Authentication errors
    AuthFailed,
    SessionExpired,
    RefreshFailed,
    VerificationPending,

    // Network errors
    RequestFailed,
    NetworkTimeout,
    ConnectionLost,

    // Database errors
    DatabaseFailed,
    RowNotFound,

    // Realtime channel errors
    RealtimeConnectFailed,
    RealtimeSendFailed,

    // Event bus errors
    EventPublishFailed,

    // Host interface errors
    InterfaceFailed,
}

impl ErrorCode {
    /// The category this code belongs to when no explicit category is given
    pub fn default_category(&self) -> ErrorCategory {
        match self {
            ErrorCode::Unknown | ErrorCode::Internal | ErrorCode::EventPublishFailed => {
                ErrorCategory::Unknown
            }
            ErrorCode::ConfigInvalid | ErrorCode::ConfigMissing | ErrorCode::StorageFailed => {
                ErrorCategory::Config
            }
            ErrorCode::ValidationFailed => ErrorCategory::Validation,
            ErrorCode::AuthFailed
            | ErrorCode::SessionExpired
            | ErrorCode::RefreshFailed
            | ErrorCode::VerificationPending => ErrorCategory::Auth,
            ErrorCode::RequestFailed
            | ErrorCode::NetworkTimeout
            | ErrorCode::ConnectionLost
            | ErrorCode::RealtimeConnectFailed
            | ErrorCode::RealtimeSendFailed => ErrorCategory::Network,
            ErrorCode::DatabaseFailed | ErrorCode::RowNotFound => ErrorCategory::Database,
            ErrorCode::InterfaceFailed => ErrorCategory::Ui,
        }
    }
}

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Cosmetic issues that don't impact sync correctness
    Low,
    /// Errors that impact one operation but allow continued use
    Medium,
    /// Errors that block the user until acted upon
    High,
    /// Errors that prevent the engine from functioning at all
    Critical,
}

/// Error categories driving retry and user-visibility policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport failures, timeouts - transient, retryable
    Network,
    /// Authentication/authorization failures - retryable after refresh
    Auth,
    /// Bad user input - not retryable without input changes
    Validation,
    /// Backend table/query failures - retryable
    Database,
    /// Missing or malformed engine configuration - not retryable
    Config,
    /// Errors raised by a host surface - logged only
    Ui,
    /// Anything that matched no rule
    Unknown,
}

impl ErrorCategory {
    /// Returns true if errors in this category are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Database | Self::Auth => true,
            Self::Validation | Self::Config | Self::Ui | Self::Unknown => false,
        }
    }

    /// Default severity assigned during classification
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            Self::Auth | Self::Config => ErrorSeverity::High,
            Self::Ui => ErrorSeverity::Low,
            Self::Network | Self::Validation | Self::Database | Self::Unknown => {
                ErrorSeverity::Medium
            }
        }
    }

    /// The generic code used when classification has nothing more specific
    fn fallback_code(&self) -> ErrorCode {
        match self {
            Self::Network => ErrorCode::RequestFailed,
            Self::Auth => ErrorCode::AuthFailed,
            Self::Validation => ErrorCode::ValidationFailed,
            Self::Database => ErrorCode::DatabaseFailed,
            Self::Config => ErrorCode::ConfigInvalid,
            Self::Ui => ErrorCode::InterfaceFailed,
            Self::Unknown => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "{}: {} ({})", self.code, self.message, context)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigMissing => "CONFIG_MISSING",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::RefreshFailed => "REFRESH_FAILED",
            ErrorCode::VerificationPending => "VERIFICATION_PENDING",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::DatabaseFailed => "DATABASE_FAILED",
            ErrorCode::RowNotFound => "ROW_NOT_FOUND",
            ErrorCode::RealtimeConnectFailed => "REALTIME_CONNECT_FAILED",
            ErrorCode::RealtimeSendFailed => "REALTIME_SEND_FAILED",
            ErrorCode::EventPublishFailed => "EVENT_PUBLISH_FAILED",
            ErrorCode::InterfaceFailed => "INTERFACE_FAILED",
        };
        write!(f, "{}", code)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Auth => write!(f, "Auth"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Database => write!(f, "Database"),
            ErrorCategory::Config => write!(f, "Config"),
            ErrorCategory::Ui => write!(f, "Ui"),
            ErrorCategory::Unknown => write!(f, "Unknown"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::from_foreign(err.to_string(), None, "")
    }
}

// Utility functions to create errors

/// Create a validation failed error carrying a user-facing message
pub fn validation_failed(message: impl Into<String>) -> SyncError {
    SyncError::new(ErrorCode::ValidationFailed)
        .message(message)
        .build()
}

/// Create a config invalid error
pub fn config_invalid(key: &str, reason: &str) -> SyncError {
    SyncError::new(ErrorCode::ConfigInvalid)
        .message(format!("Invalid configuration value for '{}'", key))
        .context(reason.to_string())
        .build()
}

/// Create a config missing error
pub fn config_missing(key: &str) -> SyncError {
    SyncError::new(ErrorCode::ConfigMissing)
        .message(format!("Required configuration key '{}' is missing", key))
        .build()
}

/// Create a storage failed error
pub fn storage_failed(err: impl fmt::Display) -> SyncError {
    SyncError::new(ErrorCode::StorageFailed)
        .message("Settings storage operation failed")
        .context(err.to_string())
        .build()
}

/// Create an authentication failed error
pub fn auth_failed(reason: impl fmt::Display) -> SyncError {
    SyncError::new(ErrorCode::AuthFailed)
        .message("Authentication failed")
        .context(reason.to_string())
        .build()
}

/// Create a session expired error
pub fn session_expired() -> SyncError {
    SyncError::new(ErrorCode::SessionExpired)
        .message("Session has expired")
        .build()
}

/// Create a request failed error
pub fn request_failed(operation: &str, err: impl fmt::Display) -> SyncError {
    SyncError::new(ErrorCode::RequestFailed)
        .message(format!("Request '{}' failed", operation))
        .context(err.to_string())
        .build()
}

/// Create a network timeout error
pub fn network_timeout(operation: &str) -> SyncError {
    SyncError::new(ErrorCode::NetworkTimeout)
        .message(format!("Network timeout during '{}'", operation))
        .build()
}

/// Create a database failed error
pub fn database_failed(table: &str, err: impl fmt::Display) -> SyncError {
    SyncError::new(ErrorCode::DatabaseFailed)
        .message(format!("Operation on '{}' failed", table))
        .context(err.to_string())
        .build()
}

/// Create a row not found error
pub fn row_not_found(table: &str) -> SyncError {
    SyncError::new(ErrorCode::RowNotFound)
        .message(format!("No matching row in '{}'", table))
        .build()
}

/// Create a realtime connect failed error
pub fn realtime_connect_failed(err: impl fmt::Display) -> SyncError {
    SyncError::new(ErrorCode::RealtimeConnectFailed)
        .message("Failed to connect realtime channel")
        .context(err.to_string())
        .severity(ErrorSeverity::Medium)
        .build()
}

/// Outcome of assessing an error against the handling policy
#[derive(Debug, Clone)]
pub struct Handled {
    /// The assessed error
    pub error: SyncError,
    /// Friendly text suitable for a host surface
    pub user_message: String,
    /// Whether a caller should retry the failed operation
    pub should_retry: bool,
    /// Whether the error should be surfaced to the user
    pub should_show_to_user: bool,
}

/// Central error handling policy: logging, user messages, retry and
/// visibility decisions. One reporter per engine, injected where needed.
pub struct ErrorReporter {
    registry: Arc<ErrorRegistry>,
    /// Suppress log output (used by hosts that log on their own)
    silent: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ErrorRegistry::new(200)),
            silent: false,
        }
    }

    /// Create a reporter that skips the logging side effect
    pub fn silent() -> Self {
        Self {
            registry: Arc::new(ErrorRegistry::new(200)),
            silent: true,
        }
    }

    /// Access the error statistics registry
    pub fn registry(&self) -> Arc<ErrorRegistry> {
        Arc::clone(&self.registry)
    }

    /// Decide retry and visibility for an error without side effects
    pub fn assess(&self, error: &SyncError) -> Handled {
        let should_retry = error.category.is_retryable();
        let should_show_to_user = matches!(
            error.category,
            ErrorCategory::Config | ErrorCategory::Validation | ErrorCategory::Auth
        ) || error.severity >= ErrorSeverity::High;

        Handled {
            error: error.clone(),
            user_message: user_message(error),
            should_retry,
            should_show_to_user,
        }
    }

    /// Assess an error, log it, and record it in the registry
    pub async fn handle(&self, error: SyncError, source: &str) -> Handled {
        let error = self.registry.register(error, Some(source)).await;

        if !self.silent {
            match error.severity {
                ErrorSeverity::Critical | ErrorSeverity::High => {
                    error!(source = source, error = %error, "Operation failed");
                }
                ErrorSeverity::Medium => {
                    warn!(source = source, error = %error, "Operation failed");
                }
                ErrorSeverity::Low => {
                    debug!(source = source, error = %error, "Operation failed");
                }
            }
        }

        self.assess(&error)
    }

    /// Run an operation through the handling policy.
    ///
    /// On failure, errors the user should see are returned with the
    /// friendly message promoted into `message` (the raw message moves to
    /// `context`); all other errors are returned unchanged so callers can
    /// still match on the original code and text.
    pub async fn run<T, F, Fut>(&self, source: &str, op: F) -> SyncResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(err) => {
                let handled = self.handle(err, source).await;
                if handled.should_show_to_user {
                    let mut shown = handled.error;
                    let raw = std::mem::replace(&mut shown.message, handled.user_message);
                    if shown.context.is_none() {
                        shown.context = Some(raw);
                    }
                    Err(shown)
                } else {
                    Err(handled.error)
                }
            }
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an error to the friendly text a host surface should display
pub fn user_message(error: &SyncError) -> String {
    match error.code {
        ErrorCode::SessionExpired | ErrorCode::RefreshFailed => {
            "Your session has expired. Please sign in again.".to_string()
        }
        ErrorCode::VerificationPending => {
            "Check your email and confirm your address, then sign in.".to_string()
        }
        ErrorCode::ConfigMissing => {
            "Sync is not configured yet. Add your backend URL and key in settings.".to_string()
        }
        _ => match error.category {
            ErrorCategory::Network => {
                "Connection problem. Check your network and try again.".to_string()
            }
            ErrorCategory::Auth => "Sign-in failed. Check your email and password.".to_string(),
            // Validation messages are written for the user already
            ErrorCategory::Validation => error.message.clone(),
            ErrorCategory::Database => "Could not reach your bookmarks. Try again.".to_string(),
            ErrorCategory::Config => {
                "Sync configuration looks wrong. Review your settings.".to_string()
            }
            ErrorCategory::Ui | ErrorCategory::Unknown => {
                "Something went wrong. Please try again.".to_string()
            }
        },
    }
}

/// Error statistics: counts by code and source plus a bounded history
#[derive(Debug)]
pub struct ErrorRegistry {
    error_counts: RwLock<HashMap<ErrorCode, usize>>,
    source_counts: RwLock<HashMap<String, usize>>,
    error_history: RwLock<VecDeque<SyncError>>,
    max_history: usize,
}

impl ErrorRegistry {
    pub fn new(max_history: usize) -> Self {
        Self {
            error_counts: RwLock::new(HashMap::new()),
            source_counts: RwLock::new(HashMap::new()),
            error_history: RwLock::new(VecDeque::with_capacity(max_history)),
            max_history,
        }
    }

    /// Record an error, assigning it an id if it has none
    pub async fn register(&self, mut error: SyncError, source: Option<&str>) -> SyncError {
        if error.error_id.is_none() {
            let now = chrono::Utc::now();
            error.error_id = Some(format!(
                "err-{}-{}",
                now.timestamp_millis(),
                fastrand::u32(..)
            ));
        }

        {
            let mut counts = self.error_counts.write().await;
            *counts.entry(error.code).or_insert(0) += 1;
        }

        if let Some(src) = source {
            let mut sources = self.source_counts.write().await;
            *sources.entry(src.to_string()).or_insert(0) += 1;
        }

        {
            let mut history = self.error_history.write().await;
            if history.len() >= self.max_history {
                history.pop_front();
            }
            history.push_back(error.clone());
        }

        error
    }

    /// Get count for a specific error code
    pub async fn count(&self, code: ErrorCode) -> usize {
        self.error_counts
            .read()
            .await
            .get(&code)
            .copied()
            .unwrap_or(0)
    }

    /// Get aggregate statistics
    pub async fn stats(&self) -> ErrorStats {
        ErrorStats {
            counts: self.error_counts.read().await.clone(),
            source_counts: self.source_counts.read().await.clone(),
            error_count: self.error_history.read().await.len(),
        }
    }

    /// Get the full error history, oldest first
    pub async fn history(&self) -> Vec<SyncError> {
        self.error_history.read().await.iter().cloned().collect()
    }

    /// Clear all statistics
    pub async fn clear(&self) {
        *self.error_counts.write().await = HashMap::new();
        *self.source_counts.write().await = HashMap::new();
        *self.error_history.write().await = VecDeque::new();
    }
}

/// Snapshot of error statistics for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    pub counts: HashMap<ErrorCode, usize>,
    pub source_counts: HashMap<String, usize>,
    pub error_count: usize,
}
