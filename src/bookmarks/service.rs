use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::bookmarks::{Bookmark, BookmarkFilter, BookmarkStats};
use crate::common::inflight::Inflight;
use crate::common::retry::retry_on_retryable;
use crate::common::validation::{validate_input, InputKind};
use crate::config::{ConfigManager, Preferences};
use crate::error::{
    request_failed, row_not_found, validation_failed, ErrorCode, ErrorReporter, SyncError,
    SyncResult,
};
use crate::supabase::{SupabaseClient, TABLE_BOOKMARKS, TABLE_USER_PROFILES};

const RETRY_ATTEMPTS: usize = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

fn not_signed_in() -> SyncError {
    SyncError::new(ErrorCode::AuthFailed)
        .message("User is not authenticated")
        .build()
}

/// CRUD over the user's bookmark rows.
///
/// Every backend call goes through category-driven retry and the error
/// reporter, so transient network and database failures are retried and
/// user-relevant failures come back with a friendly message.
pub struct BookmarkService {
    client: Arc<SupabaseClient>,
    config: Arc<ConfigManager>,
    reporter: Arc<ErrorReporter>,
    stats_inflight: Inflight<BookmarkStats>,
}

impl BookmarkService {
    pub fn new(
        client: Arc<SupabaseClient>,
        config: Arc<ConfigManager>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            client,
            config,
            reporter,
            stats_inflight: Inflight::new("bookmark-stats"),
        }
    }

    async fn user_id(&self) -> SyncResult<String> {
        match self.config.auth_session().await? {
            Some(session) => Ok(session.user.id),
            None => Err(not_signed_in()),
        }
    }

    /// Save a bookmark, merging with an existing row for the same page.
    ///
    /// The conflict target is the `(user_id, url)` unique constraint, so
    /// re-marking a page updates its status instead of duplicating it.
    pub async fn save(&self, bookmark: Bookmark) -> SyncResult<Bookmark> {
        let url_check = validate_input(&bookmark.url, InputKind::Url);
        if !url_check.is_valid {
            return Err(validation_failed(url_check.message));
        }
        let title_check = validate_input(&bookmark.title, InputKind::Text);
        if !title_check.is_valid {
            return Err(validation_failed("Please provide a title"));
        }
        let statuses = self.config.custom_status_types().await?;
        if !statuses.contains(&bookmark.status) {
            return Err(validation_failed(format!(
                "Unknown status type '{}'",
                bookmark.status
            )));
        }

        let mut row = bookmark;
        row.user_id = Some(self.user_id().await?);
        let value = serde_json::to_value(&row).map_err(|e| request_failed("bookmarks.save", e))?;

        self.reporter
            .run("bookmarks.save", || {
                retry_on_retryable(
                    || async {
                        let rows = self
                            .client
                            .upsert(TABLE_BOOKMARKS, value.clone(), Some("user_id,url"))
                            .await?;
                        first_bookmark(rows)
                    },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "bookmarks.save",
                )
            })
            .await
    }

    /// List the user's bookmarks, optionally narrowed by status and a
    /// title/URL substring query
    pub async fn list(&self, filter: &BookmarkFilter) -> SyncResult<Vec<Bookmark>> {
        let user_id = self.user_id().await?;

        let mut filters: Vec<(&str, &str)> = vec![("user_id", user_id.as_str())];
        if let Some(status) = &filter.status {
            filters.push(("status", status.as_str()));
        }

        let rows = self
            .reporter
            .run("bookmarks.list", || {
                retry_on_retryable(
                    || async { self.client.select(TABLE_BOOKMARKS, "*", &filters).await },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "bookmarks.list",
                )
            })
            .await?;

        let mut bookmarks: Vec<Bookmark> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<Bookmark>(row) {
                Ok(bookmark) => Some(bookmark),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed bookmark row");
                    None
                }
            })
            .collect();

        if let Some(query) = &filter.query {
            let needle = query.to_lowercase();
            bookmarks.retain(|b| {
                b.title.to_lowercase().contains(&needle) || b.url.to_lowercase().contains(&needle)
            });
        }
        if let Some(limit) = filter.limit {
            bookmarks.truncate(limit);
        }

        Ok(bookmarks)
    }

    /// Look up the bookmark for a specific page, if it was ever marked
    pub async fn find_by_url(&self, url: &str) -> SyncResult<Option<Bookmark>> {
        let user_id = self.user_id().await?;
        let filters = [("user_id", user_id.as_str()), ("url", url)];

        let rows = self
            .reporter
            .run("bookmarks.findByUrl", || {
                retry_on_retryable(
                    || async { self.client.select(TABLE_BOOKMARKS, "*", &filters).await },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "bookmarks.findByUrl",
                )
            })
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| serde_json::from_value(row).ok()))
    }

    /// Change the status label of an existing bookmark
    pub async fn set_status(&self, id: &str, status: &str) -> SyncResult<Bookmark> {
        let statuses = self.config.custom_status_types().await?;
        if !statuses.iter().any(|s| s == status) {
            return Err(validation_failed(format!("Unknown status type '{}'", status)));
        }

        let user_id = self.user_id().await?;
        let filters = [("id", id), ("user_id", user_id.as_str())];
        let patch = json!({
            "status": status,
            "updated_at": chrono::Utc::now(),
        });

        self.reporter
            .run("bookmarks.setStatus", || {
                retry_on_retryable(
                    || async {
                        let rows = self
                            .client
                            .update(TABLE_BOOKMARKS, patch.clone(), &filters)
                            .await?;
                        first_bookmark(rows)
                    },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "bookmarks.setStatus",
                )
            })
            .await
    }

    /// Delete a bookmark owned by the signed-in user
    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        let user_id = self.user_id().await?;
        let filters = [("id", id), ("user_id", user_id.as_str())];

        self.reporter
            .run("bookmarks.delete", || {
                retry_on_retryable(
                    || async { self.client.delete(TABLE_BOOKMARKS, &filters).await },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "bookmarks.delete",
                )
            })
            .await
    }

    /// Per-status counts across all of the user's bookmarks.
    ///
    /// Concurrent calls share one backend read; the result is never
    /// cached past the request itself.
    pub async fn stats(&self) -> SyncResult<BookmarkStats> {
        let user_id = self.user_id().await?;
        let client = Arc::clone(&self.client);

        self.stats_inflight
            .run("getBookmarkStats", move || async move {
                let rows = client
                    .select(TABLE_BOOKMARKS, "status", &[("user_id", user_id.as_str())])
                    .await?;

                let mut by_status: HashMap<String, usize> = HashMap::new();
                for row in &rows {
                    if let Some(status) = row.get("status").and_then(Value::as_str) {
                        *by_status.entry(status.to_string()).or_insert(0) += 1;
                    }
                }
                Ok(BookmarkStats {
                    total: rows.len(),
                    by_status,
                })
            })
            .await
    }
}

fn first_bookmark(rows: Vec<Value>) -> SyncResult<Bookmark> {
    let row = rows.into_iter().next().ok_or_else(|| row_not_found(TABLE_BOOKMARKS))?;
    serde_json::from_value(row).map_err(|e| request_failed("bookmarks", e))
}

/// Profile-backed user preferences.
///
/// Reads are de-duplicated: any calls that arrive while a fetch is in
/// flight await the same backend request.
pub struct UserService {
    client: Arc<SupabaseClient>,
    config: Arc<ConfigManager>,
    reporter: Arc<ErrorReporter>,
    prefs_inflight: Inflight<Preferences>,
}

impl UserService {
    pub fn new(
        client: Arc<SupabaseClient>,
        config: Arc<ConfigManager>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            client,
            config,
            reporter,
            prefs_inflight: Inflight::new("user-preferences"),
        }
    }

    async fn user_id(&self) -> SyncResult<String> {
        match self.config.auth_session().await? {
            Some(session) => Ok(session.user.id),
            None => Err(not_signed_in()),
        }
    }

    /// Fetch the user's synchronized preferences, falling back to the
    /// locally configured status types when no profile row exists yet
    pub async fn get_user_preferences(&self) -> SyncResult<Preferences> {
        let user_id = self.user_id().await?;
        let client = Arc::clone(&self.client);
        let config = Arc::clone(&self.config);

        self.prefs_inflight
            .run("getUserPreferences", move || async move {
                let rows = client
                    .select(TABLE_USER_PROFILES, "*", &[("id", user_id.as_str())])
                    .await?;

                match rows.into_iter().next() {
                    Some(row) => match row.get("preferences") {
                        Some(prefs) => match serde_json::from_value(prefs.clone()) {
                            Ok(prefs) => Ok(prefs),
                            Err(e) => {
                                warn!(error = %e, "Malformed profile preferences, using local");
                                local_preferences(&config).await
                            }
                        },
                        None => local_preferences(&config).await,
                    },
                    None => local_preferences(&config).await,
                }
            })
            .await
    }

    /// Persist preferences to the profile row and mirror them locally
    pub async fn save_user_preferences(&self, preferences: Preferences) -> SyncResult<()> {
        let user_id = self.user_id().await?;
        let row = json!({
            "id": user_id,
            "preferences": serde_json::to_value(&preferences)
                .map_err(|e| request_failed("users.savePreferences", e))?,
        });

        self.reporter
            .run("users.savePreferences", || {
                retry_on_retryable(
                    || async {
                        self.client
                            .upsert(TABLE_USER_PROFILES, row.clone(), Some("id"))
                            .await
                            .map(|_| ())
                    },
                    RETRY_ATTEMPTS,
                    RETRY_BASE_DELAY,
                    "users.savePreferences",
                )
            })
            .await?;

        self.config
            .set_custom_status_types(preferences.custom_status_types)
            .await
    }
}

async fn local_preferences(config: &ConfigManager) -> SyncResult<Preferences> {
    Ok(Preferences {
        custom_status_types: config.custom_status_types().await?,
    })
}
