use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::BusEvent;

pub mod service;

pub use service::{BookmarkService, UserService};

/// A saved page with its read-status label.
///
/// `id` and `user_id` are assigned by the backend; a bookmark built
/// locally carries neither until it has been saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// One of the user's configured status labels
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Bookmark {
    /// Create an unsaved bookmark
    pub fn new(url: impl Into<String>, title: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: None,
            user_id: None,
            url: url.into(),
            title: title.into(),
            description: None,
            status: status.into(),
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Criteria for listing bookmarks
#[derive(Debug, Clone, Default)]
pub struct BookmarkFilter {
    /// Only bookmarks with this status label
    pub status: Option<String>,
    /// Case-insensitive substring match against title and URL
    pub query: Option<String>,
    pub limit: Option<usize>,
}

/// Per-status bookmark counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
}

/// Row-change notifications from the realtime feed
#[derive(Debug, Clone)]
pub enum BookmarkEvent {
    Created { bookmark: Bookmark },
    Updated { bookmark: Bookmark },
    Deleted { id: String },
}

impl BusEvent for BookmarkEvent {
    fn label(&self) -> &'static str {
        match self {
            BookmarkEvent::Created { .. } => "bookmark-created",
            BookmarkEvent::Updated { .. } => "bookmark-updated",
            BookmarkEvent::Deleted { .. } => "bookmark-deleted",
        }
    }
}
