use serde_json::Value;
use tracing::{info, warn};

use super::store::SettingsStore;
use super::{KEY_STATUS_TYPES, KEY_SUPABASE_CONFIG};

/// Version the stored settings document is migrated up to
pub const CONFIG_VERSION: u32 = 3;

/// Run all migration steps above `from`, returning the version reached.
///
/// A failing step is logged and skipped - settings migrations must never
/// block engine startup. The stored version is bumped past a skipped step
/// so a bad document cannot wedge every launch.
pub async fn run_migrations(store: &dyn SettingsStore, from: u32) -> u32 {
    let mut version = from;

    while version < CONFIG_VERSION {
        let next = version + 1;
        let result = match next {
            2 => migrate_status_types_to_list(store).await,
            3 => drop_partial_backend_config(store).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => info!(version = next, "Applied settings migration"),
            Err(e) => warn!(version = next, error = %e, "Settings migration failed, skipping"),
        }
        version = next;
    }

    version
}

/// v1 -> v2: early builds stored status types as a comma-separated string
async fn migrate_status_types_to_list(store: &dyn SettingsStore) -> anyhow::Result<()> {
    let Some(value) = store.get(KEY_STATUS_TYPES).await? else {
        return Ok(());
    };

    if let Value::String(joined) = value {
        let types: Vec<Value> = joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        store.set(KEY_STATUS_TYPES, Value::Array(types)).await?;
    }

    Ok(())
}

/// v2 -> v3: a backend config missing either field is treated as absent,
/// so stop persisting such halves at all
async fn drop_partial_backend_config(store: &dyn SettingsStore) -> anyhow::Result<()> {
    let Some(value) = store.get(KEY_SUPABASE_CONFIG).await? else {
        return Ok(());
    };

    let url = value.get("url").and_then(Value::as_str).unwrap_or("");
    let anon_key = value.get("anonKey").and_then(Value::as_str).unwrap_or("");
    if url.is_empty() || anon_key.is_empty() {
        store.remove(KEY_SUPABASE_CONFIG).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn legacy_comma_string_becomes_list() {
        let store = MemoryStore::new();
        store
            .set(KEY_STATUS_TYPES, json!("read, revisit-later"))
            .await
            .unwrap();

        let version = run_migrations(&store, 1).await;
        assert_eq!(version, CONFIG_VERSION);
        assert_eq!(
            store.get(KEY_STATUS_TYPES).await.unwrap(),
            Some(json!(["read", "revisit-later"]))
        );
    }

    #[tokio::test]
    async fn partial_backend_config_is_removed() {
        let store = MemoryStore::new();
        store
            .set(KEY_SUPABASE_CONFIG, json!({"url": "https://x.supabase.co"}))
            .await
            .unwrap();

        run_migrations(&store, 2).await;
        assert_eq!(store.get(KEY_SUPABASE_CONFIG).await.unwrap(), None);
    }

    #[tokio::test]
    async fn complete_backend_config_survives() {
        let store = MemoryStore::new();
        let config = json!({"url": "https://x.supabase.co", "anonKey": "eyJabc"});
        store.set(KEY_SUPABASE_CONFIG, config.clone()).await.unwrap();

        run_migrations(&store, 2).await;
        assert_eq!(store.get(KEY_SUPABASE_CONFIG).await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn up_to_date_document_is_untouched() {
        let store = MemoryStore::new();
        let version = run_migrations(&store, CONFIG_VERSION).await;
        assert_eq!(version, CONFIG_VERSION);
        assert!(store.keys().await.unwrap().is_empty());
    }
}
