use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bookmarks::{Bookmark, BookmarkEvent};
use crate::config::ConfigManager;
use crate::error::{config_missing, realtime_connect_failed, SyncResult};
use crate::events::EventBus;

/// Seconds between protocol heartbeats keeping the channel alive
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Live change feed for the user's bookmark rows.
///
/// Joins the backend's websocket channel filtered by `user_id` and
/// republishes decoded row changes on the bookmark event bus. A dropped
/// connection ends the feed and is logged; resubscribing is the caller's
/// decision, typically after a fresh sign-in.
pub struct RealtimeManager {
    config: Arc<ConfigManager>,
    events: EventBus<BookmarkEvent>,
    listener: RwLock<Option<JoinHandle<()>>>,
    shutdown: RwLock<Option<mpsc::Sender<()>>>,
}

impl RealtimeManager {
    pub fn new(config: Arc<ConfigManager>, events: EventBus<BookmarkEvent>) -> Self {
        Self {
            config,
            events,
            listener: RwLock::new(None),
            shutdown: RwLock::new(None),
        }
    }

    /// Whether a subscription task is currently running
    pub async fn is_subscribed(&self) -> bool {
        self.listener
            .read()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Open the websocket and join the user's bookmark channel.
    ///
    /// An existing subscription is torn down first.
    pub async fn subscribe(&self, user_id: &str) -> SyncResult<()> {
        self.unsubscribe().await;

        let config = self
            .config
            .supabase_config()
            .await?
            .ok_or_else(|| config_missing("supabaseConfig"))?;

        let ws_url = format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            config.url.replacen("https://", "wss://", 1),
            config.anon_key
        );
        let topic = format!("realtime:public:bookmarks:user_id=eq.{}", user_id);

        let (mut socket, _) = connect_async(&ws_url)
            .await
            .map_err(realtime_connect_failed)?;

        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {},
            "ref": uuid::Uuid::new_v4().to_string(),
        });
        socket
            .send(Message::Text(join.to_string().into()))
            .await
            .map_err(realtime_connect_failed)?;

        info!(topic = %topic, "Joined realtime channel");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown.write().await = Some(shutdown_tx);

        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let (mut sink, mut stream) = socket.split();
            let mut heartbeat = interval(HEARTBEAT_INTERVAL);
            let mut heartbeat_ref: u64 = 2;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Realtime listener shutting down");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    _ = heartbeat.tick() => {
                        heartbeat_ref += 1;
                        let ping = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": heartbeat_ref.to_string(),
                        });
                        if let Err(e) = sink.send(Message::Text(ping.to_string().into())).await {
                            error!(error = %e, "Realtime heartbeat failed, closing feed");
                            break;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = decode_change(&text) {
                                    events.publish(event).await;
                                }
                            }
                            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("Realtime channel closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(error = %e, "Realtime channel errored");
                                break;
                            }
                        }
                    }
                }
            }
        });

        *self.listener.write().await = Some(handle);
        Ok(())
    }

    /// Stop the subscription task, if any
    pub async fn unsubscribe(&self) {
        if let Some(tx) = self.shutdown.write().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.listener.write().await.take() {
            // The task exits on the shutdown signal; aborting covers a
            // listener stuck on a dead socket.
            handle.abort();
        }
    }
}

/// Decode a channel frame into a bookmark event, ignoring protocol
/// chatter (join replies, heartbeat acks, presence frames).
fn decode_change(raw: &str) -> Option<BookmarkEvent> {
    let frame: Value = serde_json::from_str(raw).ok()?;
    let event = frame.get("event")?.as_str()?;
    let payload = frame.get("payload")?;

    match event {
        "INSERT" => {
            let bookmark: Bookmark = serde_json::from_value(payload.get("record")?.clone()).ok()?;
            Some(BookmarkEvent::Created { bookmark })
        }
        "UPDATE" => {
            let bookmark: Bookmark = serde_json::from_value(payload.get("record")?.clone()).ok()?;
            Some(BookmarkEvent::Updated { bookmark })
        }
        "DELETE" => {
            let id = payload
                .get("old_record")?
                .get("id")?
                .as_str()?
                .to_string();
            Some(BookmarkEvent::Deleted { id })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, payload: Value) -> String {
        json!({
            "topic": "realtime:public:bookmarks:user_id=eq.user-1",
            "event": event,
            "payload": payload,
            "ref": null,
        })
        .to_string()
    }

    fn record() -> Value {
        json!({
            "id": "b1",
            "user_id": "user-1",
            "url": "https://example.com",
            "title": "Example",
            "status": "read",
            "tags": [],
        })
    }

    #[test]
    fn insert_frames_decode_to_created_events() {
        let raw = frame("INSERT", json!({"record": record()}));
        match decode_change(&raw) {
            Some(BookmarkEvent::Created { bookmark }) => {
                assert_eq!(bookmark.id.as_deref(), Some("b1"));
                assert_eq!(bookmark.status, "read");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn delete_frames_carry_the_old_row_id() {
        let raw = frame("DELETE", json!({"old_record": {"id": "b9"}}));
        match decode_change(&raw) {
            Some(BookmarkEvent::Deleted { id }) => assert_eq!(id, "b9"),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn protocol_chatter_is_ignored() {
        assert!(decode_change(&frame("phx_reply", json!({"status": "ok"}))).is_none());
        assert!(decode_change("not json").is_none());
        // A change frame with a malformed record is dropped, not fatal.
        let raw = frame("INSERT", json!({"record": {"id": 42}}));
        assert!(decode_change(&raw).is_none());
    }
}
