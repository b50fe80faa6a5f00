use std::collections::HashMap;
use std::sync::Mutex;

use futures::StreamExt;
use redis::Client as RedisClient;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::db::PlaybackEventStore;
use crate::error::AppResult;
use crate::models::{PlaybackEvent, PlaybackState};

/// Realtime publish/subscribe transport for playback events.
///
/// The transport is assumed to be at-least-once, possibly out of order and
/// possibly duplicated; the event manager layers deduplication and
/// chronological replay on top, so implementations stay simple.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync {
    /// Persists and broadcasts one playback event to every subscriber of its stream
    async fn publish(&self, event: &PlaybackEvent) -> AppResult<()>;

    /// Opens a subscription for a stream; delivered events arrive on the receiver
    async fn subscribe(&self, stream_id: Uuid)
        -> AppResult<mpsc::UnboundedReceiver<PlaybackEvent>>;
}

/// Out-of-band store of each stream's last known host playback state.
///
/// Backs `request_sync`/`force_sync`: participants that look stale re-read the
/// host state from here instead of waiting for the next broadcast.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Records a host state snapshot; fire-and-forget
    fn put_state(&self, stream_id: Uuid, state: &PlaybackState);

    /// Fetches the last recorded host state for a stream
    async fn get_state(&self, stream_id: Uuid) -> AppResult<Option<PlaybackState>>;
}

fn channel_name(stream_id: Uuid) -> String {
    format!("playback:{}", stream_id)
}

/// Redis pub/sub transport with durable event rows in PostgreSQL.
///
/// `publish` inserts the event row first, then fans out over the stream's
/// pub/sub channel. The insert is the authoritative write: a row that
/// persisted but failed to fan out can still be recovered through a resync.
#[derive(Clone)]
pub struct RedisSyncTransport {
    redis_client: RedisClient,
    event_store: PlaybackEventStore,
}

impl RedisSyncTransport {
    pub fn new(redis_client: RedisClient, event_store: PlaybackEventStore) -> Self {
        Self {
            redis_client,
            event_store,
        }
    }
}

#[async_trait::async_trait]
impl SyncTransport for RedisSyncTransport {
    async fn publish(&self, event: &PlaybackEvent) -> AppResult<()> {
        self.event_store.insert_event(event).await?;

        let payload = serde_json::to_string(event)
            .map_err(|e| crate::error::AppError::Internal(format!("Event serialization: {}", e)))?;

        let mut conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await?;
        let _: () = redis::cmd("PUBLISH")
            .arg(channel_name(event.stream_id))
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            event_id = %event.event_id,
            stream_id = %event.stream_id,
            event_type = %event.event_type,
            "Published playback event"
        );

        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: Uuid,
    ) -> AppResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        let mut pubsub = self.redis_client.get_async_pubsub().await?;
        pubsub.subscribe(channel_name(stream_id)).await?;

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable pub/sub payload, skipping");
                        continue;
                    }
                };

                match serde_json::from_str::<PlaybackEvent>(&payload) {
                    Ok(event) => {
                        // Receiver dropped means the session ended
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed playback event on channel, skipping");
                    }
                }
            }
            tracing::debug!(stream_id = %stream_id, "Pub/sub listener stopped");
        });

        Ok(rx)
    }
}

/// Single-process transport over a tokio broadcast bus per stream.
///
/// Used by integration tests and single-node deployments where every
/// participant lives in the same process. Subscribers joining late miss
/// earlier events, matching the semantics of the networked transport.
#[derive(Default)]
pub struct InMemoryTransport {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<PlaybackEvent>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, stream_id: Uuid) -> broadcast::Sender<PlaybackEvent> {
        let mut channels = self.channels.lock().expect("transport channel map poisoned");
        channels
            .entry(stream_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    /// Number of live subscribers for a stream
    pub fn subscriber_count(&self, stream_id: Uuid) -> usize {
        let channels = self.channels.lock().expect("transport channel map poisoned");
        channels
            .get(&stream_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl SyncTransport for InMemoryTransport {
    async fn publish(&self, event: &PlaybackEvent) -> AppResult<()> {
        // No subscribers is not a failure: the host may be alone in the room
        let _ = self.sender_for(event.stream_id).send(event.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: Uuid,
    ) -> AppResult<mpsc::UnboundedReceiver<PlaybackEvent>> {
        let mut bus_rx = self.sender_for(stream_id).subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "In-memory subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

/// In-memory state store counterpart to [`InMemoryTransport`]
#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<Uuid, PlaybackState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SyncStateStore for InMemoryStateStore {
    fn put_state(&self, stream_id: Uuid, state: &PlaybackState) {
        let mut states = self.states.lock().expect("state map poisoned");
        states.insert(stream_id, state.clone());
    }

    async fn get_state(&self, stream_id: Uuid) -> AppResult<Option<PlaybackState>> {
        let states = self.states.lock().expect("state map poisoned");
        Ok(states.get(&stream_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaybackEventType;

    #[test]
    fn test_channel_name_format() {
        let id = Uuid::parse_str("3f9c2a10-1111-4222-8333-944455556666").unwrap();
        assert_eq!(
            channel_name(id),
            "playback:3f9c2a10-1111-4222-8333-944455556666"
        );
    }

    #[tokio::test]
    async fn test_in_memory_transport_delivers_to_subscriber() {
        let transport = InMemoryTransport::new();
        let stream_id = Uuid::new_v4();

        let mut rx = transport.subscribe(stream_id).await.unwrap();

        let event = PlaybackEvent::new(
            stream_id,
            Uuid::new_v4(),
            PlaybackEventType::Play,
            5.0,
            None,
        );
        transport.publish(&event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, event.event_id);
    }

    #[tokio::test]
    async fn test_in_memory_transport_isolates_streams() {
        let transport = InMemoryTransport::new();
        let stream_a = Uuid::new_v4();
        let stream_b = Uuid::new_v4();

        let mut rx_a = transport.subscribe(stream_a).await.unwrap();
        let mut rx_b = transport.subscribe(stream_b).await.unwrap();

        let event = PlaybackEvent::new(stream_a, Uuid::new_v4(), PlaybackEventType::Pause, 0.0, None);
        transport.publish(&event).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().event_id, event.event_id);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_in_memory_transport_publish_without_subscribers_is_ok() {
        let transport = InMemoryTransport::new();
        let event = PlaybackEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PlaybackEventType::Seek,
            30.0,
            None,
        );
        assert!(transport.publish(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_state_store_roundtrip() {
        let store = InMemoryStateStore::new();
        let stream_id = Uuid::new_v4();

        assert_eq!(store.get_state(stream_id).await.unwrap(), None);

        let state = PlaybackState {
            current_time: 12.0,
            is_playing: true,
            ..PlaybackState::default()
        };
        store.put_state(stream_id, &state);

        assert_eq!(store.get_state(stream_id).await.unwrap(), Some(state));
    }
}
