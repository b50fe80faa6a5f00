use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::PlaybackState;
use crate::sync::SyncStateStore;

/// How long a stored host state stays resyncable after the host goes quiet
const STATE_TTL: u64 = 21_600; // 6 hours in seconds

fn state_key(stream_id: Uuid) -> String {
    format!("sync:state:{}", stream_id)
}

/// Message for asynchronous state snapshot writes
struct StateWriteMessage {
    key: String,
    value: String,
}

/// Redis-backed store of each stream's last known host playback state.
///
/// Writes go through a background task so that publishing a state snapshot
/// never blocks the host's broadcast path; reads (used by `request_sync` and
/// `force_sync`) hit Redis directly.
#[derive(Clone)]
pub struct RedisStateStore {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<StateWriteMessage>,
}

/// Handle for gracefully shutting down the state writer
pub struct StateWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl StateWriterHandle {
    /// Initiates a graceful shutdown of the state writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending snapshot writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("State writer shutdown signal sent");
    }
}

impl RedisStateStore {
    /// Creates a new store and spawns its background write task
    pub fn new(redis_client: Client) -> (Self, StateWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::state_writer_task(client, write_rx, shutdown_rx).await;
        });

        let store = Self {
            redis_client,
            write_tx,
        };

        let handle = StateWriterHandle { shutdown_tx };

        (store, handle)
    }

    /// Background task that processes snapshot write messages
    ///
    /// On shutdown signal, flushes all remaining messages before exiting so a
    /// host's final state survives a server restart.
    async fn state_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<StateWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("State writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write state snapshot to Redis");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("State writer shutting down, flushing remaining writes");

                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush state write during shutdown");
                        }
                    }

                    tracing::info!("State writer task stopped");
                    break;
                }
            }
        }
    }

    /// Writes a single snapshot to Redis
    async fn write_to_redis(client: &Client, msg: StateWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, STATE_TTL).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncStateStore for RedisStateStore {
    /// Queues a host state snapshot for a background write.
    ///
    /// Returns immediately; the snapshot is best-effort, so a dropped write
    /// only means the next resync sees a slightly older state.
    fn put_state(&self, stream_id: Uuid, state: &PlaybackState) {
        let json = match serde_json::to_string(state) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "State snapshot serialization error");
                return;
            }
        };

        let msg = StateWriteMessage {
            key: state_key(stream_id),
            value: json,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send state write message");
        }
    }

    /// Fetches the last known host state for a stream, if any
    async fn get_state(&self, stream_id: Uuid) -> AppResult<Option<PlaybackState>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(state_key(stream_id)).await?;

        match cached {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("State snapshot deserialization error: {}", e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_format() {
        let id = Uuid::parse_str("93c1e4a2-3c1f-4f60-9c1e-0a2b3c4d5e6f").unwrap();
        assert_eq!(
            state_key(id),
            "sync:state:93c1e4a2-3c1f-4f60-9c1e-0a2b3c4d5e6f"
        );
    }
}
