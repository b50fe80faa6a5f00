use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sync::{
    InMemoryStateStore, InMemoryTransport, SyncCoordinator, SyncStateStore, SyncTransport,
    SyncTuning,
};

/// One live session per (stream, user) pair
type SessionMap = HashMap<(Uuid, Uuid), Arc<SyncCoordinator>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn SyncTransport>,
    pub state_store: Arc<dyn SyncStateStore>,
    pub tuning: SyncTuning,
    pub sessions: Arc<RwLock<SessionMap>>,
}

impl AppState {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        state_store: Arc<dyn SyncStateStore>,
        tuning: SyncTuning,
    ) -> Self {
        Self {
            transport,
            state_store,
            tuning,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// State wired to in-process transport and store, for tests and
    /// single-node deployments
    pub fn in_memory(tuning: SyncTuning) -> Self {
        Self::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(InMemoryStateStore::new()),
            tuning,
        )
    }

    /// Number of live sessions attached to a stream
    pub async fn participant_count(&self, stream_id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .keys()
            .filter(|(sid, _)| *sid == stream_id)
            .count()
    }
}
