use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::AppResult;
use crate::models::{
    ConnectionQuality, PlaybackEvent, PlaybackEventType, PlaybackState, PlayerState,
    SessionIdentity, SyncSnapshot, SyncStatus,
};
use crate::sync::event_manager::EventManager;
use crate::sync::player::{compensated_seek_target, PlayerAdapter};
use crate::sync::transport::{SyncStateStore, SyncTransport};

/// Delivery-lag samples kept for connection quality classification
const LAG_SAMPLE_CAP: usize = 20;

/// Timing knobs for the coordinator
#[derive(Debug, Clone, Copy)]
pub struct SyncTuning {
    /// Trailing debounce applied to outgoing host events
    pub debounce: Duration,
    /// Positional drift below this many seconds is left uncorrected
    pub tolerance_secs: f64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            tolerance_secs: 0.5,
        }
    }
}

/// Mutable session state shared between the coordinator and its tasks
struct SyncState {
    playback_state: PlaybackState,
    is_connected: bool,
    sync_status: SyncStatus,
    error: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    lag_samples: VecDeque<i64>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            playback_state: PlaybackState::default(),
            is_connected: false,
            sync_status: SyncStatus::Connecting,
            error: None,
            last_sync_at: None,
            lag_samples: VecDeque::with_capacity(LAG_SAMPLE_CAP),
        }
    }

    fn record_lag(&mut self, lag_ms: i64) {
        if self.lag_samples.len() == LAG_SAMPLE_CAP {
            self.lag_samples.pop_front();
        }
        self.lag_samples.push_back(lag_ms);
    }

    fn quality(&self) -> ConnectionQuality {
        if self.lag_samples.is_empty() {
            return ConnectionQuality::Good;
        }
        let mean = self.lag_samples.iter().sum::<i64>() / self.lag_samples.len() as i64;
        ConnectionQuality::from_mean_lag_ms(mean)
    }
}

/// Ties one session's event manager, player adapter and transport together.
///
/// The host side debounces outgoing playback events and records state
/// snapshots; the participant side applies incoming events to the local
/// player, correcting position only when drift exceeds the tolerance. Both
/// roles run the same coordinator; behavior differences follow entirely from
/// [`SessionIdentity::is_host`].
pub struct SyncCoordinator {
    identity: SessionIdentity,
    transport: Arc<dyn SyncTransport>,
    state_store: Arc<dyn SyncStateStore>,
    adapter: Arc<PlayerAdapter>,
    tuning: SyncTuning,
    manager: Arc<AsyncMutex<EventManager>>,
    state: Arc<RwLock<SyncState>>,
    intent_tx: mpsc::UnboundedSender<PlaybackEvent>,
    intent_task: StdMutex<Option<JoinHandle<()>>>,
    incoming_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Subscribes to the session's stream and spawns the outgoing and
    /// incoming event loops.
    pub async fn connect(
        identity: SessionIdentity,
        transport: Arc<dyn SyncTransport>,
        state_store: Arc<dyn SyncStateStore>,
        adapter: Arc<PlayerAdapter>,
        tuning: SyncTuning,
    ) -> AppResult<Self> {
        let manager = Arc::new(AsyncMutex::new(EventManager::new(transport.clone())));
        let state = Arc::new(RwLock::new(SyncState::new()));

        {
            let state = state.clone();
            adapter.on_error(move |message| {
                let mut s = state.write().expect("sync state lock poisoned");
                s.error = Some(message.to_string());
                s.sync_status = SyncStatus::Error;
            });
        }

        let rx = transport.subscribe(identity.stream_id).await?;
        {
            let mut s = state.write().expect("sync state lock poisoned");
            s.is_connected = true;
            s.sync_status = SyncStatus::Connected;
        }

        let incoming = tokio::spawn(incoming_loop(
            identity,
            rx,
            manager.clone(),
            adapter.clone(),
            state.clone(),
            tuning.tolerance_secs,
        ));

        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let intent = tokio::spawn(intent_loop(
            intent_rx,
            manager.clone(),
            state.clone(),
            tuning.debounce,
        ));

        tracing::info!(
            stream_id = %identity.stream_id,
            user_id = %identity.user_id,
            is_host = identity.is_host,
            "Sync session connected"
        );

        Ok(Self {
            identity,
            transport,
            state_store,
            adapter,
            tuning,
            manager,
            state,
            intent_tx,
            intent_task: StdMutex::new(Some(intent)),
            incoming_task: StdMutex::new(Some(incoming)),
        })
    }

    pub fn identity(&self) -> SessionIdentity {
        self.identity
    }

    /// Emits a host playback action into the debounced outgoing pipeline.
    ///
    /// Non-hosts get a silent no-op (`Ok(false)`): participant player events
    /// are echoes of sync corrections, not intent, and must never propagate.
    /// The local state and the state store are updated optimistically so the
    /// host never waits on its own broadcast.
    pub async fn broadcast_playback_event(
        &self,
        event_type: PlaybackEventType,
        current_time: f64,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<bool> {
        if !self.identity.is_host {
            tracing::debug!(
                user_id = %self.identity.user_id,
                %event_type,
                "Ignoring playback event from non-host"
            );
            return Ok(false);
        }

        // A closed intent channel means the session was shut down; no local
        // or stored state may change after that
        if self.intent_tx.is_closed() {
            return Ok(false);
        }

        let event = PlaybackEvent::new(
            self.identity.stream_id,
            self.identity.user_id,
            event_type,
            current_time,
            metadata,
        );

        let snapshot = {
            let mut s = self.state.write().expect("sync state lock poisoned");
            s.playback_state.current_time = current_time;
            match event_type {
                PlaybackEventType::Play => s.playback_state.is_playing = true,
                PlaybackEventType::Pause => s.playback_state.is_playing = false,
                PlaybackEventType::Seek => {}
            }
            s.playback_state.clone()
        };
        self.state_store.put_state(self.identity.stream_id, &snapshot);

        Ok(self.intent_tx.send(event).is_ok())
    }

    /// Records a full host state snapshot without emitting a discrete event.
    /// Non-hosts get a silent no-op.
    pub fn broadcast_playback_state(&self, playback: &PlaybackState) -> bool {
        if !self.identity.is_host {
            return false;
        }

        {
            let mut s = self.state.write().expect("sync state lock poisoned");
            s.playback_state = playback.clone();
        }
        self.state_store.put_state(self.identity.stream_id, playback);
        true
    }

    /// Re-reads the host state and corrects the local player only if it has
    /// drifted past the tolerance or disagrees on play/pause.
    ///
    /// Returns whether a correction was applied.
    pub async fn request_sync(&self) -> AppResult<bool> {
        let Some(remote) = self.state_store.get_state(self.identity.stream_id).await? else {
            return Ok(false);
        };

        let local_time = match self.adapter.current_time().await {
            Ok(t) => t,
            Err(_) => {
                let s = self.state.read().expect("sync state lock poisoned");
                s.playback_state.current_time
            }
        };
        let local_playing = matches!(
            self.adapter.player_state().await,
            Ok(PlayerState::Playing)
        );

        let drift = (local_time - remote.current_time).abs();
        if drift <= self.tuning.tolerance_secs && local_playing == remote.is_playing {
            return Ok(false);
        }

        tracing::debug!(
            stream_id = %self.identity.stream_id,
            drift,
            "Resyncing drifted player to host state"
        );
        self.apply_state(&remote).await?;
        Ok(true)
    }

    /// Applies the host state unconditionally and clears any sync error.
    ///
    /// Returns `false` only when no host state has been recorded yet.
    pub async fn force_sync(&self) -> AppResult<bool> {
        let Some(remote) = self.state_store.get_state(self.identity.stream_id).await? else {
            return Ok(false);
        };

        self.apply_state(&remote).await?;
        self.clear_error();
        Ok(true)
    }

    async fn apply_state(&self, remote: &PlaybackState) -> AppResult<()> {
        {
            let mut s = self.state.write().expect("sync state lock poisoned");
            s.sync_status = SyncStatus::Syncing;
        }

        let result = self.adapter.sync_to_state(remote).await;

        let mut s = self.state.write().expect("sync state lock poisoned");
        match result {
            Ok(()) => {
                s.playback_state = remote.clone();
                s.sync_status = SyncStatus::Connected;
                s.last_sync_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                s.error = Some(e.to_string());
                s.sync_status = SyncStatus::Error;
                Err(e)
            }
        }
    }

    /// Re-subscribes after a transport outage and flushes the offline queue.
    /// Returns how many queued events were rebroadcast.
    pub async fn reconnect(&self) -> AppResult<usize> {
        // Replace the previous subscription; the old listener would otherwise
        // hold its transport connection until shutdown
        let stale = self
            .incoming_task
            .lock()
            .expect("task handle lock poisoned")
            .take();
        if let Some(handle) = stale {
            handle.abort();
            let _ = handle.await;
        }

        let rx = self.transport.subscribe(self.identity.stream_id).await?;

        {
            let mut s = self.state.write().expect("sync state lock poisoned");
            s.is_connected = true;
            s.sync_status = SyncStatus::Connected;
        }

        let incoming = tokio::spawn(incoming_loop(
            self.identity,
            rx,
            self.manager.clone(),
            self.adapter.clone(),
            self.state.clone(),
            self.tuning.tolerance_secs,
        ));
        *self
            .incoming_task
            .lock()
            .expect("task handle lock poisoned") = Some(incoming);

        let sent = self.manager.lock().await.process_queue().await;
        tracing::info!(
            stream_id = %self.identity.stream_id,
            flushed = sent,
            "Sync session reconnected"
        );
        Ok(sent)
    }

    pub fn clear_error(&self) {
        let mut s = self.state.write().expect("sync state lock poisoned");
        s.error = None;
        if s.sync_status == SyncStatus::Error {
            s.sync_status = if s.is_connected {
                SyncStatus::Connected
            } else {
                SyncStatus::Disconnected
            };
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .read()
            .expect("sync state lock poisoned")
            .is_connected
    }

    /// Point-in-time view of the session for the status API
    pub fn snapshot(&self) -> SyncSnapshot {
        let s = self.state.read().expect("sync state lock poisoned");
        SyncSnapshot {
            playback_state: s.playback_state.clone(),
            is_connected: s.is_connected,
            sync_status: s.sync_status,
            connection_quality: s.quality(),
            last_sync_at: s.last_sync_at,
            error: s.error.clone(),
        }
    }

    /// Tears the session down: destroys the event manager and stops both
    /// event loops. The coordinator is inert afterwards.
    pub async fn shutdown(&self) {
        self.manager.lock().await.destroy();

        let handles = [
            self.intent_task
                .lock()
                .expect("task handle lock poisoned")
                .take(),
            self.incoming_task
                .lock()
                .expect("task handle lock poisoned")
                .take(),
        ];
        for handle in handles.into_iter().flatten() {
            handle.abort();
            let _ = handle.await;
        }

        let mut s = self.state.write().expect("sync state lock poisoned");
        s.is_connected = false;
        s.sync_status = SyncStatus::Disconnected;

        tracing::info!(
            stream_id = %self.identity.stream_id,
            user_id = %self.identity.user_id,
            "Sync session shut down"
        );
    }
}

/// Trailing-edge debounce over outgoing host events.
///
/// Each new intent replaces the pending one and resets the deadline; only the
/// last event of a burst is broadcast. A seek-bar scrub therefore produces a
/// single seek instead of dozens.
async fn intent_loop(
    mut intent_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    manager: Arc<AsyncMutex<EventManager>>,
    state: Arc<RwLock<SyncState>>,
    debounce: Duration,
) {
    let mut pending: Option<PlaybackEvent> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            maybe = intent_rx.recv() => match maybe {
                Some(event) => {
                    pending = Some(event);
                    deadline = Instant::now() + debounce;
                }
                None => break,
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some(event) = pending.take() {
                    dispatch_outgoing(&manager, &state, event).await;
                }
            }
        }
    }

    // Channel closed: flush whatever is still pending
    if let Some(event) = pending.take() {
        dispatch_outgoing(&manager, &state, event).await;
    }
}

/// Publishes one debounced event, distinguishing rate limiting from
/// transport failure.
///
/// Rate-limited events are dropped outright (the next host action supersedes
/// them); transport failures queue the event for the next reconnect and mark
/// the session disconnected.
async fn dispatch_outgoing(
    manager: &AsyncMutex<EventManager>,
    state: &RwLock<SyncState>,
    event: PlaybackEvent,
) {
    let mut mgr = manager.lock().await;

    if !mgr.can_broadcast() {
        tracing::debug!(
            event_id = %event.event_id,
            "Rate ceiling reached, dropping debounced event"
        );
        return;
    }

    if mgr.broadcast_event(event.clone()).await {
        let mut s = state.write().expect("sync state lock poisoned");
        s.is_connected = true;
        s.last_sync_at = Some(Utc::now());
    } else {
        mgr.queue_event(event);
        let mut s = state.write().expect("sync state lock poisoned");
        s.is_connected = false;
        s.sync_status = SyncStatus::Disconnected;
    }
}

/// Applies transport-delivered events to the local player.
///
/// Hosts consume nothing here: their own events echo back through the
/// transport and are filtered both by role and by sender id.
async fn incoming_loop(
    identity: SessionIdentity,
    mut rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    manager: Arc<AsyncMutex<EventManager>>,
    adapter: Arc<PlayerAdapter>,
    state: Arc<RwLock<SyncState>>,
    tolerance_secs: f64,
) {
    while let Some(event) = rx.recv().await {
        if identity.is_host || event.host_user_id == identity.user_id {
            continue;
        }

        let received_at_ms = Utc::now().timestamp_millis();
        let ordered = { manager.lock().await.process_incoming(event) };
        for event in &ordered {
            apply_remote_event(&adapter, &state, tolerance_secs, event, received_at_ms).await;
        }
    }

    let mut s = state.write().expect("sync state lock poisoned");
    s.is_connected = false;
    s.sync_status = SyncStatus::Disconnected;
    tracing::debug!(stream_id = %identity.stream_id, "Incoming event loop stopped");
}

/// Drives the local player to match one host event.
///
/// Explicit seeks always reposition (with lag compensation); play and pause
/// only reposition when the local player has drifted past the tolerance.
async fn apply_remote_event(
    adapter: &PlayerAdapter,
    state: &RwLock<SyncState>,
    tolerance_secs: f64,
    event: &PlaybackEvent,
    received_at_ms: i64,
) {
    let lag_ms = (received_at_ms - event.timestamp_ms).max(0);
    {
        let mut s = state.write().expect("sync state lock poisoned");
        s.record_lag(lag_ms);
        s.sync_status = SyncStatus::Syncing;
    }

    let target = compensated_seek_target(event, received_at_ms);
    let result = drive_player(adapter, tolerance_secs, event, target).await;

    let mut s = state.write().expect("sync state lock poisoned");
    match result {
        Ok(corrected) => {
            // Drift within tolerance leaves the player alone; the exposed
            // state must not move either
            if corrected {
                s.playback_state.current_time = target;
            }
            match event.event_type {
                PlaybackEventType::Play => s.playback_state.is_playing = true,
                PlaybackEventType::Pause => s.playback_state.is_playing = false,
                PlaybackEventType::Seek => {}
            }
            s.sync_status = SyncStatus::Connected;
            s.last_sync_at = Some(Utc::now());
        }
        Err(e) => {
            tracing::warn!(
                event_id = %event.event_id,
                error = %e,
                "Failed to apply remote playback event"
            );
            s.error = Some(e.to_string());
            s.sync_status = SyncStatus::Error;
        }
    }
}

/// Returns whether a positional correction was applied
async fn drive_player(
    adapter: &PlayerAdapter,
    tolerance_secs: f64,
    event: &PlaybackEvent,
    target: f64,
) -> AppResult<bool> {
    let needs_seek = match event.event_type {
        PlaybackEventType::Seek => true,
        _ => {
            let local = adapter.current_time().await?;
            (local - target).abs() > tolerance_secs
        }
    };

    // Seek first: play/pause on an unpositioned player lands at the wrong spot
    if needs_seek {
        adapter.seek_to(target, true).await?;
    }

    match event.event_type {
        PlaybackEventType::Play => adapter.play().await?,
        PlaybackEventType::Pause => adapter.pause().await?,
        PlaybackEventType::Seek => {}
    }

    Ok(needs_seek)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::player::EmbeddedPlayer;
    use crate::sync::players::HeadlessPlayer;
    use crate::sync::transport::{InMemoryStateStore, InMemoryTransport, MockSyncTransport};
    use tokio::time::sleep;
    use uuid::Uuid;

    fn fast_tuning() -> SyncTuning {
        SyncTuning {
            debounce: Duration::from_millis(50),
            tolerance_secs: 0.5,
        }
    }

    fn identity(stream_id: Uuid, is_host: bool) -> SessionIdentity {
        SessionIdentity {
            stream_id,
            user_id: Uuid::new_v4(),
            is_host,
        }
    }

    async fn connected(
        identity: SessionIdentity,
        transport: Arc<InMemoryTransport>,
        store: Arc<InMemoryStateStore>,
    ) -> (SyncCoordinator, Arc<HeadlessPlayer>) {
        let player = Arc::new(HeadlessPlayer::new(3600.0));
        let adapter = Arc::new(PlayerAdapter::with_player(player.clone()));
        let coordinator =
            SyncCoordinator::connect(identity, transport, store, adapter, fast_tuning())
                .await
                .unwrap();
        (coordinator, player)
    }

    #[tokio::test]
    async fn test_non_host_broadcast_is_a_noop() {
        let mut transport = MockSyncTransport::new();
        transport.expect_subscribe().times(1).returning(|_| {
            let (tx, rx) = mpsc::unbounded_channel();
            std::mem::forget(tx);
            Ok(rx)
        });
        transport.expect_publish().never();

        let adapter = Arc::new(PlayerAdapter::new());
        let store = Arc::new(InMemoryStateStore::new());
        let coordinator = SyncCoordinator::connect(
            identity(Uuid::new_v4(), false),
            Arc::new(transport),
            store.clone(),
            adapter,
            fast_tuning(),
        )
        .await
        .unwrap();

        let accepted = coordinator
            .broadcast_playback_event(PlaybackEventType::Play, 10.0, None)
            .await
            .unwrap();
        assert!(!accepted);

        // Past the debounce window: still nothing published, nothing stored
        sleep(Duration::from_millis(120)).await;
        assert_eq!(
            store.get_state(coordinator.identity().stream_id).await.unwrap(),
            None
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_event_syncs_participant_player() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (guest, guest_player) =
            connected(identity(stream_id, false), transport.clone(), store.clone()).await;
        let (host, _) =
            connected(identity(stream_id, true), transport.clone(), store.clone()).await;

        let accepted = host
            .broadcast_playback_event(PlaybackEventType::Play, 30.0, None)
            .await
            .unwrap();
        assert!(accepted);

        sleep(Duration::from_millis(250)).await;

        let snap = guest.snapshot();
        assert!(snap.playback_state.is_playing);
        assert!(snap.playback_state.current_time >= 30.0);
        assert_eq!(snap.sync_status, SyncStatus::Connected);
        assert!(snap.last_sync_at.is_some());

        let pos = guest_player.current_time().await.unwrap();
        assert!(pos >= 30.0, "guest player should have seeked, got {pos}");

        host.shutdown().await;
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_debounce_coalesces_a_burst_into_one_event() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let mut raw_rx = transport.subscribe(stream_id).await.unwrap();
        let (host, _) =
            connected(identity(stream_id, true), transport.clone(), store.clone()).await;

        for pos in [10.0, 20.0, 30.0] {
            host.broadcast_playback_event(PlaybackEventType::Seek, pos, None)
                .await
                .unwrap();
        }

        sleep(Duration::from_millis(200)).await;

        let first = raw_rx.try_recv().expect("one event should have been sent");
        assert_eq!(first.current_time, 30.0);
        assert!(raw_rx.try_recv().is_err(), "burst should coalesce to one event");

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_optimistically_records_state() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (host, _) =
            connected(identity(stream_id, true), transport.clone(), store.clone()).await;

        host.broadcast_playback_event(PlaybackEventType::Play, 42.0, None)
            .await
            .unwrap();

        // Stored before the debounce window elapses
        let stored = store.get_state(stream_id).await.unwrap().unwrap();
        assert_eq!(stored.current_time, 42.0);
        assert!(stored.is_playing);

        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_sync_ignores_drift_within_tolerance() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (guest, player) =
            connected(identity(stream_id, false), transport.clone(), store.clone()).await;
        player.seek_to(30.0, true).await.unwrap();

        store.put_state(
            stream_id,
            &PlaybackState {
                current_time: 30.2,
                is_playing: false,
                ..PlaybackState::default()
            },
        );

        assert!(!guest.request_sync().await.unwrap());
        assert_eq!(player.current_time().await.unwrap(), 30.0);

        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_sync_corrects_drift_past_tolerance() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (guest, player) =
            connected(identity(stream_id, false), transport.clone(), store.clone()).await;
        player.seek_to(30.0, true).await.unwrap();

        store.put_state(
            stream_id,
            &PlaybackState {
                current_time: 31.0,
                is_playing: false,
                ..PlaybackState::default()
            },
        );

        assert!(guest.request_sync().await.unwrap());
        assert_eq!(player.current_time().await.unwrap(), 31.0);
        assert_eq!(guest.snapshot().playback_state.current_time, 31.0);

        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_incoming_drift_within_tolerance_leaves_position_alone() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();
        let host_user = Uuid::new_v4();

        let (guest, player) =
            connected(identity(stream_id, false), transport.clone(), store).await;

        // Establish a known position through an explicit seek
        let seek = PlaybackEvent::new(stream_id, host_user, PlaybackEventType::Seek, 30.0, None);
        transport.publish(&seek).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let before = guest.snapshot().playback_state.current_time;
        assert!(before >= 30.0 && before < 30.1, "seek should land near 30.0, got {before}");

        // Pause reported 0.2s ahead: within tolerance, so neither the player
        // nor the exposed position may move
        let pause = PlaybackEvent::new(stream_id, host_user, PlaybackEventType::Pause, 30.2, None);
        transport.publish(&pause).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let snap = guest.snapshot();
        assert_eq!(snap.playback_state.current_time, before);
        assert!(!snap.playback_state.is_playing);
        assert_eq!(player.current_time().await.unwrap(), before);

        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_replaces_prior_subscription() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (guest, _player) =
            connected(identity(stream_id, false), transport.clone(), store).await;
        assert_eq!(transport.subscriber_count(stream_id), 1);

        assert_eq!(guest.reconnect().await.unwrap(), 0);

        // Traffic lets the orphaned bridge task notice its receiver is gone
        let event =
            PlaybackEvent::new(stream_id, Uuid::new_v4(), PlaybackEventType::Seek, 12.0, None);
        transport.publish(&event).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(transport.subscriber_count(stream_id), 1);
        assert!(guest.snapshot().playback_state.current_time >= 12.0);

        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_sync_without_stored_state() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let (guest, _) =
            connected(identity(Uuid::new_v4(), false), transport, store).await;

        assert!(!guest.request_sync().await.unwrap());
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_force_sync_applies_within_tolerance_and_clears_error() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let player = Arc::new(HeadlessPlayer::new(3600.0));
        let adapter = Arc::new(PlayerAdapter::with_player(player.clone()));
        let guest = SyncCoordinator::connect(
            identity(stream_id, false),
            transport,
            store.clone(),
            adapter.clone(),
            fast_tuning(),
        )
        .await
        .unwrap();

        player.seek_to(30.0, true).await.unwrap();
        adapter.notify_error("embed hiccup");
        assert_eq!(guest.snapshot().sync_status, SyncStatus::Error);

        // Drift of 0.2s is within tolerance, but force applies anyway
        store.put_state(
            stream_id,
            &PlaybackState {
                current_time: 30.2,
                is_playing: false,
                ..PlaybackState::default()
            },
        );

        assert!(guest.force_sync().await.unwrap());
        assert_eq!(player.current_time().await.unwrap(), 30.2);

        let snap = guest.snapshot();
        assert_eq!(snap.error, None);
        assert_eq!(snap.sync_status, SyncStatus::Connected);

        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_makes_broadcast_inert() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let (host, _) =
            connected(identity(stream_id, true), transport.clone(), store.clone()).await;
        host.shutdown().await;

        let snap = host.snapshot();
        assert!(!snap.is_connected);
        assert_eq!(snap.sync_status, SyncStatus::Disconnected);

        let accepted = host
            .broadcast_playback_event(PlaybackEventType::Play, 5.0, None)
            .await
            .unwrap();
        assert!(!accepted);

        // No local or stored state change either
        assert_eq!(host.snapshot().playback_state.current_time, 0.0);
        assert!(!host.snapshot().playback_state.is_playing);
        assert_eq!(store.get_state(stream_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_player_error_surfaces_in_snapshot() {
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new());
        let stream_id = Uuid::new_v4();

        let adapter = Arc::new(PlayerAdapter::new());
        let guest = SyncCoordinator::connect(
            identity(stream_id, false),
            transport,
            store,
            adapter.clone(),
            fast_tuning(),
        )
        .await
        .unwrap();

        adapter.notify_error("playback stalled");

        let snap = guest.snapshot();
        assert_eq!(snap.sync_status, SyncStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("playback stalled"));

        guest.clear_error();
        let snap = guest.snapshot();
        assert_eq!(snap.error, None);
        assert_eq!(snap.sync_status, SyncStatus::Connected);

        guest.shutdown().await;
    }
}
