use std::sync::{Arc, Mutex, RwLock};

use crate::error::{AppError, AppResult};
use crate::models::{DetailedPlaybackState, PlaybackEvent, PlaybackState, PlayerState};

/// Capability surface of an embeddable video player.
///
/// Mirrors the raw embed API (play/pause/seek/query) behind an async trait so
/// the sync core never depends on one player vendor's shape; one concrete
/// adapter exists per underlying player technology.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddedPlayer: Send + Sync {
    async fn play_video(&self) -> AppResult<()>;
    async fn pause_video(&self) -> AppResult<()>;
    async fn seek_to(&self, seconds: f64, allow_seek_ahead: bool) -> AppResult<()>;
    async fn current_time(&self) -> AppResult<f64>;
    async fn player_state(&self) -> AppResult<PlayerState>;
    async fn duration(&self) -> AppResult<f64>;
}

type StateListener = Arc<dyn Fn(PlayerState) + Send + Sync>;
type ReadyListener = Arc<dyn Fn() + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Normalizes a stateful embedded player into promise-style calls.
///
/// The player handle may be absent (not yet mounted, or torn down); every
/// control and query method fails with [`AppError::PlayerUnavailable`] in
/// that case, so callers either check [`is_ready`](Self::is_ready) first or
/// catch the error.
pub struct PlayerAdapter {
    handle: RwLock<Option<Arc<dyn EmbeddedPlayer>>>,
    on_state_change: Mutex<Vec<StateListener>>,
    on_ready: Mutex<Vec<ReadyListener>>,
    on_error: Mutex<Vec<ErrorListener>>,
}

impl Default for PlayerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerAdapter {
    /// Creates an adapter with no player attached yet
    pub fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            on_state_change: Mutex::new(Vec::new()),
            on_ready: Mutex::new(Vec::new()),
            on_error: Mutex::new(Vec::new()),
        }
    }

    /// Creates an adapter with a player already attached
    pub fn with_player(player: Arc<dyn EmbeddedPlayer>) -> Self {
        let adapter = Self::new();
        adapter.attach(player);
        adapter
    }

    /// Attaches a player handle and fires the ready callbacks
    pub fn attach(&self, player: Arc<dyn EmbeddedPlayer>) {
        *self.handle.write().expect("player handle lock poisoned") = Some(player);
        self.notify_ready();
    }

    /// Detaches the current player handle, if any
    pub fn detach(&self) {
        *self.handle.write().expect("player handle lock poisoned") = None;
    }

    /// Re-attaches the current handle, firing ready callbacks again.
    ///
    /// Used to recover after a player error without rebuilding the session.
    pub fn reload(&self) -> AppResult<()> {
        let player = self.player()?;
        self.attach(player);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.handle
            .read()
            .expect("player handle lock poisoned")
            .is_some()
    }

    fn player(&self) -> AppResult<Arc<dyn EmbeddedPlayer>> {
        self.handle
            .read()
            .expect("player handle lock poisoned")
            .clone()
            .ok_or_else(|| AppError::PlayerUnavailable("no player handle attached".to_string()))
    }

    pub async fn play(&self) -> AppResult<()> {
        self.player()?.play_video().await
    }

    pub async fn pause(&self) -> AppResult<()> {
        self.player()?.pause_video().await
    }

    pub async fn seek_to(&self, seconds: f64, allow_seek_ahead: bool) -> AppResult<()> {
        self.player()?.seek_to(seconds, allow_seek_ahead).await
    }

    pub async fn current_time(&self) -> AppResult<f64> {
        self.player()?.current_time().await
    }

    pub async fn player_state(&self) -> AppResult<PlayerState> {
        self.player()?.player_state().await
    }

    pub async fn duration(&self) -> AppResult<f64> {
        self.player()?.duration().await
    }

    /// Drives the local player to a target state.
    ///
    /// Always seeks first, then applies play or pause: seeking on a paused
    /// player must not resume playback, and seeking on a playing player
    /// should continue from the new position immediately.
    pub async fn sync_to_state(&self, state: &PlaybackState) -> AppResult<()> {
        let player = self.player()?;

        player.seek_to(state.current_time, true).await?;

        if state.is_playing {
            player.play_video().await?;
        } else {
            player.pause_video().await?;
        }

        Ok(())
    }

    /// Snapshot of the player's current position, lifecycle state and duration
    pub async fn detailed_state(&self) -> AppResult<DetailedPlaybackState> {
        let player = self.player()?;

        let current_time = player.current_time().await?;
        let player_state = player.player_state().await?;
        let duration = player.duration().await?;

        Ok(DetailedPlaybackState {
            playback: PlaybackState {
                current_time,
                is_playing: player_state == PlayerState::Playing,
                duration,
                ..PlaybackState::default()
            },
            player_state,
        })
    }

    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(PlayerState) + Send + Sync + 'static,
    {
        self.on_state_change
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    pub fn on_ready<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_ready
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error
            .lock()
            .expect("listener lock poisoned")
            .push(Arc::new(listener));
    }

    /// Forwards a raw player state transition to registered listeners.
    /// Called by concrete player bindings.
    pub fn notify_state_change(&self, state: PlayerState) {
        let listeners = self
            .on_state_change
            .lock()
            .expect("listener lock poisoned")
            .clone();
        for listener in listeners {
            listener(state);
        }
    }

    fn notify_ready(&self) {
        let listeners = self.on_ready.lock().expect("listener lock poisoned").clone();
        for listener in listeners {
            listener();
        }
    }

    /// Forwards a player-level error to registered listeners.
    /// Called by concrete player bindings.
    pub fn notify_error(&self, message: &str) {
        let listeners = self.on_error.lock().expect("listener lock poisoned").clone();
        for listener in listeners {
            listener(message);
        }
    }
}

/// Seek target adjusted for observed delivery lag.
///
/// A participant receiving a host seek 200ms late lands close to where the
/// host actually is by the time the call executes. Clock skew can make the
/// delta negative; that is clamped to zero rather than seeking backwards.
pub fn compensated_seek_target(event: &PlaybackEvent, received_at_ms: i64) -> f64 {
    let lag_ms = (received_at_ms - event.timestamp_ms).max(0);
    event.current_time + lag_ms as f64 / 1000.0
}
