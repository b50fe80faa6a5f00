use std::sync::Mutex;
use std::time::Instant;

use crate::error::AppResult;
use crate::models::PlayerState;
use crate::sync::player::EmbeddedPlayer;

struct HeadlessInner {
    /// Position at `updated_at`; the live position adds elapsed wall time
    /// while playing.
    position: f64,
    playing: bool,
    duration: f64,
    state: PlayerState,
    updated_at: Instant,
}

/// Clock-driven player with no rendering surface.
///
/// Simulates playback by advancing its position with wall time while playing.
/// Serves server-side sessions and tests that need a real [`EmbeddedPlayer`]
/// without a video embed behind it.
pub struct HeadlessPlayer {
    inner: Mutex<HeadlessInner>,
}

impl HeadlessPlayer {
    pub fn new(duration: f64) -> Self {
        Self {
            inner: Mutex::new(HeadlessInner {
                position: 0.0,
                playing: false,
                duration,
                state: PlayerState::Cued,
                updated_at: Instant::now(),
            }),
        }
    }

    fn live_position(inner: &HeadlessInner) -> f64 {
        if !inner.playing {
            return inner.position;
        }
        let advanced = inner.position + inner.updated_at.elapsed().as_secs_f64();
        if inner.duration > 0.0 {
            advanced.min(inner.duration)
        } else {
            advanced
        }
    }

    /// Freezes the live position into `position` before a transition
    fn checkpoint(inner: &mut HeadlessInner) {
        inner.position = Self::live_position(inner);
        inner.updated_at = Instant::now();
    }
}

#[async_trait::async_trait]
impl EmbeddedPlayer for HeadlessPlayer {
    async fn play_video(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("headless player lock poisoned");
        Self::checkpoint(&mut inner);
        inner.playing = true;
        inner.state = PlayerState::Playing;
        Ok(())
    }

    async fn pause_video(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("headless player lock poisoned");
        Self::checkpoint(&mut inner);
        inner.playing = false;
        inner.state = PlayerState::Paused;
        Ok(())
    }

    async fn seek_to(&self, seconds: f64, _allow_seek_ahead: bool) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("headless player lock poisoned");
        let target = if inner.duration > 0.0 {
            seconds.clamp(0.0, inner.duration)
        } else {
            seconds.max(0.0)
        };
        inner.position = target;
        inner.updated_at = Instant::now();
        Ok(())
    }

    async fn current_time(&self) -> AppResult<f64> {
        let inner = self.inner.lock().expect("headless player lock poisoned");
        Ok(Self::live_position(&inner))
    }

    async fn player_state(&self) -> AppResult<PlayerState> {
        let inner = self.inner.lock().expect("headless player lock poisoned");
        Ok(inner.state)
    }

    async fn duration(&self) -> AppResult<f64> {
        let inner = self.inner.lock().expect("headless player lock poisoned");
        Ok(inner.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_starts_cued_at_zero() {
        let player = HeadlessPlayer::new(3600.0);
        assert_eq!(player.current_time().await.unwrap(), 0.0);
        assert_eq!(player.player_state().await.unwrap(), PlayerState::Cued);
        assert_eq!(player.duration().await.unwrap(), 3600.0);
    }

    #[tokio::test]
    async fn test_position_advances_while_playing() {
        let player = HeadlessPlayer::new(3600.0);
        player.play_video().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let pos = player.current_time().await.unwrap();
        assert!(pos > 0.0, "position should advance while playing, got {pos}");
        assert_eq!(player.player_state().await.unwrap(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn test_pause_freezes_position() {
        let player = HeadlessPlayer::new(3600.0);
        player.play_video().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        player.pause_video().await.unwrap();

        let frozen = player.current_time().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(player.current_time().await.unwrap(), frozen);
        assert_eq!(player.player_state().await.unwrap(), PlayerState::Paused);
    }

    #[tokio::test]
    async fn test_seek_moves_position_without_changing_state() {
        let player = HeadlessPlayer::new(3600.0);
        player.pause_video().await.unwrap();
        player.seek_to(120.0, true).await.unwrap();

        assert_eq!(player.current_time().await.unwrap(), 120.0);
        assert_eq!(player.player_state().await.unwrap(), PlayerState::Paused);
    }

    #[tokio::test]
    async fn test_seek_clamps_to_duration() {
        let player = HeadlessPlayer::new(100.0);
        player.seek_to(250.0, true).await.unwrap();
        assert_eq!(player.current_time().await.unwrap(), 100.0);

        player.seek_to(-5.0, true).await.unwrap();
        assert_eq!(player.current_time().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_position_stops_at_duration() {
        let player = HeadlessPlayer::new(0.01);
        player.play_video().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(player.current_time().await.unwrap(), 0.01);
    }
}
