use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Kind of host playback action carried by a sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEventType {
    Play,
    Pause,
    Seek,
}

impl Display for PlaybackEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackEventType::Play => write!(f, "play"),
            PlaybackEventType::Pause => write!(f, "pause"),
            PlaybackEventType::Seek => write!(f, "seek"),
        }
    }
}

/// One discrete host playback action, broadcast to every participant.
///
/// `event_id` is the sole deduplication key: two events with the same id are
/// the same logical event regardless of any other field, and only the first
/// occurrence is ever applied. `timestamp_ms` is the host's wall clock at the
/// time of the action (not receipt time) and drives chronological replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub event_id: Uuid,
    pub stream_id: Uuid,
    pub host_user_id: Uuid,
    pub event_type: PlaybackEventType,
    /// Host wall-clock milliseconds when the action happened
    pub timestamp_ms: i64,
    /// Playback position in seconds at the time of the action
    pub current_time: f64,
    /// Free-form auxiliary data, e.g. `{"seek_from": 12.0}` for seeks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl PlaybackEvent {
    /// Creates a new event stamped with a fresh id and the current wall clock
    pub fn new(
        stream_id: Uuid,
        host_user_id: Uuid,
        event_type: PlaybackEventType,
        current_time: f64,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            stream_id,
            host_user_id,
            event_type,
            timestamp_ms: Utc::now().timestamp_millis(),
            current_time,
            metadata,
        }
    }
}

/// The locally observed view of "what is playing right now".
///
/// Session-local and in-memory only: created with zeroed defaults on session
/// start, updated optimistically by host actions or by incoming sync events,
/// and discarded when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub current_time: f64,
    pub is_playing: bool,
    pub duration: f64,
    pub volume: f64,
    pub is_fullscreen: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            duration: 0.0,
            volume: 1.0,
            is_fullscreen: false,
        }
    }
}

/// Numeric player state reported by the embedded video player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl PlayerState {
    /// Raw numeric code used by the embedded player API
    pub fn code(&self) -> i32 {
        match self {
            PlayerState::Unstarted => -1,
            PlayerState::Ended => 0,
            PlayerState::Playing => 1,
            PlayerState::Paused => 2,
            PlayerState::Buffering => 3,
            PlayerState::Cued => 5,
        }
    }

    /// Parses a raw player state code, `None` for unknown codes
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(PlayerState::Unstarted),
            0 => Some(PlayerState::Ended),
            1 => Some(PlayerState::Playing),
            2 => Some(PlayerState::Paused),
            3 => Some(PlayerState::Buffering),
            5 => Some(PlayerState::Cued),
            _ => None,
        }
    }
}

/// Playback state extended with the raw player lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedPlaybackState {
    #[serde(flatten)]
    pub playback: PlaybackState,
    pub player_state: PlayerState,
}

/// Who the local session member is within a stream.
///
/// Supplied by the surrounding application; the sync core never decides who
/// the host is, it only obeys this flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub is_host: bool,
}

/// Consolidated sync lifecycle status exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Error,
}

/// Coarse connection health derived from observed event delivery lag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Unstable,
    Poor,
}

impl ConnectionQuality {
    /// Classifies a mean delivery lag (receipt time minus event timestamp)
    pub fn from_mean_lag_ms(mean_lag_ms: i64) -> Self {
        if mean_lag_ms < 250 {
            ConnectionQuality::Good
        } else if mean_lag_ms < 1000 {
            ConnectionQuality::Unstable
        } else {
            ConnectionQuality::Poor
        }
    }
}

/// Point-in-time view of a session's sync state, as returned by the status API
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    #[serde(flatten)]
    pub playback_state: PlaybackState,
    pub is_connected: bool,
    pub sync_status: SyncStatus,
    pub connection_quality: ConnectionQuality,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_display() {
        assert_eq!(format!("{}", PlaybackEventType::Play), "play");
        assert_eq!(format!("{}", PlaybackEventType::Pause), "pause");
        assert_eq!(format!("{}", PlaybackEventType::Seek), "seek");
    }

    #[test]
    fn test_event_type_serde_lowercase() {
        let json = serde_json::to_string(&PlaybackEventType::Seek).unwrap();
        assert_eq!(json, r#""seek""#);

        let parsed: PlaybackEventType = serde_json::from_str(r#""pause""#).unwrap();
        assert_eq!(parsed, PlaybackEventType::Pause);
    }

    #[test]
    fn test_new_event_gets_unique_ids() {
        let stream = Uuid::new_v4();
        let host = Uuid::new_v4();
        let e1 = PlaybackEvent::new(stream, host, PlaybackEventType::Play, 10.0, None);
        let e2 = PlaybackEvent::new(stream, host, PlaybackEventType::Play, 10.0, None);
        assert_ne!(e1.event_id, e2.event_id);
        assert_eq!(e1.stream_id, stream);
        assert_eq!(e1.host_user_id, host);
    }

    #[test]
    fn test_event_roundtrip_with_metadata() {
        let event = PlaybackEvent {
            event_id: Uuid::new_v4(),
            stream_id: Uuid::new_v4(),
            host_user_id: Uuid::new_v4(),
            event_type: PlaybackEventType::Seek,
            timestamp_ms: 1_700_000_000_000,
            current_time: 42.5,
            metadata: Some(serde_json::json!({ "seek_from": 12.0 })),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: PlaybackEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.event_type, PlaybackEventType::Seek);
        assert_eq!(parsed.current_time, 42.5);
        assert_eq!(parsed.metadata, event.metadata);
    }

    #[test]
    fn test_event_metadata_omitted_when_absent() {
        let event = PlaybackEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PlaybackEventType::Play,
            0.0,
            None,
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn test_playback_state_default_is_mount_state() {
        let state = PlaybackState::default();
        assert_eq!(state.current_time, 0.0);
        assert!(!state.is_playing);
        assert_eq!(state.duration, 0.0);
        assert_eq!(state.volume, 1.0);
        assert!(!state.is_fullscreen);
    }

    #[test]
    fn test_player_state_codes_roundtrip() {
        for state in [
            PlayerState::Unstarted,
            PlayerState::Ended,
            PlayerState::Playing,
            PlayerState::Paused,
            PlayerState::Buffering,
            PlayerState::Cued,
        ] {
            assert_eq!(PlayerState::from_code(state.code()), Some(state));
        }
    }

    #[test]
    fn test_player_state_unknown_code() {
        assert_eq!(PlayerState::from_code(4), None);
        assert_eq!(PlayerState::from_code(99), None);
    }

    #[test]
    fn test_connection_quality_thresholds() {
        assert_eq!(ConnectionQuality::from_mean_lag_ms(0), ConnectionQuality::Good);
        assert_eq!(ConnectionQuality::from_mean_lag_ms(249), ConnectionQuality::Good);
        assert_eq!(
            ConnectionQuality::from_mean_lag_ms(250),
            ConnectionQuality::Unstable
        );
        assert_eq!(
            ConnectionQuality::from_mean_lag_ms(999),
            ConnectionQuality::Unstable
        );
        assert_eq!(ConnectionQuality::from_mean_lag_ms(1000), ConnectionQuality::Poor);
    }
}
