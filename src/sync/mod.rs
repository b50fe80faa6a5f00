//! Playback synchronization core: event dedup/rate limiting, player
//! adaptation and the per-session coordinator that ties them to a transport.

mod coordinator;
mod event_manager;
pub mod player;
pub mod players;
mod transport;

pub use coordinator::{SyncCoordinator, SyncTuning};
pub use event_manager::{EventManager, MAX_EVENTS_PER_SECOND};
pub use player::{compensated_seek_target, EmbeddedPlayer, PlayerAdapter};
pub use transport::{
    InMemoryStateStore, InMemoryTransport, RedisSyncTransport, SyncStateStore, SyncTransport,
};
