//! Playback synchronization service for shared watch parties.
//!
//! One host per stream drives playback; every other participant's player is
//! kept within half a second of the host through broadcast playback events
//! and stored state snapshots.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod sync;
