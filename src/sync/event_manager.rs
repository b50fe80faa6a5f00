use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::PlaybackEvent;
use crate::sync::transport::SyncTransport;

/// Ceiling on events a host may emit within one wall-clock second.
///
/// Bounds worst-case fan-out from a single host, e.g. a user rapidly
/// scrubbing the seek bar.
pub const MAX_EVENTS_PER_SECOND: u32 = 5;

/// Rate-window entries older than this many seconds are pruned on every touch
const RATE_WINDOW_SECS: i64 = 2;

type MsClock = Arc<dyn Fn() -> i64 + Send + Sync>;
type EventListener = Arc<dyn Fn(&PlaybackEvent) + Send + Sync>;

/// Single authority for event deduplication, rate limiting, offline queuing
/// and chronological batch replay.
///
/// Rate limiting and deduplication are enforced here, at the local
/// sender/receiver boundary, because the transport provides neither and the
/// same logical event can reach a client twice (optimistic local apply plus
/// remote echo).
///
/// One instance per session. All state is session-local; `destroy` must be
/// called exactly once when the session ends, after which every operation is
/// inert.
pub struct EventManager {
    transport: Arc<dyn SyncTransport>,
    /// Event ids already applied or already broadcast; grows for the life of
    /// the session, bounded by session duration times the rate ceiling
    processed: HashSet<Uuid>,
    /// Unix second -> events emitted in that second
    rate_window: HashMap<i64, u32>,
    /// Events accumulated while the transport is down; drained FIFO on reconnect
    offline_queue: VecDeque<PlaybackEvent>,
    /// Events awaiting one chronological replay
    batch: Vec<PlaybackEvent>,
    listeners: Vec<EventListener>,
    clock: MsClock,
    destroyed: bool,
}

impl EventManager {
    pub fn new(transport: Arc<dyn SyncTransport>) -> Self {
        Self::with_clock(transport, Arc::new(|| Utc::now().timestamp_millis()))
    }

    /// Constructor with an injected millisecond clock, for deterministic
    /// rate-limit tests
    pub fn with_clock(transport: Arc<dyn SyncTransport>, clock: MsClock) -> Self {
        Self {
            transport,
            processed: HashSet::new(),
            rate_window: HashMap::new(),
            offline_queue: VecDeque::new(),
            batch: Vec::new(),
            listeners: Vec::new(),
            clock,
            destroyed: false,
        }
    }

    fn current_second(&self) -> i64 {
        (self.clock)() / 1000
    }

    /// True iff another event may be sent within the current wall-clock second
    pub fn can_broadcast(&self) -> bool {
        if self.destroyed {
            return false;
        }
        let count = self
            .rate_window
            .get(&self.current_second())
            .copied()
            .unwrap_or(0);
        count < MAX_EVENTS_PER_SECOND
    }

    /// Remaining broadcast budget for the current second; informational only
    pub fn remaining_rate_limit(&self) -> u32 {
        let count = self
            .rate_window
            .get(&self.current_second())
            .copied()
            .unwrap_or(0);
        MAX_EVENTS_PER_SECOND.saturating_sub(count)
    }

    fn record_broadcast(&mut self) {
        let now = self.current_second();
        self.rate_window.retain(|second, _| now - second < RATE_WINDOW_SECS);
        *self.rate_window.entry(now).or_insert(0) += 1;
    }

    /// True iff this event's id has already been applied or broadcast.
    /// Pure query, no side effects.
    pub fn is_duplicate(&self, event: &PlaybackEvent) -> bool {
        self.processed.contains(&event.event_id)
    }

    /// Idempotently records an event id as processed
    pub fn mark_processed(&mut self, event_id: Uuid) {
        if self.destroyed {
            return;
        }
        self.processed.insert(event_id);
    }

    /// Rate-limits, marks processed and publishes one event.
    ///
    /// Returns `false` without side effects when the rate ceiling is hit, and
    /// `false` when the transport rejects the write; playback events are
    /// ephemeral, so failures are swallowed rather than raised (a stale
    /// play/pause cannot be meaningfully retried).
    ///
    /// The event id is marked processed BEFORE the transport write, in the
    /// same call stack with no suspension in between. This is the at-most-once
    /// guarantee: even if the write fails or a remote echo races in, the local
    /// side will never replay this event.
    pub async fn broadcast_event(&mut self, event: PlaybackEvent) -> bool {
        if self.destroyed || !self.can_broadcast() {
            return false;
        }

        self.record_broadcast();
        self.mark_processed(event.event_id);

        match self.transport.publish(&event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    error = %e,
                    "Playback event broadcast failed, dropping"
                );
                false
            }
        }
    }

    /// Registers a listener invoked once per event, in chronological order,
    /// on every batch flush. All listeners receive every flushed event.
    pub fn on_event<F>(&mut self, listener: F)
    where
        F: Fn(&PlaybackEvent) + Send + Sync + 'static,
    {
        if self.destroyed {
            return;
        }
        self.listeners.push(Arc::new(listener));
    }

    /// Adds an event to the batch buffer without flushing.
    ///
    /// Low-level primitive: no dedup check is performed here, callers that
    /// need it go through [`process_incoming`](Self::process_incoming).
    pub fn add_to_batch(&mut self, event: PlaybackEvent) {
        if self.destroyed {
            return;
        }
        self.batch.push(event);
    }

    /// Flushes the batch buffer in ascending `timestamp_ms` order.
    ///
    /// The sort is stable, so two events with the same timestamp replay in
    /// arrival order. Returns the ordered events (in addition to notifying
    /// listeners) so an async caller can apply them to the player.
    pub fn process_batch(&mut self) -> Vec<PlaybackEvent> {
        if self.destroyed {
            return Vec::new();
        }

        let mut events = std::mem::take(&mut self.batch);
        events.sort_by_key(|e| e.timestamp_ms);

        for event in &events {
            for listener in &self.listeners {
                listener(event);
            }
        }

        events
    }

    /// Dedupes, marks processed and chronologically replays one incoming
    /// event together with anything else currently buffered.
    ///
    /// Duplicates are silently dropped and produce an empty replay.
    pub fn process_incoming(&mut self, event: PlaybackEvent) -> Vec<PlaybackEvent> {
        if self.destroyed || self.is_duplicate(&event) {
            return Vec::new();
        }

        self.mark_processed(event.event_id);
        self.add_to_batch(event);
        self.process_batch()
    }

    /// Buffers an event while the transport is down. Never touches the network.
    pub fn queue_event(&mut self, event: PlaybackEvent) {
        if self.destroyed {
            return;
        }
        tracing::debug!(event_id = %event.event_id, "Queued playback event while offline");
        self.offline_queue.push_back(event);
    }

    /// Drains the offline queue FIFO, re-broadcasting each event.
    ///
    /// Drained events compete for the normal rate budget, so a flush can
    /// partially fail; failures are not re-queued. Returns how many events
    /// were broadcast successfully.
    pub async fn process_queue(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }

        let drained: Vec<PlaybackEvent> = self.offline_queue.drain(..).collect();
        let total = drained.len();
        let mut sent = 0;

        for event in drained {
            if self.broadcast_event(event).await {
                sent += 1;
            }
        }

        if sent < total {
            tracing::warn!(sent, total, "Offline queue flush was partial");
        }

        sent
    }

    /// Number of events currently held in the offline queue
    pub fn queued_len(&self) -> usize {
        self.offline_queue.len()
    }

    /// Discards the offline queue without broadcasting
    pub fn clear_queue(&mut self) {
        self.offline_queue.clear();
    }

    /// Tears the manager down: clears the processed set, queue, callbacks,
    /// rate window and batch buffer. Call exactly once when the owning
    /// session ends; every operation afterwards is a no-op.
    pub fn destroy(&mut self) {
        self.processed.clear();
        self.rate_window.clear();
        self.offline_queue.clear();
        self.batch.clear();
        self.listeners.clear();
        self.destroyed = true;
    }
}
