use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::AppResult;
use crate::models::PlaybackEvent;

/// Creates a PostgreSQL connection pool
pub async fn create_pg_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Persists playback events as rows in the `playback_events` table.
///
/// The row is the wire format shared with other clients of the stream: one
/// row per host action, keyed by the event id. Insertion doubles as the
/// durable half of a broadcast; the pub/sub publish is the fast half.
#[derive(Clone)]
pub struct PlaybackEventStore {
    pool: PgPool,
}

impl PlaybackEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts one playback event row.
    ///
    /// `ON CONFLICT DO NOTHING` on the event id keeps redelivered broadcasts
    /// from failing: an event id is never reused, so a conflicting insert is
    /// the same logical event arriving twice.
    pub async fn insert_event(&self, event: &PlaybackEvent) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO playback_events
                (event_id, stream_id, host_user_id, event_type, timestamp_ms, current_time_secs, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.stream_id)
        .bind(event.host_user_id)
        .bind(event.event_type.to_string())
        .bind(event.timestamp_ms)
        .bind(event.current_time)
        .bind(event.metadata.clone())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
