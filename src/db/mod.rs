mod postgres;
pub mod redis;

pub use postgres::{create_pg_pool, PlaybackEventStore};
pub use redis::{create_redis_client, RedisStateStore, StateWriterHandle};
