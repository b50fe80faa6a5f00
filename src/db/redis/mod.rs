mod state_cache;

pub use state_cache::{RedisStateStore, StateWriterHandle};

use redis::Client;

/// Creates a Redis client shared by the pub/sub transport and the state store
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}
