//! Redis live reading cache

use crate::live::{decode, encode, reading_key, LiveCache};
use crate::model::{Reading, SensorId};
use crate::StorageError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

/// Live cache on a shared Redis connection.
///
/// The connection manager reconnects on its own and is cheap to clone, so
/// every call works on a clone of the process-wide handle.
#[derive(Clone)]
pub struct RedisLiveCache {
    conn: ConnectionManager,
    ttl: Option<Duration>,
}

impl RedisLiveCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        info!("Connecting live reading cache: {}", url);
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl: None })
    }

    /// Expire readings `ttl` after their last write
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl LiveCache for RedisLiveCache {
    async fn set(&self, sensor_id: SensorId, reading: &Reading) -> Result<(), StorageError> {
        let key = reading_key(sensor_id);
        let value = encode(reading)?;
        let mut conn = self.conn.clone();

        match self.ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => conn.set::<_, _, ()>(&key, value).await?,
        }

        debug!("Stored live reading under {}", key);
        Ok(())
    }

    async fn get(&self, sensor_id: SensorId) -> Result<Option<Reading>, StorageError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(reading_key(sensor_id)).await?;
        raw.map(|v| decode(&v)).transpose()
    }

    async fn delete(&self, sensor_id: SensorId) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(reading_key(sensor_id)).await?;
        Ok(())
    }
}
