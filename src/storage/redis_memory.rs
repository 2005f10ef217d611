//! Redis backend: every value is a field of one hash, so `keys` is a single
//! `HKEYS` and several bots can share a server under different hash keys.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{Memory, StorageError, StorageResult};
use crate::config::RedisConfig;

#[derive(Clone)]
pub struct RedisMemory {
    connection: ConnectionManager,
    hash_key: String,
}

impl std::fmt::Debug for RedisMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMemory")
            .field("connection", &"ConnectionManager")
            .field("hash_key", &self.hash_key)
            .finish()
    }
}

impl RedisMemory {
    pub async fn connect(config: &RedisConfig) -> StorageResult<Self> {
        let client = redis::Client::open(connection_url(config).as_str()).map_err(|e| {
            StorageError::Connection(format!("Failed to create Redis client: {}", e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::Connection(format!(
                "Failed to connect to Redis at {}: {}",
                config.addr, e
            ))
        })?;
        debug!("Connected to Redis at {}, hash {}", config.addr, config.key);

        Ok(Self {
            connection,
            hash_key: config.key.clone(),
        })
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }
}

fn connection_url(config: &RedisConfig) -> String {
    let auth = match &config.password {
        Some(password) if !password.is_empty() => format!(":{}@", encode_userinfo(password)),
        _ => String::new(),
    };
    format!("redis://{}{}/{}", auth, config.addr, config.db)
}

fn encode_userinfo(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

fn command_failed(command: &str, e: redis::RedisError) -> StorageError {
    StorageError::Backend(format!("Redis {} failed: {}", command, e))
}

#[async_trait]
impl Memory for RedisMemory {
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("HSET")
            .arg(&self.hash_key)
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| command_failed("HSET", e))?;
        debug!("Set {} in {}", key, self.hash_key);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        redis::cmd("HGET")
            .arg(&self.hash_key)
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("HGET", e))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = redis::cmd("HDEL")
            .arg(&self.hash_key)
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("HDEL", e))?;
        Ok(removed > 0)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("HKEYS")
            .arg(&self.hash_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("HKEYS", e))
    }

    async fn close(&self) -> StorageResult<()> {
        // The connection manager closes its socket once the last clone drops.
        debug!("Release Redis hash {}", self.hash_key);
        Ok(())
    }
}
