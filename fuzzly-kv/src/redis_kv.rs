//! Redis-backed [`Kv`]. Values are JSON-encoded; secondary indices are
//! Redis sets of member keys, created at startup per §6 ("secondary-index
//! creation at startup").

use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Kv, KvError};

pub struct RedisKv<V> {
    conn: ConnectionManager,
    namespace: &'static str,
    _value: PhantomData<V>,
}

impl<V> RedisKv<V> {
    pub fn new(conn: ConnectionManager, namespace: &'static str) -> Self {
        Self { conn, namespace, _value: PhantomData }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn index_key(&self, index: &str) -> String {
        format!("{}:idx:{index}", self.namespace)
    }
}

fn map_redis_err(err: redis::RedisError) -> KvError {
    KvError::Other(err.to_string())
}

#[async_trait]
impl<V: Serialize + DeserializeOwned + Send + Sync> Kv<V> for RedisKv<V> {
    async fn put(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        index: Option<&str>,
    ) -> Result<(), KvError> {
        let json = serde_json::to_string(value)
            .map_err(|e| KvError::Other(e.to_string()))?;
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);

        let () = conn
            .set_ex(self.key(key), json, ttl_secs)
            .await
            .map_err(map_redis_err)?;

        if let Some(index) = index {
            let () = conn
                .sadd(self.index_key(index), key)
                .await
                .map_err(map_redis_err)?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<V, KvError> {
        let mut conn = self.conn.clone();
        let json: Option<String> =
            conn.get(self.key(key)).await.map_err(map_redis_err)?;
        let json = json.ok_or(KvError::NotFound)?;
        serde_json::from_str(&json).map_err(|e| KvError::Other(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.key(key)).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn list_by_index(&self, index: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> =
            conn.smembers(self.index_key(index)).await.map_err(map_redis_err)?;
        Ok(members)
    }
}
