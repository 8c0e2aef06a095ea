//! An in-memory [`Kv`] fake with real (if coarse) TTL expiry, for tests
//! that exercise `TokenRegistry`/`BanRegistry` without Redis (§8.1).

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{Kv, KvError};

struct Entry {
    json: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemKv {
    entries: Mutex<HashMap<String, Entry>>,
    indices: Mutex<HashMap<String, Vec<String>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        Instant::now() < entry.expires_at
    }
}

#[async_trait]
impl<V: Serialize + DeserializeOwned + Send + Sync> Kv<V> for MemKv {
    async fn put(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
        index: Option<&str>,
    ) -> Result<(), KvError> {
        let json = serde_json::to_string(value)
            .map_err(|e| KvError::Other(e.to_string()))?;
        let entry = Entry { json, expires_at: Instant::now() + ttl };
        self.entries.lock().unwrap().insert(key.to_owned(), entry);
        if let Some(index) = index {
            self.indices
                .lock()
                .unwrap()
                .entry(index.to_owned())
                .or_default()
                .push(key.to_owned());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<V, KvError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key).ok_or(KvError::NotFound)?;
        if !Self::is_live(entry) {
            return Err(KvError::NotFound);
        }
        serde_json::from_str(&entry.json)
            .map_err(|e| KvError::Other(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_by_index(&self, index: &str) -> Result<Vec<String>, KvError> {
        let indices = self.indices.lock().unwrap();
        Ok(indices.get(index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let kv: MemKv = MemKv::new();
        Kv::<String>::put(
            &kv,
            "guid-1",
            &"payload".to_owned(),
            Duration::from_secs(60),
            Some("user-1"),
        )
        .await
        .unwrap();

        let value: String = Kv::<String>::get(&kv, "guid-1").await.unwrap();
        assert_eq!(value, "payload");

        let by_index = Kv::<String>::list_by_index(&kv, "user-1").await.unwrap();
        assert_eq!(by_index, vec!["guid-1".to_owned()]);

        Kv::<String>::remove(&kv, "guid-1").await.unwrap();
        assert!(matches!(
            Kv::<String>::get(&kv, "guid-1").await,
            Err(KvError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_entry_is_not_found() {
        let kv: MemKv = MemKv::new();
        Kv::<String>::put(
            &kv,
            "guid-2",
            &"payload".to_owned(),
            Duration::from_millis(1),
            None,
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            Kv::<String>::get(&kv, "guid-2").await,
            Err(KvError::NotFound)
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let kv: MemKv = MemKv::new();
        Kv::<String>::remove(&kv, "never-existed").await.unwrap();
    }
}
