//! C9: `BanRegistry` — the read side of moderation bans (§4.8): user-ban
//! lookup by `user_id`, IP-ban lookup by salted hash. Reads are cached;
//! writes invalidate the cache entry for that user/ip.

use std::sync::Arc;

use fuzzly_db::{models::BanRow, AuthDb, DbError};
use quick_cache::sync::Cache;
use tracing::error;
use uuid::Uuid;

use fuzzly_api_core::error::AuthError;

fn internal(e: DbError) -> AuthError {
    let refid = Uuid::new_v4().to_string();
    error!(%refid, error = %e, "ban registry database error");
    AuthError::internal(refid)
}

/// `BanRegistry` hashes IPs with SHA-1 before ever touching the store
/// (§4.8: `_read_ip_ban` "hashes `ip || ip_salt`... and selects by hash, not
/// by plaintext IP"), so the plaintext address is never persisted or cached.
pub struct BanRegistry<D: AuthDb> {
    db: Arc<D>,
    ip_salt: Vec<u8>,
    user_bans: Cache<i64, Option<BanRow>>,
    /// Keyed by the 20-byte SHA-1 digest, not the plaintext IP. Absent IPs
    /// cache `None` to avoid repeated DB hits on every anonymous request.
    ip_bans: Cache<[u8; fuzzly_sha256::HASH1_LEN], Option<i64>>,
}

impl<D: AuthDb> BanRegistry<D> {
    pub fn new(db: Arc<D>, ip_salt: Vec<u8>) -> Self {
        Self {
            db,
            ip_salt,
            user_bans: Cache::new(4096),
            ip_bans: Cache::new(4096),
        }
    }

    pub fn ip_hash(&self, ip: &str) -> [u8; fuzzly_sha256::HASH1_LEN] {
        fuzzly_sha256::digest1_many(&[ip.as_bytes(), &self.ip_salt]).into()
    }

    /// The active ban on `user_id`, if any (§3: `Ban` "active iff
    /// `completed > now`", enforced by the store's query).
    pub async fn user_ban(&self, user_id: i64) -> Result<Option<BanRow>, AuthError> {
        if let Some(cached) = self.user_bans.get(&user_id) {
            return Ok(cached);
        }
        let ban = self.db.fetch_active_ban(user_id).await.map_err(internal)?;
        self.user_bans.insert(user_id, ban.clone());
        Ok(ban)
    }

    /// The `ban_id` banning `ip`, if any. Looks up by [`Self::ip_hash`], not
    /// the plaintext address (§4.8).
    pub async fn ip_ban(&self, ip: &str) -> Result<Option<i64>, AuthError> {
        let hash = self.ip_hash(ip);
        if let Some(cached) = self.ip_bans.get(&hash) {
            return Ok(cached);
        }
        let row = self.db.fetch_ip_ban(&hash).await.map_err(internal)?;
        let ban_id = row.map(|r| r.ban_id);
        self.ip_bans.insert(hash, ban_id);
        Ok(ban_id)
    }

    /// Record that `ip` is banned under `ban_id` (§4.7 step 7: "record the
    /// ip-hash → ban-id mapping so subsequent IP-level checks
    /// short-circuit"), invalidating the cache entry for it.
    pub async fn record_ip_ban(&self, ip: &str, ban_id: i64) -> Result<(), AuthError> {
        let hash = self.ip_hash(ip);
        self.db.insert_ip_ban(&hash, ban_id).await.map_err(internal)?;
        self.ip_bans.insert(hash, Some(ban_id));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Utc;
    use fuzzly_db::{
        mem::MemDb,
        models::{BanRow, BanType},
    };

    use super::*;

    #[tokio::test]
    async fn user_ban_is_cached_after_first_read() {
        let db = Arc::new(MemDb::new());
        db.seed_ban(BanRow {
            ban_id: db.next_ban_id(),
            ban_type: BanType::User,
            user_id: 7,
            created: Utc::now(),
            completed: Utc::now() + chrono::Duration::hours(1),
            reason: None,
        });
        let registry = BanRegistry::new(db, b"ip-salt".to_vec());
        let first = registry.user_ban(7).await.unwrap();
        assert!(first.is_some());
        let second = registry.user_ban(7).await.unwrap();
        assert_eq!(first.unwrap().ban_id, second.unwrap().ban_id);
    }

    #[tokio::test]
    async fn absent_ip_ban_caches_negative_result() {
        let db = Arc::new(MemDb::new());
        let registry = BanRegistry::new(db, b"ip-salt".to_vec());
        assert!(registry.ip_ban("1.2.3.4").await.unwrap().is_none());
        assert!(registry.ip_ban("1.2.3.4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_ip_ban_is_visible_immediately() {
        let db = Arc::new(MemDb::new());
        let registry = BanRegistry::new(db, b"ip-salt".to_vec());
        registry.record_ip_ban("5.6.7.8", 42).await.unwrap();
        assert_eq!(registry.ip_ban("5.6.7.8").await.unwrap(), Some(42));
    }

    #[test]
    fn ip_hash_depends_on_salt() {
        let a = BanRegistry::new(Arc::new(MemDb::new()), b"salt-a".to_vec());
        let b = BanRegistry::new(Arc::new(MemDb::new()), b"salt-b".to_vec());
        assert_ne!(a.ip_hash("9.9.9.9"), b.ip_hash("9.9.9.9"));
    }
}
