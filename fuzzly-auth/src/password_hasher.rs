//! C5: `PasswordHasher` — a thin wrapper tying [`fuzzly_crypto::password`] to
//! the process [`SecretStore`] (§4.4). The Argon2 computation itself is
//! CPU-bound and is dispatched to `tokio::task::spawn_blocking` (§5: "MUST
//! be dispatched to a worker pool so that the scheduler is not starved
//! under credential-stuffing"); only salt/pepper selection touches the RNG
//! on the calling task.

use fuzzly_crypto::{password, password::Argon2Params, rng::Crng};
use tracing::error;
use uuid::Uuid;

use fuzzly_api_core::error::AuthError;

use crate::secret_store::SecretStore;

fn internal(context: &str, e: impl std::fmt::Display) -> AuthError {
    let refid = Uuid::new_v4().to_string();
    error!(%refid, error = %e, "{context}");
    AuthError::internal(refid)
}

fn join_error(e: tokio::task::JoinError) -> AuthError {
    let refid = Uuid::new_v4().to_string();
    error!(%refid, error = %e, "argon2 worker task panicked");
    AuthError::internal(refid)
}

pub struct PasswordHasher {
    params: Argon2Params,
}

impl PasswordHasher {
    pub fn new(params: Argon2Params) -> Self {
        Self { params }
    }

    /// Hash `password`, selecting a random pepper from `secrets`. Returns the
    /// PHC-format hash and the `secret_index` to store alongside it.
    pub async fn hash(
        &self,
        rng: &mut dyn Crng,
        secrets: &SecretStore,
        password: &str,
    ) -> Result<(String, i16), AuthError> {
        let index = secrets.random_index(rng);
        let pepper = secrets.get(index).to_vec();
        let salt = password::generate_salt(rng).map_err(|e| internal("failed to generate salt", e))?;
        let params = self.params;
        let password = password.to_owned();

        let hashed = tokio::task::spawn_blocking(move || {
            password::hash_with_salt(params, password.as_bytes(), &pepper, &salt)
        })
        .await
        .map_err(join_error)?
        .map_err(|e| internal("failed to hash password", e))?;
        Ok((hashed, index as i16))
    }

    /// Verify `password` against `encoded_hash`, using the pepper at
    /// `secret_index`. Never errors on mismatch (§7 oracle-avoidance).
    pub async fn verify(
        &self,
        secrets: &SecretStore,
        encoded_hash: &str,
        password: &str,
        secret_index: i16,
    ) -> Result<bool, AuthError> {
        if secret_index < 0 || secret_index as usize >= secrets.len() {
            return Ok(false);
        }
        let pepper = secrets.get(secret_index as usize).to_vec();
        let encoded_hash = encoded_hash.to_owned();
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || password::verify(&encoded_hash, password.as_bytes(), &pepper))
            .await
            .map_err(join_error)?
            .map_err(|e| internal("failed to verify password hash", e))
    }

    /// Whether `encoded_hash` was hashed with weaker parameters than this
    /// process currently uses, i.e. should be rehashed after a successful
    /// login (§4.4).
    pub fn needs_rehash(&self, encoded_hash: &str) -> bool {
        password::needs_rehash(encoded_hash, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fuzzly_crypto::rng::SysRng;

    fn secrets() -> SecretStore {
        SecretStore::new(vec![b"pepper-0".to_vec(), b"pepper-1".to_vec()]).unwrap()
    }

    #[tokio::test]
    async fn hash_then_verify_succeeds() {
        let hasher = PasswordHasher::new(Argon2Params::default());
        let secrets = secrets();
        let mut rng = SysRng::new();
        let (hashed, index) = hasher.hash(&mut rng, &secrets, "hunter2").await.unwrap();
        assert!(hasher.verify(&secrets, &hashed, "hunter2", index).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_password_does_not_verify() {
        let hasher = PasswordHasher::new(Argon2Params::default());
        let secrets = secrets();
        let mut rng = SysRng::new();
        let (hashed, index) = hasher.hash(&mut rng, &secrets, "hunter2").await.unwrap();
        assert!(!hasher.verify(&secrets, &hashed, "wrong", index).await.unwrap());
    }

    #[tokio::test]
    async fn out_of_range_secret_index_fails_closed() {
        let hasher = PasswordHasher::new(Argon2Params::default());
        let secrets = secrets();
        let mut rng = SysRng::new();
        let (hashed, _index) = hasher.hash(&mut rng, &secrets, "hunter2").await.unwrap();
        assert!(!hasher.verify(&secrets, &hashed, "hunter2", 99).await.unwrap());
    }

    #[tokio::test]
    async fn needs_rehash_detects_weaker_params() {
        let weak = Argon2Params { memory_kib: 8 * 1024, iterations: 1, parallelism: 1 };
        let strong = Argon2Params::default();
        let hasher = PasswordHasher::new(weak);
        let secrets = secrets();
        let mut rng = SysRng::new();
        let (hashed, _index) = hasher.hash(&mut rng, &secrets, "hunter2").await.unwrap();

        let current_hasher = PasswordHasher::new(strong);
        assert!(current_hasher.needs_rehash(&hashed));
    }
}
