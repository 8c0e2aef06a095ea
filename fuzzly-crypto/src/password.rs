//! Argon2id password hashing with pepper selection (§4.4).
//!
//! Hashing input is `password_bytes || pepper`, where `pepper` is one entry
//! of the process-wide `SecretStore` sequence, chosen by index at hash time
//! and recorded alongside the hash so `verify` knows which pepper to use.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
    Argon2, Params,
};
use thiserror::Error;

use crate::rng::Crng;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to hash password")]
    Hash,
    #[error("stored hash is malformed")]
    MalformedHash,
}

/// Argon2id parameters, loaded from configuration (§6.1). Values below match
/// OWASP's current minimum recommendation for Argon2id.
#[derive(Copy, Clone, Debug)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self { memory_kib: 19 * 1024, iterations: 2, parallelism: 1 }
    }
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params =
            Params::new(self.memory_kib, self.iterations, self.parallelism, None)
                .map_err(|_| Error::Hash)?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// Generate a fresh 16-byte salt. Split out from [`hash_with_salt`] so
/// callers that dispatch the (CPU-bound) Argon2 computation itself to a
/// worker pool (§5: "CPU-bound Argon2 verification MUST be dispatched to a
/// worker pool") only need to touch the RNG on the calling thread, not
/// inside the blocking closure.
pub fn generate_salt(rng: &mut dyn Crng) -> Result<SaltString, Error> {
    let mut salt_bytes = [0u8; 16];
    rng.try_fill_bytes(&mut salt_bytes).map_err(|_| Error::Hash)?;
    SaltString::encode_b64(&salt_bytes).map_err(|_| Error::Hash)
}

/// Hash `password || pepper` under `salt`, encoding the Argon2 parameters
/// inline in PHC string format. Pure CPU work: takes no RNG, so it can run
/// inside `tokio::task::spawn_blocking` unchanged.
pub fn hash_with_salt(
    params: Argon2Params,
    password: &[u8],
    pepper: &[u8],
    salt: &SaltString,
) -> Result<String, Error> {
    let mut salted_input = Vec::with_capacity(password.len() + pepper.len());
    salted_input.extend_from_slice(password);
    salted_input.extend_from_slice(pepper);

    let argon2 = params.to_argon2()?;
    let hash = argon2
        .hash_password(&salted_input, salt)
        .map_err(|_| Error::Hash)?;
    Ok(hash.to_string())
}

/// Hash `password || pepper` with a freshly generated salt. Convenience
/// wrapper over [`generate_salt`] + [`hash_with_salt`] for sync callers
/// (tests, non-async contexts) that don't need to offload the CPU work.
pub fn hash(
    rng: &mut dyn Crng,
    params: Argon2Params,
    password: &[u8],
    pepper: &[u8],
) -> Result<String, Error> {
    let salt = generate_salt(rng)?;
    hash_with_salt(params, password, pepper, &salt)
}

/// Verify `password || pepper` against a stored PHC-format hash. Returns
/// `Ok(false)` (not an error) for any mismatch: wrong password, wrong
/// pepper, or an algorithm/parameter mismatch all collapse to "false", as
/// required by §7's `FailedLogin` oracle-avoidance rule.
pub fn verify(
    encoded_hash: &str,
    password: &[u8],
    pepper: &[u8],
) -> Result<bool, Error> {
    let parsed =
        PasswordHash::new(encoded_hash).map_err(|_| Error::MalformedHash)?;

    let mut salted_input = Vec::with_capacity(password.len() + pepper.len());
    salted_input.extend_from_slice(password);
    salted_input.extend_from_slice(pepper);

    let argon2 = Argon2::default();
    Ok(argon2.verify_password(&salted_input, &parsed).is_ok())
}

/// True if `encoded_hash`'s parameters are below `current`, i.e. the row
/// should be rehashed on next successful verify (§4.4).
pub fn needs_rehash(encoded_hash: &str, current: Argon2Params) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded_hash) else {
        return true;
    };
    let Some(m_cost) = parsed.params.get("m").and_then(|v| v.decimal().ok())
    else {
        return true;
    };
    (m_cost as u32) < current.memory_kib
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::SysRng;

    #[test]
    fn hash_and_verify_roundtrip() {
        let mut rng = SysRng::new();
        let params = Argon2Params::default();
        let hashed =
            hash(&mut rng, params, b"correcthorsebatterystaple", b"pepper-0")
                .unwrap();
        assert!(verify(&hashed, b"correcthorsebatterystaple", b"pepper-0")
            .unwrap());
    }

    #[test]
    fn wrong_password_fails() {
        let mut rng = SysRng::new();
        let params = Argon2Params::default();
        let hashed =
            hash(&mut rng, params, b"correcthorsebatterystaple", b"pepper-0")
                .unwrap();
        assert!(!verify(&hashed, b"wrong12345", b"pepper-0").unwrap());
    }

    #[test]
    fn wrong_pepper_fails() {
        let mut rng = SysRng::new();
        let params = Argon2Params::default();
        let hashed =
            hash(&mut rng, params, b"correcthorsebatterystaple", b"pepper-0")
                .unwrap();
        assert!(!verify(&hashed, b"correcthorsebatterystaple", b"pepper-1")
            .unwrap());
    }
}
