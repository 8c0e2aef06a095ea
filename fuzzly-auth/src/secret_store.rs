//! C1: a process-wide sequence of server-side salt secrets ("peppers"),
//! concatenated into password and email hashes and selected by index
//! per-row (§4.9). `len(secrets)` is fixed for the process lifetime.

use fuzzly_crypto::rng::Crng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("SecretStore requires at least one secret")]
    Empty,
}

pub struct SecretStore {
    secrets: Vec<Vec<u8>>,
}

impl SecretStore {
    pub fn new(secrets: Vec<Vec<u8>>) -> Result<Self, Error> {
        if secrets.is_empty() {
            return Err(Error::Empty);
        }
        Ok(Self { secrets })
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The pepper at `index`. Panics if `index >= len()`; `index` always
    /// comes from either [`Self::random_index`] or a stored `secret_index`
    /// column, both of which are bounds-checked at write time.
    pub fn get(&self, index: usize) -> &[u8] {
        &self.secrets[index]
    }

    /// Pick a pepper index uniformly at random, for a freshly-created hash.
    pub fn random_index(&self, rng: &mut dyn Crng) -> usize {
        (rng.next_u64() % self.secrets.len() as u64) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fuzzly_crypto::rng::SysRng;

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(SecretStore::new(vec![]), Err(Error::Empty)));
    }

    #[test]
    fn random_index_is_in_bounds() {
        let store = SecretStore::new(vec![vec![1], vec![2], vec![3]]).unwrap();
        let mut rng = SysRng::new();
        for _ in 0..100 {
            assert!(store.random_index(&mut rng) < store.len());
        }
    }

    #[test]
    fn single_secret_always_selects_zero() {
        let store = SecretStore::new(vec![vec![0xAB]]).unwrap();
        let mut rng = SysRng::new();
        assert_eq!(store.random_index(&mut rng), 0);
        assert_eq!(store.get(0), &[0xAB]);
    }
}
