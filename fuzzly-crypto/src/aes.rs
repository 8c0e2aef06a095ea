//! AES-256-GCM envelope encryption for `OtpStore` (§4.5).
//!
//! Unlike the "derive key, zero nonce" scheme used elsewhere for one-shot
//! encryption, `OtpRecord` (§3) normatively stores an explicit 12-byte
//! `nonce` field alongside the ciphertext, so this module generates a fresh
//! random nonce per encryption and returns it to the caller for storage,
//! rather than deriving a single-use key per message.

use ring::aead;
use thiserror::Error;

use crate::rng::Crng;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to generate random nonce")]
    NonceGen,
    #[error("AES-GCM encryption failed")]
    Encrypt,
    #[error("AES-GCM decryption or authentication failed")]
    Decrypt,
}

/// A 256-bit AES-GCM key, e.g. `SHA-256(email || secrets[i])` (§3, §4.5).
pub struct AesKey(aead::LessSafeKey);

impl AesKey {
    pub fn new(key_bytes: &[u8; KEY_LEN]) -> Self {
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key_bytes)
            .expect("key is exactly AES_256_GCM's required length");
        Self(aead::LessSafeKey::new(unbound))
    }

    /// Generate a fresh random nonce for a new encryption.
    pub fn generate_nonce(
        rng: &mut dyn Crng,
    ) -> Result<[u8; NONCE_LEN], Error> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.try_fill_bytes(&mut nonce).map_err(|_| Error::NonceGen)?;
        Ok(nonce)
    }

    /// Encrypt `plaintext` under `nonce` with additional authenticated data
    /// `aad`. Returns `ciphertext || tag`.
    pub fn encrypt(
        &self,
        nonce: [u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut in_out = plaintext.to_vec();
        let nonce = aead::Nonce::assume_unique_for_key(nonce);
        self.0
            .seal_in_place_append_tag(
                nonce,
                aead::Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| Error::Encrypt)?;
        Ok(in_out)
    }

    /// Decrypt a `ciphertext || tag` blob produced by [`Self::encrypt`].
    pub fn decrypt(
        &self,
        nonce: [u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut in_out = ciphertext.to_vec();
        let nonce = aead::Nonce::assume_unique_for_key(nonce);
        let plaintext = self
            .0
            .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
            .map_err(|_| Error::Decrypt)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::SysRng;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = AesKey::new(&[0x42; KEY_LEN]);
        let nonce = AesKey::generate_nonce(&mut SysRng::new()).unwrap();
        let aad = b"pepper-0";
        let plaintext = b"JBSWY3DPEHPK3PXP";

        let ciphertext = key.encrypt(nonce, aad, plaintext).unwrap();
        let decrypted = key.decrypt(nonce, aad, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_aad_fails_to_decrypt() {
        let key = AesKey::new(&[0x42; KEY_LEN]);
        let nonce = AesKey::generate_nonce(&mut SysRng::new()).unwrap();
        let ciphertext = key.encrypt(nonce, b"pepper-0", b"secret").unwrap();
        assert!(key.decrypt(nonce, b"pepper-1", &ciphertext).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key1 = AesKey::new(&[0x42; KEY_LEN]);
        let key2 = AesKey::new(&[0x43; KEY_LEN]);
        let nonce = AesKey::generate_nonce(&mut SysRng::new()).unwrap();
        let ciphertext = key1.encrypt(nonce, b"aad", b"secret").unwrap();
        assert!(key2.decrypt(nonce, b"aad", &ciphertext).is_err());
    }
}
