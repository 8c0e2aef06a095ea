//! Ed25519 signing for the bearer token codec (`KeyRing`/`TokenCodec`) and
//! the key self-signature scheme (§4.1).

use ref_cast::RefCast;
use ring::signature::{self, KeyPair as _};
use thiserror::Error;

use crate::rng::Crng;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// The fixed 12-byte ASN.1 DER prefix for a SubjectPublicKeyInfo wrapping a
/// raw Ed25519 public key (RFC 8410, OID 1.3.101.112 `id-Ed25519`). Since
/// Ed25519 keys have no variable-length ASN.1 components, the full SPKI
/// encoding is always `SPKI_PREFIX || raw_public_key_bytes`.
pub const SPKI_PREFIX: [u8; 12] =
    [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to generate ed25519 key pair")]
    KeyGen,
    #[error("invalid public key length")]
    InvalidPkLength,
    #[error("invalid signature length")]
    InvalidSigLength,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("DER SPKI encoding is malformed")]
    BadSpki,
}

/// An Ed25519 key pair. Holds the 32-byte seed so we can reconstruct the
/// `ring` signing key on demand; `ring`'s `Ed25519KeyPair` is not `Clone`.
pub struct KeyPair {
    seed: [u8; SECRET_KEY_LEN],
    public_key: PublicKey,
}

/// A raw 32-byte Ed25519 public key.
#[derive(Copy, Clone, Eq, PartialEq, RefCast)]
#[repr(transparent)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

/// A raw 64-byte Ed25519 signature.
#[derive(Copy, Clone, Eq, PartialEq, RefCast)]
#[repr(transparent)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl KeyPair {
    /// Generate a fresh key pair from a CSPRNG.
    pub fn generate(rng: &mut dyn Crng) -> Result<Self, Error> {
        let mut seed = [0u8; SECRET_KEY_LEN];
        rng.try_fill_bytes(&mut seed).map_err(|_| Error::KeyGen)?;
        Self::from_seed(seed)
    }

    /// Reconstruct a key pair from its 32-byte seed.
    pub fn from_seed(seed: [u8; SECRET_KEY_LEN]) -> Result<Self, Error> {
        let ring_pair = signature::Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|_| Error::KeyGen)?;
        let public_key_bytes =
            <[u8; PUBLIC_KEY_LEN]>::try_from(ring_pair.public_key().as_ref())
                .map_err(|_| Error::KeyGen)?;
        Ok(Self { seed, public_key: PublicKey(public_key_bytes) })
    }

    /// For tests only: deterministic key pair seeded by a small integer.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_test(id: u64) -> Self {
        let mut seed = [0u8; SECRET_KEY_LEN];
        seed[..8].copy_from_slice(&id.to_le_bytes());
        Self::from_seed(seed).expect("deterministic seed is always valid")
    }

    fn ring_key_pair(&self) -> signature::Ed25519KeyPair {
        signature::Ed25519KeyPair::from_seed_unchecked(&self.seed)
            .expect("seed was already validated in from_seed")
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Sign an arbitrary message, returning the raw 64-byte signature.
    pub fn sign_raw(&self, msg: &[u8]) -> Signature {
        let sig = self.ring_key_pair().sign(msg);
        Signature(
            <[u8; SIGNATURE_LEN]>::try_from(sig.as_ref())
                .expect("ed25519 signatures are always 64 bytes"),
        )
    }

    /// Self-sign this key pair's own DER-SPKI-encoded public key, as
    /// required by `SigningKeyRecord` (§3: `signature == Sign(private,
    /// public_key)`, where `public_key` is the DER SPKI bytes).
    pub fn self_sign_spki(&self) -> (Vec<u8>, Signature) {
        let spki = self.public_key.to_der_spki();
        let sig = self.sign_raw(&spki);
        (spki, sig)
    }
}

impl PublicKey {
    pub fn from_raw(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Encode as a DER SubjectPublicKeyInfo, per §4.1.
    pub fn to_der_spki(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SPKI_PREFIX.len() + PUBLIC_KEY_LEN);
        out.extend_from_slice(&SPKI_PREFIX);
        out.extend_from_slice(&self.0);
        out
    }

    /// Decode a DER SubjectPublicKeyInfo produced by [`Self::to_der_spki`].
    pub fn from_der_spki(der: &[u8]) -> Result<Self, Error> {
        let raw = der.strip_prefix(&SPKI_PREFIX[..]).ok_or(Error::BadSpki)?;
        let bytes =
            <[u8; PUBLIC_KEY_LEN]>::try_from(raw).map_err(|_| Error::BadSpki)?;
        Ok(Self(bytes))
    }

    /// Verify a raw message signature.
    pub fn verify_raw(
        &self,
        msg: &[u8],
        sig: &Signature,
    ) -> Result<(), Error> {
        let unparsed =
            signature::UnparsedPublicKey::new(&signature::ED25519, &self.0);
        unparsed
            .verify(msg, &sig.0)
            .map_err(|_| Error::InvalidSignature)
    }

    /// Verify that `signature` is this key's self-signature over its own
    /// DER-SPKI encoding (§3, §4.1).
    pub fn verify_self_signature(
        &self,
        signature: &Signature,
    ) -> Result<(), Error> {
        let spki = self.to_der_spki();
        self.verify_raw(&spki, signature)
    }
}

impl Signature {
    pub fn from_raw(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr = <[u8; SIGNATURE_LEN]>::try_from(bytes)
            .map_err(|_| Error::InvalidSigLength)?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::rng::SysRng;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key_pair = KeyPair::generate(&mut SysRng::new()).unwrap();
        let sig = key_pair.sign_raw(b"hello world");
        key_pair.public_key().verify_raw(b"hello world", &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let key_pair = KeyPair::generate(&mut SysRng::new()).unwrap();
        let sig = key_pair.sign_raw(b"hello world");
        assert!(key_pair
            .public_key()
            .verify_raw(b"goodbye world", &sig)
            .is_err());
    }

    #[test]
    fn der_spki_roundtrip() {
        let key_pair = KeyPair::generate(&mut SysRng::new()).unwrap();
        let spki = key_pair.public_key().to_der_spki();
        assert_eq!(spki.len(), 44);
        let decoded = PublicKey::from_der_spki(&spki).unwrap();
        assert_eq!(decoded.as_bytes(), key_pair.public_key().as_bytes());
    }

    #[test]
    fn self_signature_verifies() {
        let key_pair = KeyPair::generate(&mut SysRng::new()).unwrap();
        let (spki, sig) = key_pair.self_sign_spki();
        let pk = PublicKey::from_der_spki(&spki).unwrap();
        pk.verify_self_signature(&sig).unwrap();
    }

    proptest! {
        #[test]
        fn deterministic_seed_is_stable(id: u64) {
            let a = KeyPair::for_test(id);
            let b = KeyPair::for_test(id);
            prop_assert_eq!(a.public_key().as_bytes(), b.public_key().as_bytes());
        }
    }
}
