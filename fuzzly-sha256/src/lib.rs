//! A convenience crate for hashing things with SHA-256, SHA3-512, and SHA-1.
//!
//! SHA-256 is used for the AES key derivation in `OtpStore` and the
//! DER-SPKI self-signature check in `KeyRing`. SHA3-512 is used for the
//! email hash in `UserLogin` (`email_hash = SHA3-512(email || secrets[0])`).
//! SHA-1 is used only for `BanRegistry`'s IP-ban lookup hash, matching the
//! original system; it is not used anywhere a collision would matter.

use std::fmt;

pub const HASH_LEN: usize = 32;
pub const HASH3_LEN: usize = 64;
pub const HASH1_LEN: usize = 20;

/// A SHA-256 hash value.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct Hash([u8; HASH_LEN]);

/// A SHA3-512 hash value.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct Hash3([u8; HASH3_LEN]);

/// A SHA-1 hash value.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct Hash1([u8; HASH1_LEN]);

/// A SHA-256 digest accumulator.
#[derive(Clone)]
pub struct Context(ring::digest::Context);

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> Hash {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating a combined buffer.
pub fn digest_many(inputs: &[&[u8]]) -> Hash {
    let mut ctx = Context::new();
    for input in inputs {
        ctx.update(input);
    }
    ctx.finish()
}

/// SHA3-512 digest several input slices concatenated together.
pub fn digest3_many(inputs: &[&[u8]]) -> Hash3 {
    use sha3::Digest;
    let mut hasher = sha3::Sha3_512::new();
    for input in inputs {
        hasher.update(input);
    }
    let out = hasher.finalize();
    Hash3(<[u8; HASH3_LEN]>::try_from(out.as_slice()).unwrap())
}

/// SHA-1 digest several input slices concatenated together (`BanRegistry`'s
/// IP-ban hash only; never used for anything security-sensitive).
pub fn digest1_many(inputs: &[&[u8]]) -> Hash1 {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY);
    for input in inputs {
        ctx.update(input);
    }
    let out = ctx.finish();
    Hash1(<[u8; HASH1_LEN]>::try_from(out.as_ref()).unwrap())
}

impl Hash {
    pub const fn new(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }

    fn from_ring(output: ring::digest::Digest) -> Self {
        Self::new(<[u8; HASH_LEN]>::try_from(output.as_ref()).unwrap())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8; HASH_LEN]> for Hash {
    fn as_ref(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", fuzzly_hex::encode(&self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", fuzzly_hex::encode(&self.0))
    }
}

impl Hash3 {
    pub const fn new(value: [u8; HASH3_LEN]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Hash3 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", fuzzly_hex::encode(&self.0))
    }
}

impl Hash1 {
    pub const fn new(value: [u8; HASH1_LEN]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Hash1 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8; HASH1_LEN]> for Hash1 {
    fn as_ref(&self) -> &[u8; HASH1_LEN] {
        &self.0
    }
}

impl From<Hash1> for [u8; HASH1_LEN] {
    fn from(value: Hash1) -> Self {
        value.0
    }
}

impl fmt::Debug for Hash1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", fuzzly_hex::encode(&self.0))
    }
}

impl Context {
    pub fn new() -> Self {
        Self(ring::digest::Context::new(&ring::digest::SHA256))
    }

    pub fn update(&mut self, input: &[u8]) {
        self.0.update(input);
    }

    pub fn finish(self) -> Hash {
        Hash::from_ring(self.0.finish())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = digest(b"hello");
        let b = digest(b"hello");
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn digest_many_matches_concatenation() {
        let combined = digest(b"helloworld");
        let split = digest_many(&[b"hello", b"world"]);
        assert_eq!(combined.0, split.0);
    }

    #[test]
    fn email_hash_is_deterministic() {
        let secret = b"pepper-0";
        let a = digest3_many(&[b"alice@example.com", secret]);
        let b = digest3_many(&[b"alice@example.com", secret]);
        assert_eq!(a.0, b.0);
        let c = digest3_many(&[b"bob@example.com", secret]);
        assert_ne!(a.0, c.0);
    }
}
