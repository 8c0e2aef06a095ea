//! Random number generation utilities.

use std::num::NonZeroU32;

pub use rand_core::{CryptoRng, RngCore, SeedableRng};
use ring::rand::SecureRandom;

const RAND_ERROR_CODE: NonZeroU32 =
    NonZeroU32::new(rand_core::Error::CUSTOM_START).unwrap();

/// A succinct trait alias for a cryptographically secure PRNG.
pub trait Crng: RngCore + CryptoRng {}

impl<R: RngCore + CryptoRng> Crng for R {}

/// A compatibility wrapper so we can use `ring`'s PRG with `rand_core` traits.
#[derive(Clone, Debug, Default)]
pub struct SysRng(ring::rand::SystemRandom);

impl SysRng {
    pub fn new() -> Self {
        Self(ring::rand::SystemRandom::new())
    }
}

impl CryptoRng for SysRng {}

impl RngCore for SysRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.try_fill_bytes(dest).expect("ring SystemRandom failed")
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.0
            .fill(dest)
            .map_err(|_| rand_core::Error::from(RAND_ERROR_CODE))
    }
}

/// A small, fast, _non-cryptographic_ RNG used only to seed deterministic
/// tests (key rotation, recovery code generation, etc). Never used outside
/// `#[cfg(test)]`/`test-utils` code paths.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct SmallRng {
    s0: u32,
    s1: u32,
}

#[cfg(any(test, feature = "test-utils"))]
impl SmallRng {
    pub fn from_u64(s: u64) -> Self {
        Self::seed_from_u64(s)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl CryptoRng for SmallRng {}

#[cfg(any(test, feature = "test-utils"))]
impl RngCore for SmallRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let r = self.s0.wrapping_mul(0x9e3779bb);
        self.s1 ^= self.s0;
        self.s0 = self.s0.rotate_left(26) ^ self.s1 ^ (self.s1 << 9);
        self.s1 = self.s1.rotate_left(13);
        r
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest);
    }

    #[inline]
    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SeedableRng for SmallRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        if seed == [0u8; 8] {
            Self { s0: 0xdeadbeef, s1: 0xf00baa44 }
        } else {
            let s0 = u32::from_le_bytes(seed[0..4].try_into().unwrap());
            let s1 = u32::from_le_bytes(seed[4..8].try_into().unwrap());
            Self { s0, s1 }
        }
    }
}
