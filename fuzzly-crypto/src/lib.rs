//! Cryptographic primitives backing the authentication subsystem:
//! Ed25519 signing (`ed25519`), AES-256-GCM envelope encryption (`aes`),
//! Argon2id password hashing (`password`), and CSPRNG plumbing (`rng`).

pub mod aes;
pub mod ed25519;
pub mod password;
pub mod rng;
