//! Halyard Core - Consensus data model, cryptography, and serialization
//!
//! This crate provides the types exchanged between Halyard validators and the
//! hashing/signing primitives the consensus core consumes.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    hash_blake3, merkle_root, sign, verify, Ed25519Verifier, Hash, HashSigner, HashVerifier,
    KeyPair, PublicKey, SecretKey, Sig,
};
pub use error::CoreError;
pub use types::*;
