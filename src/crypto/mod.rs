//! Cryptographic primitives and the envelope engine

pub mod aes256gcm;
pub mod asymmetric;
pub mod blob;
pub mod engine;

pub use aes256gcm::Aes256GcmAead;
pub use asymmetric::{SigningAlgorithm, WrappingAlgorithm, WrappingKeySpec};
pub use blob::CiphertextBlob;
pub use engine::{CryptoEngine, DataKeySpec, GeneratedDataKey};

/// Size of the AES-GCM nonce in bytes
pub const GCM_NONCE_SIZE: usize = 12;
/// Size of the AES-GCM authentication tag in bytes
pub const GCM_TAG_SIZE: usize = 16;
