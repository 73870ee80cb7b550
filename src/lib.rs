//! # Local Key Management Service
//!
//! An in-process key management service with the semantics of a cloud KMS.
//!
//! `localkms` manages customer master keys (CMKs) and performs envelope encryption
//! under them: it encrypts small payloads, generates and wraps data keys, and
//! re-encrypts ciphertexts between keys. Around that core it provides grants (delegated
//! and revocable permissions), aliases, a key lifecycle state machine with scheduled
//! deletion, import of external key material, yearly rotation, key policies, tags,
//! RSA signing keys and simulated custom key stores.
//!
//! Every operation is a synchronous call on [`KeyManagementService`] that takes the
//! caller's [`Principal`] and a request struct. Deferred transitions (deletion
//! windows, material expiry, rotation, import token expiry) are evaluated by
//! [`KeyManagementService::sweep`] against an injected [`Clock`], which a tokio task
//! started by [`KeyManagementService::spawn_sweeper`] can drive periodically.
//!
//! ## Basic Usage
//!
//! ```rust
//! use localkms::{KeyManagementService, KmsConfig, Principal};
//! use localkms::service::{CreateKeyRequest, DecryptRequest, EncryptRequest};
//! use zeroize::Zeroizing;
//!
//! # fn example() -> localkms::Result<()> {
//! let kms = KeyManagementService::new(KmsConfig::new())?;
//! let admin = Principal::new("arn:aws:iam::111122223333:user/admin");
//!
//! let key = kms.create_key(&admin, CreateKeyRequest::default())?.key_metadata;
//!
//! let mut context = localkms::EncryptionContext::new();
//! context.insert("purpose".into(), "example".into());
//!
//! let encrypted = kms.encrypt(
//!     &admin,
//!     EncryptRequest {
//!         key_id: key.key_id.clone(),
//!         plaintext: Zeroizing::new(b"secret data".to_vec()),
//!         encryption_context: context.clone(),
//!         ..Default::default()
//!     },
//! )?;
//!
//! let decrypted = kms.decrypt(
//!     &admin,
//!     DecryptRequest {
//!         ciphertext_blob: encrypted.ciphertext_blob,
//!         encryption_context: context,
//!         ..Default::default()
//!     },
//! )?;
//! assert_eq!(decrypted.plaintext.as_slice(), b"secret data");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod alias;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod custom_store;
pub mod error;
pub mod grant;
pub mod key;
pub mod lifecycle;
pub mod model;
pub mod service;
pub mod util;

// Re-export key types
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::KmsConfig;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::grant::{GrantConstraints, GrantOperation};
pub use crate::key::{KeyMetadata, KeySpec, KeyState, KeyUsage, Origin};
pub use crate::lifecycle::SweepReport;
pub use crate::model::{EncryptionContext, Principal};
pub use crate::service::{KeyManagementService, KeyManagementServiceBuilder};

use std::fmt;

/// Size of AES-256 key in bytes
pub const AES256_KEY_SIZE: usize = 32;

/// Largest payload `encrypt` and `sign` accept, in bytes
pub const MAX_PLAINTEXT_SIZE: usize = 4096;

/// Largest `generate_random` request and data key size, in bytes
pub const MAX_RANDOM_BYTES: usize = 1024;

/// AEAD (Authenticated Encryption with Associated Data) interface
pub trait Aead: Send + Sync + fmt::Debug {
    /// Encrypts data using the provided key, authenticating `aad` alongside it
    fn encrypt(&self, data: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data using the provided key and the `aad` it was encrypted with
    fn decrypt(&self, data: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>>;
}
