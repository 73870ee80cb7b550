//! Customer master keys
//!
//! [`CmkRecord`] is the internal record of one key. It holds the key material and
//! is never handed to callers; [`KeyMetadata`] is the descriptor they see instead.
//! [`store::KeyStore`] owns every record and all state transitions.

pub mod arn;
pub mod policy;
pub mod store;

use crate::crypto::asymmetric::SigningKeyMaterial;
use crate::error::{Error, Result};
use crate::model::Principal;
use crate::AES256_KEY_SIZE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

pub use store::KeyStore;

/// Lifecycle state of a CMK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// External key waiting for its material
    PendingImport,
    /// Usable for cryptographic operations
    Enabled,
    /// Not usable until enabled again
    Disabled,
    /// Scheduled for deletion, cancellable until the sweep destroys it
    PendingDeletion,
    /// Reserved for multi-region replicas, never entered by this service
    PendingReplicaDeletion,
    /// Backing custom key store is disconnected
    Unavailable,
}

/// Where a CMK's key material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Generated by this service
    Native,
    /// Imported by the caller
    External,
    /// Generated inside a custom key store
    CustomStore,
}

/// Cryptographic operations a CMK supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    /// Encrypt, decrypt, data keys and re-encryption
    EncryptDecrypt,
    /// Sign and verify
    SignVerify,
}

/// Type of a CMK's material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpec {
    /// 256-bit AES-GCM
    SymmetricDefault,
    /// 2048-bit RSA
    Rsa2048,
}

/// Whether imported material expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpirationModel {
    /// Material expires at `valid_to`
    KeyMaterialExpires,
    /// Material never expires
    KeyMaterialDoesNotExpire,
}

/// Caller-visible description of a CMK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyMetadata {
    pub key_id: String,
    pub arn: String,
    #[serde(rename = "AWSAccountId")]
    pub account_id: String,
    pub owner: Principal,
    pub description: String,
    pub key_state: KeyState,
    pub enabled: bool,
    pub origin: Origin,
    pub key_usage: KeyUsage,
    pub key_spec: KeySpec,
    pub creation_date: DateTime<Utc>,
    pub deletion_date: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub expiration_model: Option<ExpirationModel>,
    pub custom_key_store_id: Option<String>,
}

/// One generation of symmetric key material
pub(crate) type SymmetricKey = Zeroizing<[u8; AES256_KEY_SIZE]>;

/// Secret material of a CMK
#[derive(Clone)]
pub(crate) enum KeyMaterial {
    /// AES-256 keys, indexed by generation; the last one encrypts
    Symmetric(Vec<SymmetricKey>),
    /// RSA private key of a SignVerify key
    Signing(SigningKeyMaterial),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Symmetric(generations) => f
                .debug_struct("Symmetric")
                .field("generations", &generations.len())
                .finish(),
            KeyMaterial::Signing(_) => f.write_str("Signing(<hidden>)"),
        }
    }
}

impl KeyMaterial {
    /// Creates symmetric material with a single random generation
    pub(crate) fn random_symmetric() -> Self {
        KeyMaterial::Symmetric(vec![random_symmetric_key()])
    }

    /// Wraps imported bytes as the sole generation
    pub(crate) fn from_imported(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != AES256_KEY_SIZE {
            return Err(Error::IncorrectKeyMaterial(format!(
                "imported material must be {} bytes, got {}",
                AES256_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0_u8; AES256_KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(KeyMaterial::Symmetric(vec![key]))
    }
}

pub(crate) fn random_symmetric_key() -> SymmetricKey {
    let mut key = Zeroizing::new([0_u8; AES256_KEY_SIZE]);
    crate::util::fill_random(&mut key[..]);
    key
}

/// Internal record of one CMK
#[derive(Debug)]
pub struct CmkRecord {
    pub(crate) key_id: String,
    pub(crate) arn: String,
    pub(crate) account_id: String,
    pub(crate) owner: Principal,
    pub(crate) description: String,
    pub(crate) state: KeyState,
    pub(crate) origin: Origin,
    pub(crate) key_usage: KeyUsage,
    pub(crate) key_spec: KeySpec,
    pub(crate) material: Option<KeyMaterial>,
    /// SHA-256 of the first material imported into an External key
    pub(crate) imported_fingerprint: Option<[u8; 32]>,
    pub(crate) rotation_enabled: bool,
    pub(crate) next_rotation: Option<DateTime<Utc>>,
    pub(crate) creation_date: DateTime<Utc>,
    pub(crate) deletion_date: Option<DateTime<Utc>>,
    pub(crate) valid_to: Option<DateTime<Utc>>,
    pub(crate) expiration_model: Option<ExpirationModel>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) policy: String,
    pub(crate) custom_key_store_id: Option<String>,
    /// State to restore when an Unavailable key's store reconnects
    pub(crate) resume_state: Option<KeyState>,
    /// Set once the sweep has begun destroying the key
    pub(crate) destroyed: bool,
    pub(crate) sequence: u64,
}

impl CmkRecord {
    /// Returns the caller-visible descriptor
    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            key_id: self.key_id.clone(),
            arn: self.arn.clone(),
            account_id: self.account_id.clone(),
            owner: self.owner.clone(),
            description: self.description.clone(),
            key_state: self.state,
            enabled: self.state == KeyState::Enabled,
            origin: self.origin,
            key_usage: self.key_usage,
            key_spec: self.key_spec,
            creation_date: self.creation_date,
            deletion_date: self.deletion_date,
            valid_to: self.valid_to,
            expiration_model: self.expiration_model,
            custom_key_store_id: self.custom_key_store_id.clone(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn key_usage(&self) -> KeyUsage {
        self.key_usage
    }

    /// Fails unless the key state permits cryptographic use
    ///
    /// Material is usable iff the key is `Enabled`.
    pub fn ensure_usable(&self) -> Result<()> {
        match self.state {
            KeyState::Enabled => Ok(()),
            KeyState::Disabled => Err(Error::Disabled(format!("{} is disabled", self.arn))),
            KeyState::Unavailable => Err(Error::KeyUnavailable(format!(
                "custom key store of {} is disconnected",
                self.arn
            ))),
            state => Err(Error::InvalidState(format!("{} is {:?}", self.arn, state))),
        }
    }

    /// Fails unless the key supports `usage`
    pub fn ensure_usage(&self, usage: KeyUsage) -> Result<()> {
        if self.key_usage != usage {
            return Err(Error::InvalidKeyUsage(format!(
                "{} has key usage {:?}",
                self.arn, self.key_usage
            )));
        }
        Ok(())
    }

    /// Fails if the key is scheduled for deletion or being destroyed
    pub(crate) fn ensure_not_pending_deletion(&self) -> Result<()> {
        if self.destroyed || self.state == KeyState::PendingDeletion {
            return Err(Error::InvalidState(format!(
                "{} is pending deletion",
                self.arn
            )));
        }
        Ok(())
    }

    /// Returns the newest symmetric generation and its index
    pub(crate) fn current_symmetric_key(&self) -> Result<(u32, &SymmetricKey)> {
        self.ensure_usable()?;
        self.ensure_usage(KeyUsage::EncryptDecrypt)?;
        match &self.material {
            Some(KeyMaterial::Symmetric(generations)) => {
                let generation = generations.len().checked_sub(1).ok_or_else(|| {
                    Error::Internal(format!("{} has no key material generations", self.arn))
                })?;
                let index = u32::try_from(generation)
                    .map_err(|_| Error::Internal("generation overflow".into()))?;
                Ok((index, &generations[generation]))
            }
            _ => Err(Error::Internal(format!(
                "{} is enabled without symmetric material",
                self.arn
            ))),
        }
    }

    /// Returns the symmetric material of `generation`
    pub(crate) fn symmetric_key(&self, generation: u32) -> Result<&SymmetricKey> {
        self.ensure_usable()?;
        self.ensure_usage(KeyUsage::EncryptDecrypt)?;
        match &self.material {
            Some(KeyMaterial::Symmetric(generations)) => usize::try_from(generation)
                .ok()
                .and_then(|g| generations.get(g))
                .ok_or_else(|| {
                    Error::InvalidCiphertext(format!(
                        "{} has no material generation {}",
                        self.arn, generation
                    ))
                }),
            _ => Err(Error::Internal(format!(
                "{} is enabled without symmetric material",
                self.arn
            ))),
        }
    }

    /// Returns the signing material of a SignVerify key
    pub(crate) fn signing_key(&self) -> Result<&SigningKeyMaterial> {
        self.ensure_usable()?;
        self.ensure_usage(KeyUsage::SignVerify)?;
        match &self.material {
            Some(KeyMaterial::Signing(key)) => Ok(key),
            _ => Err(Error::Internal(format!(
                "{} is enabled without signing material",
                self.arn
            ))),
        }
    }
}
