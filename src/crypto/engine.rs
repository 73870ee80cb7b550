use crate::crypto::asymmetric::SigningAlgorithm;
use crate::crypto::blob::CiphertextBlob;
use crate::crypto::Aes256GcmAead;
use crate::error::{Error, Result};
use crate::key::{CmkRecord, KeyUsage};
use crate::model::EncryptionContext;
use crate::util::get_rand_bytes;
use crate::{Aead, MAX_PLAINTEXT_SIZE, MAX_RANDOM_BYTES};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use zeroize::Zeroizing;

/// Named data key sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKeySpec {
    /// 128-bit key
    Aes128,
    /// 256-bit key
    Aes256,
}

impl DataKeySpec {
    /// Length of the key in bytes
    pub fn key_len(self) -> usize {
        match self {
            DataKeySpec::Aes128 => 16,
            DataKeySpec::Aes256 => 32,
        }
    }

    /// Resolves the data key length from exactly one of a spec or a byte count
    pub fn resolve_len(spec: Option<DataKeySpec>, number_of_bytes: Option<usize>) -> Result<usize> {
        match (spec, number_of_bytes) {
            (Some(spec), None) => Ok(spec.key_len()),
            (None, Some(n)) if (1..=MAX_RANDOM_BYTES).contains(&n) => Ok(n),
            (None, Some(n)) => Err(Error::Validation(format!(
                "number of bytes must be between 1 and {}, got {}",
                MAX_RANDOM_BYTES, n
            ))),
            (Some(_), Some(_)) => Err(Error::Validation(
                "specify either a key spec or a number of bytes, not both".into(),
            )),
            (None, None) => Err(Error::Validation(
                "a key spec or a number of bytes is required".into(),
            )),
        }
    }
}

/// A freshly generated data key
pub struct GeneratedDataKey {
    /// Id of the CMK that wrapped the key
    pub key_id: String,
    /// The data key itself
    pub plaintext: Zeroizing<Vec<u8>>,
    /// The data key encrypted under the CMK
    pub ciphertext_blob: Vec<u8>,
}

impl std::fmt::Debug for GeneratedDataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedDataKey")
            .field("key_id", &self.key_id)
            .field("plaintext", &"<hidden>")
            .field("ciphertext_blob", &self.ciphertext_blob.len())
            .finish()
    }
}

/// Envelope cryptography over CMK records
///
/// The engine never looks keys up itself: callers pass the record they hold a read
/// guard on, so the state check and the use of the material see the same state.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    aead: Arc<dyn Aead>,
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoEngine {
    /// Creates an engine backed by AES-256-GCM
    pub fn new() -> Self {
        Self::with_aead(Arc::new(Aes256GcmAead::new()))
    }

    /// Creates an engine backed by `aead`
    pub fn with_aead(aead: Arc<dyn Aead>) -> Self {
        Self { aead }
    }

    fn check_plaintext(plaintext: &[u8]) -> Result<()> {
        if plaintext.is_empty() || plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(Error::Validation(format!(
                "plaintext must be between 1 and {} bytes, got {}",
                MAX_PLAINTEXT_SIZE,
                plaintext.len()
            )));
        }
        Ok(())
    }

    /// Encrypts `plaintext` under the newest generation of `record`
    pub fn encrypt(
        &self,
        record: &CmkRecord,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<Vec<u8>> {
        let start = Instant::now();

        Self::check_plaintext(plaintext)?;
        let (generation, key) = record.current_symmetric_key()?;
        let aad = CiphertextBlob::associated_data(record.key_id(), generation, context)?;
        let payload = self.aead.encrypt(plaintext, &key[..], &aad)?;
        let blob = CiphertextBlob::new(record.key_id(), generation, payload).to_bytes()?;

        histogram!("kms.encrypt.time", start.elapsed());
        counter!("kms.encrypt", 1);

        Ok(blob)
    }

    /// Returns the id of the key that produced `blob`
    pub fn key_id_of(blob: &[u8]) -> Result<String> {
        CiphertextBlob::parse(blob).map(|b| b.key_id)
    }

    /// Decrypts `blob` with the generation of `record` recorded in it
    pub fn decrypt(
        &self,
        record: &CmkRecord,
        blob: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let start = Instant::now();

        let parsed = CiphertextBlob::parse(blob)?;
        if parsed.key_id != record.key_id() {
            return Err(Error::IncorrectKey(format!(
                "ciphertext was produced by key {}, not {}",
                parsed.key_id,
                record.key_id()
            )));
        }

        let key = record.symmetric_key(parsed.generation)?;
        let aad = CiphertextBlob::associated_data(&parsed.key_id, parsed.generation, context)?;
        let plaintext = match self.aead.decrypt(&parsed.payload, &key[..], &aad) {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(e) => {
                counter!("kms.decrypt.failed", 1);
                return Err(e);
            }
        };

        histogram!("kms.decrypt.time", start.elapsed());
        counter!("kms.decrypt", 1);

        Ok(plaintext)
    }

    /// Generates a data key of `len` bytes and wraps it under `record`
    pub fn generate_data_key(
        &self,
        record: &CmkRecord,
        len: usize,
        context: &EncryptionContext,
    ) -> Result<GeneratedDataKey> {
        let start = Instant::now();

        let plaintext = Zeroizing::new(get_rand_bytes(len));
        let ciphertext_blob = self.encrypt(record, &plaintext, context)?;

        histogram!("kms.generate_data_key.time", start.elapsed());
        counter!("kms.generate_data_key", 1);

        Ok(GeneratedDataKey {
            key_id: record.key_id().to_string(),
            plaintext,
            ciphertext_blob,
        })
    }

    /// Returns `len` random bytes from the OS CSPRNG
    pub fn generate_random(len: usize) -> Result<Zeroizing<Vec<u8>>> {
        if !(1..=MAX_RANDOM_BYTES).contains(&len) {
            return Err(Error::Validation(format!(
                "number of bytes must be between 1 and {}, got {}",
                MAX_RANDOM_BYTES, len
            )));
        }
        counter!("kms.generate_random", 1);
        Ok(Zeroizing::new(get_rand_bytes(len)))
    }

    /// Signs `message` with a SignVerify key
    pub fn sign(
        &self,
        record: &CmkRecord,
        algorithm: SigningAlgorithm,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let start = Instant::now();

        Self::check_plaintext(message)?;
        let signature = record.signing_key()?.sign(algorithm, message)?;

        histogram!("kms.sign.time", start.elapsed());
        counter!("kms.sign", 1);
        Ok(signature)
    }

    /// Verifies `signature` over `message`; an invalid signature is `Ok(false)`
    pub fn verify(
        &self,
        record: &CmkRecord,
        algorithm: SigningAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        Self::check_plaintext(message)?;
        let valid = record.signing_key()?.verify(algorithm, message, signature);
        counter!("kms.verify", 1);
        Ok(valid)
    }

    /// Returns the DER-encoded public key of a SignVerify key
    pub fn public_key(&self, record: &CmkRecord) -> Result<Vec<u8>> {
        record.ensure_usage(KeyUsage::SignVerify)?;
        record.signing_key()?.public_key_der()
    }
}
