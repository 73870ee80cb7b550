use crate::error::{Error, Result};
use crate::util::fill_random;
use crate::Aead;
use crate::AES256_KEY_SIZE;
use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    Aes256Gcm, Key as AesKey, Nonce,
};

use super::{GCM_NONCE_SIZE, GCM_TAG_SIZE};

/// AES-256-GCM implementation of AEAD
///
/// Output layout is `nonce || ciphertext || tag` with a fresh random 96-bit nonce
/// per call.
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    /// Creates a new instance of the AES-256-GCM AEAD implementation
    pub fn new() -> Self {
        Self
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        if key.len() != AES256_KEY_SIZE {
            return Err(Error::Internal(format!(
                "AES-256-GCM requires a {}-byte key, got {}",
                AES256_KEY_SIZE,
                key.len()
            )));
        }
        Ok(Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key)))
    }
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Self::cipher(key)?;

        let mut nonce_and_cipher = Vec::with_capacity(GCM_NONCE_SIZE + data.len() + GCM_TAG_SIZE);
        let mut nonce_bytes = [0_u8; GCM_NONCE_SIZE];
        fill_random(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: data, aad })
            .map_err(|e| Error::Internal(format!("encryption failed: {}", e)))?;

        nonce_and_cipher.extend_from_slice(&nonce_bytes);
        nonce_and_cipher.extend_from_slice(&ciphertext);
        Ok(nonce_and_cipher)
    }

    fn decrypt(&self, data: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            return Err(Error::InvalidCiphertext(
                "data length is too short for GCM (nonce + tag)".into(),
            ));
        }

        let cipher = Self::cipher(key)?;
        let nonce = Nonce::from_slice(&data[..GCM_NONCE_SIZE]);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &data[GCM_NONCE_SIZE..],
                    aad,
                },
            )
            .map_err(|_| Error::InvalidCiphertext("authentication failed".into()))
    }
}
