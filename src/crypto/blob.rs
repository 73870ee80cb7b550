//! Self-describing ciphertext blobs
//!
//! ```text
//! version: u8 | key_id_len: u8 | key_id: [u8; key_id_len] | generation: u32 BE | aead payload
//! ```
//!
//! The header (everything before the AEAD payload) is authenticated as associated
//! data, followed by the canonical encryption context. `decrypt` reads the key id
//! and material generation from the header, so callers never name the key.

use crate::error::{Error, Result};
use crate::model::{canonical_context, EncryptionContext};

/// Current blob format version
pub const BLOB_VERSION: u8 = 1;

const FIXED_HEADER_LEN: usize = 1 + 1 + 4;

/// Parsed form of a ciphertext blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextBlob {
    /// Id of the key that produced the blob
    pub key_id: String,
    /// Material generation of that key
    pub generation: u32,
    /// `nonce || ciphertext || tag`
    pub payload: Vec<u8>,
}

impl CiphertextBlob {
    /// Creates a blob from its parts
    pub fn new(key_id: impl Into<String>, generation: u32, payload: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            generation,
            payload,
        }
    }

    /// Encodes the header for `key_id` and `generation`
    pub fn header(key_id: &str, generation: u32) -> Result<Vec<u8>> {
        let id_len = u8::try_from(key_id.len())
            .map_err(|_| Error::Internal(format!("key id too long for blob: {}", key_id)))?;

        let mut header = Vec::with_capacity(FIXED_HEADER_LEN + key_id.len());
        header.push(BLOB_VERSION);
        header.push(id_len);
        header.extend_from_slice(key_id.as_bytes());
        header.extend_from_slice(&generation.to_be_bytes());
        Ok(header)
    }

    /// Builds the associated data for `key_id`, `generation` and `context`
    pub fn associated_data(
        key_id: &str,
        generation: u32,
        context: &EncryptionContext,
    ) -> Result<Vec<u8>> {
        let mut aad = Self::header(key_id, generation)?;
        aad.extend_from_slice(&canonical_context(context)?);
        Ok(aad)
    }

    /// Serializes the blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Self::header(&self.key_id, self.generation)?;
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Parses a serialized blob
    ///
    /// Any structural problem is reported as `InvalidCiphertext`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidCiphertext(reason.to_string());

        let (&version, rest) = bytes.split_first().ok_or_else(|| invalid("empty blob"))?;
        if version != BLOB_VERSION {
            return Err(invalid("unsupported blob version"));
        }

        let (&id_len, rest) = rest.split_first().ok_or_else(|| invalid("truncated header"))?;
        let id_len = usize::from(id_len);
        if id_len == 0 || rest.len() < id_len + 4 {
            return Err(invalid("truncated header"));
        }

        let (id_bytes, rest) = rest.split_at(id_len);
        let key_id = std::str::from_utf8(id_bytes)
            .map_err(|_| invalid("key id is not utf-8"))?
            .to_string();

        let (generation_bytes, payload) = rest.split_at(4);
        let mut generation = [0_u8; 4];
        generation.copy_from_slice(generation_bytes);

        Ok(Self {
            key_id,
            generation: u32::from_be_bytes(generation),
            payload: payload.to_vec(),
        })
    }
}
