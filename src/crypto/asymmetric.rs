//! RSA primitives: import wrapping keys and SignVerify key material

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Modulus size of every RSA key this service generates
pub const RSA_KEY_BITS: usize = 2048;

/// Padding used to wrap key material for import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WrappingAlgorithm {
    /// RSAES-OAEP with SHA-256
    RsaesOaepSha256,
    /// RSAES-PKCS1-v1_5
    RsaesPkcs1V15,
}

/// Key type of an import wrapping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WrappingKeySpec {
    /// 2048-bit RSA
    Rsa2048,
}

/// Signature scheme for SignVerify keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SigningAlgorithm {
    /// RSASSA-PSS with SHA-256
    RsassaPssSha256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RsassaPkcs1V15Sha256,
}

fn generate_private_key() -> Result<RsaPrivateKey> {
    RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| Error::Internal(format!("failed to generate RSA key: {}", e)))
}

fn public_key_der(private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    RsaPublicKey::from(private_key)
        .to_public_key_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| Error::Internal(format!("failed to encode RSA public key: {}", e)))
}

/// Ephemeral keypair that unwraps imported key material
pub struct WrappingKeyPair {
    private_key: RsaPrivateKey,
    algorithm: WrappingAlgorithm,
}

impl std::fmt::Debug for WrappingKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingKeyPair")
            .field("private_key", &"<hidden>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl WrappingKeyPair {
    /// Generates a keypair for `algorithm`
    pub fn generate(algorithm: WrappingAlgorithm, spec: WrappingKeySpec) -> Result<Self> {
        match spec {
            WrappingKeySpec::Rsa2048 => Ok(Self {
                private_key: generate_private_key()?,
                algorithm,
            }),
        }
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        public_key_der(&self.private_key)
    }

    /// Unwraps material encrypted under the public half
    pub fn unwrap_material(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let material = match self.algorithm {
            WrappingAlgorithm::RsaesOaepSha256 => {
                self.private_key.decrypt(Oaep::new::<Sha256>(), wrapped)
            }
            WrappingAlgorithm::RsaesPkcs1V15 => self.private_key.decrypt(Pkcs1v15Encrypt, wrapped),
        }
        .map_err(|_| Error::IncorrectKeyMaterial("unable to unwrap key material".into()))?;
        Ok(Zeroizing::new(material))
    }
}

/// Private key of a SignVerify CMK
#[derive(Clone)]
pub struct SigningKeyMaterial {
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for SigningKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyMaterial")
            .field("private_key", &"<hidden>")
            .finish()
    }
}

impl SigningKeyMaterial {
    /// Generates a fresh RSA-2048 signing key
    pub fn generate() -> Result<Self> {
        Ok(Self {
            private_key: generate_private_key()?,
        })
    }

    /// Returns the DER-encoded SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        public_key_der(&self.private_key)
    }

    /// Signs `message`
    pub fn sign(&self, algorithm: SigningAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        let signature = match algorithm {
            SigningAlgorithm::RsassaPssSha256 => {
                let key = rsa::pss::BlindedSigningKey::<Sha256>::new(self.private_key.clone());
                key.sign_with_rng(&mut OsRng, message).to_vec()
            }
            SigningAlgorithm::RsassaPkcs1V15Sha256 => {
                let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.private_key.clone());
                key.sign_with_rng(&mut OsRng, message).to_vec()
            }
        };
        Ok(signature)
    }

    /// Checks `signature` over `message`
    pub fn verify(&self, algorithm: SigningAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        let public_key = RsaPublicKey::from(&self.private_key);
        match algorithm {
            SigningAlgorithm::RsassaPssSha256 => {
                let key = rsa::pss::VerifyingKey::<Sha256>::new(public_key);
                rsa::pss::Signature::try_from(signature)
                    .map(|sig| key.verify(message, &sig).is_ok())
                    .unwrap_or(false)
            }
            SigningAlgorithm::RsassaPkcs1V15Sha256 => {
                let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);
                rsa::pkcs1v15::Signature::try_from(signature)
                    .map(|sig| key.verify(message, &sig).is_ok())
                    .unwrap_or(false)
            }
        }
    }
}
