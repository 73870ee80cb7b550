use super::messages::*;
use super::KeyManagementService;
use crate::crypto::{CryptoEngine, DataKeySpec, SigningAlgorithm};
use crate::error::{Error, Result};
use crate::grant::GrantOperation;
use crate::key::KeyUsage;
use crate::model::Principal;

impl KeyManagementService {
    /// Encrypts up to 4 KiB under a key
    pub fn encrypt(&self, caller: &Principal, request: EncryptRequest) -> Result<EncryptResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::Encrypt,
            &request.encryption_context,
            &request.grant_tokens,
        )?;

        let ciphertext_blob = self.keys.with_key(&key_id, |record| {
            self.engine
                .encrypt(record, &request.plaintext, &request.encryption_context)
        })?;
        Ok(EncryptResponse {
            key_id: self.keys.scope().key_arn(&key_id),
            ciphertext_blob,
        })
    }

    /// Resolves the key a blob was produced by, checking it against `expected`
    fn blob_key(&self, blob: &[u8], expected: Option<&str>) -> Result<String> {
        let key_id = CryptoEngine::key_id_of(blob)?;
        if let Some(expected) = expected {
            let expected = self.resolve(expected)?;
            if expected != key_id {
                return Err(Error::IncorrectKey(format!(
                    "ciphertext was not produced by key {}",
                    expected
                )));
            }
        }
        Ok(key_id)
    }

    /// Decrypts a blob; the key is read from the blob itself
    pub fn decrypt(&self, caller: &Principal, request: DecryptRequest) -> Result<DecryptResponse> {
        let key_id = self.blob_key(&request.ciphertext_blob, request.key_id.as_deref())?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::Decrypt,
            &request.encryption_context,
            &request.grant_tokens,
        )?;

        let plaintext = self.keys.with_key(&key_id, |record| {
            self.engine
                .decrypt(record, &request.ciphertext_blob, &request.encryption_context)
        })?;
        Ok(DecryptResponse {
            key_id: self.keys.scope().key_arn(&key_id),
            plaintext,
        })
    }

    /// Decrypts a blob and encrypts the plaintext under another key and context
    ///
    /// The plaintext never leaves the service.
    pub fn re_encrypt(
        &self,
        caller: &Principal,
        request: ReEncryptRequest,
    ) -> Result<ReEncryptResponse> {
        let source_id = self.blob_key(&request.ciphertext_blob, request.source_key_id.as_deref())?;
        let destination_id = self.resolve(&request.destination_key_id)?;

        self.authorize(
            caller,
            &source_id,
            GrantOperation::ReEncryptFrom,
            &request.source_encryption_context,
            &request.grant_tokens,
        )?;
        self.authorize(
            caller,
            &destination_id,
            GrantOperation::ReEncryptTo,
            &request.destination_encryption_context,
            &request.grant_tokens,
        )?;

        self.keys.with_key(&destination_id, |record| {
            record.ensure_usage(KeyUsage::EncryptDecrypt)?;
            record.ensure_usable()
        })?;

        let plaintext = self.keys.with_key(&source_id, |record| {
            self.engine.decrypt(
                record,
                &request.ciphertext_blob,
                &request.source_encryption_context,
            )
        })?;
        let ciphertext_blob = self.keys.with_key(&destination_id, |record| {
            self.engine
                .encrypt(record, &plaintext, &request.destination_encryption_context)
        })?;

        Ok(ReEncryptResponse {
            ciphertext_blob,
            source_key_id: self.keys.scope().key_arn(&source_id),
            key_id: self.keys.scope().key_arn(&destination_id),
        })
    }

    /// Generates a data key and returns it in plaintext and wrapped under the key
    pub fn generate_data_key(
        &self,
        caller: &Principal,
        request: GenerateDataKeyRequest,
    ) -> Result<GenerateDataKeyResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::GenerateDataKey,
            &request.encryption_context,
            &request.grant_tokens,
        )?;

        let len = DataKeySpec::resolve_len(request.key_spec, request.number_of_bytes)?;
        let data_key = self.keys.with_key(&key_id, |record| {
            self.engine
                .generate_data_key(record, len, &request.encryption_context)
        })?;
        Ok(GenerateDataKeyResponse {
            key_id: self.keys.scope().key_arn(&data_key.key_id),
            plaintext: data_key.plaintext,
            ciphertext_blob: data_key.ciphertext_blob,
        })
    }

    /// Generates a data key and returns it only wrapped under the key
    pub fn generate_data_key_without_plaintext(
        &self,
        caller: &Principal,
        request: GenerateDataKeyRequest,
    ) -> Result<GenerateDataKeyWithoutPlaintextResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::GenerateDataKeyWithoutPlaintext,
            &request.encryption_context,
            &request.grant_tokens,
        )?;

        let len = DataKeySpec::resolve_len(request.key_spec, request.number_of_bytes)?;
        let data_key = self.keys.with_key(&key_id, |record| {
            self.engine
                .generate_data_key(record, len, &request.encryption_context)
        })?;
        Ok(GenerateDataKeyWithoutPlaintextResponse {
            key_id: self.keys.scope().key_arn(&data_key.key_id),
            ciphertext_blob: data_key.ciphertext_blob,
        })
    }

    /// Returns random bytes, optionally from a connected custom key store
    pub fn generate_random(
        &self,
        _caller: &Principal,
        request: GenerateRandomRequest,
    ) -> Result<GenerateRandomResponse> {
        let plaintext = match &request.custom_key_store_id {
            Some(store_id) => self.custom_stores.with_connected(store_id, || {
                CryptoEngine::generate_random(request.number_of_bytes)
            })?,
            None => CryptoEngine::generate_random(request.number_of_bytes)?,
        };
        Ok(GenerateRandomResponse { plaintext })
    }

    /// Signs a message with a SignVerify key
    pub fn sign(&self, caller: &Principal, request: SignRequest) -> Result<SignResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::Sign,
            &Default::default(),
            &request.grant_tokens,
        )?;

        let signature = self.keys.with_key(&key_id, |record| {
            self.engine
                .sign(record, request.signing_algorithm, &request.message)
        })?;
        Ok(SignResponse {
            key_id: self.keys.scope().key_arn(&key_id),
            signature,
            signing_algorithm: request.signing_algorithm,
        })
    }

    /// Verifies a signature made with a SignVerify key
    pub fn verify(&self, caller: &Principal, request: VerifyRequest) -> Result<VerifyResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::Verify,
            &Default::default(),
            &request.grant_tokens,
        )?;

        let signature_valid = self.keys.with_key(&key_id, |record| {
            self.engine.verify(
                record,
                request.signing_algorithm,
                &request.message,
                &request.signature,
            )
        })?;
        Ok(VerifyResponse {
            key_id: self.keys.scope().key_arn(&key_id),
            signature_valid,
            signing_algorithm: request.signing_algorithm,
        })
    }

    /// Returns the public half of a SignVerify key
    pub fn get_public_key(
        &self,
        caller: &Principal,
        request: GetPublicKeyRequest,
    ) -> Result<GetPublicKeyResponse> {
        let key_id = self.resolve(&request.key_id)?;
        self.authorize(
            caller,
            &key_id,
            GrantOperation::GetPublicKey,
            &Default::default(),
            &request.grant_tokens,
        )?;

        self.keys.with_key(&key_id, |record| {
            let metadata = record.metadata();
            Ok(GetPublicKeyResponse {
                public_key: self.engine.public_key(record)?,
                key_id: metadata.arn,
                key_usage: metadata.key_usage,
                key_spec: metadata.key_spec,
                signing_algorithms: vec![
                    SigningAlgorithm::RsassaPssSha256,
                    SigningAlgorithm::RsassaPkcs1V15Sha256,
                ],
            })
        })
    }
}
