// Fixtures shared by the integration tests

use localkms::service::{CreateGrantRequest, CreateKeyRequest, DecryptRequest, EncryptRequest};
use localkms::{
    EncryptionContext, GrantOperation, KeyManagementService, KmsConfig, ManualClock, Principal,
};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const ACCOUNT_ID: &str = "111122223333";
pub const OWNER: &str = "arn:aws:iam::111122223333:user/owner";
pub const APP: &str = "arn:aws:iam::111122223333:role/app";
pub const OUTSIDER: &str = "arn:aws:iam::444455556666:user/outsider";
pub const ORIGINAL_DATA: &[u8] = b"somesupersecretstring!hjdkashfjkdashfd";

/// A service whose clock only moves when a test advances it
pub struct Fixture {
    pub kms: Arc<KeyManagementService>,
    pub clock: Arc<ManualClock>,
}

pub fn create_test_config() -> KmsConfig {
    KmsConfig::new().with_scope("aws", "us-west-2", ACCOUNT_ID)
}

pub fn create_fixture() -> Fixture {
    create_fixture_with_config(create_test_config())
}

pub fn create_fixture_with_config(config: KmsConfig) -> Fixture {
    // RUST_LOG=debug shows the service's transition logs
    let _ = env_logger::builder().is_test(true).try_init();

    let clock = Arc::new(ManualClock::starting_now());
    let kms = KeyManagementService::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .expect("Failed to build service");
    Fixture {
        kms: Arc::new(kms),
        clock,
    }
}

pub fn owner() -> Principal {
    Principal::new(OWNER)
}

pub fn app() -> Principal {
    Principal::new(APP)
}

pub fn outsider() -> Principal {
    Principal::new(OUTSIDER)
}

pub fn root() -> Principal {
    Principal::new(format!("arn:aws:iam::{}:root", ACCOUNT_ID))
}

pub fn context(pairs: &[(&str, &str)]) -> EncryptionContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Creates an Enabled symmetric key owned by `caller` and returns its id
pub fn create_symmetric_key(kms: &KeyManagementService, caller: &Principal) -> String {
    kms.create_key(caller, CreateKeyRequest::default())
        .expect("Failed to create key")
        .key_metadata
        .key_id
}

pub fn encrypt_request(key_id: &str, plaintext: &[u8], context: &EncryptionContext) -> EncryptRequest {
    EncryptRequest {
        key_id: key_id.to_string(),
        plaintext: Zeroizing::new(plaintext.to_vec()),
        encryption_context: context.clone(),
        ..Default::default()
    }
}

pub fn decrypt_request(ciphertext_blob: &[u8], context: &EncryptionContext) -> DecryptRequest {
    DecryptRequest {
        ciphertext_blob: ciphertext_blob.to_vec(),
        encryption_context: context.clone(),
        ..Default::default()
    }
}

/// Wraps `material` under an import public key with RSAES-OAEP-SHA256
pub fn wrap_key_material(public_key_der: &[u8], material: &[u8]) -> Vec<u8> {
    let public_key =
        RsaPublicKey::from_public_key_der(public_key_der).expect("Invalid wrapping public key");
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), material)
        .expect("Failed to wrap key material")
}

/// Builds a grant request for `operations` with no constraints
pub fn grant_request(
    key_id: &str,
    grantee: Principal,
    operations: &[GrantOperation],
) -> CreateGrantRequest {
    CreateGrantRequest {
        key_id: key_id.to_string(),
        grantee_principal: grantee,
        operations: operations.iter().copied().collect(),
        constraints: None,
        retiring_principal: None,
        name: None,
        grant_tokens: vec![],
    }
}
