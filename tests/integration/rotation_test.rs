// Automatic rotation: new generations encrypt, old ones keep decrypting

use crate::integration::common::{
    context, create_fixture, create_fixture_with_config, create_symmetric_key, create_test_config,
    decrypt_request, encrypt_request, owner, ORIGINAL_DATA,
};
use chrono::Duration;
use localkms::crypto::CiphertextBlob;
use localkms::service::{CreateKeyRequest, KeyRequest};
use localkms::{ErrorKind, Origin};

fn generation_of(blob: &[u8]) -> u32 {
    CiphertextBlob::parse(blob).unwrap().generation
}

fn rotation_enabled(kms: &localkms::KeyManagementService, key_id: &str) -> bool {
    kms.get_key_rotation_status(&owner(), KeyRequest::new(key_id))
        .unwrap()
        .key_rotation_enabled
}

#[test]
fn test_rotation_adds_generation_and_old_ciphertexts_decrypt() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    let ctx = context(&[("table", "orders")]);

    assert!(!rotation_enabled(kms, &key_id));
    kms.enable_key_rotation(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    assert!(rotation_enabled(kms, &key_id));

    let before = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;
    assert_eq!(generation_of(&before), 0);

    fixture.clock.advance(Duration::days(364));
    assert_eq!(kms.sweep().unwrap().keys_rotated, 0);

    fixture.clock.advance(Duration::days(1));
    assert_eq!(kms.sweep().unwrap().keys_rotated, 1);
    // the next rotation is a full period away
    assert_eq!(kms.sweep().unwrap().keys_rotated, 0);

    let after = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;
    assert_eq!(generation_of(&after), 1);

    for blob in [&before, &after] {
        let decrypted = kms.decrypt(&owner(), decrypt_request(blob, &ctx)).unwrap();
        assert_eq!(decrypted.plaintext.as_slice(), ORIGINAL_DATA);
    }

    kms.disable_key_rotation(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    assert!(!rotation_enabled(kms, &key_id));
    fixture.clock.advance(Duration::days(400));
    assert_eq!(kms.sweep().unwrap().keys_rotated, 0);

    let decrypted = kms.decrypt(&owner(), decrypt_request(&before, &ctx)).unwrap();
    assert_eq!(decrypted.plaintext.as_slice(), ORIGINAL_DATA);
}

#[test]
fn test_rotation_period_is_configurable() {
    let fixture = create_fixture_with_config(create_test_config().with_rotation_period_days(90));
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    kms.enable_key_rotation(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    fixture.clock.advance(Duration::days(90));
    assert_eq!(kms.sweep().unwrap().keys_rotated, 1);
}

#[test]
fn test_disabled_keys_are_not_rotated() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    kms.enable_key_rotation(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    kms.disable_key(&owner(), KeyRequest::new(&key_id)).unwrap();

    fixture.clock.advance(Duration::days(366));
    assert_eq!(kms.sweep().unwrap().keys_rotated, 0);

    kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap();
    assert_eq!(kms.sweep().unwrap().keys_rotated, 1);
}

#[test]
fn test_rotation_is_only_for_native_symmetric_keys() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let external = kms
        .create_key(
            &owner(),
            CreateKeyRequest {
                origin: Some(Origin::External),
                ..Default::default()
            },
        )
        .unwrap()
        .key_metadata
        .key_id;

    let err = kms
        .enable_key_rotation(&owner(), KeyRequest::new(&external))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);

    let err = kms
        .get_key_rotation_status(&owner(), KeyRequest::new(&external))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
}
