// Custom key stores: connection state drives availability of their keys

use crate::integration::common::{
    app, context, create_fixture, decrypt_request, encrypt_request, owner, Fixture, ORIGINAL_DATA,
};
use chrono::Duration;
use localkms::custom_store::ConnectionState;
use localkms::service::{
    CreateCustomKeyStoreRequest, CreateKeyRequest, CustomKeyStoreRequest,
    DescribeCustomKeyStoresRequest, DescribeKeyRequest, GenerateRandomRequest, KeyRequest,
    ScheduleKeyDeletionRequest, UpdateCustomKeyStoreRequest,
};
use localkms::{ErrorKind, KeyState, Origin};
use zeroize::Zeroizing;

fn create_store(fixture: &Fixture, name: &str) -> String {
    fixture
        .kms
        .create_custom_key_store(
            &owner(),
            CreateCustomKeyStoreRequest {
                custom_key_store_name: name.to_string(),
                cluster_id: "cluster-234abcdefABC".into(),
                trust_anchor_certificate: "-----BEGIN CERTIFICATE-----".into(),
                key_store_password: Zeroizing::new("kmsPswd1".into()),
            },
        )
        .unwrap()
        .custom_key_store_id
}

fn store_request(id: &str) -> CustomKeyStoreRequest {
    CustomKeyStoreRequest {
        custom_key_store_id: id.to_string(),
    }
}

fn create_store_key(fixture: &Fixture, store_id: &str) -> localkms::Result<String> {
    fixture
        .kms
        .create_key(
            &owner(),
            CreateKeyRequest {
                custom_key_store_id: Some(store_id.to_string()),
                ..Default::default()
            },
        )
        .map(|response| response.key_metadata.key_id)
}

fn key_state(fixture: &Fixture, key_id: &str) -> KeyState {
    fixture
        .kms
        .describe_key(
            &owner(),
            DescribeKeyRequest {
                key_id: key_id.to_string(),
                grant_tokens: vec![],
            },
        )
        .unwrap()
        .key_metadata
        .key_state
}

fn connection_state(fixture: &Fixture, store_id: &str) -> ConnectionState {
    fixture
        .kms
        .describe_custom_key_stores(
            &owner(),
            DescribeCustomKeyStoresRequest {
                custom_key_store_id: Some(store_id.to_string()),
                custom_key_store_name: None,
            },
        )
        .unwrap()
        .custom_key_stores[0]
        .connection_state
}

#[test]
fn test_store_keys_follow_connection_state() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let store_id = create_store(&fixture, "primary");
    assert!(store_id.starts_with("cks-"));
    assert_eq!(store_id.len(), 21);
    assert_eq!(connection_state(&fixture, &store_id), ConnectionState::Disconnected);

    let err = create_store_key(&fixture, &store_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyUnavailable);

    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(connection_state(&fixture, &store_id), ConnectionState::Connected);

    let key_id = create_store_key(&fixture, &store_id).unwrap();
    let metadata = kms
        .describe_key(
            &owner(),
            DescribeKeyRequest {
                key_id: key_id.clone(),
                grant_tokens: vec![],
            },
        )
        .unwrap()
        .key_metadata;
    assert_eq!(metadata.origin, Origin::CustomStore);
    assert_eq!(metadata.custom_key_store_id.as_deref(), Some(store_id.as_str()));

    let ctx = context(&[]);
    let blob = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;

    kms.disconnect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::Unavailable);

    let err = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyUnavailable);
    assert!(err.is_retryable());

    let err = kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyUnavailable);

    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::Enabled);
    let decrypted = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap();
    assert_eq!(decrypted.plaintext.as_slice(), ORIGINAL_DATA);
}

#[test]
fn test_reconnect_restores_disabled_keys_as_disabled() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let store_id = create_store(&fixture, "primary");
    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();

    let key_id = create_store_key(&fixture, &store_id).unwrap();
    kms.disable_key(&owner(), KeyRequest::new(&key_id)).unwrap();

    kms.disconnect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::Unavailable);
    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::Disabled);
}

#[test]
fn test_cancel_deletion_while_disconnected() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let store_id = create_store(&fixture, "primary");
    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    let key_id = create_store_key(&fixture, &store_id).unwrap();

    kms.schedule_key_deletion(
        &owner(),
        ScheduleKeyDeletionRequest {
            key_id: key_id.clone(),
            pending_window_in_days: Some(7),
        },
    )
    .unwrap();
    kms.disconnect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::PendingDeletion);

    let cancelled = kms
        .cancel_key_deletion(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    assert_eq!(cancelled.key_state, KeyState::Unavailable);

    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    assert_eq!(key_state(&fixture, &key_id), KeyState::Disabled);
}

#[test]
fn test_update_and_delete_need_disconnected_store() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let store_id = create_store(&fixture, "primary");
    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    let key_id = create_store_key(&fixture, &store_id).unwrap();

    let rename = UpdateCustomKeyStoreRequest {
        custom_key_store_id: store_id.clone(),
        new_custom_key_store_name: Some("renamed".into()),
        ..Default::default()
    };
    let err = kms
        .update_custom_key_store(&owner(), rename.clone())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = kms
        .delete_custom_key_store(&owner(), store_request(&store_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    kms.disconnect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    kms.update_custom_key_store(&owner(), rename).unwrap();
    let described = kms
        .describe_custom_key_stores(
            &owner(),
            DescribeCustomKeyStoresRequest {
                custom_key_store_id: None,
                custom_key_store_name: Some("renamed".into()),
            },
        )
        .unwrap();
    assert_eq!(described.custom_key_stores[0].custom_key_store_id, store_id);

    // the store still holds a key
    let err = kms
        .delete_custom_key_store(&owner(), store_request(&store_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    kms.schedule_key_deletion(
        &owner(),
        ScheduleKeyDeletionRequest {
            key_id,
            pending_window_in_days: Some(7),
        },
    )
    .unwrap();
    fixture.clock.advance(Duration::days(7));
    assert_eq!(kms.sweep().unwrap().keys_deleted, 1);

    kms.disconnect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    kms.delete_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();

    let err = kms
        .describe_custom_key_stores(
            &owner(),
            DescribeCustomKeyStoresRequest {
                custom_key_store_id: Some(store_id),
                custom_key_store_name: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_store_creation_validation() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    create_store(&fixture, "primary");

    let request = |name: &str, password: &str| CreateCustomKeyStoreRequest {
        custom_key_store_name: name.to_string(),
        cluster_id: "cluster-234abcdefABC".into(),
        trust_anchor_certificate: "-----BEGIN CERTIFICATE-----".into(),
        key_store_password: Zeroizing::new(password.to_string()),
    };

    let err = kms
        .create_custom_key_store(&owner(), request("primary", "kmsPswd1"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let too_long = "x".repeat(33);
    for password in ["short", too_long.as_str()] {
        let err = kms
            .create_custom_key_store(&owner(), request("secondary", password))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn test_generate_random_from_store_needs_connection() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let store_id = create_store(&fixture, "primary");

    let request = GenerateRandomRequest {
        number_of_bytes: 32,
        custom_key_store_id: Some(store_id.clone()),
    };
    let err = kms.generate_random(&app(), request.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyUnavailable);

    kms.connect_custom_key_store(&owner(), store_request(&store_id))
        .unwrap();
    let random = kms.generate_random(&app(), request).unwrap();
    assert_eq!(random.plaintext.len(), 32);
}
