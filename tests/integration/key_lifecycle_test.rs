// Key lifecycle: creation, enable/disable, scheduled deletion and the sweep

use crate::integration::common::{
    app, context, create_fixture, create_symmetric_key, decrypt_request, encrypt_request,
    grant_request, outsider, owner, root, ORIGINAL_DATA,
};
use chrono::Duration;
use localkms::key::store::Tag;
use localkms::service::{
    AliasRequest, CreateKeyRequest, DescribeKeyRequest, GetKeyPolicyRequest,
    KeyRequest, ListRequest, PutKeyPolicyRequest, ScheduleKeyDeletionRequest, TagResourceRequest,
    UntagResourceRequest, UpdateKeyDescriptionRequest,
};
use localkms::util::PageRequest;
use localkms::{Clock, ErrorKind, GrantOperation, KeyState, Origin};

fn describe(kms: &localkms::KeyManagementService, key_id: &str) -> localkms::KeyMetadata {
    kms.describe_key(
        &owner(),
        DescribeKeyRequest {
            key_id: key_id.to_string(),
            grant_tokens: vec![],
        },
    )
    .expect("Failed to describe key")
    .key_metadata
}

#[test]
fn test_create_key_and_describe_by_every_identifier() {
    let fixture = create_fixture();
    let kms = &fixture.kms;

    let created = kms
        .create_key(
            &owner(),
            CreateKeyRequest {
                description: Some("billing records".into()),
                ..Default::default()
            },
        )
        .unwrap()
        .key_metadata;

    assert_eq!(created.key_state, KeyState::Enabled);
    assert!(created.enabled);
    assert_eq!(created.origin, Origin::Native);
    assert_eq!(created.owner, owner());
    assert_eq!(
        created.arn,
        format!("arn:aws:kms:us-west-2:111122223333:key/{}", created.key_id)
    );

    kms.create_alias(
        &owner(),
        AliasRequest {
            alias_name: "alias/billing".into(),
            target_key_id: created.key_id.clone(),
        },
    )
    .unwrap();

    for reference in [
        created.key_id.clone(),
        created.arn.clone(),
        "alias/billing".to_string(),
        "arn:aws:kms:us-west-2:111122223333:alias/billing".to_string(),
    ] {
        let described = describe(kms, &reference);
        assert_eq!(described.key_id, created.key_id);
        assert_eq!(described.description, "billing records");
    }
}

#[test]
fn test_describe_unknown_key_fails() {
    let fixture = create_fixture();
    let err = fixture
        .kms
        .describe_key(
            &owner(),
            DescribeKeyRequest {
                key_id: "1234abcd-12ab-34cd-56ef-1234567890ab".into(),
                grant_tokens: vec![],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_disabled_key_rejects_crypto_until_enabled() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    let ctx = context(&[("tenant", "a")]);

    let blob = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;

    kms.disable_key(&owner(), KeyRequest::new(&key_id)).unwrap();
    assert_eq!(describe(kms, &key_id).key_state, KeyState::Disabled);

    let err = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disabled);
    assert!(!err.is_retryable());

    let err = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disabled);

    kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap();
    let decrypted = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap();
    assert_eq!(decrypted.plaintext.as_slice(), ORIGINAL_DATA);
}

#[test]
fn test_schedule_deletion_enforces_window() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    for days in [6, 31] {
        let err = kms
            .schedule_key_deletion(
                &owner(),
                ScheduleKeyDeletionRequest {
                    key_id: key_id.clone(),
                    pending_window_in_days: Some(days),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(describe(kms, &key_id).key_state, KeyState::Enabled);

    let scheduled = kms
        .schedule_key_deletion(
            &owner(),
            ScheduleKeyDeletionRequest {
                key_id: key_id.clone(),
                pending_window_in_days: None,
            },
        )
        .unwrap();
    assert_eq!(scheduled.key_state, KeyState::PendingDeletion);
    assert_eq!(scheduled.pending_window_in_days, 30);
    assert_eq!(
        scheduled.deletion_date,
        fixture.clock.now() + Duration::days(30)
    );
}

#[test]
fn test_pending_deletion_key_is_unusable_and_cancel_leaves_it_disabled() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    let ctx = context(&[]);

    let blob = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;

    kms.schedule_key_deletion(
        &owner(),
        ScheduleKeyDeletionRequest {
            key_id: key_id.clone(),
            pending_window_in_days: Some(7),
        },
    )
    .unwrap();

    let err = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let cancelled = kms
        .cancel_key_deletion(&owner(), KeyRequest::new(&key_id))
        .unwrap();
    assert_eq!(cancelled.key_state, KeyState::Disabled);
    assert_eq!(describe(kms, &key_id).deletion_date, None);

    let err = kms
        .cancel_key_deletion(&owner(), KeyRequest::new(&key_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap();
    let decrypted = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap();
    assert_eq!(decrypted.plaintext.as_slice(), ORIGINAL_DATA);
}

#[test]
fn test_sweep_destroys_key_with_its_grants_and_aliases() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    let ctx = context(&[]);

    let blob = kms
        .encrypt(&owner(), encrypt_request(&key_id, ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;
    kms.create_alias(
        &owner(),
        AliasRequest {
            alias_name: "alias/doomed".into(),
            target_key_id: key_id.clone(),
        },
    )
    .unwrap();
    kms.create_grant(
        &owner(),
        grant_request(&key_id, app(), &[GrantOperation::Decrypt]),
    )
    .unwrap();

    kms.schedule_key_deletion(
        &owner(),
        ScheduleKeyDeletionRequest {
            key_id: key_id.clone(),
            pending_window_in_days: Some(7),
        },
    )
    .unwrap();

    fixture.clock.advance(Duration::days(6));
    let report = kms.sweep().unwrap();
    assert_eq!(report.keys_deleted, 0);
    assert_eq!(describe(kms, &key_id).key_state, KeyState::PendingDeletion);

    fixture.clock.advance(Duration::days(1));
    let report = kms.sweep().unwrap();
    assert_eq!(report.keys_deleted, 1);
    assert_eq!(report.grants_removed, 1);
    assert_eq!(report.aliases_removed, 1);

    let err = kms
        .describe_key(
            &owner(),
            DescribeKeyRequest {
                key_id: key_id.clone(),
                grant_tokens: vec![],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = kms
        .cancel_key_deletion(&owner(), KeyRequest::new(&key_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // a second pass finds nothing left to do
    assert_eq!(kms.sweep().unwrap(), Default::default());
}

#[test]
fn test_only_owner_and_root_administer_a_key() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    for caller in [app(), outsider()] {
        let err = kms.disable_key(&caller, KeyRequest::new(&key_id)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let err = kms
            .schedule_key_deletion(
                &caller,
                ScheduleKeyDeletionRequest {
                    key_id: key_id.clone(),
                    pending_window_in_days: Some(7),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    kms.disable_key(&root(), KeyRequest::new(&key_id)).unwrap();
    kms.enable_key(&owner(), KeyRequest::new(&key_id)).unwrap();
}

#[test]
fn test_update_description() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    kms.update_key_description(
        &owner(),
        UpdateKeyDescriptionRequest {
            key_id: key_id.clone(),
            description: "rotated quarterly".into(),
        },
    )
    .unwrap();
    assert_eq!(describe(kms, &key_id).description, "rotated quarterly");
}

#[test]
fn test_list_keys_pages_in_creation_order() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let created: Vec<String> = (0..3)
        .map(|_| create_symmetric_key(kms, &owner()))
        .collect();

    let first = kms
        .list_keys(
            &app(),
            ListRequest {
                page: PageRequest::first(2),
            },
        )
        .unwrap();
    assert!(first.truncated);
    let marker = first.next_marker.clone().unwrap();

    let second = kms
        .list_keys(
            &app(),
            ListRequest {
                page: PageRequest::after(2, marker),
            },
        )
        .unwrap();
    assert!(!second.truncated);
    assert_eq!(second.next_marker, None);

    let listed: Vec<String> = first
        .items
        .into_iter()
        .chain(second.items)
        .map(|entry| entry.key_id)
        .collect();
    assert_eq!(listed, created);
}

#[test]
fn test_tags_are_set_listed_and_removed() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    kms.tag_resource(
        &owner(),
        TagResourceRequest {
            key_id: key_id.clone(),
            tags: vec![Tag::new("team", "payments"), Tag::new("env", "prod")],
        },
    )
    .unwrap();
    kms.tag_resource(
        &owner(),
        TagResourceRequest {
            key_id: key_id.clone(),
            tags: vec![Tag::new("env", "staging")],
        },
    )
    .unwrap();

    let tags = kms
        .list_resource_tags(&owner(), KeyRequest::new(&key_id))
        .unwrap()
        .tags;
    assert_eq!(
        tags,
        vec![Tag::new("env", "staging"), Tag::new("team", "payments")]
    );

    kms.untag_resource(
        &owner(),
        UntagResourceRequest {
            key_id: key_id.clone(),
            tag_keys: vec!["env".into()],
        },
    )
    .unwrap();
    let tags = kms
        .list_resource_tags(&owner(), KeyRequest::new(&key_id))
        .unwrap()
        .tags;
    assert_eq!(tags, vec![Tag::new("team", "payments")]);

    let err = kms
        .tag_resource(
            &owner(),
            TagResourceRequest {
                key_id: key_id.clone(),
                tags: vec![Tag::new("aws:reserved", "x")],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tag);
}

#[test]
fn test_key_policy_round_trip_and_malformed_policy() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    let names = kms
        .list_key_policies(&owner(), KeyRequest::new(&key_id))
        .unwrap()
        .policy_names;
    assert_eq!(names, vec!["default".to_string()]);

    let policy = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"kms:*"}]}"#;
    kms.put_key_policy(
        &owner(),
        PutKeyPolicyRequest {
            key_id: key_id.clone(),
            policy_name: "default".into(),
            policy: policy.into(),
        },
    )
    .unwrap();
    let stored = kms
        .get_key_policy(
            &owner(),
            GetKeyPolicyRequest {
                key_id: key_id.clone(),
                policy_name: "default".into(),
            },
        )
        .unwrap()
        .policy;
    assert_eq!(stored, policy);

    let err = kms
        .put_key_policy(
            &owner(),
            PutKeyPolicyRequest {
                key_id,
                policy_name: "default".into(),
                policy: r#"{"Statement":[]}"#.into(),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPolicy);
}
