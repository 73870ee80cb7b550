// Aliases: naming rules, retargeting and listing

use crate::integration::common::{
    app, context, create_fixture, create_fixture_with_config, create_symmetric_key,
    create_test_config, decrypt_request, encrypt_request, outsider, owner, ORIGINAL_DATA,
};
use localkms::service::{AliasRequest, DeleteAliasRequest, ListAliasesRequest};
use localkms::util::PageRequest;
use localkms::ErrorKind;

fn alias(name: &str, target: &str) -> AliasRequest {
    AliasRequest {
        alias_name: name.to_string(),
        target_key_id: target.to_string(),
    }
}

#[test]
fn test_alias_follows_its_target() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let first = create_symmetric_key(kms, &owner());
    let second = create_symmetric_key(kms, &owner());
    let ctx = context(&[]);

    kms.create_alias(&owner(), alias("alias/app", &first)).unwrap();
    let blob = kms
        .encrypt(&owner(), encrypt_request("alias/app", ORIGINAL_DATA, &ctx))
        .unwrap()
        .ciphertext_blob;

    kms.update_alias(&owner(), alias("alias/app", &second)).unwrap();
    let encrypted = kms
        .encrypt(&owner(), encrypt_request("alias/app", ORIGINAL_DATA, &ctx))
        .unwrap();
    assert!(encrypted.key_id.ends_with(&second));

    // ciphertexts name their key, not the alias
    let decrypted = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap();
    assert!(decrypted.key_id.ends_with(&first));

    kms.delete_alias(
        &owner(),
        DeleteAliasRequest {
            alias_name: "alias/app".into(),
        },
    )
    .unwrap();
    let err = kms
        .encrypt(&owner(), encrypt_request("alias/app", ORIGINAL_DATA, &ctx))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // deleting the alias leaves the key usable
    kms.encrypt(&owner(), encrypt_request(&first, ORIGINAL_DATA, &ctx))
        .unwrap();
}

#[test]
fn test_alias_name_rules() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    for name in ["app", "alias/", "alias/has space", "alias/aws/reserved"] {
        let err = kms.create_alias(&owner(), alias(name, &key_id)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAliasName, "{}", name);
    }

    let too_long = format!("alias/{}", "a".repeat(251));
    let err = kms.create_alias(&owner(), alias(&too_long, &key_id)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAliasName);

    kms.create_alias(&owner(), alias("alias/team-a/app_1", &key_id))
        .unwrap();
    let err = kms
        .create_alias(&owner(), alias("alias/team-a/app_1", &key_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn test_alias_cannot_target_an_alias() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());

    kms.create_alias(&owner(), alias("alias/first", &key_id)).unwrap();
    let err = kms
        .create_alias(&owner(), alias("alias/second", "alias/first"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_alias_requires_key_administrator() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    let foreign = create_symmetric_key(kms, &outsider());

    let err = kms.create_alias(&app(), alias("alias/app", &key_id)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    kms.create_alias(&owner(), alias("alias/app", &key_id)).unwrap();

    // retargeting needs administration of the new target
    let err = kms.update_alias(&owner(), alias("alias/app", &foreign)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let err = kms
        .delete_alias(
            &app(),
            DeleteAliasRequest {
                alias_name: "alias/app".into(),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn test_list_aliases_includes_system_aliases_and_filters_by_key() {
    let config = create_test_config().with_system_alias("alias/aws/s3");
    let fixture = create_fixture_with_config(config);
    let kms = &fixture.kms;
    let first = create_symmetric_key(kms, &owner());
    let second = create_symmetric_key(kms, &owner());

    kms.create_alias(&owner(), alias("alias/b", &first)).unwrap();
    kms.create_alias(&owner(), alias("alias/a", &first)).unwrap();
    kms.create_alias(&owner(), alias("alias/c", &second)).unwrap();

    let all = kms
        .list_aliases(&app(), ListAliasesRequest::default())
        .unwrap();
    let names: Vec<&str> = all.items.iter().map(|a| a.alias_name.as_str()).collect();
    assert_eq!(names, vec!["alias/a", "alias/aws/s3", "alias/b", "alias/c"]);
    assert_eq!(all.items[1].target_key_id, None);

    let of_first = kms
        .list_aliases(
            &app(),
            ListAliasesRequest {
                key_id: Some(first.clone()),
                page: PageRequest::default(),
            },
        )
        .unwrap();
    let names: Vec<&str> = of_first.items.iter().map(|a| a.alias_name.as_str()).collect();
    assert_eq!(names, vec!["alias/a", "alias/b"]);

    let page = kms
        .list_aliases(
            &app(),
            ListAliasesRequest {
                key_id: None,
                page: PageRequest::first(3),
            },
        )
        .unwrap();
    assert!(page.truncated);
    let rest = kms
        .list_aliases(
            &app(),
            ListAliasesRequest {
                key_id: None,
                page: PageRequest::after(3, page.next_marker.unwrap()),
            },
        )
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert_eq!(rest.items[0].alias_name, "alias/c");

    // system aliases cannot be deleted by callers
    let err = kms
        .delete_alias(
            &owner(),
            DeleteAliasRequest {
                alias_name: "alias/aws/s3".into(),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAliasName);
}

#[test]
fn test_list_aliases_resumes_after_deleted_entry() {
    let fixture = create_fixture();
    let kms = &fixture.kms;
    let key_id = create_symmetric_key(kms, &owner());
    for name in ["alias/a", "alias/b", "alias/c", "alias/d"] {
        kms.create_alias(&owner(), alias(name, &key_id)).unwrap();
    }

    let first = kms
        .list_aliases(
            &app(),
            ListAliasesRequest {
                key_id: None,
                page: PageRequest::first(2),
            },
        )
        .unwrap();
    kms.delete_alias(
        &owner(),
        DeleteAliasRequest {
            alias_name: "alias/a".into(),
        },
    )
    .unwrap();

    let rest = kms
        .list_aliases(
            &app(),
            ListAliasesRequest {
                key_id: None,
                page: PageRequest::after(2, first.next_marker.unwrap()),
            },
        )
        .unwrap();
    let names: Vec<&str> = rest.items.iter().map(|a| a.alias_name.as_str()).collect();
    assert_eq!(names, vec!["alias/c", "alias/d"]);
}
