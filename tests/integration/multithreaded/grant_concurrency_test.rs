// Concurrent callers against one service

use crate::integration::common::{
    app, context, create_fixture, create_fixture_with_config, create_symmetric_key,
    create_test_config, decrypt_request, encrypt_request, grant_request, owner,
};
use localkms::{ErrorKind, GrantOperation};
use std::sync::Arc;
use std::thread;

const NUM_THREADS: usize = 8;
const OPERATIONS_PER_THREAD: usize = 25;

#[test]
fn test_grant_quota_holds_under_concurrent_creation() {
    let fixture = create_fixture_with_config(create_test_config().with_max_grants_per_key(10));
    let key_id = create_symmetric_key(&fixture.kms, &owner());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let kms = Arc::clone(&fixture.kms);
            let key_id = key_id.clone();
            thread::spawn(move || {
                let mut created = 0;
                for _ in 0..5 {
                    match kms.create_grant(
                        &owner(),
                        grant_request(&key_id, app(), &[GrantOperation::Decrypt]),
                    ) {
                        Ok(_) => created += 1,
                        Err(e) => assert_eq!(e.kind(), ErrorKind::LimitExceeded),
                    }
                }
                created
            })
        })
        .collect();

    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(created, 10);
}

#[test]
fn test_concurrent_encrypt_decrypt_on_shared_key() {
    let fixture = create_fixture();
    let key_id = create_symmetric_key(&fixture.kms, &owner());

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let kms = Arc::clone(&fixture.kms);
            let key_id = key_id.clone();
            thread::spawn(move || {
                for j in 0..OPERATIONS_PER_THREAD {
                    let data = format!("thread_{}_operation_{}", i, j);
                    let thread = i.to_string();
                    let ctx = context(&[("thread", thread.as_str())]);

                    let blob = kms
                        .encrypt(&owner(), encrypt_request(&key_id, data.as_bytes(), &ctx))
                        .unwrap()
                        .ciphertext_blob;
                    let decrypted = kms.decrypt(&owner(), decrypt_request(&blob, &ctx)).unwrap();
                    assert_eq!(decrypted.plaintext.as_slice(), data.as_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
