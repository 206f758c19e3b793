//! Revocation ledger behaviour across handles and restarts

use std::sync::Arc;

use nebulo::pki::revocation::ledger_entry;
use nebulo::pki::{RevocationLedger, RevocationStore};
use pretty_assertions::assert_eq;

fn cert(n: u8) -> Vec<u8> {
    let mut der = vec![0x30, 0x82, 0x01, 0x0a];
    der.extend(std::iter::repeat_n(n, 64));
    der
}

/// Entries survive closing and reopening the ledger
#[tokio::test]
async fn test_revocations_survive_reopen() {
    // GIVEN: two revoked certificates
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    let ledger = RevocationLedger::open(&path).await.unwrap();
    ledger.revoke(&cert(1)).await.unwrap();
    ledger.revoke(&cert(2)).await.unwrap();
    drop(ledger);

    // WHEN: reopening
    let reopened = RevocationLedger::open(&path).await.unwrap();

    // THEN: both are revoked, others are not
    assert_eq!(reopened.len(), 2);
    assert!(reopened.is_revoked(&cert(1)).await.unwrap());
    assert!(reopened.is_revoked(&cert(2)).await.unwrap());
    assert!(!reopened.is_revoked(&cert(3)).await.unwrap());
}

/// The file format is one unpadded base64 line per certificate
#[tokio::test]
async fn test_ledger_file_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    let ledger = RevocationLedger::open(&path).await.unwrap();
    ledger.revoke(&cert(7)).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, format!("{}\n", ledger_entry(&cert(7))));
    assert!(!contents.contains('='));
}

/// A second handle (as `nebulo revoke` uses) is seen by a running server
#[tokio::test]
async fn test_revocation_from_other_handle_is_observed() {
    // GIVEN: a server handle already open
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    let server = RevocationLedger::open(&path).await.unwrap();
    assert!(!server.is_revoked(&cert(9)).await.unwrap());

    // WHEN: another handle appends
    let cli = RevocationLedger::open(&path).await.unwrap();
    cli.revoke(&cert(9)).await.unwrap();

    // THEN: the server sees it on its next check
    assert!(server.is_revoked(&cert(9)).await.unwrap());
}

/// Lines written by hand (CRLF, blank lines) are tolerated
#[tokio::test]
async fn test_hand_edited_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    std::fs::write(
        &path,
        format!("\n{}\r\n\n{}\n", ledger_entry(&cert(1)), ledger_entry(&cert(2))),
    )
    .unwrap();

    let ledger = RevocationLedger::open(&path).await.unwrap();
    assert!(ledger.is_revoked(&cert(1)).await.unwrap());
    assert!(ledger.is_revoked(&cert(2)).await.unwrap());
}

/// Concurrent revocations all land as whole lines
#[tokio::test]
async fn test_concurrent_revocations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    let ledger = Arc::new(RevocationLedger::open(&path).await.unwrap());

    let tasks: Vec<_> = (0..32u8)
        .map(|n| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.revoke(&cert(n)).await })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let reopened = RevocationLedger::open(&path).await.unwrap();
    assert_eq!(reopened.len(), 32);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 32);
}

/// A ledger that shrank under the server fails closed
#[tokio::test]
async fn test_truncated_ledger_fails_closed() {
    // GIVEN: an indexed ledger
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("revoked.info");
    let ledger = RevocationLedger::open(&path).await.unwrap();
    ledger.revoke(&cert(1)).await.unwrap();
    ledger.revoke(&cert(2)).await.unwrap();
    assert!(ledger.is_revoked(&cert(1)).await.unwrap());

    // WHEN: the file is truncated behind its back
    std::fs::write(&path, "").unwrap();

    // THEN: the check errors instead of answering "not revoked"
    let err = ledger.is_revoked(&cert(3)).await.unwrap_err();
    assert_eq!(err.code(), "http_internal_server_error");
}
