//! Registration flow through the router
//!
//! `POST /user/` with a PEM CSR, answered by a client certificate.

mod common;

use axum::body::to_bytes;
use axum::http::{StatusCode, header};
use nebulo::pki::{decode_pem, encode_pem, parse_certificate_pem, parse_csr};
use nebulo::pki::pem::ENCRYPTED_PRIVATE_KEY_TAG;
use nebulo::user::UserDirectory;
use pretty_assertions::assert_eq;
use rcgen::{KeyPair, PKCS_RSA_SHA256};

use common::{Harness, body_json, csr_fixture, csr_pem, register_request};

/// A fresh CSR yields a client certificate bound to the CSR key and subject
#[tokio::test]
async fn test_register_issues_client_certificate() {
    // GIVEN: a CSR from a new key
    let harness = Harness::new().await;
    let key = KeyPair::generate().unwrap();
    let csr = csr_pem("alice", &key);
    let requested = parse_csr(&decode_pem(csr.as_bytes(), None).unwrap()).unwrap();

    // WHEN: posting it
    let response = harness.send(register_request(csr)).await;

    // THEN: 201 with a PEM certificate
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-x509-user-cert"
    );
    let pem = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(pem.starts_with(b"-----BEGIN CERTIFICATE-----"));

    let cert = parse_certificate_pem(&pem).unwrap();
    assert!(cert.subject.contains("alice"), "{}", cert.subject);
    assert!(cert.issuer.contains("Nebulo Integration CA"), "{}", cert.issuer);
    assert!(!cert.is_ca);
    assert_eq!(cert.public_key.der, requested.public_key().der);

    // AND: the user exists, keyed by the certified public key
    let user = harness
        .users
        .find_by_public_key(&cert.public_key.der)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.key_fingerprint, cert.public_key.fingerprint());
    assert_eq!(user.public_key_algorithm, "ECDSA");
    assert_eq!(user.login_first, None);
}

/// The old `NEW CERTIFICATE REQUEST` label is accepted
#[tokio::test]
async fn test_register_accepts_legacy_csr_label() {
    let harness = Harness::new().await;
    let key = KeyPair::generate().unwrap();
    let pem = csr_pem("legacy", &key).replace("CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST");

    let response = harness.send(register_request(pem)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

/// An RSA CSR registers with the RSA family
#[tokio::test]
async fn test_register_rsa_key() {
    let harness = Harness::new().await;
    let key = KeyPair::generate_for(&PKCS_RSA_SHA256).unwrap();

    let cert = harness.register(&key).await;

    let user = harness
        .users
        .find_by_public_key(&cert.public_key.der)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.public_key_algorithm, "RSA");
}

/// Two CSRs for the same key: the second is a conflict
#[tokio::test]
async fn test_duplicate_key_is_conflict() {
    // GIVEN: a registered key
    let harness = Harness::new().await;
    let key = KeyPair::generate().unwrap();
    harness.register(&key).await;

    // WHEN: registering it again under another name
    let response = harness
        .send(register_request(csr_pem("alice-again", &key)))
        .await;

    // THEN: 409 user_exist and still one user
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "user_exist");
    assert_eq!(harness.users.len(), 1);
}

/// Content-Length under the minimum is rejected before parsing
#[tokio::test]
async fn test_short_content_length_is_bad_request() {
    let harness = Harness::new().await;
    let response = harness
        .send(register_request("x".repeat(209)))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "http_bad_request");
    assert!(body["parameters"].is_null());
}

/// A body without any PEM block is malformed
#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let harness = Harness::new().await;
    let response = harness
        .send(register_request("not a pem block ".repeat(20)))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "malformed_input");
    assert!(harness.users.is_empty());
}

/// A CSR whose signature was tampered with is refused
#[tokio::test]
async fn test_tampered_csr_signature_is_refused() {
    // GIVEN: a valid CSR with its last signature byte flipped
    let harness = Harness::new().await;
    let key = KeyPair::generate().unwrap();
    let mut der = decode_pem(csr_pem("tampered", &key).as_bytes(), None).unwrap();
    let last = der.len() - 1;
    der[last] ^= 0x01;

    // WHEN: posting it
    let response = harness
        .send(register_request(encode_pem("CERTIFICATE REQUEST", &der)))
        .await;

    // THEN: 400 and nobody is registered
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let code = body_json(response).await["error"].clone();
    assert!(
        code == "signature_invalid" || code == "malformed_input",
        "unexpected code {code}"
    );
    assert!(harness.users.is_empty());
}

/// Requests signed with digests other than the curve's native one
#[tokio::test]
async fn test_register_accepts_every_supported_digest() {
    let harness = Harness::new().await;
    for name in [
        "p256_sha1.csr",
        "p256_sha512.csr",
        "p384_sha512.csr",
        "p521_sha1.csr",
        "rsa_sha1.csr",
        "rsa_sha512.csr",
    ] {
        let response = harness.send(register_request(csr_fixture(name))).await;
        assert_eq!(response.status(), StatusCode::CREATED, "{name}");
    }
    assert_eq!(harness.users.len(), 6);
}

/// P-384 with SHA-1 has no verifier and is refused as unsupported
#[tokio::test]
async fn test_register_p384_sha1_is_unsupported() {
    let harness = Harness::new().await;
    let response = harness
        .send(register_request(csr_fixture("p384_sha1.csr")))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_algorithm");
    assert!(harness.users.is_empty());
}

/// The issued subject is the requested one, repeated attributes included
#[tokio::test]
async fn test_register_keeps_repeated_subject_attributes() {
    // GIVEN: a CSR for /CN=alice/OU=eng/OU=ops
    let harness = Harness::new().await;
    let pem = csr_fixture("repeated_ou.csr");
    let requested = parse_csr(&decode_pem(pem.as_bytes(), None).unwrap()).unwrap();

    // WHEN: registering
    let response = harness.send(register_request(pem)).await;

    // THEN: the certificate subject matches the request exactly
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let cert = parse_certificate_pem(&body).unwrap();
    assert_eq!(cert.subject, "CN=alice, OU=eng, OU=ops");
    assert_eq!(cert.subject, requested.subject());
}

/// A multi-valued RDN survives issuance
#[tokio::test]
async fn test_register_keeps_multi_valued_rdn() {
    let harness = Harness::new().await;
    let pem = csr_fixture("multivalued_rdn.csr");
    let requested = parse_csr(&decode_pem(pem.as_bytes(), None).unwrap()).unwrap();

    let response = harness.send(register_request(pem)).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let cert = parse_certificate_pem(&body).unwrap();
    assert_eq!(cert.subject, requested.subject());
}

/// An encrypted private key uploaded by mistake is the client's error
#[tokio::test]
async fn test_encrypted_key_upload_is_malformed() {
    // GIVEN: an ENCRYPTED PRIVATE KEY block
    let harness = Harness::new().await;
    let pem = encode_pem(ENCRYPTED_PRIVATE_KEY_TAG, &[0x30; 256]);

    // WHEN: posting it as a CSR
    let response = harness.send(register_request(pem)).await;

    // THEN: 400 malformed_input, not a server error
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "malformed_input");
    assert!(harness.users.is_empty());
}

/// A legacy `Proc-Type: 4,ENCRYPTED` block is the client's error
#[tokio::test]
async fn test_legacy_encrypted_upload_is_malformed() {
    let harness = Harness::new().await;
    let csr = csr_fixture("p256_sha512.csr");
    let pem = csr.replacen(
        "-----BEGIN CERTIFICATE REQUEST-----\n",
        "-----BEGIN CERTIFICATE REQUEST-----\n\
         Proc-Type: 4,ENCRYPTED\n\
         DEK-Info: AES-128-CBC,00112233445566778899AABBCCDDEEFF\n\n",
        1,
    );
    assert!(pem.contains("Proc-Type"));

    let response = harness.send(register_request(pem)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "malformed_input");
}
