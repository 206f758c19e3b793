//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, header};
use axum::response::Response;
use nebulo::config::Environment;
use nebulo::pki::bootstrap::{CaParams, GeneratedPair, generate_ca};
use nebulo::pki::{
    Certificate, CertificateAuthority, DEFAULT_CERTIFICATE_VALIDITY, RevocationLedger, TlsSession,
    decode_pem, parse_certificate, parse_certificate_pem,
};
use nebulo::server::{AppState, create_router};
use nebulo::user::InMemoryUserDirectory;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Issuer, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use serde_json::Value;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;

/// A router over an in-memory directory and a ledger in a temp dir.
pub struct Harness {
    pub ca: GeneratedPair,
    pub state: Arc<AppState>,
    pub users: Arc<InMemoryUserDirectory>,
    pub ledger: Arc<RevocationLedger>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_environment(Environment::Prod).await
    }

    pub async fn with_environment(environment: Environment) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca = generate_ca(&CaParams {
            cn: "Nebulo Integration CA",
            validity_days: 30,
        })
        .unwrap();
        let authority = CertificateAuthority::from_pem(
            ca.cert_pem.as_bytes(),
            ca.key_pem.as_bytes(),
            None,
            DEFAULT_CERTIFICATE_VALIDITY,
        )
        .unwrap();
        let users = Arc::new(InMemoryUserDirectory::new());
        let ledger = Arc::new(
            RevocationLedger::open(dir.path().join("revoked.info"))
                .await
                .unwrap(),
        );
        let state = Arc::new(AppState::new(
            Arc::new(authority),
            users.clone(),
            ledger.clone(),
            environment,
        ));
        Self {
            ca,
            state,
            users,
            ledger,
            dir,
        }
    }

    /// Send one request through a fresh router.
    pub async fn send(&self, request: Request<Body>) -> Response {
        create_router(Arc::clone(&self.state))
            .oneshot(request)
            .await
            .unwrap()
    }

    /// Register `key` and return the issued certificate.
    pub async fn register(&self, key: &KeyPair) -> Certificate {
        let response = self.send(register_request(csr_pem("integration", key))).await;
        assert_eq!(response.status(), 201, "registration failed");
        let pem = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        parse_certificate_pem(&pem).unwrap()
    }

    /// Sign a client certificate for `key` with an explicit validity window.
    pub fn sign_with_window(
        &self,
        key: &KeyPair,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Certificate {
        let ca_der = decode_pem(self.ca.cert_pem.as_bytes(), None).unwrap();
        let ca_key = KeyPair::from_pem(&self.ca.key_pem).unwrap();
        let issuer = Issuer::from_ca_cert_der(&CertificateDer::from(ca_der), ca_key).unwrap();

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "windowed");
        params.distinguished_name = dn;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = not_before;
        params.not_after = not_after;
        let cert = params.signed_by(key, &issuer).unwrap();
        parse_certificate(cert.der()).unwrap()
    }
}

/// PEM CSR for `key` with common name `cn`.
pub fn csr_pem(cn: &str, key: &KeyPair) -> String {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Nebulo Integration");
    params.distinguished_name = dn;
    params.serialize_request(key).unwrap().pem().unwrap()
}

/// A CSR generated with `openssl req`, from `tests/fixtures/csr/`.
pub fn csr_fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/csr")
        .join(name);
    std::fs::read_to_string(path).unwrap()
}

/// `POST /user/` with a correct `Content-Length`.
pub fn register_request(body: String) -> Request<Body> {
    Request::post("/user/")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

/// A request arriving over TLS with `chain` as peer certificates.
pub fn tls_request(method: Method, chain: Vec<Vec<u8>>, body: Body) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri("/user/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    request
        .extensions_mut()
        .insert(TlsSession::with_peer_certificates(chain));
    request
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
