//! Certificate machinery behind registration and authentication.
//!
//! # Architecture
//!
//! ```text
//! POST /user/  (PEM CSR)
//!   → pem::decode_pem_block     (framing)
//!   → csr::parse_csr            (PKCS#10 fields)
//!   → verify::verify_csr        (self-signature)
//!   → issuer::CertificateAuthority::issue_client_certificate
//!
//! TLS connection
//!   → tls::PeerCertAcceptor     (peer chain → TlsSession extension)
//!   → server::auth gate         (time → revocation::RevocationLedger → users)
//! ```
//!
//! # Modules
//!
//! - [`pem`]: PEM/DER codec, certificates, private keys, fingerprints
//! - [`csr`]: PKCS#10 parsing
//! - [`verify`]: CSR signature verification
//! - [`issuer`]: client certificate issuance
//! - [`revocation`]: append-only revocation ledger
//! - [`tls`]: rustls server config and peer certificate capture
//! - [`bootstrap`]: CA generation for `nebulo ca init`

pub mod bootstrap;
pub mod csr;
pub mod issuer;
mod oids;
pub mod pem;
pub mod revocation;
pub mod tls;
pub mod verify;

pub use csr::{CSR_TAGS, CertificateSigningRequest, parse_csr};
pub use issuer::{CertificateAuthority, DEFAULT_CERTIFICATE_VALIDITY, IssuedCertificate};
pub use pem::{
    Certificate, KeyAlgorithm, PublicKeyInfo, decode_pem, decode_pem_block, encode_pem,
    fingerprint_sha256, parse_certificate, parse_certificate_pem, parse_private_key,
};
pub use revocation::{RevocationLedger, RevocationStore};
pub use tls::{PeerCertAcceptor, TlsSession, build_tls_config};
pub use verify::{VerifiedCsr, verify_csr, verify_csr_signature};
