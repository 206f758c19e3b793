//! Certificate issuance engine.
//!
//! A [`CertificateAuthority`] is loaded once at startup and shared read-only.
//! It signs short-lived client certificates for verified CSRs.
//!
//! # Template
//!
//! Each issued certificate is built from a fresh template. Only the subject
//! name and public key come from the request; nothing else in the CSR is
//! copied. The subject `Name` is carried over as the requester encoded it,
//! so repeated attributes, multi-valued RDNs and string types survive.
//!
//! | Field | Value |
//! |-------|-------|
//! | Subject | CSR subject |
//! | Issuer | CA subject |
//! | Serial | 126 random bits, positive |
//! | Validity | `[now, now + validity]` |
//! | Key usage | `digitalSignature` |
//! | Extended key usage | `clientAuth` |
//! | Basic constraints | `CA:FALSE` |

use std::fs;
use std::path::Path;
use std::time::Duration;

use rcgen::{
    CertificateParams, DistinguishedName, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PublicKeyData, SerialNumber, SignatureAlgorithm, SigningKey,
};
use rustls::pki_types::CertificateDer;
use time::OffsetDateTime;
use tracing::{debug, info};
use x509_parser::der_parser::asn1_rs::{Any, FromDer as _};

use super::pem::{
    CERTIFICATE_TAG, Certificate, KeyAlgorithm, PublicKeyInfo, decode_pem, decode_pem_block,
    encode_pem, parse_certificate, parse_private_key,
};
use super::verify::VerifiedCsr;
use crate::{Error, Result};

/// Default lifetime of an issued client certificate.
pub const DEFAULT_CERTIFICATE_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A signed client certificate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// DER encoding.
    pub der: Vec<u8>,
    /// Serial number, lower-case hex.
    pub serial_hex: String,
    /// Start of the validity window.
    pub not_before: OffsetDateTime,
    /// End of the validity window.
    pub not_after: OffsetDateTime,
}

impl IssuedCertificate {
    /// PEM encoding (`CERTIFICATE` block).
    #[must_use]
    pub fn to_pem(&self) -> String {
        encode_pem(CERTIFICATE_TAG, &self.der)
    }
}

/// CA certificate and private key used to sign client certificates.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    certificate: Certificate,
    validity: time::Duration,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.certificate.subject)
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the CA from PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaUnusable`] if a file cannot be read, plus every
    /// error of [`CertificateAuthority::from_pem`].
    pub fn from_files(
        cert_path: &Path,
        key_path: &Path,
        password: Option<&str>,
        validity: Duration,
    ) -> Result<Self> {
        let cert_pem = read_file(cert_path)?;
        let key_pem = read_file(key_path)?;
        let ca = Self::from_pem(&cert_pem, &key_pem, password, validity)?;
        info!(
            subject = %ca.subject(),
            cert = %cert_path.display(),
            "Certificate authority loaded"
        );
        Ok(ca)
    }

    /// Load the CA from PEM-encoded certificate and key.
    ///
    /// The key may be PKCS#8 (optionally encrypted with `password`), PKCS#1
    /// or SEC1, and must match the certificate's public key.
    ///
    /// # Errors
    ///
    /// - [`Error::CaUnusable`] if the certificate is unreadable, not a CA, or
    ///   does not match the key.
    /// - [`Error::DecryptionFailed`] / [`Error::UnsupportedKeyFormat`] from the
    ///   key codec.
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        password: Option<&str>,
        validity: Duration,
    ) -> Result<Self> {
        let block = decode_pem_block(cert_pem, None)
            .map_err(|e| Error::CaUnusable(format!("CA certificate: {e}")))?;
        if block.tag != CERTIFICATE_TAG {
            return Err(Error::CaUnusable(format!(
                "CA certificate file holds a {} block",
                block.tag
            )));
        }
        let certificate = parse_certificate(&block.der)
            .map_err(|e| Error::CaUnusable(format!("CA certificate: {e}")))?;
        if !certificate.is_ca {
            return Err(Error::CaUnusable(format!(
                "{} is not a CA certificate",
                certificate.subject
            )));
        }

        let key_der = decode_pem(key_pem, password)?;
        let key = parse_private_key(&key_der, password)?;
        if key.key_pair.public_key_raw() != certificate.public_key.key_bits.as_slice() {
            return Err(Error::CaUnusable(
                "CA private key does not match the CA certificate".to_string(),
            ));
        }

        let validity = time::Duration::try_from(validity)
            .map_err(|e| Error::Config(format!("certificate validity out of range: {e}")))?;

        let issuer = Issuer::from_ca_cert_der(&CertificateDer::from(block.der), key.key_pair)
            .map_err(|e| Error::CaUnusable(format!("cannot build issuer: {e}")))?;

        debug!(
            subject = %certificate.subject,
            key_format = ?key.format,
            "CA key matched certificate"
        );

        Ok(Self {
            issuer,
            certificate,
            validity,
        })
    }

    /// CA subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.certificate.subject
    }

    /// Parsed CA certificate.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Sign a client certificate for `csr`, valid from now.
    ///
    /// # Preconditions
    ///
    /// The caller has checked that no existing user owns the CSR's public
    /// key. This engine performs no duplicate check of its own.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedAlgorithm`] if the public key type cannot be
    ///   embedded.
    /// - [`Error::SigningFailed`] if the signature cannot be produced.
    pub fn issue_client_certificate(&self, csr: &VerifiedCsr) -> Result<IssuedCertificate> {
        self.issue_at(csr, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        csr: &VerifiedCsr,
        now: OffsetDateTime,
    ) -> Result<IssuedCertificate> {
        let request = csr.csr();
        let public_key = RequestPublicKey::new(request.public_key())?;

        let serial = random_serial();
        let not_after = now + self.validity;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.serial_number = Some(SerialNumber::from(serial.to_vec()));
        params.not_before = now;
        params.not_after = not_after;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;

        let certificate = params
            .signed_by(&public_key, &self.issuer)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;
        let der = with_subject(certificate.der(), request.subject_der(), self.issuer.key())?;

        Ok(IssuedCertificate {
            der,
            serial_hex: hex::encode(serial),
            not_before: now,
            not_after,
        })
    }
}

/// Public key of a request, presented to `rcgen` without a private key.
struct RequestPublicKey<'a> {
    key_bits: &'a [u8],
    algorithm: &'static SignatureAlgorithm,
}

impl<'a> RequestPublicKey<'a> {
    fn new(public_key: &'a PublicKeyInfo) -> Result<Self> {
        // Only the key-type OIDs of these are written into the SPKI.
        let algorithm: &'static SignatureAlgorithm = match public_key.algorithm {
            KeyAlgorithm::Rsa => &rcgen::PKCS_RSA_SHA256,
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::EcdsaP521 => &rcgen::PKCS_ECDSA_P521_SHA512,
            KeyAlgorithm::Unsupported => {
                return Err(Error::UnsupportedAlgorithm(
                    "public key type cannot be certified".to_string(),
                ));
            }
        };
        Ok(Self {
            key_bits: &public_key.key_bits,
            algorithm,
        })
    }
}

impl PublicKeyData for RequestPublicKey<'_> {
    fn der_bytes(&self) -> &[u8] {
        self.key_bits
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

/// Position of `subject` in `TBSCertificate` (after version, serial,
/// signature, issuer and validity).
const TBS_SUBJECT_INDEX: usize = 5;

/// Put `subject_der` in place of the subject of a signed certificate and sign
/// the new `TBSCertificate` with `signer`.
fn with_subject(certificate_der: &[u8], subject_der: &[u8], signer: &KeyPair) -> Result<Vec<u8>> {
    let outer = der_children(certificate_der)?;
    let (Some(tbs), Some(algorithm)) = (outer.first(), outer.get(1)) else {
        return Err(Error::SigningFailed(
            "certificate is not a signed sequence".to_string(),
        ));
    };

    let mut fields = der_children(tbs)?;
    let Some(subject) = fields.get_mut(TBS_SUBJECT_INDEX) else {
        return Err(Error::SigningFailed(
            "certificate has no subject field".to_string(),
        ));
    };
    *subject = subject_der;

    let tbs = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for field in &fields {
                writer.next().write_der(field);
            }
        });
    });
    let signature = signer
        .sign(&tbs)
        .map_err(|e| Error::SigningFailed(e.to_string()))?;

    Ok(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(&tbs);
            writer.next().write_der(algorithm);
            writer
                .next()
                .write_bitvec_bytes(&signature, signature.len() * 8);
        });
    }))
}

/// Encoded elements of the DER `SEQUENCE` at the start of `der`.
fn der_children(der: &[u8]) -> Result<Vec<&[u8]>> {
    let (_, sequence) = Any::from_der(der).map_err(reencode_error)?;
    let mut input = sequence.data;
    let mut children = Vec::new();
    while !input.is_empty() {
        let (rest, _) = Any::from_der(input).map_err(reencode_error)?;
        children.push(&input[..input.len() - rest.len()]);
        input = rest;
    }
    Ok(children)
}

fn reencode_error(e: impl std::fmt::Display) -> Error {
    Error::SigningFailed(format!("cannot re-encode certificate: {e}"))
}

pub(crate) fn random_serial() -> [u8; 16] {
    let mut serial: [u8; 16] = rand::random();
    // Positive and minimally encoded: top bit clear, first byte non-zero.
    serial[0] = (serial[0] & 0x7f) | 0x01;
    serial
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::CaUnusable(format!("cannot read '{}': {e}", path.display())))
}
