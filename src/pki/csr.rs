//! PKCS#10 certificate signing requests.
//!
//! [`parse_csr`] copies everything the verifier and the issuer need out of the
//! borrowed `x509-parser` structures, so a [`CertificateSigningRequest`] can be
//! passed across `.await` points and threads.

use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;
use x509_parser::x509::AlgorithmIdentifier;

use super::oids;
use super::pem::PublicKeyInfo;
use crate::{Error, Result};

/// PEM labels accepted for an uploaded CSR.
pub const CSR_TAGS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// Digest paired with a signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

/// Signature algorithm declared by a signed structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5
    RsaPkcs1(DigestAlgorithm),
    /// ECDSA with a DER `Ecdsa-Sig-Value`
    Ecdsa(DigestAlgorithm),
    /// Unrecognised algorithm (dotted OID)
    Unknown(String),
}

impl SignatureScheme {
    pub(crate) fn of(algorithm: &AlgorithmIdentifier<'_>) -> Self {
        let oid = &algorithm.algorithm;
        let scheme = [
            (oids::SHA1_WITH_RSA, Self::RsaPkcs1(DigestAlgorithm::Sha1)),
            (oids::SHA256_WITH_RSA, Self::RsaPkcs1(DigestAlgorithm::Sha256)),
            (oids::SHA384_WITH_RSA, Self::RsaPkcs1(DigestAlgorithm::Sha384)),
            (oids::SHA512_WITH_RSA, Self::RsaPkcs1(DigestAlgorithm::Sha512)),
            (oids::ECDSA_WITH_SHA1, Self::Ecdsa(DigestAlgorithm::Sha1)),
            (oids::ECDSA_WITH_SHA256, Self::Ecdsa(DigestAlgorithm::Sha256)),
            (oids::ECDSA_WITH_SHA384, Self::Ecdsa(DigestAlgorithm::Sha384)),
            (oids::ECDSA_WITH_SHA512, Self::Ecdsa(DigestAlgorithm::Sha512)),
        ]
        .into_iter()
        .find_map(|(known, scheme)| (*oid == known).then_some(scheme));

        scheme.unwrap_or_else(|| Self::Unknown(oid.to_id_string()))
    }
}

/// A parsed, not yet verified, certificate signing request.
#[derive(Debug, Clone)]
pub struct CertificateSigningRequest {
    pub(crate) der: Vec<u8>,
    pub(crate) subject: String,
    pub(crate) subject_der: Vec<u8>,
    pub(crate) public_key: PublicKeyInfo,
    pub(crate) signature_scheme: SignatureScheme,
    pub(crate) signature: Vec<u8>,
    pub(crate) tbs: Vec<u8>,
}

impl CertificateSigningRequest {
    /// Raw DER of the request.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name (RFC 4514 string).
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// DER encoding of the subject `Name`, exactly as requested.
    #[must_use]
    pub fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    /// Embedded public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKeyInfo {
        &self.public_key
    }

    /// Declared signature algorithm.
    #[must_use]
    pub fn signature_scheme(&self) -> &SignatureScheme {
        &self.signature_scheme
    }
}

/// Parse a DER-encoded PKCS#10 request.
///
/// Nothing here is trusted yet: the result must go through
/// [`super::verify::verify_csr`] before any field is used for issuance.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if the DER is not a CSR or has trailing
/// bytes.
pub fn parse_csr(der: &[u8]) -> Result<CertificateSigningRequest> {
    let (rest, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| Error::MalformedInput(format!("invalid certificate request: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::MalformedInput(
            "trailing bytes after certificate request".to_string(),
        ));
    }

    let info = &csr.certification_request_info;
    Ok(CertificateSigningRequest {
        der: der.to_vec(),
        subject: info.subject.to_string(),
        subject_der: info.subject.as_raw().to_vec(),
        public_key: PublicKeyInfo::from_parsed(&info.subject_pki),
        signature_scheme: SignatureScheme::of(&csr.signature_algorithm),
        signature: csr.signature_value.data.to_vec(),
        tbs: info.raw.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::pem::{KeyAlgorithm, decode_pem};
    use pretty_assertions::assert_eq;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use x509_parser::x509::X509Name;

    fn request(key: &KeyPair) -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "alice");
        dn.push(DnType::OrganizationName, "Nebulo");
        params.distinguished_name = dn;
        params.serialize_request(key).unwrap().der().to_vec()
    }

    #[test]
    fn parse_csr_copies_subject_key_and_signature() {
        // GIVEN: a P-256 request
        let key = KeyPair::generate().unwrap();
        let der = request(&key);
        // WHEN: parsing
        let csr = parse_csr(&der).unwrap();
        // THEN: fields are extracted
        assert_eq!(csr.der(), der.as_slice());
        assert!(csr.subject().contains("CN=alice"));
        assert!(csr.subject().contains("O=Nebulo"));
        assert_eq!(csr.public_key().algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(csr.public_key().key_bits, key.public_key_raw().to_vec());
        assert_eq!(
            csr.signature_scheme(),
            &SignatureScheme::Ecdsa(DigestAlgorithm::Sha256)
        );
        assert!(!csr.signature.is_empty());
        assert!(!csr.tbs.is_empty());
    }

    #[test]
    fn parse_csr_keeps_raw_subject() {
        let key = KeyPair::generate().unwrap();
        let csr = parse_csr(&request(&key)).unwrap();
        let (rest, name) = X509Name::from_der(csr.subject_der()).unwrap();
        assert!(rest.is_empty());
        assert_eq!(name.to_string(), csr.subject());
    }

    #[test]
    fn parse_csr_keeps_repeated_and_multi_valued_attributes() {
        let pem = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/csr/repeated_ou.csr"
        ));
        let csr = parse_csr(&decode_pem(pem.as_bytes(), None).unwrap()).unwrap();
        assert_eq!(csr.subject(), "CN=alice, OU=eng, OU=ops");

        let pem = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/csr/multivalued_rdn.csr"
        ));
        let csr = parse_csr(&decode_pem(pem.as_bytes(), None).unwrap()).unwrap();
        let (_, name) = X509Name::from_der(csr.subject_der()).unwrap();
        assert_eq!(name.iter().count(), 2);
        assert_eq!(name.iter_attributes().count(), 3);
    }

    #[test]
    fn parse_csr_rejects_certificate_der() {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::default().self_signed(&key).unwrap();
        let err = parse_csr(cert.der()).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)), "{err:?}");
    }

    #[test]
    fn parse_csr_rejects_trailing_bytes() {
        let key = KeyPair::generate().unwrap();
        let mut der = request(&key);
        der.push(0);
        let err = parse_csr(&der).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}
