//! CSR self-signature verification.
//!
//! The declared signature algorithm selects the digest and scheme; the
//! signature is then checked over the raw `CertificationRequestInfo` bytes
//! against the public key embedded in the same request.
//!
//! | Key | Scheme | Digests |
//! |-----|--------|---------|
//! | RSA (2048-8192 bit) | PKCS#1 v1.5 | SHA-1, SHA-256, SHA-384, SHA-512 |
//! | ECDSA P-256 | DER `(r, s)` | SHA-1, SHA-256, SHA-384, SHA-512 |
//! | ECDSA P-384 | DER `(r, s)` | SHA-256, SHA-384, SHA-512 |
//! | ECDSA P-521 | DER `(r, s)` | SHA-1, SHA-256, SHA-384, SHA-512 |
//!
//! Every other pairing is [`Error::UnsupportedAlgorithm`].

use aws_lc_rs::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::der_parser::parse_der;

use super::csr::{CertificateSigningRequest, DigestAlgorithm, SignatureScheme};
use super::pem::{KeyAlgorithm, PublicKeyInfo};
use crate::{Error, Result};

/// A CSR whose self-signature has been checked.
///
/// Only [`verify_csr`] constructs this type, so holding one proves the
/// subject and public key are bound together by the requester's private key.
#[derive(Debug, Clone)]
pub struct VerifiedCsr(CertificateSigningRequest);

impl VerifiedCsr {
    /// The verified request.
    #[must_use]
    pub fn csr(&self) -> &CertificateSigningRequest {
        &self.0
    }
}

/// Check the self-signature of `csr`.
///
/// Returns `Ok(false)` when the signature does not match, including malformed
/// ECDSA signatures and `r` or `s` not strictly positive.
///
/// # Errors
///
/// Returns [`Error::UnsupportedAlgorithm`] when the key/signature pairing is
/// not handled.
pub fn verify_csr_signature(csr: &CertificateSigningRequest) -> Result<bool> {
    verify_signature(
        &csr.public_key,
        &csr.signature_scheme,
        &csr.tbs,
        &csr.signature,
    )
}

/// Verify `csr` and wrap it as a [`VerifiedCsr`].
///
/// # Errors
///
/// - [`Error::UnsupportedAlgorithm`] for unhandled pairings.
/// - [`Error::SignatureInvalid`] when the signature does not verify.
pub fn verify_csr(csr: CertificateSigningRequest) -> Result<VerifiedCsr> {
    if verify_csr_signature(&csr)? {
        Ok(VerifiedCsr(csr))
    } else {
        Err(Error::SignatureInvalid(format!(
            "self-signature of {} does not match its public key",
            csr.subject
        )))
    }
}

/// Verify `signature` over `message` with `public_key` under `scheme`.
pub(crate) fn verify_signature(
    public_key: &PublicKeyInfo,
    scheme: &SignatureScheme,
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let algorithm = verification_algorithm(public_key.algorithm, scheme)?;

    if matches!(scheme, SignatureScheme::Ecdsa(_)) && !ecdsa_components_positive(signature) {
        return Ok(false);
    }

    let key = UnparsedPublicKey::new(algorithm, &public_key.key_bits);
    Ok(key.verify(message, signature).is_ok())
}

fn verification_algorithm(
    key: KeyAlgorithm,
    scheme: &SignatureScheme,
) -> Result<&'static dyn VerificationAlgorithm> {
    use DigestAlgorithm::{Sha1, Sha256, Sha384, Sha512};
    use KeyAlgorithm::{EcdsaP256, EcdsaP384, EcdsaP521, Rsa};
    use SignatureScheme::{Ecdsa, RsaPkcs1};

    let algorithm: &'static dyn VerificationAlgorithm = match (key, scheme) {
        (Rsa, RsaPkcs1(Sha1)) => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        (Rsa, RsaPkcs1(Sha256)) => &signature::RSA_PKCS1_2048_8192_SHA256,
        (Rsa, RsaPkcs1(Sha384)) => &signature::RSA_PKCS1_2048_8192_SHA384,
        (Rsa, RsaPkcs1(Sha512)) => &signature::RSA_PKCS1_2048_8192_SHA512,

        (EcdsaP256, Ecdsa(Sha1)) => &signature::ECDSA_P256_SHA1_ASN1,
        (EcdsaP256, Ecdsa(Sha256)) => &signature::ECDSA_P256_SHA256_ASN1,
        (EcdsaP256, Ecdsa(Sha384)) => &signature::ECDSA_P256_SHA384_ASN1,
        (EcdsaP256, Ecdsa(Sha512)) => &signature::ECDSA_P256_SHA512_ASN1,

        (EcdsaP384, Ecdsa(Sha256)) => &signature::ECDSA_P384_SHA256_ASN1,
        (EcdsaP384, Ecdsa(Sha384)) => &signature::ECDSA_P384_SHA384_ASN1,
        (EcdsaP384, Ecdsa(Sha512)) => &signature::ECDSA_P384_SHA512_ASN1,

        (EcdsaP521, Ecdsa(Sha1)) => &signature::ECDSA_P521_SHA1_ASN1,
        (EcdsaP521, Ecdsa(Sha256)) => &signature::ECDSA_P521_SHA256_ASN1,
        (EcdsaP521, Ecdsa(Sha384)) => &signature::ECDSA_P521_SHA384_ASN1,
        (EcdsaP521, Ecdsa(Sha512)) => &signature::ECDSA_P521_SHA512_ASN1,

        // aws-lc-rs has no P-384/SHA-1 verifier.
        (key, scheme) => {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{scheme:?} signature with {} key",
                key.family()
            )));
        }
    };
    Ok(algorithm)
}

/// `Ecdsa-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }` with `r, s > 0`.
fn ecdsa_components_positive(signature: &[u8]) -> bool {
    let Ok((rest, value)) = parse_der(signature) else {
        return false;
    };
    if !rest.is_empty() {
        return false;
    }
    let Ok(components) = value.as_sequence() else {
        return false;
    };
    components.len() == 2
        && components.iter().all(|component| {
            component.header.tag() == Tag::Integer
                && component.as_slice().is_ok_and(is_positive_integer)
        })
}

fn is_positive_integer(content: &[u8]) -> bool {
    match content.first() {
        None => false,
        Some(first) if first & 0x80 != 0 => false,
        Some(_) => content.iter().any(|&byte| byte != 0),
    }
}
