//! PEM/DER codec.
//!
//! Decodes PEM blocks (optionally encrypted), parses X.509 certificates and
//! private keys into owned values, and computes public-key fingerprints.
//!
//! # Encrypted keys
//!
//! Two flavours of encrypted private key exist in the wild:
//!
//! - PKCS#8 `ENCRYPTED PRIVATE KEY` blocks (PBES2): decrypted with `pkcs8`.
//! - Legacy OpenSSL `Proc-Type: 4,ENCRYPTED` blocks: rejected with
//!   [`Error::DecryptionFailed`]; convert them with
//!   `openssl pkcs8 -topk8 -v2 aes-256-cbc`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use pem::{EncodeConfig, LineEnding, Pem};
use pkcs8::EncryptedPrivateKeyInfo;
use rcgen::{KeyPair, SignatureAlgorithm};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs1KeyDer, PrivateSec1KeyDer};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;

use super::oids;
use crate::{Error, Result};

/// PEM tag of an X.509 certificate
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// PEM tag of a PKCS#8 encrypted private key
pub const ENCRYPTED_PRIVATE_KEY_TAG: &str = "ENCRYPTED PRIVATE KEY";

// ─────────────────────────────────────────────────────────────────────────────
// PEM framing
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded PEM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    /// Block label, e.g. `CERTIFICATE REQUEST`.
    pub tag: String,
    /// DER payload (decrypted when a password was supplied).
    pub der: Vec<u8>,
}

/// Decode the first PEM block of `input`.
///
/// Surrounding whitespace is ignored. When the block is encrypted and a
/// `password` is supplied, the returned payload is the decrypted DER. A
/// password given for a plain block is ignored.
///
/// # Errors
///
/// - [`Error::MalformedInput`] if no PEM block can be found.
/// - [`Error::DecryptionFailed`] if the block is encrypted and the password is
///   missing or wrong, or the encryption scheme is not supported.
pub fn decode_pem_block(input: &[u8], password: Option<&str>) -> Result<PemBlock> {
    let trimmed = input.trim_ascii();
    let block = pem::parse(trimmed)
        .map_err(|e| Error::MalformedInput(format!("no PEM block found: {e}")))?;

    if is_legacy_encrypted(&block) {
        return Err(Error::DecryptionFailed(
            "legacy Proc-Type encrypted PEM is not supported, convert the key to PKCS#8"
                .to_string(),
        ));
    }

    if block.tag() == ENCRYPTED_PRIVATE_KEY_TAG {
        let Some(password) = password else {
            return Err(Error::DecryptionFailed(
                "encrypted private key requires a password".to_string(),
            ));
        };
        let der = decrypt_pkcs8(block.contents(), password)?;
        return Ok(PemBlock {
            tag: "PRIVATE KEY".to_string(),
            der,
        });
    }

    Ok(PemBlock {
        tag: block.tag().to_string(),
        der: block.into_contents(),
    })
}

/// Decode the first PEM block of `input` and return its DER payload.
///
/// See [`decode_pem_block`] for the decryption rules.
pub fn decode_pem(input: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
    decode_pem_block(input, password).map(|block| block.der)
}

/// Encode `der` as a PEM block with the given tag (LF line endings).
#[must_use]
pub fn encode_pem(tag: &str, der: &[u8]) -> String {
    let block = Pem::new(tag, der.to_vec());
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

fn is_legacy_encrypted(block: &Pem) -> bool {
    block
        .headers()
        .get("Proc-Type")
        .is_some_and(|value| value.contains("ENCRYPTED"))
}

fn decrypt_pkcs8(der: &[u8], password: &str) -> Result<Vec<u8>> {
    let info = EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| Error::DecryptionFailed(format!("not a PKCS#8 encrypted key: {e}")))?;
    let document = info
        .decrypt(password)
        .map_err(|e| Error::DecryptionFailed(format!("wrong password or corrupt key: {e}")))?;
    Ok(document.as_bytes().to_vec())
}

// ─────────────────────────────────────────────────────────────────────────────
// Public keys
// ─────────────────────────────────────────────────────────────────────────────

/// Public key algorithm of a `SubjectPublicKeyInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// `rsaEncryption`
    Rsa,
    /// `id-ecPublicKey` on NIST P-256
    EcdsaP256,
    /// `id-ecPublicKey` on NIST P-384
    EcdsaP384,
    /// `id-ecPublicKey` on NIST P-521
    EcdsaP521,
    /// Anything else (Ed25519, DSA, other curves)
    Unsupported,
}

impl KeyAlgorithm {
    /// Identify the algorithm of a parsed `SubjectPublicKeyInfo`.
    pub(crate) fn of(spki: &SubjectPublicKeyInfo<'_>) -> Self {
        let algorithm = &spki.algorithm;
        if algorithm.algorithm == oids::RSA_ENCRYPTION {
            return Self::Rsa;
        }
        if algorithm.algorithm == oids::EC_PUBLIC_KEY {
            let curve = algorithm
                .parameters
                .as_ref()
                .and_then(|params| params.as_oid().ok());
            return match curve {
                Some(oid) if oid == oids::SECP256R1 => Self::EcdsaP256,
                Some(oid) if oid == oids::SECP384R1 => Self::EcdsaP384,
                Some(oid) if oid == oids::SECP521R1 => Self::EcdsaP521,
                _ => Self::Unsupported,
            };
        }
        Self::Unsupported
    }

    /// Family name shown to users (`RSA`, `ECDSA`).
    #[must_use]
    pub fn family(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::EcdsaP256 | Self::EcdsaP384 | Self::EcdsaP521 => "ECDSA",
            Self::Unsupported => "unknown",
        }
    }
}

/// Owned copy of a `SubjectPublicKeyInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyInfo {
    /// Full DER encoding of the `SubjectPublicKeyInfo`.
    pub der: Vec<u8>,
    /// Contents of the `subjectPublicKey` bit string.
    pub key_bits: Vec<u8>,
    /// Key algorithm.
    pub algorithm: KeyAlgorithm,
}

impl PublicKeyInfo {
    pub(crate) fn from_parsed(spki: &SubjectPublicKeyInfo<'_>) -> Self {
        Self {
            der: spki.raw.to_vec(),
            key_bits: spki.subject_public_key.data.to_vec(),
            algorithm: KeyAlgorithm::of(spki),
        }
    }

    /// `SHA256:<base64>` fingerprint of this key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_sha256(&self.der)
    }
}

/// OpenSSH-style fingerprint: `SHA256:` followed by the unpadded standard
/// base64 of the SHA-256 digest of `public_key_der`.
#[must_use]
pub fn fingerprint_sha256(public_key_der: &[u8]) -> String {
    let digest = Sha256::digest(public_key_der);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificates
// ─────────────────────────────────────────────────────────────────────────────

/// Owned view of the X.509 certificate fields Nebulo cares about.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Raw DER of the whole certificate.
    pub der: Vec<u8>,
    /// Subject distinguished name (RFC 4514 string).
    pub subject: String,
    /// Issuer distinguished name (RFC 4514 string).
    pub issuer: String,
    /// Serial number, lower-case hex.
    pub serial_hex: String,
    /// Subject public key.
    pub public_key: PublicKeyInfo,
    /// `NotBefore` as a Unix timestamp.
    pub not_before: i64,
    /// `NotAfter` as a Unix timestamp.
    pub not_after: i64,
    /// Basic constraints mark this certificate as a CA.
    pub is_ca: bool,
}

/// Parse a DER-encoded X.509 certificate.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if the DER is not a certificate or has
/// trailing bytes.
pub fn parse_certificate(der: &[u8]) -> Result<Certificate> {
    let (rest, cert) = X509Certificate::from_der(der)
        .map_err(|e| Error::MalformedInput(format!("invalid certificate: {e}")))?;
    if !rest.is_empty() {
        return Err(Error::MalformedInput(
            "trailing bytes after certificate".to_string(),
        ));
    }

    let validity = cert.validity();
    Ok(Certificate {
        der: der.to_vec(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial_hex: hex::encode(cert.raw_serial()),
        public_key: PublicKeyInfo::from_parsed(cert.public_key()),
        not_before: validity.not_before.timestamp(),
        not_after: validity.not_after.timestamp(),
        is_ca: cert
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|constraints| constraints.value.ca),
    })
}

/// Decode a PEM certificate and parse it.
pub fn parse_certificate_pem(input: &[u8]) -> Result<Certificate> {
    let block = decode_pem_block(input, None)?;
    if block.tag != CERTIFICATE_TAG {
        return Err(Error::MalformedInput(format!(
            "expected a CERTIFICATE block, found {}",
            block.tag
        )));
    }
    parse_certificate(&block.der)
}

// ─────────────────────────────────────────────────────────────────────────────
// Private keys
// ─────────────────────────────────────────────────────────────────────────────

/// Encoding a private key was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// `PrivateKeyInfo` (RFC 5208)
    Pkcs8,
    /// `RSAPrivateKey` (RFC 8017)
    Pkcs1,
    /// `ECPrivateKey` (RFC 5915)
    Sec1,
}

/// A private key able to sign certificates.
pub struct PrivateKey {
    /// Signing key pair.
    pub key_pair: KeyPair,
    /// Encoding the key was parsed from.
    pub format: KeyFormat,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("format", &self.format)
            .field("algorithm", self.key_pair.algorithm())
            .finish_non_exhaustive()
    }
}

/// Parse a DER private key, trying PKCS#8, then PKCS#1, then SEC1.
///
/// When `password` is supplied and `der` is a PKCS#8 `EncryptedPrivateKeyInfo`,
/// the key is decrypted first.
///
/// # Errors
///
/// - [`Error::DecryptionFailed`] if decryption of an encrypted key fails.
/// - [`Error::UnsupportedKeyFormat`] if no parser accepts the key.
pub fn parse_private_key(der: &[u8], password: Option<&str>) -> Result<PrivateKey> {
    if let Some(password) = password
        && EncryptedPrivateKeyInfo::try_from(der).is_ok()
    {
        let plain = decrypt_pkcs8(der, password)?;
        return parse_plain_private_key(&plain);
    }
    parse_plain_private_key(der)
}

fn parse_plain_private_key(der: &[u8]) -> Result<PrivateKey> {
    if let Ok(key_pair) = KeyPair::try_from(der) {
        return Ok(PrivateKey {
            key_pair,
            format: KeyFormat::Pkcs8,
        });
    }

    let pkcs1 = PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(der.to_vec()));
    if let Ok(key_pair) = KeyPair::from_der_and_sign_algo(&pkcs1, &rcgen::PKCS_RSA_SHA256) {
        return Ok(PrivateKey {
            key_pair,
            format: KeyFormat::Pkcs1,
        });
    }

    let sec1 = PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(der.to_vec()));
    let ec_algorithms: [&'static SignatureAlgorithm; 2] =
        [&rcgen::PKCS_ECDSA_P256_SHA256, &rcgen::PKCS_ECDSA_P384_SHA384];
    for algorithm in ec_algorithms {
        if let Ok(key_pair) = KeyPair::from_der_and_sign_algo(&sec1, algorithm) {
            return Ok(PrivateKey {
                key_pair,
                format: KeyFormat::Sec1,
            });
        }
    }

    Err(Error::UnsupportedKeyFormat(
        "key is neither PKCS#8, PKCS#1 nor SEC1 (P-256/P-384)".to_string(),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
