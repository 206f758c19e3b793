//! CA bootstrap for operators without OpenSSL.
//!
//! `nebulo ca init` generates a self-signed ECDSA P-256 CA and a server
//! certificate signed by it, so a fresh deployment can start serving mTLS
//! immediately.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rcgen::string::Ia5String;
use rustls::pki_types::CertificateDer;
use time::OffsetDateTime;

use super::issuer::random_serial;
use super::pem::decode_pem;
use crate::{Error, Result};

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the CA (e.g. `"Nebulo Root CA"`).
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Certificate and private key in PEM form.
#[derive(Debug)]
pub struct GeneratedPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
}

/// Generate a self-signed CA certificate.
///
/// # Errors
///
/// Returns [`Error::CaUnusable`] if key generation or signing fails.
pub fn generate_ca(params: &CaParams<'_>) -> Result<GeneratedPair> {
    let key_pair = KeyPair::generate()
        .map_err(|e| Error::CaUnusable(format!("Failed to generate CA key: {e}")))?;

    let mut ca_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, params.cn);
    ca_params.distinguished_name = dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    ca_params.serial_number = Some(SerialNumber::from(random_serial().to_vec()));
    (ca_params.not_before, ca_params.not_after) = validity_window(params.validity_days);

    let ca_cert = ca_params
        .self_signed(&key_pair)
        .map_err(|e| Error::CaUnusable(format!("CA cert generation failed: {e}")))?;

    Ok(GeneratedPair {
        cert_pem: ca_cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Issue a TLS server certificate for `dns_names`, signed by `ca`.
///
/// # Errors
///
/// Returns [`Error::CaUnusable`] if the CA material cannot be parsed, and
/// [`Error::Config`] for a DNS name that is not IA5.
pub fn issue_server_certificate(
    ca: &GeneratedPair,
    dns_names: &[String],
    validity_days: u32,
) -> Result<GeneratedPair> {
    let ca_der = decode_pem(ca.cert_pem.as_bytes(), None)
        .map_err(|e| Error::CaUnusable(format!("Failed to parse CA cert: {e}")))?;
    let ca_key = KeyPair::from_pem(&ca.key_pem)
        .map_err(|e| Error::CaUnusable(format!("Failed to parse CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_der(&CertificateDer::from(ca_der), ca_key)
        .map_err(|e| Error::CaUnusable(format!("Failed to load CA for signing: {e}")))?;

    let server_key = KeyPair::generate()
        .map_err(|e| Error::CaUnusable(format!("Failed to generate server key: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    if let Some(first) = dns_names.first() {
        dn.push(DnType::CommonName, first.as_str());
    }
    params.distinguished_name = dn;
    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.as_str())
                .map(SanType::DnsName)
                .map_err(|e| Error::Config(format!("Invalid DNS SAN '{name}': {e}")))
        })
        .collect::<Result<_>>()?;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.serial_number = Some(SerialNumber::from(random_serial().to_vec()));
    (params.not_before, params.not_after) = validity_window(validity_days);

    let cert = params
        .signed_by(&server_key, &issuer)
        .map_err(|e| Error::SigningFailed(format!("Server cert signing failed: {e}")))?;

    Ok(GeneratedPair {
        cert_pem: cert.pem(),
        key_pem: server_key.serialize_pem(),
    })
}

/// Write `<stem>.cert` and `<stem>.key` under `dir`; the key is owner-only.
///
/// Returns the two paths written.
///
/// # Errors
///
/// Returns [`Error::Config`] if the directory cannot be created or either file
/// cannot be written.
pub fn write_pair(pair: &GeneratedPair, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

    let cert_path = dir.join(format!("{stem}.cert"));
    let key_path = dir.join(format!("{stem}.key"));

    fs::write(&cert_path, &pair.cert_pem)
        .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(&key_path)
        .and_then(|mut file| file.write_all(pair.key_pem.as_bytes()))
        .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

    Ok((cert_path, key_path))
}

fn validity_window(days: u32) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    (now, now + time::Duration::days(i64::from(days)))
}
