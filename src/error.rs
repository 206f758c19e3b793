//! Error types for Nebulo

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for Nebulo
pub type Result<T> = std::result::Result<T, Error>;

/// Nebulo errors
///
/// Variants fall into three groups: client input problems (4xx), authentication
/// failures (401) and server-side faults (5xx). Codec and verifier errors keep
/// their specific variant all the way to the HTTP layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Request framing rejected before its body is looked at
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Bad PEM/DER framing, unparsable CSR or certificate
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Wrong password, or a block marked encrypted that is not
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Private key is neither PKCS#8, PKCS#1 nor SEC1
    #[error("Unsupported private key format: {0}")]
    UnsupportedKeyFormat(String),

    /// CSR self-signature does not match its embedded public key
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Signature or key algorithm not handled by the verifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Public key already registered to another user
    #[error("Public key already registered: {0}")]
    DuplicateKey(String),

    /// CA certificate or key is missing, corrupt or mismatched
    #[error("Certificate authority unusable: {0}")]
    CaUnusable(String),

    /// Library-level signing error while issuing a certificate
    #[error("Certificate signing failed: {0}")]
    SigningFailed(String),

    /// Peer certificate `NotAfter` is in the past
    #[error("Certificate expired at {0}")]
    CertificateExpired(String),

    /// Peer certificate `NotBefore` is in the future
    #[error("Certificate not valid before {0}")]
    CertificateNotYetValid(String),

    /// Peer certificate is listed in the revocation ledger
    #[error("Certificate revoked")]
    CertificateRevoked,

    /// Zero or several peer certificates were presented
    #[error("Certificate not provided")]
    CertificateNotProvided,

    /// Authenticated route reached over a non-TLS connection
    #[error("Authentication requires TLS")]
    TlsRequired,

    /// No user owns the presented public key
    #[error("User not found")]
    UserNotFound,

    /// Revocation ledger exists but cannot be read or written
    #[error("Revocation ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Request parameter rejected by validation
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::MalformedInput(_)
            | Self::SignatureInvalid(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::CertificateNotProvided
            | Self::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            Self::DuplicateKey(_) => StatusCode::CONFLICT,
            Self::CertificateExpired(_)
            | Self::CertificateNotYetValid(_)
            | Self::CertificateRevoked
            | Self::UserNotFound => StatusCode::UNAUTHORIZED,
            Self::DecryptionFailed(_)
            | Self::UnsupportedKeyFormat(_)
            | Self::CaUnusable(_)
            | Self::SigningFailed(_)
            | Self::TlsRequired
            | Self::LedgerUnavailable(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable wire code used in the `{"error": ...}` response body
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "http_bad_request",
            Self::MalformedInput(_) => "malformed_input",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::CertificateNotProvided => "certificate_not_provided",
            Self::InvalidParameter { .. } => "parameter_bad",
            Self::DuplicateKey(_) => "user_exist",
            Self::CertificateExpired(_) => "certificate_expired",
            Self::CertificateNotYetValid(_) => "certificate_not_yet_valid",
            Self::CertificateRevoked => "certificate_revoked",
            Self::UserNotFound => "user_not_found",
            _ => "http_internal_server_error",
        }
    }
}
