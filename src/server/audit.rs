//! Audit records for account and certificate lifecycle events.
//!
//! Every event is emitted via `tracing::info!` as a JSON blob in the `audit`
//! field, so the trail is queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `user.registered` | A CSR was accepted and a client certificate issued |
//! | `user.authenticated` | The gate resolved a peer certificate to a user |
//! | `user.rejected` | The gate or registration refused a request |
//! | `certificate.revoked` | A certificate was appended to the ledger |
//! | `user.deleted` | An account was removed |

use serde::Serialize;
use uuid::Uuid;

use crate::user::User;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"user.registered"`).
    pub event: &'static str,
    /// Affected user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Public key fingerprint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Serial of the issued or revoked certificate, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Wire error code for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl AuditEvent {
    /// `user.registered`
    #[must_use]
    pub fn registered(user: &User, serial: &str) -> Self {
        Self {
            event: "user.registered",
            user_id: Some(user.id),
            fingerprint: Some(user.key_fingerprint.clone()),
            serial: Some(serial.to_string()),
            reason: None,
        }
    }

    /// `user.authenticated`
    #[must_use]
    pub fn authenticated(user: &User) -> Self {
        Self {
            event: "user.authenticated",
            user_id: Some(user.id),
            fingerprint: Some(user.key_fingerprint.clone()),
            serial: None,
            reason: None,
        }
    }

    /// `user.rejected`
    #[must_use]
    pub fn rejected(reason: &'static str, fingerprint: Option<String>) -> Self {
        Self {
            event: "user.rejected",
            user_id: None,
            fingerprint,
            serial: None,
            reason: Some(reason),
        }
    }

    /// `certificate.revoked`
    #[must_use]
    pub fn revoked(user: &User, serial: Option<String>) -> Self {
        Self {
            event: "certificate.revoked",
            user_id: Some(user.id),
            fingerprint: Some(user.key_fingerprint.clone()),
            serial,
            reason: None,
        }
    }

    /// `user.deleted`
    #[must_use]
    pub fn deleted(user: &User) -> Self {
        Self {
            event: "user.deleted",
            user_id: Some(user.id),
            fingerprint: Some(user.key_fingerprint.clone()),
            serial: None,
            reason: None,
        }
    }
}

/// Emit an audit event.
///
/// ```text
/// INFO nebulo::server::audit audit={"event":"user.registered",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "nebulo audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
