//! Authentication gate.
//!
//! Resolves the TLS peer certificate of a request to a registered user.
//!
//! ```text
//! no TlsSession                    → 500 (detail: requires TLS)
//! 0 or ≥2 peer certificates        → 400 certificate_not_provided
//! now < NotBefore                  → 401 certificate_not_yet_valid
//! now ≥ NotAfter                   → 401 certificate_expired
//! listed in the revocation ledger  → 401 certificate_revoked
//! ledger unreadable                → 500 (fail closed)
//! no user owns the public key      → 401 user_not_found
//! otherwise                        → login timestamps updated, handler runs
//! ```
//!
//! Each check runs only if the previous one passed. The login update is the
//! only mutation and happens last.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::AppState;
use super::audit::{self, AuditEvent};
use crate::pki::{RevocationStore, TlsSession, parse_certificate};
use crate::user::{User, UserDirectory};
use crate::{Error, Result};

/// Request extension inserted for authenticated requests.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// User record after the login update.
    pub user: User,
    /// DER of the presented client certificate.
    pub certificate_der: Vec<u8>,
    /// Serial of the presented client certificate, hex.
    pub serial_hex: String,
}

/// Peer certificate to user resolution.
pub struct AuthGate {
    users: Arc<dyn UserDirectory>,
    revocations: Arc<dyn RevocationStore>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Gate backed by `users` and `revocations`.
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, revocations: Arc<dyn RevocationStore>) -> Self {
        Self { users, revocations }
    }

    /// Authenticate the connection described by `session` at the current time.
    pub async fn authenticate(&self, session: Option<&TlsSession>) -> Result<AuthenticatedUser> {
        self.authenticate_at(session, Utc::now()).await
    }

    /// Authenticate the connection described by `session` at `now`.
    ///
    /// # Errors
    ///
    /// See the module table.
    pub async fn authenticate_at(
        &self,
        session: Option<&TlsSession>,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedUser> {
        let session = session.ok_or(Error::TlsRequired)?;
        let [leaf] = session.peer_certificates.as_slice() else {
            return Err(Error::CertificateNotProvided);
        };

        let certificate = parse_certificate(leaf)?;

        let timestamp = now.timestamp();
        if timestamp < certificate.not_before {
            return Err(Error::CertificateNotYetValid(rfc3339(certificate.not_before)));
        }
        if timestamp >= certificate.not_after {
            return Err(Error::CertificateExpired(rfc3339(certificate.not_after)));
        }

        if self.revocations.is_revoked(&certificate.der).await? {
            return Err(Error::CertificateRevoked);
        }

        let user = self
            .users
            .find_by_public_key(&certificate.public_key.der)
            .await?
            .ok_or(Error::UserNotFound)?;

        let user = self.users.touch_login(user.id, now).await?;

        Ok(AuthenticatedUser {
            user,
            certificate_der: certificate.der,
            serial_hex: certificate.serial_hex,
        })
    }
}

fn rfc3339(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map_or_else(|| timestamp.to_string(), |at| at.to_rfc3339())
}

/// Routes reachable without a client certificate.
#[must_use]
pub fn is_public(method: &Method, path: &str) -> bool {
    matches!(
        (method, path),
        (&Method::GET, "/version") | (&Method::POST, "/user" | "/user/")
    )
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public(request.method(), request.uri().path()) {
        debug!(path = %request.uri().path(), "Public route, skipping authentication");
        return next.run(request).await;
    }

    let session = request.extensions().get::<TlsSession>().cloned();
    match state.gate.authenticate(session.as_ref()).await {
        Ok(authenticated) => {
            audit::emit(&AuditEvent::authenticated(&authenticated.user));
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Err(e) => {
            let fingerprint = session
                .as_ref()
                .and_then(|s| s.peer_certificates.first())
                .and_then(|der| parse_certificate(der).ok())
                .map(|cert| cert.public_key.fingerprint());
            warn!(
                path = %request.uri().path(),
                code = e.code(),
                fingerprint = fingerprint.as_deref().unwrap_or("-"),
                "Authentication rejected"
            );
            audit::emit(&AuditEvent::rejected(e.code(), fingerprint));
            e.into_response()
        }
    }
}
