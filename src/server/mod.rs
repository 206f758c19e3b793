//! HTTP API server.
//!
//! # Routes
//!
//! | Route | Auth | Result |
//! |-------|------|--------|
//! | `GET /version` | no | `{"version": ...}` |
//! | `POST /user/` | no | `201` PEM client certificate |
//! | `GET /user/` | client certificate | `200` profile |
//! | `PUT /user/` | client certificate | `200` updated profile |
//! | `DELETE /user/` | client certificate | `202`, certificate revoked and user removed |
//!
//! Authenticated routes go through [`auth::auth_middleware`]; every failure
//! becomes a `{"error", "parameters"}` body via [`response`].

pub mod audit;
pub mod auth;
mod listener;
pub mod response;
mod router;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Environment;
use crate::pki::{CertificateAuthority, RevocationStore};
use crate::user::UserDirectory;

pub use auth::{AuthGate, AuthenticatedUser, auth_middleware};
pub use listener::NebuloServer;
pub use router::create_router;

/// Shared application state
pub struct AppState {
    /// Issuing CA
    pub ca: Arc<CertificateAuthority>,
    /// User directory
    pub users: Arc<dyn UserDirectory>,
    /// Revocation ledger
    pub revocations: Arc<dyn RevocationStore>,
    /// Authentication gate over `users` and `revocations`
    pub gate: AuthGate,
    /// Deployment environment
    pub environment: Environment,
    /// Smallest accepted CSR upload
    pub min_csr_length: u64,
    /// Request body limit (bytes)
    pub max_body_size: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl AppState {
    /// State wiring `ca`, `users` and `revocations` with default limits.
    #[must_use]
    pub fn new(
        ca: Arc<CertificateAuthority>,
        users: Arc<dyn UserDirectory>,
        revocations: Arc<dyn RevocationStore>,
        environment: Environment,
    ) -> Self {
        let defaults = crate::config::Config::default();
        Self {
            gate: AuthGate::new(Arc::clone(&users), Arc::clone(&revocations)),
            ca,
            users,
            revocations,
            environment,
            min_csr_length: defaults.registration.min_csr_length,
            max_body_size: defaults.server.max_body_size,
            request_timeout: defaults.server.request_timeout,
        }
    }

    /// State built from the loaded configuration.
    #[must_use]
    pub fn from_config(
        config: &crate::config::Config,
        ca: Arc<CertificateAuthority>,
        users: Arc<dyn UserDirectory>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        Self {
            min_csr_length: config.registration.min_csr_length,
            max_body_size: config.server.max_body_size,
            request_timeout: config.server.request_timeout,
            ..Self::new(ca, users, revocations, config.environment)
        }
    }
}
