//! Nebulo user service
//!
//! Certificate-based account registration and mutual-TLS authentication.
//!
//! # Features
//!
//! - **Registration**: a PEM CSR posted to `/user/` is verified and answered
//!   with a short-lived client certificate signed by the service CA
//! - **Authentication**: the TLS peer certificate is checked for validity and
//!   revocation, then resolved to a user by its public key
//! - **Revocation**: an append-only ledger of revoked certificates, indexed in
//!   memory and shared with the `nebulo revoke` CLI
//! - **Users**: in-memory or JSON-file user directory
//!
//! # Modules
//!
//! - [`pki`]: PEM/DER codec, CSR verification, issuance, revocation, TLS
//! - [`user`]: user records and directories
//! - [`server`]: HTTP API, authentication gate, error responses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod pki;
pub mod server;
pub mod user;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` is `text` (default) or
/// `json`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Cannot install log subscriber: {e}")))?,
        Some("text") | None => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Cannot install log subscriber: {e}")))?,
        Some(other) => {
            return Err(Error::Config(format!(
                "Unknown log format '{other}' (expected text or json)"
            )));
        }
    }

    Ok(())
}
