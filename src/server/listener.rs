//! API server

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::{AppState, create_router};
use crate::config::{Config, UserProvider};
use crate::pki::{CertificateAuthority, PeerCertAcceptor, RevocationLedger, build_tls_config};
use crate::user::{FileUserDirectory, InMemoryUserDirectory, UserDirectory};
use crate::{Error, Result};

/// Nebulo API server
pub struct NebuloServer {
    config: Config,
    state: Arc<AppState>,
}

impl NebuloServer {
    /// Load the CA, the revocation ledger and the user directory.
    ///
    /// # Errors
    ///
    /// Fails if any of the three cannot be opened. A server without a usable
    /// CA would reject every registration, so it does not start.
    pub async fn new(config: Config) -> Result<Self> {
        let password = config.ca.resolve_key_password()?;
        let ca = CertificateAuthority::from_files(
            &config.ca.cert,
            &config.ca.key,
            password.as_deref(),
            config.ca.certificate_validity,
        )?;

        let revocations = RevocationLedger::open(&config.revocation.ledger_path).await?;

        let users: Arc<dyn UserDirectory> = match config.users.provider {
            UserProvider::Memory => {
                warn!("Memory user directory, users are lost on restart");
                Arc::new(InMemoryUserDirectory::new())
            }
            UserProvider::File => Arc::new(FileUserDirectory::open(&config.users.path).await?),
        };

        let state = Arc::new(AppState::from_config(
            &config,
            Arc::new(ca),
            users,
            Arc::new(revocations),
        ));
        Ok(Self { config, state })
    }

    /// Shared state handed to the router
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_addr()?;
        let app = create_router(Arc::clone(&self.state));

        info!("============================================================");
        info!("NEBULO v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(%addr, environment = %self.config.environment, "Listening");
        info!(subject = %self.state.ca.subject(), "Issuing CA");
        info!(
            ledger = %self.config.revocation.ledger_path.display(),
            validity = ?self.config.ca.certificate_validity,
            "Client certificates"
        );
        if self.config.environment.echoes_error_detail() {
            warn!("Error responses echo internal detail (dev environment)");
        }

        if self.config.tls.enabled {
            let tls = build_tls_config(
                &self.config.tls.cert,
                &self.config.tls.key,
                self.config.clients_ca(),
            )?;
            info!(
                cert = %self.config.tls.cert.display(),
                clients_ca = %self.config.clients_ca().display(),
                "TLS enabled"
            );
            info!("============================================================");

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            let grace = self.config.server.shutdown_timeout;
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(grace));
            });

            axum_server::bind(addr)
                .acceptor(PeerCertAcceptor::new(tls))
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        } else {
            warn!("TLS disabled - authenticated routes answer 500");
            info!("============================================================");

            let listener = TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
