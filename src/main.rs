//! Nebulo - certificate registration and mutual-TLS user service

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use nebulo::{
    cli::{CaCommand, Cli, Command, RunArgs},
    config::Config,
    pki::{
        RevocationLedger, RevocationStore,
        bootstrap::{CaParams, generate_ca, issue_server_certificate, write_pair},
        parse_certificate_pem,
    },
    server::NebuloServer,
    setup_tracing,
};

/// Lifetime of the server certificate written by `ca init`, in days.
const SERVER_CERT_VALIDITY_DAYS: u32 = 397;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Version) => {
            println!("nebulo {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Some(Command::ConfigGen { ref destination }) => {
            run_config_gen(cli.config.as_deref(), destination.as_deref())
        }
        Some(Command::Ca(CaCommand::Init {
            ref cn,
            validity_days,
            ref out_dir,
            ref sans,
        })) => run_ca_init(cn, validity_days, out_dir, sans),
        Some(Command::Revoke { ref certificate }) => {
            run_revoke(cli.config.as_deref(), certificate).await
        }
        Some(Command::Fingerprint { ref certificate }) => run_fingerprint(certificate),
        Some(Command::Run(ref args)) => run_server(cli.config.as_deref(), args).await,
        None => run_server(cli.config.as_deref(), &RunArgs::default()).await,
    }
}

/// Load the configuration, logging the failure
fn load_config(path: Option<&Path>) -> Option<Config> {
    match Config::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Print or write the effective configuration
fn run_config_gen(config_path: Option<&Path>, destination: Option<&Path>) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    let yaml = match config.to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match destination {
        Some(path) => match std::fs::write(path, yaml) {
            Ok(()) => {
                println!("Configuration written to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(path = %path.display(), "Failed to write configuration: {e}");
                ExitCode::FAILURE
            }
        },
        None => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
    }
}

/// Generate a CA and a matching server certificate
fn run_ca_init(cn: &str, validity_days: u32, out_dir: &Path, sans: &[String]) -> ExitCode {
    let result = generate_ca(&CaParams { cn, validity_days }).and_then(|ca| {
        let (ca_cert, ca_key) = write_pair(&ca, out_dir, "ca")?;
        let server = issue_server_certificate(
            &ca,
            sans,
            validity_days.min(SERVER_CERT_VALIDITY_DAYS),
        )?;
        let (server_cert, server_key) = write_pair(&server, out_dir, "server")?;
        Ok([ca_cert, ca_key, server_cert, server_key])
    });

    match result {
        Ok(paths) => {
            println!("CA \"{cn}\" generated:");
            for path in paths {
                println!("  {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("CA generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Append a certificate to the configured ledger
async fn run_revoke(config_path: Option<&Path>, certificate: &Path) -> ExitCode {
    let Some(config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };

    let result = async {
        let pem = tokio::fs::read(certificate).await?;
        let cert = parse_certificate_pem(&pem)?;
        let ledger = RevocationLedger::open(&config.revocation.ledger_path).await?;
        let appended = !ledger.is_revoked(&cert.der).await?;
        if appended {
            ledger.revoke(&cert.der).await?;
        }
        Ok::<_, nebulo::Error>((cert, appended))
    }
    .await;

    match result {
        Ok((cert, appended)) => {
            info!(
                serial = %cert.serial_hex,
                fingerprint = %cert.public_key.fingerprint(),
                ledger = %config.revocation.ledger_path.display(),
                appended,
                "Certificate revoked"
            );
            if appended {
                println!("Revoked {} ({})", cert.serial_hex, cert.subject);
            } else {
                println!("Already revoked: {} ({})", cert.serial_hex, cert.subject);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(certificate = %certificate.display(), "Revocation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print the public key fingerprint of a certificate
fn run_fingerprint(certificate: &Path) -> ExitCode {
    let result = std::fs::read(certificate)
        .map_err(nebulo::Error::from)
        .and_then(|pem| parse_certificate_pem(&pem));

    match result {
        Ok(cert) => {
            println!("{}", cert.public_key.fingerprint());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(certificate = %certificate.display(), "Cannot read certificate: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the API server
async fn run_server(config_path: Option<&Path>, overrides: &RunArgs) -> ExitCode {
    let Some(mut config) = load_config(config_path) else {
        return ExitCode::FAILURE;
    };
    overrides.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        port = config.port(),
        "Starting Nebulo"
    );

    let server = match NebuloServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Nebulo shutdown complete");
    ExitCode::SUCCESS
}
