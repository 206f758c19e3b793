//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, Environment};

/// Nebulo user service - certificate registration and mutual-TLS authentication
#[derive(Parser, Debug)]
#[command(name = "nebulo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "NEBULO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NEBULO_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "NEBULO_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the API server (default)
    Run(RunArgs),

    /// Print the effective configuration as YAML
    ConfigGen {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        destination: Option<PathBuf>,
    },

    /// Print the version
    Version,

    /// Certificate authority management
    #[command(subcommand)]
    Ca(CaCommand),

    /// Append a certificate to the revocation ledger
    Revoke {
        /// Client certificate (PEM)
        #[arg(required = true)]
        certificate: PathBuf,
    },

    /// Print the SHA256 fingerprint of a certificate's public key
    Fingerprint {
        /// Certificate (PEM)
        #[arg(required = true)]
        certificate: PathBuf,
    },
}

/// Overrides for `run`
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Deployment environment
    #[arg(short, long, env = "NEBULO_ENVIRONMENT")]
    pub environment: Option<Environment>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Server certificate chain (PEM)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Server private key (PEM)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// CA certificate used to issue client certificates
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// CA private key
    #[arg(long)]
    pub ca_key: Option<PathBuf>,
}

impl RunArgs {
    /// Apply the overrides on top of a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(ref host) = self.host {
            config.server.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.server.port = Some(port);
        }
        if let Some(ref cert) = self.tls_cert {
            config.tls.cert.clone_from(cert);
        }
        if let Some(ref key) = self.tls_key {
            config.tls.key.clone_from(key);
        }
        if let Some(ref cert) = self.ca_cert {
            config.ca.cert.clone_from(cert);
        }
        if let Some(ref key) = self.ca_key {
            config.ca.key.clone_from(key);
        }
    }
}

/// CA subcommands
#[derive(Subcommand, Debug)]
pub enum CaCommand {
    /// Generate a CA and a server certificate signed by it
    Init {
        /// CA common name
        #[arg(long, default_value = "Nebulo CA")]
        cn: String,

        /// CA lifetime in days
        #[arg(long, default_value_t = 3650)]
        validity_days: u32,

        /// Output directory
        #[arg(short, long, default_value = "certs")]
        out_dir: PathBuf,

        /// DNS names of the server certificate
        #[arg(long = "san", default_value = "localhost")]
        sans: Vec<String>,
    },
}
