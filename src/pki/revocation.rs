//! Revocation ledger.
//!
//! An append-only text file holding one line per revoked certificate: the
//! unpadded standard base64 of the certificate's raw DER. A certificate is
//! revoked iff its encoding appears as an exact line.
//!
//! This is a small-deployment substitute for CRL/OCSP. Lookups go through an
//! in-memory set keyed by SHA-256 of the line, rebuilt from the file on open
//! and extended on every append, so checks stay O(1) while the file remains
//! the audit trail.
//!
//! # Consistency
//!
//! Appends use `O_APPEND`, so concurrent writers never interleave within a
//! line. Lines appended by another process (e.g. `nebulo revoke`) are picked
//! up by the next [`RevocationStore::is_revoked`] call that sees the file
//! grow. A line still being written is ignored until its newline lands, so a
//! revocation may become visible one request late.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use dashmap::DashSet;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Storage of revoked certificates.
#[async_trait]
pub trait RevocationStore: Send + Sync + 'static {
    /// Record `certificate_der` as revoked. Revoking twice is harmless.
    async fn revoke(&self, certificate_der: &[u8]) -> Result<()>;

    /// Whether `certificate_der` has been revoked.
    ///
    /// Errors mean the answer is unknown; callers must fail closed.
    async fn is_revoked(&self, certificate_der: &[u8]) -> Result<bool>;
}

/// The ledger line for a certificate, without the trailing newline.
#[must_use]
pub fn ledger_entry(certificate_der: &[u8]) -> String {
    STANDARD_NO_PAD.encode(certificate_der)
}

type EntryKey = [u8; 32];

fn entry_key(line: &[u8]) -> EntryKey {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(line));
    key
}

/// File-backed [`RevocationStore`].
///
/// ```
/// use nebulo::pki::{RevocationLedger, RevocationStore};
///
/// # tokio_test::block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let ledger = RevocationLedger::open(dir.path().join("revoked.info")).await.unwrap();
/// ledger.revoke(b"certificate der").await.unwrap();
/// assert!(ledger.is_revoked(b"certificate der").await.unwrap());
/// assert!(!ledger.is_revoked(b"another").await.unwrap());
/// # });
/// ```
#[derive(Debug)]
pub struct RevocationLedger {
    path: PathBuf,
    index: DashSet<EntryKey>,
    /// Bytes of the file already indexed.
    indexed_len: Mutex<u64>,
}

impl RevocationLedger {
    /// Open the ledger at `path`, indexing existing entries.
    ///
    /// A missing file is an empty ledger; it is created on first revoke.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LedgerUnavailable`] if the file exists but cannot be
    /// read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let ledger = Self {
            path: path.into(),
            index: DashSet::new(),
            indexed_len: Mutex::new(0),
        };
        ledger.catch_up().await?;
        debug!(
            path = %ledger.path.display(),
            entries = ledger.index.len(),
            "Revocation ledger opened"
        );
        Ok(ledger)
    }

    /// Ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct revoked certificates indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no certificate is revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Index complete lines appended since the last call.
    async fn catch_up(&self) -> Result<()> {
        let mut indexed_len = self.indexed_len.lock().await;

        let file_len = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound && *indexed_len == 0 => return Ok(()),
            Err(e) => return Err(self.unavailable(&e)),
        };
        if file_len == *indexed_len {
            return Ok(());
        }
        if file_len < *indexed_len {
            return Err(Error::LedgerUnavailable(format!(
                "'{}' shrank from {} to {file_len} bytes",
                self.path.display(),
                *indexed_len
            )));
        }

        let mut file = fs::File::open(&self.path)
            .await
            .map_err(|e| self.unavailable(&e))?;
        file.seek(SeekFrom::Start(*indexed_len))
            .await
            .map_err(|e| self.unavailable(&e))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)
            .await
            .map_err(|e| self.unavailable(&e))?;

        // Only whole lines; a partial trailing line waits for the next pass.
        let Some(last_newline) = tail.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };
        for line in tail[..last_newline].split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if !line.is_empty() {
                self.index.insert(entry_key(line));
            }
        }
        *indexed_len += (last_newline + 1) as u64;
        Ok(())
    }

    fn unavailable(&self, e: &std::io::Error) -> Error {
        Error::LedgerUnavailable(format!("'{}': {e}", self.path.display()))
    }
}

#[async_trait]
impl RevocationStore for RevocationLedger {
    async fn revoke(&self, certificate_der: &[u8]) -> Result<()> {
        let entry = ledger_entry(certificate_der);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(&e))?;
        }

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&self.path)
            .await
            .map_err(|e| self.unavailable(&e))?;

        let mut line = entry.into_bytes();
        let key = entry_key(&line);
        line.push(b'\n');
        // One write call per line keeps the append atomic.
        file.write_all(&line)
            .await
            .map_err(|e| self.unavailable(&e))?;
        file.flush().await.map_err(|e| self.unavailable(&e))?;

        self.index.insert(key);
        Ok(())
    }

    async fn is_revoked(&self, certificate_der: &[u8]) -> Result<bool> {
        if let Err(e) = self.catch_up().await {
            warn!(error = %e, "Revocation ledger check failed");
            return Err(e);
        }
        let key = entry_key(ledger_entry(certificate_der).as_bytes());
        Ok(self.index.contains(&key))
    }
}
