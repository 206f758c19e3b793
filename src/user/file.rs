//! JSON file user directory.
//!
//! All users live in one JSON array. Every mutation writes the whole document
//! to a temporary sibling file and renames it over the original, so a crash
//! never leaves a half-written directory behind. The in-memory table only
//! changes once the new document is on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::directory::{UserDirectory, UserTable};
use super::{NewUser, User};
use crate::{Error, Result};

/// [`UserDirectory`] persisted to a JSON file.
#[derive(Debug)]
pub struct FileUserDirectory {
    path: PathBuf,
    table: Mutex<UserTable>,
}

impl FileUserDirectory {
    /// Load the directory at `path`. A missing or empty file is an empty
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a JSON array of
    /// users, or lists the same public key twice.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users: Vec<User> = match fs::read(&path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                Error::Config(format!("User file '{}' is invalid: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::Config(format!(
                    "Cannot read user file '{}': {e}",
                    path.display()
                )));
            }
        };

        let table = UserTable::from_users(users)?;
        info!(path = %path.display(), users = table.len(), "User directory loaded");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the table, persist it, then commit.
    async fn mutate<T>(&self, change: impl FnOnce(&mut UserTable) -> Result<T>) -> Result<T> {
        let mut table = self.table.lock().await;
        let mut next = table.clone();
        let out = change(&mut next)?;
        persist(&self.path, &next).await?;
        *table = next;
        Ok(out)
    }
}

async fn persist(path: &Path, table: &UserTable) -> Result<()> {
    let json = serde_json::to_vec_pretty(&table.users())?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&tmp).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), users = table.len(), "User file written");
    Ok(())
}

#[async_trait]
impl UserDirectory for FileUserDirectory {
    async fn find_by_public_key(&self, public_key_der: &[u8]) -> Result<Option<User>> {
        Ok(self.table.lock().await.find_by_public_key(public_key_der))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.table.lock().await.find_by_id(id))
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let user = new_user.into_user(Utc::now());
        self.mutate(|table| table.insert(user)).await
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<User> {
        self.mutate(|table| table.update(id, |user| user.record_login(at)))
            .await
    }

    async fn update_display_name(&self, id: Uuid, display_name: String) -> Result<User> {
        self.mutate(|table| table.update(id, |user| user.display_name = display_name))
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.mutate(|table| table.remove(id).map(|_| ())).await
    }
}
